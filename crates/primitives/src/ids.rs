use std::fmt;

/// Stable identifier for one inspected-process lifetime.
///
/// A relaunch of the same executable yields the same `pid` only by accident;
/// `launch_epoch` disambiguates it, so two identities compare equal only when
/// they describe the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessIdentity {
	/// Operating-system process id.
	pub pid: u32,
	/// Host-assigned launch counter or timestamp for this run.
	pub launch_epoch: u64,
}

impl ProcessIdentity {
	/// Creates a new identity.
	pub const fn new(pid: u32, launch_epoch: u64) -> Self {
		Self { pid, launch_epoch }
	}

	/// Returns true when `other` is a different run of the same pid.
	pub fn is_relaunch_of(&self, other: &ProcessIdentity) -> bool {
		self.pid == other.pid && self.launch_epoch != other.launch_epoch
	}
}

impl fmt::Display for ProcessIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "pid {} (epoch {})", self.pid, self.launch_epoch)
	}
}

/// Opaque target address of a class-like entity.
///
/// Only meaningful for the process run it was observed in. Zero is the
/// runtime's nil and never identifies an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(u64);

impl EntityHandle {
	/// Wraps a raw target address, rejecting nil.
	pub const fn new(addr: u64) -> Option<Self> {
		if addr == 0 { None } else { Some(Self(addr)) }
	}

	/// Returns the raw target address.
	#[inline]
	pub const fn addr(self) -> u64 {
		self.0
	}
}

impl fmt::Display for EntityHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{:x}", self.0)
	}
}
