use objscope_channel::ChannelError;
use objscope_primitives::{EntityHandle, SignatureError};

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced to engine callers.
///
/// Per-entity and per-window channel failures never appear here; they are
/// absorbed into the [`crate::EnumerationReport`] of the pass that saw them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
	#[error("target process is not stopped")]
	TargetNotStopped,

	#[error("no inspected process")]
	NoProcess,

	/// A superclass chain revisited an entity or exceeded its step bound.
	#[error("superclass cycle walking from {start}: reached {at} after {steps} steps")]
	CycleDetected {
		start: EntityHandle,
		at: EntityHandle,
		steps: usize,
	},

	/// The external cancellation signal fired between windows.
	#[error("enumeration cancelled")]
	Cancelled,

	/// The enumeration leader exited without publishing an outcome.
	#[error("enumeration abandoned by its leader")]
	Abandoned,

	/// The class list itself could not be obtained.
	#[error("class enumeration failed: {0}")]
	Enumeration(ChannelError),

	#[error("member metadata for {handle} unavailable: {source}")]
	Members {
		handle: EntityHandle,
		source: ChannelError,
	},

	#[error(transparent)]
	Signature(#[from] SignatureError),

	#[error("class {0:?} not found")]
	ClassNotFound(String),

	#[error("selector {0:?} is not registered")]
	SelectorNotFound(String),

	#[error("no implementation for {0}")]
	ImplementationNotFound(String),

	#[error(transparent)]
	Channel(ChannelError),
}

impl From<ChannelError> for EngineError {
	fn from(err: ChannelError) -> Self {
		match err {
			ChannelError::TargetNotStopped => EngineError::TargetNotStopped,
			ChannelError::NoProcess => EngineError::NoProcess,
			other => EngineError::Channel(other),
		}
	}
}

impl EngineError {
	/// Precondition failures that abort any operation.
	pub fn is_precondition(&self) -> bool {
		matches!(self, EngineError::TargetNotStopped | EngineError::NoProcess)
	}
}
