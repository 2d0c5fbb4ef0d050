//! Binary layouts of aggregate results.
//!
//! # Role
//!
//! Aggregate-producing expressions leave a little-endian buffer in the
//! target: a `u64` record count followed by fixed-size records. Variable
//! length data (names, type encodings, protocol lists) is referenced by
//! pointer and length and fetched with further memory reads.
//!
//! # Invariants
//!
//! - Decoding never calls [`AccessChannel::evaluate`]; only `read_memory`.
//! - A record whose [`RecordFlags::RESOLVED`] bit is clear carries no data
//!   beyond its handle.

use bitflags::bitflags;

use crate::channel::{AccessChannel, ChannelError, Result, Value};

/// Size of the count prefix of every aggregate.
pub const HEADER_SIZE: usize = 8;
/// Size of one entity record.
pub const ENTITY_RECORD_SIZE: usize = 48;
/// Size of one `(ptr, len)` string reference.
pub const STRING_REF_SIZE: usize = 16;
/// Size of the member table record.
pub const MEMBER_TABLE_SIZE: usize = 32;
pub const METHOD_ENTRY_SIZE: usize = 40;
pub const IVAR_ENTRY_SIZE: usize = 40;
pub const PROPERTY_ENTRY_SIZE: usize = 32;
/// Size of the method implementation record.
pub const METHOD_IMP_SIZE: usize = 32;

/// Upper bound on a single string read; longer lengths are treated as corrupt.
pub const MAX_STRING_LEN: usize = 4096;

bitflags! {
	/// Flags word of an entity record.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct RecordFlags: u32 {
		const METACLASS = 1 << 0;
		const RESOLVED = 1 << 1;
	}
}

#[inline]
fn u64_at(bytes: &[u8], offset: usize) -> u64 {
	let mut word = [0u8; 8];
	word.copy_from_slice(&bytes[offset..offset + 8]);
	u64::from_le_bytes(word)
}

#[inline]
fn u32_at(bytes: &[u8], offset: usize) -> u32 {
	let mut word = [0u8; 4];
	word.copy_from_slice(&bytes[offset..offset + 4]);
	u32::from_le_bytes(word)
}

#[inline]
fn u16_at(bytes: &[u8], offset: usize) -> u16 {
	u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// Pointer and length of a target string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StringRef {
	pub ptr: u64,
	pub len: u64,
}

impl StringRef {
	pub fn decode(bytes: &[u8]) -> Self {
		Self {
			ptr: u64_at(bytes, 0),
			len: u64_at(bytes, 8),
		}
	}

	pub fn encode(&self, out: &mut Vec<u8>) {
		out.extend_from_slice(&self.ptr.to_le_bytes());
		out.extend_from_slice(&self.len.to_le_bytes());
	}
}

/// One entity as laid out by window and named resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityRecord {
	pub handle: u64,
	pub name: StringRef,
	pub superclass: u64,
	pub protocols: u64,
	pub protocol_count: u32,
	pub flags: RecordFlags,
}

impl Default for RecordFlags {
	fn default() -> Self {
		RecordFlags::empty()
	}
}

impl EntityRecord {
	/// Decodes one record. `bytes` must hold at least [`ENTITY_RECORD_SIZE`] bytes.
	pub fn decode(bytes: &[u8]) -> Self {
		Self {
			handle: u64_at(bytes, 0),
			name: StringRef {
				ptr: u64_at(bytes, 8),
				len: u64::from(u32_at(bytes, 32)),
			},
			superclass: u64_at(bytes, 16),
			protocols: u64_at(bytes, 24),
			flags: RecordFlags::from_bits_truncate(u32_at(bytes, 36)),
			protocol_count: u32_at(bytes, 40),
		}
	}

	pub fn encode(&self, out: &mut Vec<u8>) {
		out.extend_from_slice(&self.handle.to_le_bytes());
		out.extend_from_slice(&self.name.ptr.to_le_bytes());
		out.extend_from_slice(&self.superclass.to_le_bytes());
		out.extend_from_slice(&self.protocols.to_le_bytes());
		out.extend_from_slice(&(self.name.len as u32).to_le_bytes());
		out.extend_from_slice(&self.flags.bits().to_le_bytes());
		out.extend_from_slice(&self.protocol_count.to_le_bytes());
		out.extend_from_slice(&0u32.to_le_bytes());
	}

	pub fn is_resolved(&self) -> bool {
		self.flags.contains(RecordFlags::RESOLVED) && self.handle != 0
	}

	pub fn is_metaclass(&self) -> bool {
		self.flags.contains(RecordFlags::METACLASS)
	}
}

/// Pointers and counts of the member arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemberTable {
	pub methods: u64,
	pub ivars: u64,
	pub properties: u64,
	pub method_count: u16,
	pub class_method_count: u16,
	pub ivar_count: u16,
	pub property_count: u16,
}

impl MemberTable {
	pub fn decode(bytes: &[u8]) -> Self {
		Self {
			methods: u64_at(bytes, 0),
			ivars: u64_at(bytes, 8),
			properties: u64_at(bytes, 16),
			method_count: u16_at(bytes, 24),
			class_method_count: u16_at(bytes, 26),
			ivar_count: u16_at(bytes, 28),
			property_count: u16_at(bytes, 30),
		}
	}

	pub fn encode(&self, out: &mut Vec<u8>) {
		out.extend_from_slice(&self.methods.to_le_bytes());
		out.extend_from_slice(&self.ivars.to_le_bytes());
		out.extend_from_slice(&self.properties.to_le_bytes());
		for count in [
			self.method_count,
			self.class_method_count,
			self.ivar_count,
			self.property_count,
		] {
			out.extend_from_slice(&count.to_le_bytes());
		}
	}
}

/// Method entry: selector, type encoding and IMP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodEntry {
	pub selector: StringRef,
	pub types: StringRef,
	pub imp: u64,
}

impl MethodEntry {
	pub fn decode(bytes: &[u8]) -> Self {
		Self {
			selector: StringRef::decode(&bytes[0..16]),
			types: StringRef::decode(&bytes[16..32]),
			imp: u64_at(bytes, 32),
		}
	}

	pub fn encode(&self, out: &mut Vec<u8>) {
		self.selector.encode(out);
		self.types.encode(out);
		out.extend_from_slice(&self.imp.to_le_bytes());
	}
}

/// Ivar entry: name, type encoding and byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IvarEntry {
	pub name: StringRef,
	pub types: StringRef,
	pub offset: u64,
}

impl IvarEntry {
	pub fn decode(bytes: &[u8]) -> Self {
		Self {
			name: StringRef::decode(&bytes[0..16]),
			types: StringRef::decode(&bytes[16..32]),
			offset: u64_at(bytes, 32),
		}
	}

	pub fn encode(&self, out: &mut Vec<u8>) {
		self.name.encode(out);
		self.types.encode(out);
		out.extend_from_slice(&self.offset.to_le_bytes());
	}
}

/// Property entry: name and attribute string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropertyEntry {
	pub name: StringRef,
	pub attributes: StringRef,
}

impl PropertyEntry {
	pub fn decode(bytes: &[u8]) -> Self {
		Self {
			name: StringRef::decode(&bytes[0..16]),
			attributes: StringRef::decode(&bytes[16..32]),
		}
	}

	pub fn encode(&self, out: &mut Vec<u8>) {
		self.name.encode(out);
		self.attributes.encode(out);
	}
}

/// Result of method implementation lookup. Zero words mark the failing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodImpRecord {
	pub class: u64,
	pub selector: u64,
	pub lookup_class: u64,
	pub imp: u64,
}

impl MethodImpRecord {
	pub fn decode(bytes: &[u8]) -> Self {
		Self {
			class: u64_at(bytes, 0),
			selector: u64_at(bytes, 8),
			lookup_class: u64_at(bytes, 16),
			imp: u64_at(bytes, 24),
		}
	}

	pub fn encode(&self, out: &mut Vec<u8>) {
		for word in [self.class, self.selector, self.lookup_class, self.imp] {
			out.extend_from_slice(&word.to_le_bytes());
		}
	}
}

/// Reads exactly `len` bytes at `address`.
///
/// A host may return fewer bytes than asked for when the range runs into
/// unmapped memory; the missing tail is reported as an invalid address.
pub fn read_exact<C>(channel: &C, address: u64, len: usize) -> Result<Vec<u8>>
where
	C: AccessChannel + ?Sized,
{
	let mut bytes = channel.read_memory(address, len)?;
	if bytes.len() < len {
		let got = bytes.len();
		return Err(ChannelError::InvalidAddress {
			address: address.saturating_add(got as u64),
			len: len - got,
		});
	}
	bytes.truncate(len);
	Ok(bytes)
}

/// Reads an aggregate's count and its records in two memory reads.
///
/// Returns the raw record bytes, exactly `count * record_size` long.
pub fn read_aggregate<C>(channel: &C, value: Value, record_size: usize) -> Result<(usize, Vec<u8>)>
where
	C: AccessChannel + ?Sized,
{
	let address = value.aggregate_address()?;
	let header = read_exact(channel, address, HEADER_SIZE)?;
	let count = usize::try_from(u64_at(&header, 0))
		.map_err(|_| ChannelError::UnexpectedValue("aggregate count overflows usize".into()))?;
	if count == 0 {
		return Ok((0, Vec::new()));
	}
	let len = count
		.checked_mul(record_size)
		.ok_or_else(|| ChannelError::UnexpectedValue(format!("aggregate count {count} too large")))?;
	let records = address
		.checked_add(HEADER_SIZE as u64)
		.ok_or_else(|| ChannelError::UnexpectedValue(format!("aggregate at 0x{address:x} wraps")))?;
	let bytes = read_exact(channel, records, len)?;
	tracing::trace!(address, count, record_size, "read aggregate");
	Ok((count, bytes))
}

/// Reads a contiguous array of `count` fixed-size entries.
pub fn read_array<C>(channel: &C, address: u64, count: usize, entry_size: usize) -> Result<Vec<u8>>
where
	C: AccessChannel + ?Sized,
{
	if count == 0 {
		return Ok(Vec::new());
	}
	let len = count
		.checked_mul(entry_size)
		.ok_or_else(|| ChannelError::UnexpectedValue(format!("array of {count} entries too large")))?;
	read_exact(channel, address, len)
}

/// Reads a UTF-8 string referenced by `r`.
///
/// Nil pointers yield an empty string; oversized lengths are rejected as an
/// invalid address since they indicate a corrupt record. Invalid UTF-8 is
/// replaced lossily.
pub fn read_string<C>(channel: &C, r: StringRef) -> Result<String>
where
	C: AccessChannel + ?Sized,
{
	if r.ptr == 0 || r.len == 0 {
		return Ok(String::new());
	}
	let len = usize::try_from(r.len).unwrap_or(usize::MAX);
	if len > MAX_STRING_LEN {
		return Err(ChannelError::InvalidAddress { address: r.ptr, len });
	}
	let bytes = channel.read_memory(r.ptr, len)?;
	Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
	use objscope_primitives::ProcessIdentity;
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::channel::EvalOptions;
	use crate::expr::Expr;

	/// Host bridge that hands back at most `limit` bytes per read. Every read
	/// starts with a count word of 2.
	struct PartialReads {
		limit: usize,
	}

	impl AccessChannel for PartialReads {
		fn identity(&self) -> Option<ProcessIdentity> {
			Some(ProcessIdentity::new(1, 1))
		}

		fn is_stopped(&self) -> bool {
			true
		}

		fn evaluate(&self, _expr: &Expr, _options: EvalOptions) -> Result<Value> {
			Ok(Value::Aggregate(0x1000))
		}

		fn read_memory(&self, _address: u64, len: usize) -> Result<Vec<u8>> {
			let mut bytes = 2u64.to_le_bytes().to_vec();
			bytes.resize(len.min(self.limit), 0);
			Ok(bytes)
		}
	}

	#[test]
	fn short_header_read_is_an_invalid_address() {
		let channel = PartialReads { limit: 4 };
		assert_eq!(
			read_aggregate(&channel, Value::Aggregate(0x1000), ENTITY_RECORD_SIZE),
			Err(ChannelError::InvalidAddress { address: 0x1004, len: 4 })
		);
	}

	#[test]
	fn short_record_read_is_an_invalid_address() {
		let channel = PartialReads { limit: 20 };
		assert_eq!(
			read_aggregate(&channel, Value::Aggregate(0x1000), ENTITY_RECORD_SIZE),
			Err(ChannelError::InvalidAddress {
				address: 0x1008 + 20,
				len: 2 * ENTITY_RECORD_SIZE - 20,
			})
		);
		assert_eq!(
			read_array(&channel, 0x2000, 3, STRING_REF_SIZE),
			Err(ChannelError::InvalidAddress {
				address: 0x2000 + 20,
				len: 3 * STRING_REF_SIZE - 20,
			})
		);
	}

	#[test]
	fn complete_reads_decode() {
		let channel = PartialReads { limit: usize::MAX };
		let (count, bytes) = read_aggregate(&channel, Value::Aggregate(0x1000), METHOD_IMP_SIZE).unwrap();
		assert_eq!(count, 2);
		assert_eq!(bytes.len(), 2 * METHOD_IMP_SIZE);
	}

	#[test]
	fn aggregate_at_top_of_address_space_is_rejected() {
		let channel = PartialReads { limit: usize::MAX };
		assert!(matches!(
			read_aggregate(&channel, Value::Aggregate(u64::MAX - 4), 8),
			Err(ChannelError::UnexpectedValue(_))
		));
	}

	#[test]
	fn entity_record_field_offsets() {
		let record = EntityRecord {
			handle: 0x1000,
			name: StringRef { ptr: 0x2000, len: 8 },
			superclass: 0x3000,
			protocols: 0x4000,
			protocol_count: 2,
			flags: RecordFlags::RESOLVED | RecordFlags::METACLASS,
		};
		let mut bytes = Vec::new();
		record.encode(&mut bytes);
		assert_eq!(bytes.len(), ENTITY_RECORD_SIZE);
		assert_eq!(&bytes[16..24], &0x3000u64.to_le_bytes());
		assert_eq!(&bytes[32..36], &8u32.to_le_bytes());
		assert_eq!(EntityRecord::decode(&bytes), record);
		assert!(record.is_resolved());
		assert!(record.is_metaclass());
	}

	#[test]
	fn unresolved_record_is_not_resolved() {
		let record = EntityRecord {
			handle: 0x1000,
			..Default::default()
		};
		assert!(!record.is_resolved());
	}

	#[test]
	fn entry_sizes_match_constants() {
		let mut out = Vec::new();
		MethodEntry::default().encode(&mut out);
		assert_eq!(out.len(), METHOD_ENTRY_SIZE);
		out.clear();
		IvarEntry::default().encode(&mut out);
		assert_eq!(out.len(), IVAR_ENTRY_SIZE);
		out.clear();
		PropertyEntry::default().encode(&mut out);
		assert_eq!(out.len(), PROPERTY_ENTRY_SIZE);
		out.clear();
		MemberTable::default().encode(&mut out);
		assert_eq!(out.len(), MEMBER_TABLE_SIZE);
		out.clear();
		MethodImpRecord::default().encode(&mut out);
		assert_eq!(out.len(), METHOD_IMP_SIZE);
	}
}
