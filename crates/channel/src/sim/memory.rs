use std::collections::BTreeMap;

use crate::channel::{ChannelError, Result};

/// Base of simulated heap allocations; far from class and IMP ranges.
const HEAP_BASE: u64 = 0x7000_0000_0000;
const ALIGN: u64 = 16;

/// Sparse simulated address space of mapped regions.
#[derive(Debug, Default)]
pub(super) struct Memory {
	regions: BTreeMap<u64, Vec<u8>>,
	next: u64,
}

impl Memory {
	pub fn new() -> Self {
		Self {
			regions: BTreeMap::new(),
			next: HEAP_BASE,
		}
	}

	/// Maps `bytes` at a fresh address and returns it.
	pub fn alloc(&mut self, bytes: Vec<u8>) -> u64 {
		let addr = self.next;
		let len = (bytes.len() as u64).max(1);
		self.next += len.div_ceil(ALIGN) * ALIGN + ALIGN;
		self.regions.insert(addr, bytes);
		addr
	}

	/// Maps a string (without terminator) and returns its address and length.
	pub fn alloc_str(&mut self, s: &str) -> (u64, u64) {
		let len = s.len() as u64;
		(self.alloc(s.as_bytes().to_vec()), len)
	}

	/// Copies `len` bytes at `address`; the whole span must lie in one region.
	pub fn read(&self, address: u64, len: usize) -> Result<Vec<u8>> {
		let invalid = ChannelError::InvalidAddress { address, len };
		let Some((&start, region)) = self.regions.range(..=address).next_back() else {
			return Err(invalid);
		};
		let offset = (address - start) as usize;
		let Some(end) = offset.checked_add(len) else {
			return Err(invalid);
		};
		if end > region.len() {
			return Err(invalid);
		}
		Ok(region[offset..end].to_vec())
	}

	pub fn region_count(&self) -> usize {
		self.regions.len()
	}
}
