//! Resizable payload storage with shrink hysteresis.

use std::collections::TryReserveError;

/// A shrink only reallocates when it frees at least this many bytes.
pub const SHRINK_THRESHOLD: usize = 1024;

/// Heap storage whose logical length can move independently of capacity.
///
/// Growing past capacity reallocates immediately. Shrinking keeps the current
/// allocation unless the new length is at least `SHRINK_THRESHOLD` bytes below
/// capacity, so alternating small requests do not churn the allocator.
#[derive(Debug, Clone, Default)]
pub struct PayloadBuffer {
    storage: Box<[u8]>,
    len: usize,
}

impl PayloadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer holding a copy of `bytes`, sized exactly.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            storage: bytes.into(),
            len: bytes.len(),
        }
    }

    fn needs_reallocation(&self, len: usize) -> bool {
        let capacity = self.storage.len();
        len > capacity || capacity - len >= SHRINK_THRESHOLD
    }

    fn replace_storage(&mut self, mut storage: Box<[u8]>) {
        let keep = self.len.min(storage.len());
        storage[..keep].copy_from_slice(&self.storage[..keep]);
        self.storage = storage;
    }

    /// Set the logical length, reallocating per the hysteresis policy.
    ///
    /// Bytes below the smaller of the old and new lengths are preserved.
    pub fn resize(&mut self, len: usize) {
        if self.needs_reallocation(len) {
            self.replace_storage(vec![0u8; len].into_boxed_slice());
        }
        self.len = len;
    }

    /// Like `resize`, but reports a length that cannot be allocated instead
    /// of aborting. The buffer is left untouched on failure.
    pub fn try_resize(&mut self, len: usize) -> Result<(), TryReserveError> {
        if self.needs_reallocation(len) {
            let mut storage = Vec::new();
            storage.try_reserve_exact(len)?;
            storage.resize(len, 0);
            self.replace_storage(storage.into_boxed_slice());
        }
        self.len = len;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the backing allocation.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Address of the backing allocation.
    pub fn as_ptr(&self) -> *const u8 {
        self.storage.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[..self.len]
    }
}
