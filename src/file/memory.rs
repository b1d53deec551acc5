//! In-memory buffer backend.
//!
//! The [`crate::file::memory::Memory`] backend serves module bytes already resident in
//! memory - a buffer received over the wire, an image extracted from a core dump, or
//! test fixtures. Same bounds-checked access contract as the memory-mapped backend.

use super::Backend;
use crate::{Error::OutOfBounds, Result};

/// Module image backed by an owned byte buffer.
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Take ownership of `data` as the module image.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }
}

impl Backend for Memory {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };

        if offset_end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
