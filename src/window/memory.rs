//! Heap-backed window
//!
//! Behaves like plain RAM: a write is read back unchanged. Used for dry runs
//! of a board file.

use super::{check_access, Window};
use crate::error::Result;
use std::cell::Cell;

#[derive(Debug)]
pub struct MemoryWindow {
    words: Vec<Cell<u32>>,
    size: usize,
}

impl MemoryWindow {
    /// A zero-filled window of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            words: vec![Cell::new(0); size.div_ceil(4)],
            size,
        }
    }
}

impl Window for MemoryWindow {
    fn size(&self) -> usize {
        self.size
    }

    fn read32(&self, offset: usize) -> Result<u32> {
        check_access(offset, self.size)?;
        Ok(self.words[offset / 4].get())
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        check_access(offset, self.size)?;
        self.words[offset / 4].set(value);
        Ok(())
    }
}
