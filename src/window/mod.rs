//! Physical window map
//!
//! One memory-mapped window per chip. Registers are addressed by byte offset
//! inside their chip's window and accessed as 32-bit words.
//!
//! Windows take `&self` for writes: they wrap device memory, not Rust-owned
//! data. Nothing here locks; callers that share a chip across threads or
//! processes must synchronise themselves.

pub mod memory;
#[cfg(unix)]
pub mod phys;

pub use memory::MemoryWindow;
#[cfg(unix)]
pub use phys::PhysWindow;

use crate::board::BoardDescriptor;
use crate::error::{Error, Result};
use crate::registry::WindowId;
use std::rc::Rc;

/// Bounded 32-bit access to one chip's register window
pub trait Window {
    /// Window length in bytes
    fn size(&self) -> usize;

    fn read32(&self, offset: usize) -> Result<u32>;

    fn write32(&self, offset: usize, value: u32) -> Result<()>;
}

impl<W: Window + ?Sized> Window for Rc<W> {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn read32(&self, offset: usize) -> Result<u32> {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        (**self).write32(offset, value)
    }
}

/// Validate a 32-bit access at `offset` in a window of `size` bytes
pub fn check_access(offset: usize, size: usize) -> Result<()> {
    if offset % 4 != 0 {
        return Err(Error::MisalignedOffset { offset });
    }
    match offset.checked_add(4) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::RegisterOutOfBounds { offset, size }),
    }
}

/// Windows for every chip on the board, indexed by chip
#[derive(Default)]
pub struct WindowMap {
    windows: Vec<Box<dyn Window>>,
}

impl WindowMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map every chip of the board from its memory device
    #[cfg(unix)]
    pub fn open(board: &BoardDescriptor) -> Result<Self> {
        let mut map = Self::new();
        for chip in &board.chips {
            let window = PhysWindow::open(chip.base, chip.size, &board.mem_path)?;
            map.push(window);
        }
        Ok(map)
    }

    /// Heap-backed windows sized like the board's chips
    pub fn in_memory(board: &BoardDescriptor) -> Self {
        let mut map = Self::new();
        for chip in &board.chips {
            map.push(MemoryWindow::new(chip.size));
        }
        map
    }

    pub fn push(&mut self, window: impl Window + 'static) -> WindowId {
        self.windows.push(Box::new(window));
        WindowId(self.windows.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn get(&self, id: WindowId) -> Result<&dyn Window> {
        self.windows
            .get(id.0)
            .map(|w| w.as_ref())
            .ok_or_else(|| Error::InvalidBoard(format!("no window mapped for chip {}", id.0)))
    }

    pub fn read32(&self, id: WindowId, offset: usize) -> Result<u32> {
        self.get(id)?.read32(offset)
    }

    pub fn write32(&self, id: WindowId, offset: usize, value: u32) -> Result<()> {
        self.get(id)?.write32(offset, value)
    }
}
