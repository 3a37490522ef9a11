//! Physical memory window over a memory device (`/dev/mem`, `/dev/gpiomem`)
//!
//! The chip base address does not have to be page aligned: the mapping starts
//! at the enclosing page and register offsets are shifted by the remainder.

use super::{check_access, Window};
use crate::error::{Error, Result};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::NonNull;

#[derive(Debug)]
pub struct PhysWindow {
    /// Start of the mapping (page aligned)
    map: NonNull<u8>,
    map_len: usize,
    /// Distance from the mapping start to the chip base
    delta: usize,
    size: usize,
    base: u64,
    fd: libc::c_int,
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

impl PhysWindow {
    /// Map `size` bytes of physical memory starting at `base`
    pub fn open(base: u64, size: usize, mem_path: &Path) -> Result<Self> {
        let map_err = |source: std::io::Error| Error::Map {
            path: mem_path.to_path_buf(),
            base,
            source,
        };

        if size == 0 {
            return Err(Error::InvalidBoard(format!("chip {base:#x} has a zero window size")));
        }
        if base % 4 != 0 {
            return Err(Error::InvalidBoard(format!(
                "chip base {base:#x} is not 32-bit aligned"
            )));
        }

        let page = page_size() as u64;
        let page_base = base & !(page - 1);
        let delta = (base - page_base) as usize;
        let map_len = size + delta;
        let offset = libc::off_t::try_from(page_base)
            .map_err(|_| map_err(std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;

        let path_cstr = CString::new(mem_path.as_os_str().as_bytes())
            .map_err(|_| map_err(std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;

        // SAFETY: path_cstr is a valid NUL-terminated string
        let fd = unsafe { libc::open(path_cstr.as_ptr(), libc::O_RDWR | libc::O_SYNC) };
        if fd < 0 {
            return Err(map_err(std::io::Error::last_os_error()));
        }

        // SAFETY: fd is open, map_len is non-zero and offset is page aligned.
        // MAP_SHARED so stores reach the device rather than a private copy.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            // SAFETY: fd was opened above and is not used afterwards
            unsafe { libc::close(fd) };
            return Err(map_err(err));
        }

        let Some(map) = NonNull::new(addr.cast::<u8>()) else {
            // SAFETY: fd was opened above and is not used afterwards
            unsafe { libc::close(fd) };
            return Err(map_err(std::io::Error::other("mmap returned null")));
        };

        log::debug!(
            "Mapped chip {base:#x} ({size:#x} bytes) from {}",
            mem_path.display()
        );

        Ok(Self {
            map,
            map_len,
            delta,
            size,
            base,
            fd,
        })
    }

    /// Unmap the window
    pub fn close(self) {
        drop(self);
    }

    #[inline]
    fn word(&self, offset: usize) -> *mut u32 {
        // SAFETY: callers validated offset + 4 <= size, so the word lies
        // inside the mapping that starts `delta` bytes before the chip base
        unsafe { self.map.as_ptr().add(self.delta + offset).cast::<u32>() }
    }
}

impl Window for PhysWindow {
    fn size(&self) -> usize {
        self.size
    }

    #[inline]
    fn read32(&self, offset: usize) -> Result<u32> {
        check_access(offset, self.size)?;
        // SAFETY: bounds and alignment checked; device registers need volatile
        // access so every read reaches the hardware
        Ok(unsafe { self.word(offset).read_volatile() })
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        check_access(offset, self.size)?;
        // SAFETY: bounds and alignment checked
        unsafe { self.word(offset).write_volatile(value) };
        Ok(())
    }
}

impl Drop for PhysWindow {
    fn drop(&mut self) {
        // SAFETY: map/map_len come from a successful mmap and fd from open;
        // both are released exactly once here
        unsafe {
            libc::munmap(self.map.as_ptr().cast(), self.map_len);
            libc::close(self.fd);
        }
        log::debug!("Unmapped chip {:#x}", self.base);
    }
}
