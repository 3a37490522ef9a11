//! GPIO character device lines (`/dev/gpiochipN`, uAPI v1 line handles)

use super::{LineProvider, OutputLine};
use crate::error::{Error, Result};
use crate::registry::PinKey;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::PathBuf;

const GPIOHANDLES_MAX: usize = 64;
const GPIOHANDLE_REQUEST_OUTPUT: u32 = 1 << 1;

/// `struct gpiohandle_request` from `<linux/gpio.h>`
#[repr(C)]
struct HandleRequest {
    line_offsets: [u32; GPIOHANDLES_MAX],
    flags: u32,
    default_values: [u8; GPIOHANDLES_MAX],
    consumer_label: [u8; 32],
    lines: u32,
    fd: libc::c_int,
}

/// `struct gpiohandle_data`
#[repr(C)]
struct HandleData {
    values: [u8; GPIOHANDLES_MAX],
}

const fn iowr(nr: u32, size: usize) -> u32 {
    (3 << 30) | ((size as u32) << 16) | (0xB4 << 8) | nr
}

const GPIO_GET_LINEHANDLE_IOCTL: u32 = iowr(0x03, std::mem::size_of::<HandleRequest>());
const GPIOHANDLE_SET_LINE_VALUES_IOCTL: u32 = iowr(0x09, std::mem::size_of::<HandleData>());

/// Lines served by the kernel GPIO character devices
#[derive(Debug, Clone)]
pub struct CdevLines {
    /// Device node number for each chip index (`gpio.dev`)
    dev_nodes: Vec<u32>,
    dev_dir: PathBuf,
    consumer: String,
}

impl CdevLines {
    pub fn new(dev_nodes: Vec<u32>) -> Self {
        Self {
            dev_nodes,
            dev_dir: PathBuf::from("/dev"),
            consumer: "gpio-regmap".to_string(),
        }
    }

    /// Look for `gpiochipN` nodes somewhere other than `/dev`
    pub fn with_dev_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dev_dir = dir.into();
        self
    }

    fn chip_path(&self, key: PinKey) -> Result<PathBuf> {
        let node = self
            .dev_nodes
            .get(key.chip as usize)
            .ok_or_else(|| Error::HardwareIo {
                key,
                message: format!("no gpio.dev entry for chip {}", key.chip),
                source: None,
            })?;
        Ok(self.dev_dir.join(format!("gpiochip{node}")))
    }
}

impl LineProvider for CdevLines {
    type Line = CdevLine;

    fn request_output(&mut self, key: PinKey) -> Result<CdevLine> {
        let path = self.chip_path(key)?;
        let chip: File = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::hardware(key, format!("cannot open {}", path.display()), e))?;

        let mut request = HandleRequest {
            line_offsets: [0; GPIOHANDLES_MAX],
            flags: GPIOHANDLE_REQUEST_OUTPUT,
            default_values: [0; GPIOHANDLES_MAX],
            consumer_label: [0; 32],
            lines: 1,
            fd: -1,
        };
        request.line_offsets[0] = key.line;
        let label = self.consumer.as_bytes();
        let len = label.len().min(31);
        request.consumer_label[..len].copy_from_slice(&label[..len]);

        // SAFETY: chip is an open gpiochip fd and request matches the kernel
        // layout for GPIO_GET_LINEHANDLE_IOCTL
        let rc = unsafe {
            libc::ioctl(
                chip.as_raw_fd(),
                GPIO_GET_LINEHANDLE_IOCTL as _,
                &mut request as *mut HandleRequest,
            )
        };
        if rc < 0 {
            return Err(Error::hardware(
                key,
                "line request failed",
                std::io::Error::last_os_error(),
            ));
        }

        // SAFETY: on success the kernel returned a fresh fd we now own
        let fd = unsafe { OwnedFd::from_raw_fd(request.fd) };
        log::trace!("Requested line {key} as output");
        Ok(CdevLine { fd, key })
    }
}

/// Requested output line; released on drop
#[derive(Debug)]
pub struct CdevLine {
    fd: OwnedFd,
    key: PinKey,
}

impl OutputLine for CdevLine {
    fn set_value(&mut self, value: bool) -> Result<()> {
        let mut data = HandleData {
            values: [0; GPIOHANDLES_MAX],
        };
        data.values[0] = u8::from(value);

        // SAFETY: fd is a line handle and data matches gpiohandle_data
        let rc = unsafe {
            libc::ioctl(
                self.fd.as_raw_fd(),
                GPIOHANDLE_SET_LINE_VALUES_IOCTL as _,
                &mut data as *mut HandleData,
            )
        };
        if rc < 0 {
            return Err(Error::hardware(
                self.key,
                format!("cannot drive line to {}", u8::from(value)),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }
}
