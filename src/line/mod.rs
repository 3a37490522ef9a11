//! Generic GPIO line abstraction
//!
//! The probe drives pins through the kernel's own GPIO interface so the
//! hardware does exactly what the kernel would do; the registers that move
//! are then attributed to the pin. A requested line is released when its
//! handle is dropped.

#[cfg(unix)]
pub mod cdev;

#[cfg(unix)]
pub use cdev::CdevLines;

use crate::error::Result;
use crate::registry::PinKey;

/// A line requested as output
pub trait OutputLine {
    fn set_value(&mut self, value: bool) -> Result<()>;
}

/// Something that can hand out output lines by [`PinKey`]
pub trait LineProvider {
    type Line: OutputLine;

    /// Request the line as an output, initially low
    fn request_output(&mut self, key: PinKey) -> Result<Self::Line>;
}
