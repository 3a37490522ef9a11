//! Direct register I/O
//!
//! Reads and drives a discovered pin straight through its chip window.
//! [`DirectPin`] does a read-modify-write on every call. [`CachedPin`]
//! samples the output registers once and afterwards only stores
//! precomputed words, which is only correct while nothing else changes the
//! other bits of a shared data register.

use crate::error::Result;
use crate::registry::{Pin, PinKey, PinRegisters, Register};
use crate::window::{Window, WindowMap};

/// Read-modify-write access to one pin
pub struct DirectPin<'a> {
    key: PinKey,
    window: &'a dyn Window,
    regs: PinRegisters,
}

impl<'a> DirectPin<'a> {
    pub fn new(pin: &Pin, windows: &'a WindowMap) -> Result<Self> {
        let resolved = pin.resolved()?;
        Ok(Self {
            key: pin.key,
            window: windows.get(resolved.window)?,
            regs: resolved.registers,
        })
    }

    pub fn key(&self) -> PinKey {
        self.key
    }

    /// Logical level from the input data register
    #[inline]
    pub fn read(&self) -> Result<bool> {
        let value = self.window.read32(self.regs.in_on.offset)?;
        Ok(value & self.regs.in_on.mask != 0)
    }

    #[inline]
    pub fn write(&self, value: bool) -> Result<()> {
        let reg = self.output(value);
        let current = self.window.read32(reg.offset)?;
        self.window.write32(reg.offset, reg.apply(current))
    }

    fn output(&self, value: bool) -> &Register {
        if value {
            &self.regs.out_on
        } else {
            &self.regs.out_off
        }
    }

    /// Precompute the output words for store-only writes
    pub fn cached(&self) -> Result<CachedPin<'a>> {
        CachedPin::from_direct(self)
    }
}

/// Store-only access with output words computed once
pub struct CachedPin<'a> {
    key: PinKey,
    window: &'a dyn Window,
    on: (usize, u32),
    off: (usize, u32),
}

impl<'a> CachedPin<'a> {
    pub fn prepare(pin: &Pin, windows: &'a WindowMap) -> Result<Self> {
        DirectPin::new(pin, windows)?.cached()
    }

    fn from_direct(direct: &DirectPin<'a>) -> Result<Self> {
        let regs = &direct.regs;
        let window = direct.window;

        let (on, off) = if regs.shares_output_register() {
            let baseline = window.read32(regs.out_on.offset)?;
            (
                (regs.out_on.offset, regs.out_on.apply(baseline)),
                (regs.out_off.offset, regs.out_off.apply(baseline)),
            )
        } else {
            // Set/clear registers only act on the bits written as one
            let on_base = window.read32(regs.out_on.offset)?;
            let off_base = window.read32(regs.out_off.offset)?;
            (
                (regs.out_on.offset, regs.out_on.apply(on_base)),
                (regs.out_off.offset, regs.out_off.apply(off_base)),
            )
        };

        log::debug!(
            "Pin {}: cached on {:#04x}={:#010x}, off {:#04x}={:#010x}",
            direct.key,
            on.0,
            on.1,
            off.0,
            off.1
        );
        Ok(Self {
            key: direct.key,
            window,
            on,
            off,
        })
    }

    pub fn key(&self) -> PinKey {
        self.key
    }

    #[inline]
    pub fn set(&self, value: bool) -> Result<()> {
        let (offset, word) = if value { self.on } else { self.off };
        self.window.write32(offset, word)
    }

    /// Drive high then low
    #[inline]
    pub fn pulse(&self) -> Result<()> {
        self.window.write32(self.on.0, self.on.1)?;
        self.window.write32(self.off.0, self.off.1)
    }
}
