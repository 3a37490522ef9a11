//! Pin registry data model
//!
//! A pin map is a sorted set of [`Pin`]s keyed by [`PinKey`]. Seed pins carry
//! only a key and a name; the probe attaches a [`Resolved`] register set to
//! each pin it can identify.
//!
//! Every pin has four registers. Each register records how its mask is
//! applied:
//!
//! | Polarity       | Write                   | Mask holds         |
//! |----------------|-------------------------|--------------------|
//! | `Assert`       | `reg = reg \| mask`     | the bits to set    |
//! | `ClearViaAnd`  | `reg = reg & mask`      | complement of bits |
//!
//! `ClearViaAnd` only appears on `OUT_OFF` when it shares its register with
//! `OUT_ON` (one data register driven both ways). Dedicated set/clear
//! registers are both `Assert`.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identity of a GPIO line: chip index, then line number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PinKey {
    pub chip: u32,
    pub line: u32,
}

impl PinKey {
    pub const fn new(chip: u32, line: u32) -> Self {
        Self { chip, line }
    }
}

impl fmt::Display for PinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.chip, self.line)
    }
}

impl FromStr for PinKey {
    type Err = String;

    /// Parse `<chip>.<line>`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (chip, line) = s
            .trim()
            .split_once('.')
            .ok_or_else(|| format!("expected <chip>.<line>, got `{s}`"))?;
        let chip = chip
            .parse()
            .map_err(|_| format!("bad chip index `{chip}`"))?;
        let line = line
            .parse()
            .map_err(|_| format!("bad line number `{line}`"))?;
        Ok(Self { chip, line })
    }
}

/// Which aspect of a pin a register controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    InOn,
    InOff,
    OutOn,
    OutOff,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::InOn, Role::InOff, Role::OutOn, Role::OutOff];

    /// Tag used in pin-map files
    pub fn tag(self) -> &'static str {
        match self {
            Role::InOn => "IN_ON",
            Role::InOff => "IN_OFF",
            Role::OutOn => "OUT_ON",
            Role::OutOff => "OUT_OFF",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.tag() == tag)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// How a register's mask is combined with the current register value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// OR the mask in
    Assert,
    /// AND with the mask; the mask is the complement of the cleared bits
    ClearViaAnd,
}

/// One register of a pin: offset inside the chip window plus encoded mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub role: Role,
    pub offset: usize,
    pub mask: u32,
    pub polarity: Polarity,
}

impl Register {
    /// A register asserted with OR. The mask must be non-zero.
    pub fn assert(role: Role, offset: usize, mask: u32) -> Option<Self> {
        (mask != 0).then_some(Self {
            role,
            offset,
            mask,
            polarity: Polarity::Assert,
        })
    }

    /// The bits this register affects, independent of encoding
    pub fn bits(&self) -> u32 {
        match self.polarity {
            Polarity::Assert => self.mask,
            Polarity::ClearViaAnd => !self.mask,
        }
    }

    /// Combine the mask with the current register value
    #[inline]
    pub fn apply(&self, current: u32) -> u32 {
        match self.polarity {
            Polarity::Assert => current | self.mask,
            Polarity::ClearViaAnd => current & self.mask,
        }
    }

    /// Check the register fits a window of `size` bytes
    pub fn check_bounds(&self, size: usize) -> Result<()> {
        match self.offset.checked_add(4) {
            Some(end) if end <= size => Ok(()),
            _ => Err(Error::RegisterOutOfBounds {
                offset: self.offset,
                size,
            }),
        }
    }
}

/// The four registers of a discovered pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinRegisters {
    pub in_on: Register,
    pub in_off: Register,
    pub out_on: Register,
    pub out_off: Register,
}

impl PinRegisters {
    /// Build from raw offsets sharing one raw mask, applying the polarity fixup:
    /// when `OUT_ON` and `OUT_OFF` share a register, `OUT_OFF` clears via AND.
    pub fn from_probe(key: PinKey, offsets: [usize; 4], mask: u32) -> Result<Self> {
        let reg = |role: Role, offset: usize| {
            Register::assert(role, offset, mask).ok_or_else(|| Error::Polarity {
                key,
                message: "register mask is zero".to_string(),
            })
        };
        let [in_on, in_off, out_on, out_off] = offsets;
        let mut out_off = reg(Role::OutOff, out_off)?;
        if out_off.offset == out_on {
            if mask == u32::MAX {
                return Err(Error::Polarity {
                    key,
                    message: "change covers the whole shared register, nothing left to keep"
                        .to_string(),
                });
            }
            out_off.mask = !mask;
            out_off.polarity = Polarity::ClearViaAnd;
        }
        Self::new(
            key,
            reg(Role::InOn, in_on)?,
            reg(Role::InOff, in_off)?,
            reg(Role::OutOn, out_on)?,
            out_off,
        )
    }

    /// Build from already-encoded registers, checking the polarity invariant
    pub fn new(
        key: PinKey,
        in_on: Register,
        in_off: Register,
        out_on: Register,
        out_off: Register,
    ) -> Result<Self> {
        let fail = |message: String| Err(Error::Polarity { key, message });

        for reg in [&in_on, &in_off, &out_on, &out_off] {
            if reg.mask == 0 {
                return fail(format!("{} mask is zero", reg.role));
            }
        }
        if out_on.polarity != Polarity::Assert {
            return fail("OUT_ON must be asserted with OR".to_string());
        }

        if out_on.offset == out_off.offset {
            if out_off.polarity != Polarity::ClearViaAnd || out_off.mask != !out_on.mask {
                return fail(format!(
                    "shared register {:#x}: OUT_OFF mask {:#010x} is not !{:#010x}",
                    out_on.offset, out_off.mask, out_on.mask
                ));
            }
        } else if out_off.polarity != Polarity::Assert {
            return fail("dedicated OUT_OFF register must be asserted with OR".to_string());
        }

        Ok(Self {
            in_on,
            in_off,
            out_on,
            out_off,
        })
    }

    /// One data register driven both ways
    pub fn shares_output_register(&self) -> bool {
        self.out_on.offset == self.out_off.offset
    }

    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        [&self.in_on, &self.in_off, &self.out_on, &self.out_off].into_iter()
    }
}

/// Index of a mapped chip window in the run's [`crate::window::WindowMap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub usize);

/// Registers found for a pin, and where they live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub group: String,
    pub window: WindowId,
    pub registers: PinRegisters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub key: PinKey,
    pub name: String,
    pub resolved: Option<Resolved>,
}

impl Pin {
    /// A seed pin, not yet probed
    pub fn new(key: PinKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            resolved: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    pub fn resolved(&self) -> Result<&Resolved> {
        self.resolved.as_ref().ok_or(Error::Unresolved(self.key))
    }
}

/// Sorted pin map with unique keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinRegistry {
    pins: BTreeMap<PinKey, Pin>,
}

impl PinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pin, rejecting duplicate keys
    pub fn insert(&mut self, pin: Pin) -> Result<()> {
        if self.pins.contains_key(&pin.key) {
            return Err(Error::DuplicatePin(pin.key));
        }
        self.pins.insert(pin.key, pin);
        Ok(())
    }

    pub fn get(&self, key: PinKey) -> Result<&Pin> {
        self.pins.get(&key).ok_or(Error::UnknownPin(key))
    }

    pub fn get_mut(&mut self, key: PinKey) -> Option<&mut Pin> {
        self.pins.get_mut(&key)
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub fn resolved_count(&self) -> usize {
        self.pins.values().filter(|p| p.is_resolved()).count()
    }

    /// Pins in key order
    pub fn pins(&self) -> impl Iterator<Item = &Pin> {
        self.pins.values()
    }

    pub fn pins_mut(&mut self) -> impl Iterator<Item = &mut Pin> {
        self.pins.values_mut()
    }
}
