//! Simulated GPIO hardware for tests
//!
//! A [`SimChip`] is a register window with two kinds of banks:
//!
//! - shared: one data register, read and written like memory
//! - dedicated: write-one-to-set and write-one-to-clear registers that read
//!   as zero, plus a read-only level register
//!
//! [`SimLines`] drives bits in those banks the way a kernel GPIO driver would.

use crate::board::store::parse_input_str;
use crate::board::BoardDescriptor;
use crate::error::{Error, Result};
use crate::line::{LineProvider, OutputLine};
use crate::registry::{PinKey, PinRegistry};
use crate::window::{check_access, Window, WindowMap};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

#[derive(Debug, Clone, Copy)]
pub enum Bank {
    Shared { data: usize },
    Dedicated { set: usize, clear: usize, level: usize },
}

impl Bank {
    fn level(&self) -> usize {
        match *self {
            Bank::Shared { data } => data,
            Bank::Dedicated { level, .. } => level,
        }
    }
}

#[derive(Debug)]
pub struct SimChip {
    words: RefCell<Vec<u32>>,
    size: usize,
    banks: Vec<Bank>,
    writes: Cell<usize>,
}

impl SimChip {
    pub fn new(size: usize, banks: Vec<Bank>) -> Rc<Self> {
        Rc::new(Self {
            words: RefCell::new(vec![0; size / 4]),
            size,
            banks,
            writes: Cell::new(0),
        })
    }

    /// Pin level as the hardware sees it
    pub fn level(&self, bank: usize, bit: u32) -> bool {
        let offset = self.banks[bank].level();
        self.words.borrow()[offset / 4] & (1 << bit) != 0
    }

    /// Flip the level of one bit, as the line driver would
    pub fn drive(&self, bank: usize, bit: u32, value: bool) {
        let offset = self.banks[bank].level();
        let mut words = self.words.borrow_mut();
        if value {
            words[offset / 4] |= 1 << bit;
        } else {
            words[offset / 4] &= !(1 << bit);
        }
    }

    /// Set a raw word, bypassing bank behaviour
    pub fn poke(&self, offset: usize, value: u32) {
        self.words.borrow_mut()[offset / 4] = value;
    }

    pub fn peek(&self, offset: usize) -> u32 {
        self.words.borrow()[offset / 4]
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }
}

impl Window for SimChip {
    fn size(&self) -> usize {
        self.size
    }

    fn read32(&self, offset: usize) -> Result<u32> {
        check_access(offset, self.size)?;
        let write_only = self.banks.iter().any(|b| {
            matches!(*b, Bank::Dedicated { set, clear, .. } if offset == set || offset == clear)
        });
        if write_only {
            return Ok(0);
        }
        Ok(self.words.borrow()[offset / 4])
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        check_access(offset, self.size)?;
        self.writes.set(self.writes.get() + 1);
        let mut words = self.words.borrow_mut();
        for bank in &self.banks {
            if let Bank::Dedicated { set, clear, level } = *bank {
                if offset == set {
                    words[level / 4] |= value;
                    return Ok(());
                }
                if offset == clear {
                    words[level / 4] &= !value;
                    return Ok(());
                }
            }
        }
        words[offset / 4] = value;
        Ok(())
    }
}

/// Where a line's bit lives
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub chip: usize,
    pub bank: usize,
    pub bit: u32,
}

/// Line provider wired to simulated chips
#[derive(Default)]
pub struct SimLines {
    chips: Vec<Rc<SimChip>>,
    routes: HashMap<PinKey, Route>,
    broken: HashSet<PinKey>,
    opened: Rc<Cell<usize>>,
    released: Rc<Cell<usize>>,
    writes: Rc<Cell<usize>>,
}

impl SimLines {
    pub fn new(chips: Vec<Rc<SimChip>>) -> Self {
        Self {
            chips,
            ..Default::default()
        }
    }

    pub fn route(mut self, key: PinKey, chip: usize, bank: usize, bit: u32) -> Self {
        self.routes.insert(key, Route { chip, bank, bit });
        self
    }

    /// Requests for this line fail like a busy or missing line
    pub fn broken(mut self, key: PinKey) -> Self {
        self.broken.insert(key);
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.get()
    }

    pub fn released(&self) -> usize {
        self.released.get()
    }

    /// Number of `set_value` calls over all lines
    pub fn writes(&self) -> usize {
        self.writes.get()
    }
}

pub struct SimLine {
    target: Option<(Rc<SimChip>, Route)>,
    released: Rc<Cell<usize>>,
    writes: Rc<Cell<usize>>,
}

impl OutputLine for SimLine {
    fn set_value(&mut self, value: bool) -> Result<()> {
        self.writes.set(self.writes.get() + 1);
        // Unrouted lines exist but drive nothing observable
        if let Some((chip, route)) = &self.target {
            chip.drive(route.bank, route.bit, value);
        }
        Ok(())
    }
}

impl Drop for SimLine {
    fn drop(&mut self) {
        self.released.set(self.released.get() + 1);
    }
}

impl LineProvider for SimLines {
    type Line = SimLine;

    fn request_output(&mut self, key: PinKey) -> Result<SimLine> {
        if self.broken.contains(&key) {
            return Err(Error::hardware(
                key,
                "line request failed",
                std::io::Error::from_raw_os_error(16),
            ));
        }
        self.opened.set(self.opened.get() + 1);
        let target = self
            .routes
            .get(&key)
            .map(|route| (Rc::clone(&self.chips[route.chip]), *route));
        Ok(SimLine {
            target,
            released: Rc::clone(&self.released),
            writes: Rc::clone(&self.writes),
        })
    }
}

/// Two chips: chip 0 has shared data registers for ports PA (0x10) and
/// PB (0x34); chip 1 has dedicated set (0x1c), clear (0x28) and level (0x34)
/// registers for port PL.
pub const MIXED_BOARD: &str = r#"description = Simulated mixed board
chips = 0x01c20800, 0x01f02c00
chip.size = 0x100, 0x100
gpio.dev = 0, 1
mem.path = /dev/mem
data.in.on.offset = 0x10, 0x34, 0x34
data.in.off.offset = 0x10, 0x34, 0x34
data.out.on.offset = 0x10, 0x34, 0x1c
data.out.off.offset = 0x10, 0x34, 0x28
group.chip = 0, 0, 1
group.name = PA, PB, PL
use.input.data.reg = true
pins = 3, 20, 5, 7
pin.chip = 0, 0, 1, 1
pin.name = PA3, PB20, PL5, PL7
"#;

pub struct Rig {
    pub board: BoardDescriptor,
    pub registry: PinRegistry,
    pub chips: Vec<Rc<SimChip>>,
    pub windows: WindowMap,
    pub lines: SimLines,
}

/// The mixed board with PA3, PB20 and PL5 wired; PL7 drives nothing
pub fn mixed_rig() -> Rig {
    let (board, registry) = parse_input_str(MIXED_BOARD).expect("simulated board parses");
    let chips = vec![
        SimChip::new(
            0x100,
            vec![Bank::Shared { data: 0x10 }, Bank::Shared { data: 0x34 }],
        ),
        SimChip::new(
            0x100,
            vec![Bank::Dedicated {
                set: 0x1c,
                clear: 0x28,
                level: 0x34,
            }],
        ),
    ];
    let mut windows = WindowMap::new();
    for chip in &chips {
        windows.push(Rc::clone(chip));
    }
    let lines = SimLines::new(chips.clone())
        .route(PinKey::new(0, 3), 0, 0, 3)
        .route(PinKey::new(0, 20), 0, 1, 20)
        .route(PinKey::new(1, 5), 1, 0, 5);
    Rig {
        board,
        registry,
        chips,
        windows,
        lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedicated_bank_semantics() {
        let rig = mixed_rig();
        let chip = &rig.chips[1];
        chip.write32(0x1c, 1 << 5).unwrap();
        assert!(chip.level(0, 5));
        assert_eq!(chip.read32(0x1c).unwrap(), 0);
        chip.write32(0x28, 1 << 5).unwrap();
        assert!(!chip.level(0, 5));
    }

    #[test]
    fn test_lines_drive_banks() {
        let mut rig = mixed_rig();
        {
            let mut line = rig.lines.request_output(PinKey::new(0, 20)).unwrap();
            line.set_value(true).unwrap();
        }
        assert!(rig.chips[0].level(1, 20));
        assert_eq!(rig.chips[0].peek(0x34), 1 << 20);
        assert_eq!(rig.lines.opened(), 1);
        assert_eq!(rig.lines.released(), 1);
    }
}
