//! Board file and pin-map persistence
//!
//! A board file holds the board rows plus a seed pin list. Discovery output
//! is the same board rows followed by one row per resolved pin:
//!
//! ```text
//! pin.0.17 = PA, PA17, IN_ON, 0x10, 0x00020000, IN_OFF, 0x10, 0x00020000, OUT_ON, 0x10, 0x00020000, OUT_OFF, 0x10, 0xfffdffff
//! ```
//!
//! `OUT_OFF` of a shared data register stores the complement mask.

use super::descriptor::BoardDescriptor;
use super::schema::{parse_number, parse_number_list, parse_rows, split_list, BoardField, Row};
use crate::error::{Error, Result};
use crate::registry::{Pin, PinKey, PinRegisters, PinRegistry, Polarity, Register, Resolved, Role};
use chrono::Local;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Parse a board file into its descriptor and seed pins (key and name only)
pub fn parse_input(path: &Path) -> Result<(BoardDescriptor, PinRegistry)> {
    parse_input_str(&read(path)?)
}

pub fn parse_input_str(text: &str) -> Result<(BoardDescriptor, PinRegistry)> {
    let rows = parse_rows(text)?;
    let board = BoardDescriptor::from_rows(&rows)?;
    let registry = seed_pins(&rows)?;
    log::debug!("Parsed {} seed pins for '{}'", registry.len(), board.description);
    Ok((board, registry))
}

fn seed_pins(rows: &[Row]) -> Result<PinRegistry> {
    let field = |wanted: BoardField| {
        rows.iter().find_map(|row| match row {
            Row::Board {
                line, field, value, ..
            } if *field == wanted => Some((*line, value.as_str())),
            _ => None,
        })
    };

    let mut registry = PinRegistry::new();
    let Some((line, pins)) = field(BoardField::Pins) else {
        return Ok(registry);
    };
    let lines = parse_number_list(line, BoardField::Pins.key(), pins)?;

    let chips = match field(BoardField::PinChip) {
        Some((line, value)) => {
            let chips = parse_number_list(line, BoardField::PinChip.key(), value)?;
            if chips.len() != lines.len() {
                return Err(Error::parse(
                    line,
                    BoardField::PinChip.key(),
                    format!("{} entries for {} pins", chips.len(), lines.len()),
                ));
            }
            chips
        }
        None => vec![0; lines.len()],
    };

    let names = match field(BoardField::PinName) {
        Some((line, value)) => {
            let names = split_list(value);
            if names.len() != lines.len() {
                return Err(Error::parse(
                    line,
                    BoardField::PinName.key(),
                    format!("{} entries for {} pins", names.len(), lines.len()),
                ));
            }
            names.into_iter().map(str::to_string).collect()
        }
        None => Vec::new(),
    };

    for (idx, (&chip, &pin_line)) in chips.iter().zip(&lines).enumerate() {
        let key = PinKey::new(chip as u32, pin_line as u32);
        let name = names.get(idx).cloned().unwrap_or_else(|| key.to_string());
        registry.insert(Pin::new(key, name))?;
    }
    Ok(registry)
}

/// Format one resolved pin as a pin row
pub fn format_pin(pin: &Pin) -> Option<String> {
    let resolved = pin.resolved.as_ref()?;
    let mut out = format!("pin.{} = {}, {}", pin.key, resolved.group, pin.name);
    for reg in resolved.registers.iter() {
        let _ = write!(out, ", {}, 0x{:02x}, 0x{:08x}", reg.role, reg.offset, reg.mask);
    }
    Some(out)
}

/// Render the pin map: board rows of `source` followed by one row per resolved pin.
/// Returns the text and the number of pins written.
pub fn render(registry: &PinRegistry, source: &str) -> Result<(String, usize)> {
    let rows = parse_rows(source)?;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# Generated by gpio-regmap {} on {}",
        env!("CARGO_PKG_VERSION"),
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    for row in &rows {
        if let Row::Board { field, raw, .. } = row {
            if !field.is_seed() {
                out.push_str(raw);
                out.push('\n');
            }
        }
    }

    out.push('\n');
    let mut written = 0;
    for pin in registry.pins() {
        match format_pin(pin) {
            Some(line) => {
                out.push_str(&line);
                out.push('\n');
                written += 1;
            }
            None => log::warn!("Pin {} ({}) was not discovered, skipping", pin.key, pin.name),
        }
    }
    Ok((out, written))
}

/// Write the pin map for `registry`, copying board fields from `source`
pub fn serialize(registry: &PinRegistry, source: &Path, output: &Path) -> Result<usize> {
    let (text, written) = render(registry, &read(source)?)?;
    fs::write(output, text).map_err(|e| Error::io(output, e))?;
    log::info!(
        "Wrote {} of {} pins to {}",
        written,
        registry.len(),
        output.display()
    );
    Ok(written)
}

/// Load a discovered pin map
pub fn load_pin_map(path: &Path) -> Result<(BoardDescriptor, PinRegistry)> {
    load_pin_map_str(&read(path)?)
}

pub fn load_pin_map_str(text: &str) -> Result<(BoardDescriptor, PinRegistry)> {
    let rows = parse_rows(text)?;
    let board = BoardDescriptor::from_rows(&rows)?;

    let mut registry = PinRegistry::new();
    for row in &rows {
        if let Row::Pin { line, key, value } = row {
            registry.insert(parse_pin(&board, *line, *key, value)?)?;
        }
    }
    Ok((board, registry))
}

fn parse_pin(board: &BoardDescriptor, line: usize, key: PinKey, value: &str) -> Result<Pin> {
    let field = format!("pin.{key}");
    let err = |message: String| Error::parse(line, &field, message);

    let items = split_list(value);
    if items.len() != 2 + 3 * Role::ALL.len() {
        return Err(err(format!(
            "expected group, name and four registers, got {} fields",
            items.len()
        )));
    }

    let group = items[0];
    let group_idx = board
        .group_index(group)
        .ok_or_else(|| err(format!("unknown group `{group}`")))?;
    let window = board.group_window(group_idx);

    let mut offsets = [0usize; 4];
    let mut masks = [0u32; 4];
    for (slot, (role, chunk)) in Role::ALL.iter().zip(items[2..].chunks(3)).enumerate() {
        if chunk[0] != role.tag() {
            return Err(err(format!("expected {} but found `{}`", role.tag(), chunk[0])));
        }
        offsets[slot] = parse_number(line, &field, chunk[1])? as usize;
        let mask = parse_number(line, &field, chunk[2])?;
        masks[slot] = u32::try_from(mask)
            .map_err(|_| err(format!("mask {mask:#x} exceeds 32 bits")))?;
    }

    let register = |slot: usize, role: Role| -> Result<Register> {
        let mut reg = Register::assert(role, offsets[slot], masks[slot])
            .ok_or_else(|| err(format!("{role} mask is zero")))?;
        if role == Role::OutOff && offsets[3] == offsets[2] {
            reg.polarity = Polarity::ClearViaAnd;
        }
        Ok(reg)
    };

    let registers = PinRegisters::new(
        key,
        register(0, Role::InOn)?,
        register(1, Role::InOff)?,
        register(2, Role::OutOn)?,
        register(3, Role::OutOff)?,
    )?;

    if let Some(size) = board.window_size(window) {
        for reg in registers.iter() {
            reg.check_bounds(size)?;
        }
    }

    Ok(Pin {
        key,
        name: items[1].to_string(),
        resolved: Some(Resolved {
            group: group.to_string(),
            window,
            registers,
        }),
    })
}
