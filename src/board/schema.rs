//! Row schema for board and pin-map files
//!
//! Files are ASCII `key = value` lines; `#` starts a comment line. Every
//! other line is one of two row kinds:
//!
//! - a board row, keyed by one of the [`BoardField`] names
//! - a pin row, keyed `pin.<chip>.<line>`
//!
//! Anything else is rejected with the line number and key.

use crate::error::{Error, Result};
use crate::registry::PinKey;

/// Known board-level keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardField {
    Description,
    Chips,
    ChipSize,
    GpioDev,
    MemPath,
    DataInOn,
    DataInOff,
    DataOutOn,
    DataOutOff,
    GroupChip,
    GroupName,
    Pins,
    PinChip,
    PinName,
    UseInputDataReg,
}

impl BoardField {
    pub const ALL: [BoardField; 15] = [
        BoardField::Description,
        BoardField::Chips,
        BoardField::ChipSize,
        BoardField::GpioDev,
        BoardField::MemPath,
        BoardField::DataInOn,
        BoardField::DataInOff,
        BoardField::DataOutOn,
        BoardField::DataOutOff,
        BoardField::GroupChip,
        BoardField::GroupName,
        BoardField::Pins,
        BoardField::PinChip,
        BoardField::PinName,
        BoardField::UseInputDataReg,
    ];

    pub fn key(self) -> &'static str {
        match self {
            BoardField::Description => "description",
            BoardField::Chips => "chips",
            BoardField::ChipSize => "chip.size",
            BoardField::GpioDev => "gpio.dev",
            BoardField::MemPath => "mem.path",
            BoardField::DataInOn => "data.in.on.offset",
            BoardField::DataInOff => "data.in.off.offset",
            BoardField::DataOutOn => "data.out.on.offset",
            BoardField::DataOutOff => "data.out.off.offset",
            BoardField::GroupChip => "group.chip",
            BoardField::GroupName => "group.name",
            BoardField::Pins => "pins",
            BoardField::PinChip => "pin.chip",
            BoardField::PinName => "pin.name",
            BoardField::UseInputDataReg => "use.input.data.reg",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    /// Seed rows only matter before discovery
    pub fn is_seed(self) -> bool {
        matches!(self, BoardField::Pins | BoardField::PinChip | BoardField::PinName)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    Board {
        line: usize,
        field: BoardField,
        value: String,
        /// Source text, kept for verbatim re-serialization
        raw: String,
    },
    Pin {
        line: usize,
        key: PinKey,
        value: String,
    },
}

/// Split a file into typed rows
pub fn parse_rows(text: &str) -> Result<Vec<Row>> {
    let mut rows = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (key, value) = trimmed
            .split_once('=')
            .ok_or_else(|| Error::parse(line, trimmed, "expected `key = value`"))?;
        let key = key.trim();
        let value = value.trim().to_string();

        if let Some(field) = BoardField::from_key(key) {
            rows.push(Row::Board {
                line,
                field,
                value,
                raw: trimmed.to_string(),
            });
        } else if let Some(pin) = key.strip_prefix("pin.") {
            let key = pin
                .parse::<PinKey>()
                .map_err(|msg| Error::parse(line, key, msg))?;
            rows.push(Row::Pin { line, key, value });
        } else {
            return Err(Error::parse(line, key, "unknown key"));
        }
    }

    Ok(rows)
}

/// Parse a decimal or `0x` hex number
pub fn parse_number(line: usize, field: &str, text: &str) -> Result<u64> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    };
    parsed.map_err(|_| Error::parse(line, field, format!("`{text}` is not a number")))
}

/// Split a comma list, trimming entries. An empty value is an empty list.
pub fn split_list(value: &str) -> Vec<&str> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    value.split(',').map(str::trim).collect()
}

pub fn parse_number_list(line: usize, field: &str, value: &str) -> Result<Vec<u64>> {
    split_list(value)
        .into_iter()
        .map(|item| parse_number(line, field, item))
        .collect()
}

pub fn parse_bool(line: usize, field: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(Error::parse(line, field, format!("`{other}` is not a boolean"))),
    }
}
