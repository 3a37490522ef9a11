//! Board descriptor: chips, register groups and candidate offsets

use super::schema::{parse_bool, parse_number_list, split_list, BoardField, Row};
use crate::error::{Error, Result};
use crate::registry::{Role, WindowId};
use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_MEM_PATH: &str = "/dev/mem";

/// A register block with its own physical base and window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chip {
    pub base: u64,
    pub size: usize,
    /// `/dev/gpiochipN` number serving this chip's lines
    pub gpio_dev: u32,
}

/// A named register bank candidate on one chip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub chip: usize,
}

/// Candidate register offsets for each role, one entry per group.
/// Lists may be shorter than the group list and are indexed with wraparound.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoleOffsets {
    in_on: Vec<usize>,
    in_off: Vec<usize>,
    out_on: Vec<usize>,
    out_off: Vec<usize>,
}

impl RoleOffsets {
    pub fn new(
        in_on: Vec<usize>,
        in_off: Vec<usize>,
        out_on: Vec<usize>,
        out_off: Vec<usize>,
    ) -> Self {
        Self {
            in_on,
            in_off,
            out_on,
            out_off,
        }
    }

    pub fn list(&self, role: Role) -> &[usize] {
        match role {
            Role::InOn => &self.in_on,
            Role::InOff => &self.in_off,
            Role::OutOn => &self.out_on,
            Role::OutOff => &self.out_off,
        }
    }

    /// Offset for `role` at group index `idx`, wrapping short lists
    pub fn resolve(&self, role: Role, idx: usize) -> usize {
        let list = self.list(role);
        list[idx % list.len()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardDescriptor {
    pub description: String,
    pub chips: Vec<Chip>,
    pub candidates: RoleOffsets,
    pub groups: Vec<Group>,
    /// Sample the input-data bank during discovery instead of output-data
    pub use_input_register: bool,
    pub mem_path: PathBuf,
}

impl BoardDescriptor {
    /// Build from parsed rows; seed and pin rows are ignored here
    pub fn from_rows(rows: &[Row]) -> Result<Self> {
        let mut fields: HashMap<BoardField, (usize, &str)> = HashMap::new();
        for row in rows {
            if let Row::Board {
                line, field, value, ..
            } = row
            {
                if fields.insert(*field, (*line, value.as_str())).is_some() {
                    return Err(Error::parse(*line, field.key(), "field given twice"));
                }
            }
        }

        let required = |field: BoardField| {
            fields
                .get(&field)
                .copied()
                .ok_or(Error::MissingField(field.key()))
        };
        let numbers = |field: BoardField| -> Result<Vec<u64>> {
            let (line, value) = required(field)?;
            parse_number_list(line, field.key(), value)
        };
        let offsets = |field: BoardField| -> Result<Vec<usize>> {
            Ok(numbers(field)?.into_iter().map(|n| n as usize).collect())
        };

        let bases = numbers(BoardField::Chips)?;
        let sizes = numbers(BoardField::ChipSize)?;
        let devs = match fields.get(&BoardField::GpioDev) {
            Some(&(line, value)) => parse_number_list(line, BoardField::GpioDev.key(), value)?,
            None => (0..bases.len() as u64).collect(),
        };
        if sizes.len() != bases.len() || devs.len() != bases.len() {
            return Err(Error::InvalidBoard(format!(
                "{} chips but {} window sizes and {} gpio devices",
                bases.len(),
                sizes.len(),
                devs.len()
            )));
        }
        let chips = bases
            .iter()
            .zip(&sizes)
            .zip(&devs)
            .map(|((&base, &size), &dev)| Chip {
                base,
                size: size as usize,
                gpio_dev: dev as u32,
            })
            .collect();

        let candidates = RoleOffsets::new(
            offsets(BoardField::DataInOn)?,
            offsets(BoardField::DataInOff)?,
            offsets(BoardField::DataOutOn)?,
            offsets(BoardField::DataOutOff)?,
        );

        let group_chips = numbers(BoardField::GroupChip)?;
        let (_, names) = required(BoardField::GroupName)?;
        let names = split_list(names);
        if names.len() != group_chips.len() {
            return Err(Error::InvalidBoard(format!(
                "{} group chips but {} group names",
                group_chips.len(),
                names.len()
            )));
        }
        let groups = names
            .into_iter()
            .zip(group_chips)
            .map(|(name, chip)| Group {
                name: name.to_string(),
                chip: chip as usize,
            })
            .collect();

        let use_input_register = match fields.get(&BoardField::UseInputDataReg) {
            Some(&(line, value)) => parse_bool(line, BoardField::UseInputDataReg.key(), value)?,
            None => false,
        };

        let board = Self {
            description: fields
                .get(&BoardField::Description)
                .map(|(_, v)| v.to_string())
                .unwrap_or_default(),
            chips,
            candidates,
            groups,
            use_input_register,
            mem_path: fields
                .get(&BoardField::MemPath)
                .map(|(_, v)| PathBuf::from(v))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MEM_PATH)),
        };
        board.validate()?;
        Ok(board)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<()> {
        if self.chips.is_empty() {
            return Err(Error::InvalidBoard("no chips listed".to_string()));
        }
        if self.groups.is_empty() {
            return Err(Error::InvalidBoard("no register groups listed".to_string()));
        }
        for role in Role::ALL {
            if self.candidates.list(role).is_empty() {
                return Err(Error::InvalidBoard(format!(
                    "no candidate offsets for {role}"
                )));
            }
        }
        for (idx, group) in self.groups.iter().enumerate() {
            if group.chip >= self.chips.len() {
                return Err(Error::InvalidBoard(format!(
                    "group {} ({}) refers to chip {} of {}",
                    idx,
                    group.name,
                    group.chip,
                    self.chips.len()
                )));
            }
            if group.name.is_empty() || self.groups[..idx].iter().any(|g| g.name == group.name) {
                return Err(Error::InvalidBoard(format!(
                    "group name `{}` is empty or repeated",
                    group.name
                )));
            }
        }
        Ok(())
    }

    /// Role sampled during discovery
    pub fn probe_role(&self) -> Role {
        if self.use_input_register {
            Role::InOn
        } else {
            Role::OutOn
        }
    }

    pub fn group_index(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.name == name)
    }

    /// Window holding the registers of group `idx`
    pub fn group_window(&self, idx: usize) -> WindowId {
        WindowId(self.groups[idx].chip)
    }

    pub fn window_size(&self, window: WindowId) -> Option<usize> {
        self.chips.get(window.0).map(|c| c.size)
    }
}
