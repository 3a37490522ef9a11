//! Board descriptor store
//!
//! This module provides:
//! - The tagged-row schema shared by board files and pin maps
//! - The board descriptor (chips, groups, candidate offsets)
//! - Loading seed pins, writing discovered pin maps and loading them back

pub mod descriptor;
pub mod schema;
pub mod store;

pub use descriptor::{BoardDescriptor, Chip, Group, RoleOffsets};
pub use store::{load_pin_map, parse_input, serialize};
