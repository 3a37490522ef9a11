//! GPIO Register Map
//!
//! Discovers which memory-mapped register word and bit control each GPIO line
//! of a board, then drives those lines by writing the registers directly.
//!
//! # Overview
//!
//! - [`probe`]: toggles each line through the kernel and watches which
//!   candidate register changes
//! - [`board`]: board descriptions, seed pins and the discovered pin map
//! - [`direct`]: read and write a discovered pin through its mapped window
//! - [`bench`]: compares kernel line writes with direct register writes
//!
//! # Usage
//!
//! ```bash
//! # Discover registers for the pins listed in a board file
//! gpio-regmap discover -i board.txt -o pins.txt
//!
//! # Drive a pin directly
//! gpio-regmap write -i pins.txt --pin 0.3 1
//!
//! # Compare toggle rates
//! gpio-regmap bench -i pins.txt --pin 0.3 -n 1000000
//! ```

pub mod bench;
pub mod board;
pub mod direct;
pub mod error;
pub mod line;
pub mod probe;
pub mod registry;
pub mod window;

#[cfg(test)]
mod sim;

pub use error::{Error, Result};
