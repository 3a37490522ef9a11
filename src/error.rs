//! Error taxonomy for register discovery and direct I/O
//!
//! Only configuration errors (including an empty registry) are fatal to a run.
//! Everything raised while handling a single pin is caught by the caller,
//! logged and counted, so a partial pin map is still produced.

use crate::registry::PinKey;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A board or pin-map row could not be parsed
    #[error("line {line}: invalid `{field}`: {message}")]
    Parse {
        line: usize,
        field: String,
        message: String,
    },

    /// A required board field is absent
    #[error("missing board field `{0}`")]
    MissingField(&'static str),

    /// Board fields parsed but are inconsistent with each other
    #[error("invalid board description: {0}")]
    InvalidBoard(String),

    /// A command-line or API argument is unusable
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("pin {0} is listed more than once")]
    DuplicatePin(PinKey),

    /// Nothing to probe or drive
    #[error("pin registry is empty")]
    EmptyRegistry,

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No register changed when the pin was toggled
    #[error("pin {key}: no register changed when the line was toggled")]
    ProbeAmbiguity { key: PinKey },

    #[error("register offset {offset:#x} outside window of {size:#x} bytes")]
    RegisterOutOfBounds { offset: usize, size: usize },

    #[error("register offset {offset:#x} is not 32-bit aligned")]
    MisalignedOffset { offset: usize },

    /// Opening or driving the line through the GPIO character device failed
    #[error("pin {key}: {message}")]
    HardwareIo {
        key: PinKey,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Mapping a chip's physical window failed
    #[error("cannot map {base:#x} from {}: {source}", path.display())]
    Map {
        path: PathBuf,
        base: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("pin {0} has no discovered registers")]
    Unresolved(PinKey),

    #[error("pin {0} is not in the pin map")]
    UnknownPin(PinKey),

    /// A benchmark report could not be encoded
    #[error("cannot serialize report: {0}")]
    Report(#[from] toml::ser::Error),

    /// Register values that break the set/clear polarity rules
    #[error("pin {key}: {message}")]
    Polarity { key: PinKey, message: String },
}

impl Error {
    pub(crate) fn parse(line: usize, field: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn hardware(
        key: PinKey,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::HardwareIo {
            key,
            message: message.into(),
            source: Some(source),
        }
    }

    /// True for errors that only affect the pin being handled
    pub fn is_per_pin(&self) -> bool {
        matches!(
            self,
            Self::ProbeAmbiguity { .. }
                | Self::RegisterOutOfBounds { .. }
                | Self::MisalignedOffset { .. }
                | Self::HardwareIo { .. }
                | Self::Polarity { .. }
        )
    }
}
