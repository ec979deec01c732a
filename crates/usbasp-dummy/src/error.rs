//! Error types for the emulated target

use thiserror::Error;

/// Emulator errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DummyError {
    /// No part with that name in the part table
    #[error("Unknown part '{0}'")]
    UnknownPart(String),

    /// Image does not fit the memory it is loaded into
    #[error("{memory} image is {size} bytes, but the part only has {capacity}")]
    ImageTooLarge {
        memory: &'static str,
        size: usize,
        capacity: usize,
    },
}

/// Result type for emulator operations
pub type Result<T> = std::result::Result<T, DummyError>;
