//! Error types for usbasp-core
//!
//! The engine itself has a single failure mode: a streaming call that
//! arrives while no matching transfer is open. The other variants belong to
//! the wire-decoding boundary.

use core::fmt;

use crate::protocol::TRANSFER_ABORT;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A read or write chunk arrived while the session was not in a
    /// matching read or write mode
    InvalidState,
    /// The setup packet was not exactly 8 bytes long
    InvalidDescriptor {
        /// Number of bytes actually supplied
        len: usize,
    },
}

impl Error {
    /// Value reported to the USB transport in place of a byte count
    ///
    /// The transport treats this as "abort the current data stage".
    pub const fn wire_code(&self) -> u8 {
        TRANSFER_ABORT
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState => write!(f, "no matching transfer in progress"),
            Self::InvalidDescriptor { len } => {
                write!(f, "setup packet must be 8 bytes, got {}", len)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
