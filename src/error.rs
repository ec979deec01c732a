//! Error types for the host-side driver and CLI

use thiserror::Error;
use usbasp_dummy::DummyError;

/// Host-side errors
#[derive(Debug, Error)]
pub enum HostError {
    /// The engine rejected a data stage
    #[error("Device aborted the transfer: {0}")]
    Device(#[from] usbasp_core::Error),

    /// Emulator setup failed
    #[error(transparent)]
    Target(#[from] DummyError),

    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Target did not answer programming enable
    #[error("Target does not answer programming enable (status {0})")]
    ProgrammingEnableFailed(u8),

    /// SCK option was not accepted
    #[error("Programmer rejected SCK option {0}")]
    SckRejected(u8),

    /// Setup reply had an unexpected shape
    #[error("Unexpected reply to command 0x{opcode:02X}: {len} bytes")]
    UnexpectedReply { opcode: u8, len: usize },

    /// Device signalled completion too early or not at all
    #[error("Write transfer ended after {written} of {expected} bytes")]
    IncompleteWrite { written: usize, expected: usize },

    /// Access outside the target memory or the legacy address range
    #[error("Range 0x{address:X}+{len} is outside the addressable {memory}")]
    AddressOutOfRange {
        memory: &'static str,
        address: u32,
        len: usize,
    },

    /// Readback differs from what was written
    #[error("Verify failed at 0x{address:05X}: expected 0x{expected:02X}, found 0x{found:02X}")]
    VerifyFailed { address: u32, expected: u8, found: u8 },

    /// Signature does not match the selected part
    #[error("Signature {found:02X?} does not match {part} ({expected:02X?})")]
    SignatureMismatch {
        part: &'static str,
        expected: [u8; 3],
        found: [u8; 3],
    },
}

/// Result type for host-side operations
pub type Result<T> = std::result::Result<T, HostError>;
