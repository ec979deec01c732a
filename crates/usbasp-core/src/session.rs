//! Programming-session state
//!
//! One [`Session`] lives for as long as its [`Programmer`](crate::Programmer).
//! Commands reconfigure it and the streaming engines advance it; it is never
//! torn down, only returned to [`Mode::Idle`].

use crate::protocol::{BlockFlags, SckOption};

/// Current transfer direction and memory
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// No transfer open
    #[default]
    Idle,
    /// Streaming flash contents to the host
    ReadFlash,
    /// Streaming EEPROM contents to the host
    ReadEeprom,
    /// Receiving flash contents from the host
    WriteFlash,
    /// Receiving EEPROM contents from the host
    WriteEeprom,
}

impl Mode {
    /// True for the two read modes
    pub const fn is_read(self) -> bool {
        matches!(self, Self::ReadFlash | Self::ReadEeprom)
    }

    /// True for the two write modes
    pub const fn is_write(self) -> bool {
        matches!(self, Self::WriteFlash | Self::WriteEeprom)
    }
}

/// Session state shared by the dispatcher and both streaming engines
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub(crate) mode: Mode,
    pub(crate) sck_option: SckOption,
    pub(crate) extended_address: bool,
    pub(crate) address: u32,
    pub(crate) remaining: u16,
    pub(crate) page_size: u16,
    pub(crate) block_flags: BlockFlags,
    pub(crate) page_counter: u16,
}

impl Session {
    /// A fresh, idle session
    pub fn new() -> Self {
        Self::default()
    }

    /// Current transfer mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// SCK option to apply on the next connect
    pub fn sck_option(&self) -> SckOption {
        self.sck_option
    }

    /// Whether 32-bit addressing is active
    pub fn extended_address(&self) -> bool {
        self.extended_address
    }

    /// Next target address to read or write
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Bytes left in the current transfer
    pub fn remaining(&self) -> u16 {
        self.remaining
    }

    /// Flash page size of the current write (0 = unpaged)
    pub fn page_size(&self) -> u16 {
        self.page_size
    }

    /// Block markers of the current write
    pub fn block_flags(&self) -> BlockFlags {
        self.block_flags
    }

    /// Bytes left before the current flash page must be flushed
    pub fn page_counter(&self) -> u16 {
        self.page_counter
    }

    /// Apply an inline 16-bit address unless extended addressing is active
    pub(crate) fn load_legacy_address(&mut self, address: u16) {
        if !self.extended_address {
            self.address = address as u32;
        }
    }

    /// Open a transfer, abandoning whatever was in flight
    ///
    /// A read whose last chunk was full-sized is never closed by the engine,
    /// so only transfers with bytes outstanding are reported.
    pub(crate) fn open(&mut self, mode: Mode, remaining: u16) {
        if self.mode != Mode::Idle && self.remaining != 0 {
            log::warn!(
                "{:?} abandoned with {} bytes outstanding at 0x{:08X}",
                self.mode,
                self.remaining,
                self.address
            );
        }
        self.mode = mode;
        self.remaining = remaining;
    }

    /// Return to idle
    pub(crate) fn finish(&mut self) {
        self.mode = Mode::Idle;
    }
}
