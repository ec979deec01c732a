//! Parts the emulator can impersonate

use crate::error::{DummyError, Result};

/// Memory geometry and identity of an AVR part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    /// Part name as printed on the package
    pub name: &'static str,
    /// Signature bytes read with `30 00 0n 00`
    pub signature: [u8; 3],
    /// Flash size in bytes
    pub flash_size: usize,
    /// Flash page size in bytes, 0 for byte-programmed flash
    pub flash_page_size: usize,
    /// EEPROM size in bytes
    pub eeprom_size: usize,
    /// Factory fuses: low, high, extended
    pub fuses: [u8; 3],
}

impl Part {
    /// Whether flash is programmed through a page buffer
    pub fn is_paged(&self) -> bool {
        self.flash_page_size != 0
    }

    /// Whether addresses above 64 KiB need extended addressing
    pub fn needs_extended_address(&self) -> bool {
        self.flash_size > 0x1_0000
    }
}

/// Built-in part table
pub const PARTS: &[Part] = &[
    Part {
        name: "ATmega8",
        signature: [0x1E, 0x93, 0x07],
        flash_size: 8 * 1024,
        flash_page_size: 64,
        eeprom_size: 512,
        fuses: [0xE1, 0xD9, 0xFF],
    },
    Part {
        name: "ATmega328P",
        signature: [0x1E, 0x95, 0x0F],
        flash_size: 32 * 1024,
        flash_page_size: 128,
        eeprom_size: 1024,
        fuses: [0x62, 0xD9, 0xFF],
    },
    Part {
        name: "ATmega2560",
        signature: [0x1E, 0x98, 0x01],
        flash_size: 256 * 1024,
        flash_page_size: 256,
        eeprom_size: 4096,
        fuses: [0x62, 0x99, 0xFF],
    },
    Part {
        name: "AT90S2313",
        signature: [0x1E, 0x91, 0x01],
        flash_size: 2 * 1024,
        flash_page_size: 0,
        eeprom_size: 128,
        fuses: [0xFF, 0xFF, 0xFF],
    },
];

/// Look a part up by name, ignoring case
pub fn find_part(name: &str) -> Result<&'static Part> {
    PARTS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| DummyError::UnknownPart(name.to_string()))
}
