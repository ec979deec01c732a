//! usbasp-dummy - In-memory AVR target for testing
//!
//! This crate provides [`DummyAvr`], an emulated AVR microcontroller that
//! sits on the far end of an [`IspBus`]. It decodes the 4-byte serial
//! programming instructions sent by [`usbasp_core::isp::Isp`] and keeps
//! flash, EEPROM and the flash page buffer in memory, so the whole
//! programmer pipeline can be exercised without hardware.

pub mod error;
pub mod parts;

use usbasp_core::isp::{
    IspBus, CMD_LOAD_EXT_ADDR, CMD_LOAD_FLASH_HIGH, CMD_LOAD_FLASH_LOW, CMD_PROG_ENABLE,
    CMD_PROG_ENABLE_ECHO, CMD_READ_EEPROM, CMD_READ_FLASH_HIGH, CMD_READ_FLASH_LOW,
    CMD_WRITE_EEPROM, CMD_WRITE_PAGE,
};
use usbasp_core::{Board, SckOption};

pub use error::{DummyError, Result};
pub use parts::{find_part, Part, PARTS};

/// Read signature byte
pub const CMD_READ_SIGNATURE: u8 = 0x30;
/// Second byte of `AC 80 00 00`, chip erase
pub const CMD_CHIP_ERASE: u8 = 0x80;
/// Read low/extended fuse
pub const CMD_READ_FUSE: u8 = 0x50;
/// Read high fuse/lock bits
pub const CMD_READ_FUSE_HIGH: u8 = 0x58;

/// Emulated AVR target
///
/// The target only listens while the bus is enabled and reset is asserted,
/// and ignores everything except programming enable until that succeeds.
/// Flash programming follows real cell behavior: bits only go from 1 to 0,
/// so flash must be erased before it is rewritten.
pub struct DummyAvr {
    part: Part,
    flash: Vec<u8>,
    eeprom: Vec<u8>,
    page_buffer: Vec<u8>,
    frame: [u8; 4],
    pos: usize,
    enabled: bool,
    reset: bool,
    programming: bool,
    ext_address: u8,
    clock: Option<SckOption>,
    page_commits: usize,
}

impl DummyAvr {
    /// Create an erased target
    pub fn new(part: &Part) -> Self {
        Self {
            part: *part,
            flash: vec![0xFF; part.flash_size],
            eeprom: vec![0xFF; part.eeprom_size],
            page_buffer: vec![0xFF; part.flash_page_size],
            frame: [0; 4],
            pos: 0,
            enabled: false,
            reset: false,
            programming: false,
            ext_address: 0,
            clock: None,
            page_commits: 0,
        }
    }

    /// Create an erased target by part name
    pub fn from_name(name: &str) -> Result<Self> {
        find_part(name).map(Self::new)
    }

    /// The emulated part
    pub fn part(&self) -> &Part {
        &self.part
    }

    /// Flash contents
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// EEPROM contents
    pub fn eeprom(&self) -> &[u8] {
        &self.eeprom
    }

    /// Overwrite the start of flash with `image`
    pub fn load_flash(&mut self, image: &[u8]) -> Result<()> {
        load_image("flash", &mut self.flash, image)
    }

    /// Overwrite the start of EEPROM with `image`
    pub fn load_eeprom(&mut self, image: &[u8]) -> Result<()> {
        load_image("EEPROM", &mut self.eeprom, image)
    }

    /// Number of page writes executed so far
    pub fn page_commits(&self) -> usize {
        self.page_commits
    }

    /// Whether programming enable has succeeded since the last reset
    pub fn is_programming(&self) -> bool {
        self.programming
    }

    /// Whether the programmer is driving the bus with reset asserted
    pub fn is_connected(&self) -> bool {
        self.enabled && self.reset
    }

    /// Last SCK option selected by the programmer
    pub fn clock(&self) -> Option<SckOption> {
        self.clock
    }

    fn leave_programming(&mut self) {
        if self.programming {
            log::debug!("target left programming mode");
        }
        self.programming = false;
        self.pos = 0;
        self.ext_address = 0;
        self.page_buffer.fill(0xFF);
    }

    fn flash_address(&self, cmd: u8, high: u8, low: u8) -> usize {
        let word = (self.ext_address as usize) << 16 | (high as usize) << 8 | low as usize;
        let byte = word << 1 | ((cmd >> 3) & 1) as usize;
        byte % self.part.flash_size
    }

    fn eeprom_address(&self, high: u8, low: u8) -> usize {
        ((high as usize) << 8 | low as usize) % self.part.eeprom_size
    }

    /// Byte shifted out while the host sends the fourth instruction byte
    fn output_byte(&self) -> u8 {
        if !self.programming {
            return 0xFF;
        }

        let [cmd, high, low, _] = self.frame;
        match cmd {
            CMD_READ_FLASH_LOW | CMD_READ_FLASH_HIGH => {
                self.flash[self.flash_address(cmd, high, low)]
            }
            CMD_READ_EEPROM => self.eeprom[self.eeprom_address(high, low)],
            CMD_READ_SIGNATURE => self
                .part
                .signature
                .get(low as usize & 0x03)
                .copied()
                .unwrap_or(0xFF),
            CMD_READ_FUSE => match high {
                0x00 => self.part.fuses[0],
                0x08 => self.part.fuses[2],
                _ => 0xFF,
            },
            CMD_READ_FUSE_HIGH => match high {
                0x08 => self.part.fuses[1],
                // Lock bits: unlocked
                _ => 0xFF,
            },
            _ => 0x00,
        }
    }

    fn execute(&mut self) {
        let [cmd, high, low, data] = self.frame;

        if !self.programming {
            if cmd == CMD_PROG_ENABLE && high == CMD_PROG_ENABLE_ECHO {
                log::debug!("target entered programming mode");
                self.programming = true;
            }
            return;
        }

        match cmd {
            CMD_PROG_ENABLE if high == CMD_CHIP_ERASE => {
                log::debug!("chip erase");
                self.flash.fill(0xFF);
                self.eeprom.fill(0xFF);
            }
            CMD_LOAD_FLASH_LOW | CMD_LOAD_FLASH_HIGH => {
                let addr = self.flash_address(cmd, high, low);
                if self.part.is_paged() {
                    self.page_buffer[addr % self.part.flash_page_size] = data;
                } else {
                    self.flash[addr] &= data;
                }
            }
            CMD_WRITE_PAGE if self.part.is_paged() => {
                let page_size = self.part.flash_page_size;
                let base = self.flash_address(cmd, high, low) & !(page_size - 1);
                log::trace!("page write at 0x{:05X}", base);
                for (cell, &byte) in self.flash[base..base + page_size]
                    .iter_mut()
                    .zip(&self.page_buffer)
                {
                    *cell &= byte;
                }
                self.page_buffer.fill(0xFF);
                self.page_commits += 1;
            }
            CMD_LOAD_EXT_ADDR => self.ext_address = low,
            CMD_WRITE_EEPROM => {
                let addr = self.eeprom_address(high, low);
                self.eeprom[addr] = data;
            }
            _ => {}
        }
    }
}

fn load_image(memory: &'static str, dest: &mut [u8], image: &[u8]) -> Result<()> {
    if image.len() > dest.len() {
        return Err(DummyError::ImageTooLarge {
            memory,
            size: image.len(),
            capacity: dest.len(),
        });
    }
    dest[..image.len()].copy_from_slice(image);
    Ok(())
}

impl IspBus for DummyAvr {
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.leave_programming();
        }
    }

    fn set_reset(&mut self, asserted: bool) {
        self.reset = asserted;
        if !asserted {
            self.leave_programming();
        }
    }

    fn set_clock(&mut self, option: SckOption) {
        self.clock = Some(option);
    }

    fn transfer(&mut self, byte: u8) -> u8 {
        if !self.is_connected() {
            return 0xFF;
        }

        self.frame[self.pos] = byte;
        let out = match self.pos {
            0 => 0x00,
            1 => self.frame[0],
            2 => self.frame[1],
            _ => self.output_byte(),
        };

        self.pos += 1;
        if self.pos == self.frame.len() {
            self.execute();
            self.pos = 0;
        }
        out
    }

    fn pulse_sck(&mut self) {
        self.pos = 0;
    }

    fn delay_us(&mut self, _us: u32) {
        // No timing needed for in-memory operations
    }
}

/// Programmer board with a slow-SCK jumper and a connect LED
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyBoard {
    /// Jumper forcing the slowest SCK
    pub slow_sck_jumper: bool,
    /// State of the "target connected" LED
    pub connected_led: bool,
}

impl Board for DummyBoard {
    fn slow_sck_jumper(&self) -> bool {
        self.slow_sck_jumper
    }

    fn set_connected_led(&mut self, on: bool) {
        self.connected_led = on;
    }
}
