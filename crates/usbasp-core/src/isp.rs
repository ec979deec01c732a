//! AVR serial programming (ISP) instruction layer
//!
//! [`Isp`] implements [`ProgrammingTarget`] on top of an [`IspBus`], the
//! byte-level SPI link to the target. Every memory operation is one or more
//! 4-byte AVR serial programming instructions:
//!
//! | Instruction          | Bytes                        |
//! |----------------------|------------------------------|
//! | Programming enable   | `AC 53 00 00`                |
//! | Read flash low/high  | `20`/`28 aH aL 00` -> data   |
//! | Load page low/high   | `40`/`48 aH aL data`         |
//! | Write page           | `4C aH aL 00`                |
//! | Load extended addr   | `4D 00 ext 00`               |
//! | Read EEPROM          | `A0 aH aL 00` -> data        |
//! | Write EEPROM         | `C0 aH aL data`              |
//!
//! Flash is word-addressed on the wire; bit 0 of the byte address selects
//! the low or high byte of the word.

use crate::protocol::{SckOption, PROG_ENABLE_FAILED, PROG_ENABLE_OK};
use crate::target::ProgrammingTarget;

/// Programming enable, first byte
pub const CMD_PROG_ENABLE: u8 = 0xAC;
/// Programming enable, second byte (echoed back by the target)
pub const CMD_PROG_ENABLE_ECHO: u8 = 0x53;
/// Read program memory, low byte
pub const CMD_READ_FLASH_LOW: u8 = 0x20;
/// Read program memory, high byte
pub const CMD_READ_FLASH_HIGH: u8 = 0x28;
/// Load program memory page (or write unpaged flash), low byte
pub const CMD_LOAD_FLASH_LOW: u8 = 0x40;
/// Load program memory page (or write unpaged flash), high byte
pub const CMD_LOAD_FLASH_HIGH: u8 = 0x48;
/// Write program memory page
pub const CMD_WRITE_PAGE: u8 = 0x4C;
/// Load extended address byte
pub const CMD_LOAD_EXT_ADDR: u8 = 0x4D;
/// Read EEPROM memory
pub const CMD_READ_EEPROM: u8 = 0xA0;
/// Write EEPROM memory
pub const CMD_WRITE_EEPROM: u8 = 0xC0;

/// Programming-enable attempts before giving up
const ENABLE_ATTEMPTS: usize = 32;
/// Readback polls before giving up on a flash write
const POLL_ATTEMPTS: usize = 32;
/// Delay between polls
const POLL_INTERVAL_US: u32 = 320;
/// Fixed wait when a written value cannot be polled for
const FLASH_WRITE_WAIT_US: u32 = 4_800;
/// Fixed wait after an EEPROM write
const EEPROM_WRITE_WAIT_US: u32 = 9_600;
/// Reset settle time after connect
const RESET_SETTLE_US: u32 = 20_000;

/// Byte-level SPI link to the target, plus its reset line
pub trait IspBus {
    /// Drive (`true`) or release (`false`) the ISP lines
    fn set_enabled(&mut self, enabled: bool);

    /// Assert (`true`) or release (`false`) the target's reset
    fn set_reset(&mut self, asserted: bool);

    /// Select the SCK rate
    fn set_clock(&mut self, option: SckOption);

    /// Full-duplex exchange of one byte
    fn transfer(&mut self, byte: u8) -> u8;

    /// Toggle SCK once without transferring data
    fn pulse_sck(&mut self);

    /// Busy-wait
    fn delay_us(&mut self, us: u32);
}

impl<B: IspBus + ?Sized> IspBus for &mut B {
    fn set_enabled(&mut self, enabled: bool) {
        (**self).set_enabled(enabled)
    }

    fn set_reset(&mut self, asserted: bool) {
        (**self).set_reset(asserted)
    }

    fn set_clock(&mut self, option: SckOption) {
        (**self).set_clock(option)
    }

    fn transfer(&mut self, byte: u8) -> u8 {
        (**self).transfer(byte)
    }

    fn pulse_sck(&mut self) {
        (**self).pulse_sck()
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

/// AVR ISP programming target over an [`IspBus`]
pub struct Isp<B> {
    bus: B,
    /// Extended address byte last loaded into the target
    ext_address: u8,
}

impl<B: IspBus> Isp<B> {
    /// Wrap a bus
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            ext_address: 0,
        }
    }

    /// The underlying bus
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// The underlying bus, mutably
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Consume the layer and return the bus
    pub fn into_inner(self) -> B {
        self.bus
    }

    /// Send one 4-byte instruction and return the four bytes received
    pub fn instruction(&mut self, cmd: [u8; 4]) -> [u8; 4] {
        let mut rx = [0u8; 4];
        for (out, byte) in rx.iter_mut().zip(cmd) {
            *out = self.bus.transfer(byte);
        }
        rx
    }

    /// Load the extended address byte if `address` lies in another
    /// 128 KiB segment than the last access
    fn select_segment(&mut self, address: u32) {
        let ext = (address >> 17) as u8;
        if ext != self.ext_address {
            log::trace!("loading extended address 0x{:02X}", ext);
            self.instruction([CMD_LOAD_EXT_ADDR, 0x00, ext, 0x00]);
            self.ext_address = ext;
        }
    }

    fn flash_instruction(&mut self, low_cmd: u8, address: u32, data: u8) -> u8 {
        self.select_segment(address);
        let cmd = low_cmd | (((address & 1) as u8) << 3);
        self.instruction([cmd, (address >> 9) as u8, (address >> 1) as u8, data])[3]
    }

    /// Wait until `address` reads back as `value`
    ///
    /// An erased cell already reads 0xFF, so that value cannot be polled
    /// for and gets a fixed delay instead.
    fn poll_flash(&mut self, address: u32, value: u8) {
        if value == 0xFF {
            self.bus.delay_us(FLASH_WRITE_WAIT_US);
            return;
        }

        for _ in 0..POLL_ATTEMPTS {
            if self.read_flash(address) == value {
                return;
            }
            self.bus.delay_us(POLL_INTERVAL_US);
        }
        log::warn!("flash at 0x{:08X} never read back 0x{:02X}", address, value);
    }
}

impl<B: IspBus> ProgrammingTarget for Isp<B> {
    fn connect(&mut self) {
        self.bus.set_enabled(true);
        self.bus.set_reset(true);
        self.bus.delay_us(POLL_INTERVAL_US);

        // Pulse reset so the target samples SCK low
        self.bus.set_reset(false);
        self.bus.delay_us(POLL_INTERVAL_US);
        self.bus.set_reset(true);
        self.bus.delay_us(RESET_SETTLE_US);

        self.ext_address = 0;
    }

    fn disconnect(&mut self) {
        self.bus.set_reset(false);
        self.bus.set_enabled(false);
    }

    fn enter_programming_mode(&mut self) -> u8 {
        for attempt in 0..ENABLE_ATTEMPTS {
            let rx = self.instruction([CMD_PROG_ENABLE, CMD_PROG_ENABLE_ECHO, 0x00, 0x00]);
            if rx[2] == CMD_PROG_ENABLE_ECHO {
                log::debug!("programming enabled after {} attempt(s)", attempt + 1);
                return PROG_ENABLE_OK;
            }

            // Out of sync: shift the target by one clock and retry
            self.bus.pulse_sck();
            self.bus.delay_us(POLL_INTERVAL_US);
        }

        PROG_ENABLE_FAILED
    }

    fn transmit(&mut self, byte: u8) -> u8 {
        self.bus.transfer(byte)
    }

    fn read_flash(&mut self, address: u32) -> u8 {
        self.flash_instruction(CMD_READ_FLASH_LOW, address, 0x00)
    }

    fn read_eeprom(&mut self, address: u32) -> u8 {
        self.instruction([CMD_READ_EEPROM, (address >> 8) as u8, address as u8, 0x00])[3]
    }

    fn write_flash(&mut self, address: u32, value: u8, commit_immediately: bool) {
        self.flash_instruction(CMD_LOAD_FLASH_LOW, address, value);
        if commit_immediately {
            self.poll_flash(address, value);
        }
    }

    fn flush_page(&mut self, address: u32, trigger: u8) {
        self.select_segment(address);
        self.instruction([
            CMD_WRITE_PAGE,
            (address >> 9) as u8,
            (address >> 1) as u8,
            0x00,
        ]);
        self.poll_flash(address, trigger);
    }

    fn write_eeprom(&mut self, address: u32, value: u8) {
        self.instruction([CMD_WRITE_EEPROM, (address >> 8) as u8, address as u8, value]);
        self.bus.delay_us(EEPROM_WRITE_WAIT_US);
    }

    fn set_sck_option(&mut self, option: SckOption) {
        self.bus.set_clock(option);
    }
}
