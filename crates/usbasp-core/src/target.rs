//! Target-side collaborator traits
//!
//! The session engine never touches hardware directly. Everything it needs
//! from the outside world goes through two narrow traits:
//!
//! - [`ProgrammingTarget`] - the ISP transport that reads and writes single
//!   bytes of target memory
//! - [`Board`] - the programmer's own I/O: the slow-SCK jumper and the
//!   "connected" LED

use crate::protocol::SckOption;

/// Low-level programming transport to the target microcontroller
///
/// All methods are synchronous and are called from the same context as the
/// session engine. Implementations may busy-wait on the target (e.g. while
/// polling for a write to finish) but must eventually return.
pub trait ProgrammingTarget {
    /// Drive the ISP lines and hold the target in reset
    fn connect(&mut self);

    /// Release the ISP lines and the target's reset
    fn disconnect(&mut self);

    /// Send the programming-enable sequence
    ///
    /// Returns [`PROG_ENABLE_OK`](crate::protocol::PROG_ENABLE_OK) when the
    /// target answered, any other value on failure.
    fn enter_programming_mode(&mut self) -> u8;

    /// Shift one byte out and return the byte shifted in
    fn transmit(&mut self, byte: u8) -> u8;

    /// Read one byte of program memory
    fn read_flash(&mut self, address: u32) -> u8;

    /// Read one byte of EEPROM
    fn read_eeprom(&mut self, address: u32) -> u8;

    /// Write one byte of program memory
    ///
    /// With `commit_immediately` the byte is programmed and the call returns
    /// once it is done; otherwise it is only loaded into the target's page
    /// buffer until [`flush_page`](Self::flush_page) is called.
    fn write_flash(&mut self, address: u32, value: u8, commit_immediately: bool);

    /// Commit the page buffer to the flash page containing `address`
    ///
    /// `trigger` is the last byte loaded, used by implementations that poll
    /// the target for completion.
    fn flush_page(&mut self, address: u32, trigger: u8);

    /// Write one byte of EEPROM
    fn write_eeprom(&mut self, address: u32, value: u8);

    /// Select the SCK rate used from the next connect on
    fn set_sck_option(&mut self, option: SckOption);
}

impl<T: ProgrammingTarget + ?Sized> ProgrammingTarget for &mut T {
    fn connect(&mut self) {
        (**self).connect()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn enter_programming_mode(&mut self) -> u8 {
        (**self).enter_programming_mode()
    }

    fn transmit(&mut self, byte: u8) -> u8 {
        (**self).transmit(byte)
    }

    fn read_flash(&mut self, address: u32) -> u8 {
        (**self).read_flash(address)
    }

    fn read_eeprom(&mut self, address: u32) -> u8 {
        (**self).read_eeprom(address)
    }

    fn write_flash(&mut self, address: u32, value: u8, commit_immediately: bool) {
        (**self).write_flash(address, value, commit_immediately)
    }

    fn flush_page(&mut self, address: u32, trigger: u8) {
        (**self).flush_page(address, trigger)
    }

    fn write_eeprom(&mut self, address: u32, value: u8) {
        (**self).write_eeprom(address, value)
    }

    fn set_sck_option(&mut self, option: SckOption) {
        (**self).set_sck_option(option)
    }
}

/// Programmer board I/O consulted on connect/disconnect
pub trait Board {
    /// True when the slow-SCK jumper forces the slowest clock
    fn slow_sck_jumper(&self) -> bool {
        false
    }

    /// Switch the "target connected" indicator
    fn set_connected_led(&mut self, _on: bool) {}
}

/// Board without jumper or LED
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoBoard;

impl Board for NoBoard {}
