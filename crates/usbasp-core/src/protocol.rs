//! USBasp wire protocol constants and types
//!
//! Every host request is a USB vendor control transfer whose 8-byte setup
//! packet doubles as the command descriptor. Offsets within the packet:
//!
//! | Offset | Meaning                                                        |
//! |--------|----------------------------------------------------------------|
//! | 0      | bmRequestType (not interpreted)                                |
//! | 1      | opcode                                                         |
//! | 2..3   | little-endian 16-bit legacy address                            |
//! | 4      | WriteFlash: page size low byte                                 |
//! | 5      | WriteFlash: bits 0-3 block flags, bits 4-7 page size bits 8-11 |
//! | 6..7   | little-endian 16-bit byte count                                |
//!
//! `SetExtendedAddress` reuses offsets 2..5 as a little-endian 32-bit
//! address, `Transmit` sends offsets 2..5 as four raw ISP bytes, and
//! `SetSckOption` carries its selector in offset 2.

use bitflags::bitflags;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::{Error, Result};

// Command opcodes (bRequest values)
/// Connect to the target: select SCK, assert reset
pub const FUNC_CONNECT: u8 = 1;
/// Release the target
pub const FUNC_DISCONNECT: u8 = 2;
/// Shift four raw bytes through the ISP interface
pub const FUNC_TRANSMIT: u8 = 3;
/// Open a flash read session
pub const FUNC_READFLASH: u8 = 4;
/// Send the programming-enable instruction
pub const FUNC_ENABLEPROG: u8 = 5;
/// Open a flash write session
pub const FUNC_WRITEFLASH: u8 = 6;
/// Open an EEPROM read session
pub const FUNC_READEEPROM: u8 = 7;
/// Open an EEPROM write session
pub const FUNC_WRITEEEPROM: u8 = 8;
/// Switch to 32-bit addressing and load the address
pub const FUNC_SETLONGADDRESS: u8 = 9;
/// Store the SCK option used on the next connect
pub const FUNC_SETISPSCK: u8 = 10;

/// Size of a setup packet in bytes
pub const SETUP_PACKET_SIZE: usize = 8;

/// Maximum payload bytes per data-stage chunk (low-speed USB packet size)
pub const MAX_CHUNK_SIZE: usize = 8;

/// Setup reply length meaning "a data stage of arbitrary length follows"
pub const BULK_FOLLOWS: u8 = 0xFF;

/// Chunk return value telling the transport to abort the data stage
pub const TRANSFER_ABORT: u8 = 0xFF;

/// Largest page size expressible by the packed page-size field
pub const MAX_PAGE_SIZE: u16 = 0x0FFF;

/// Programming-enable status: target answered
pub const PROG_ENABLE_OK: u8 = 0;
/// Programming-enable status: target did not synchronize
pub const PROG_ENABLE_FAILED: u8 = 1;

bitflags! {
    /// Multi-block flash write markers (low nibble of setup byte 5)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u8 {
        /// First block of a multi-block write: restart the page counter
        const FIRST = 0x01;
        /// Last block of a multi-block write: flush a partial trailing page
        const LAST  = 0x02;
    }
}

/// Decode the packed page-size field of a WriteFlash request.
///
/// ```text
/// byte 4:  [ s7 s6 s5 s4 s3 s2 s1 s0 ]   page size bits 0-7
/// byte 5:  [ s11 s10 s9 s8 | f3 f2 f1 f0 ] page size bits 8-11, block flags
/// ```
///
/// `page_size = low + ((flags_byte & 0xF0) << 4)`. Unknown flag bits are
/// retained.
pub const fn decode_page_size(low: u8, flags_byte: u8) -> (u16, BlockFlags) {
    let page_size = low as u16 + (((flags_byte & 0xF0) as u16) << 4);
    let flags = BlockFlags::from_bits_retain(flags_byte & 0x0F);
    (page_size, flags)
}

/// Inverse of [`decode_page_size`]; page size bits above 11 are dropped.
pub const fn encode_page_size(page_size: u16, flags: BlockFlags) -> (u8, u8) {
    let low = page_size as u8;
    let flags_byte = ((page_size >> 4) as u8 & 0xF0) | (flags.bits() & 0x0F);
    (low, flags_byte)
}

/// ISP clock selector
///
/// The firmware treats the value as opaque and hands it to the target
/// transport on connect. The named constants are the presets understood by
/// the reference clock driver; anything else is passed through untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SckOption(pub u8);

impl SckOption {
    /// Automatic selection (375 kHz)
    pub const AUTO: Self = Self(0);
    /// 0.5 kHz
    pub const HZ_500: Self = Self(1);
    /// 1 kHz
    pub const KHZ_1: Self = Self(2);
    /// 2 kHz
    pub const KHZ_2: Self = Self(3);
    /// 4 kHz
    pub const KHZ_4: Self = Self(4);
    /// 8 kHz, selected by the slow-SCK jumper
    pub const KHZ_8: Self = Self(5);
    /// 16 kHz
    pub const KHZ_16: Self = Self(6);
    /// 32 kHz
    pub const KHZ_32: Self = Self(7);
    /// 93.75 kHz
    pub const KHZ_93_75: Self = Self(8);
    /// 187.5 kHz
    pub const KHZ_187_5: Self = Self(9);
    /// 375 kHz
    pub const KHZ_375: Self = Self(10);
    /// 750 kHz
    pub const KHZ_750: Self = Self(11);
    /// 1.5 MHz
    pub const KHZ_1500: Self = Self(12);

    /// Preset used when the slow-SCK jumper is fitted
    pub const SLOW: Self = Self::KHZ_8;

    const PRESETS: [(Self, u32); 12] = [
        (Self::HZ_500, 500),
        (Self::KHZ_1, 1_000),
        (Self::KHZ_2, 2_000),
        (Self::KHZ_4, 4_000),
        (Self::KHZ_8, 8_000),
        (Self::KHZ_16, 16_000),
        (Self::KHZ_32, 32_000),
        (Self::KHZ_93_75, 93_750),
        (Self::KHZ_187_5, 187_500),
        (Self::KHZ_375, 375_000),
        (Self::KHZ_750, 750_000),
        (Self::KHZ_1500, 1_500_000),
    ];

    /// Raw selector byte
    pub const fn code(self) -> u8 {
        self.0
    }

    /// Nominal SCK frequency, or `None` for a selector outside the preset table
    pub fn frequency_hz(self) -> Option<u32> {
        if self == Self::AUTO {
            return Some(375_000);
        }
        Self::PRESETS
            .iter()
            .find(|(opt, _)| *opt == self)
            .map(|(_, hz)| *hz)
    }

    /// Fastest preset that does not exceed `hz`
    ///
    /// Requests below the slowest preset get the slowest preset.
    pub fn from_hz(hz: u32) -> Self {
        Self::PRESETS
            .iter()
            .rev()
            .find(|(_, preset_hz)| *preset_hz <= hz)
            .map(|(opt, _)| *opt)
            .unwrap_or(Self::HZ_500)
    }
}

/// The 8-byte setup packet of a USBasp vendor request
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C)]
pub struct SetupPacket {
    /// bmRequestType, ignored by the engine
    pub request_type: u8,
    /// bRequest, the USBasp opcode
    pub opcode: u8,
    /// Legacy 16-bit address (wValue)
    pub address: U16,
    /// Command-specific parameter byte (wIndex low)
    pub param0: u8,
    /// Command-specific parameter byte (wIndex high)
    pub param1: u8,
    /// Byte count of the data stage (wLength)
    pub length: U16,
}

impl SetupPacket {
    /// Vendor, device-to-host request type used by the host tool
    pub const REQUEST_TYPE_VENDOR_IN: u8 = 0xC0;

    /// Build a packet from its fields
    pub fn new(opcode: u8, address: u16, param0: u8, param1: u8, length: u16) -> Self {
        Self {
            request_type: Self::REQUEST_TYPE_VENDOR_IN,
            opcode,
            address: U16::new(address),
            param0,
            param1,
            length: U16::new(length),
        }
    }

    /// Parse a packet from raw bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::read_from_bytes(bytes).map_err(|_| Error::InvalidDescriptor { len: bytes.len() })
    }

    /// Offsets 2..5 as four raw bytes
    pub fn payload(&self) -> [u8; 4] {
        let [a0, a1] = self.address.get().to_le_bytes();
        [a0, a1, self.param0, self.param1]
    }

    /// Offsets 2..5 interpreted as a little-endian 32-bit address
    pub fn extended_address(&self) -> u32 {
        u32::from_le_bytes(self.payload())
    }
}

/// A decoded USBasp command
///
/// The enum is closed: every variant is handled by the dispatcher, and
/// opcodes without a variant are filtered out by [`Command::decode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Select SCK, clear extended addressing, connect the target
    Connect,
    /// Disconnect the target
    Disconnect,
    /// Shift four raw bytes through the ISP interface
    Transmit([u8; 4]),
    /// Send programming enable; the status byte is the reply
    EnableProgramming,
    /// Open a flash read session
    ReadFlash {
        /// Legacy start address (ignored in extended-address mode)
        address: u16,
        /// Number of bytes the host intends to read
        length: u16,
    },
    /// Open an EEPROM read session
    ReadEeprom {
        /// Legacy start address (ignored in extended-address mode)
        address: u16,
        /// Number of bytes the host intends to read
        length: u16,
    },
    /// Open a flash write session
    WriteFlash {
        /// Legacy start address (ignored in extended-address mode)
        address: u16,
        /// Flash page size in bytes, 0 for byte-wise programming
        page_size: u16,
        /// Multi-block markers
        flags: BlockFlags,
        /// Number of payload bytes that follow
        length: u16,
    },
    /// Open an EEPROM write session
    WriteEeprom {
        /// Legacy start address (ignored in extended-address mode)
        address: u16,
        /// Number of payload bytes that follow
        length: u16,
    },
    /// Enable extended addressing and load a 32-bit address
    SetExtendedAddress(u32),
    /// Store the SCK option for the next connect
    SetSckOption(SckOption),
}

impl Command {
    /// Decode a setup packet, returning `None` for unknown opcodes
    pub fn decode(packet: &SetupPacket) -> Option<Self> {
        let address = packet.address.get();
        let length = packet.length.get();

        let cmd = match packet.opcode {
            FUNC_CONNECT => Self::Connect,
            FUNC_DISCONNECT => Self::Disconnect,
            FUNC_TRANSMIT => Self::Transmit(packet.payload()),
            FUNC_ENABLEPROG => Self::EnableProgramming,
            FUNC_READFLASH => Self::ReadFlash { address, length },
            FUNC_READEEPROM => Self::ReadEeprom { address, length },
            FUNC_WRITEFLASH => {
                let (page_size, flags) = decode_page_size(packet.param0, packet.param1);
                Self::WriteFlash {
                    address,
                    page_size,
                    flags,
                    length,
                }
            }
            FUNC_WRITEEEPROM => Self::WriteEeprom { address, length },
            FUNC_SETLONGADDRESS => Self::SetExtendedAddress(packet.extended_address()),
            FUNC_SETISPSCK => Self::SetSckOption(SckOption(packet.payload()[0])),
            _ => return None,
        };
        Some(cmd)
    }

    /// Wire opcode of this command
    pub const fn opcode(&self) -> u8 {
        match self {
            Self::Connect => FUNC_CONNECT,
            Self::Disconnect => FUNC_DISCONNECT,
            Self::Transmit(_) => FUNC_TRANSMIT,
            Self::EnableProgramming => FUNC_ENABLEPROG,
            Self::ReadFlash { .. } => FUNC_READFLASH,
            Self::ReadEeprom { .. } => FUNC_READEEPROM,
            Self::WriteFlash { .. } => FUNC_WRITEFLASH,
            Self::WriteEeprom { .. } => FUNC_WRITEEEPROM,
            Self::SetExtendedAddress(_) => FUNC_SETLONGADDRESS,
            Self::SetSckOption(_) => FUNC_SETISPSCK,
        }
    }

    /// Encode this command the way the host tool does
    pub fn encode(&self) -> SetupPacket {
        let op = self.opcode();
        match *self {
            Self::Connect | Self::Disconnect | Self::EnableProgramming => {
                SetupPacket::new(op, 0, 0, 0, 0)
            }
            Self::Transmit([b0, b1, b2, b3]) => {
                SetupPacket::new(op, u16::from_le_bytes([b0, b1]), b2, b3, 0)
            }
            Self::ReadFlash { address, length }
            | Self::ReadEeprom { address, length }
            | Self::WriteEeprom { address, length } => SetupPacket::new(op, address, 0, 0, length),
            Self::WriteFlash {
                address,
                page_size,
                flags,
                length,
            } => {
                let (low, flags_byte) = encode_page_size(page_size, flags);
                SetupPacket::new(op, address, low, flags_byte, length)
            }
            Self::SetExtendedAddress(addr) => {
                let [a0, a1, a2, a3] = addr.to_le_bytes();
                SetupPacket::new(op, u16::from_le_bytes([a0, a1]), a2, a3, 0)
            }
            Self::SetSckOption(opt) => SetupPacket::new(op, opt.code() as u16, 0, 0, 0),
        }
    }

    /// Whether the command is followed by a streamed data stage
    pub const fn has_data_stage(&self) -> bool {
        matches!(
            self,
            Self::ReadFlash { .. }
                | Self::ReadEeprom { .. }
                | Self::WriteFlash { .. }
                | Self::WriteEeprom { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_packing() {
        assert_eq!(decode_page_size(0x40, 0x01), (64, BlockFlags::FIRST));
        assert_eq!(
            decode_page_size(0x00, 0x13),
            (256, BlockFlags::FIRST | BlockFlags::LAST)
        );
        assert_eq!(decode_page_size(0xFF, 0xF0), (MAX_PAGE_SIZE, BlockFlags::empty()));
        // Reserved flag bits survive decoding
        assert_eq!(decode_page_size(0x80, 0x0C).1.bits(), 0x0C);

        assert_eq!(encode_page_size(256, BlockFlags::LAST), (0x00, 0x12));
        assert_eq!(encode_page_size(128, BlockFlags::FIRST), (0x80, 0x01));
    }

    #[test]
    fn test_setup_packet_layout() {
        let raw = [0xC0, FUNC_WRITEFLASH, 0x34, 0x12, 0x80, 0x23, 0x00, 0x02];
        let packet = SetupPacket::parse(&raw).unwrap();
        assert_eq!(packet.opcode, FUNC_WRITEFLASH);
        assert_eq!(packet.address.get(), 0x1234);
        assert_eq!(packet.length.get(), 0x0200);
        assert_eq!(packet.as_bytes(), &raw);

        assert_eq!(
            Command::decode(&packet),
            Some(Command::WriteFlash {
                address: 0x1234,
                page_size: 0x280,
                flags: BlockFlags::FIRST | BlockFlags::LAST,
                length: 0x0200,
            })
        );
    }

    #[test]
    fn test_short_packet_rejected() {
        assert_eq!(
            SetupPacket::parse(&[0xC0, FUNC_CONNECT, 0, 0]),
            Err(Error::InvalidDescriptor { len: 4 })
        );
    }

    #[test]
    fn test_extended_address_overlays_legacy_fields() {
        let raw = [0xC0, FUNC_SETLONGADDRESS, 0x04, 0x03, 0x02, 0x01, 0x00, 0x00];
        let packet = SetupPacket::parse(&raw).unwrap();
        assert_eq!(
            Command::decode(&packet),
            Some(Command::SetExtendedAddress(0x0102_0304))
        );
        assert_eq!(
            Command::SetExtendedAddress(0x0102_0304).encode().as_bytes(),
            &raw
        );
    }

    #[test]
    fn test_transmit_and_sck_payload() {
        let raw = [0xC0, FUNC_TRANSMIT, 0x30, 0x00, 0x01, 0x00, 0x00, 0x00];
        let packet = SetupPacket::parse(&raw).unwrap();
        assert_eq!(
            Command::decode(&packet),
            Some(Command::Transmit([0x30, 0x00, 0x01, 0x00]))
        );

        let raw = [0xC0, FUNC_SETISPSCK, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00];
        let packet = SetupPacket::parse(&raw).unwrap();
        assert_eq!(
            Command::decode(&packet),
            Some(Command::SetSckOption(SckOption::KHZ_8))
        );
    }

    #[test]
    fn test_unknown_opcode() {
        let packet = SetupPacket::new(0x7F, 0, 0, 0, 0);
        assert_eq!(Command::decode(&packet), None);
        let packet = SetupPacket::new(0, 0, 0, 0, 0);
        assert_eq!(Command::decode(&packet), None);
    }

    #[test]
    fn test_sck_presets() {
        assert_eq!(SckOption::AUTO.frequency_hz(), Some(375_000));
        assert_eq!(SckOption::SLOW.frequency_hz(), Some(8_000));
        assert_eq!(SckOption(0x42).frequency_hz(), None);

        assert_eq!(SckOption::from_hz(1_500_000), SckOption::KHZ_1500);
        assert_eq!(SckOption::from_hz(400_000), SckOption::KHZ_375);
        assert_eq!(SckOption::from_hz(100_000), SckOption::KHZ_93_75);
        assert_eq!(SckOption::from_hz(10), SckOption::HZ_500);
    }
}
