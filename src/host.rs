//! Host-side USBasp driver
//!
//! This plays the part of the PC tool talking to the programmer. Each
//! request is encoded into a setup packet and handed to the engine exactly
//! as the USB stack would: immediate replies come back from `setup`, and
//! data stages are split into 8-byte packets fed through `read_chunk` and
//! `write_chunk`.
//!
//! Memory transfers are split into blocks of at most 200 bytes, one
//! control transfer each. Flash writes mark the first block with
//! `BlockFlags::FIRST` and the final one with `BlockFlags::LAST` so the
//! programmer keeps its page counter across blocks and flushes a trailing
//! partial page.

use usbasp_core::protocol::{BULK_FOLLOWS, MAX_CHUNK_SIZE, PROG_ENABLE_OK};
use usbasp_core::{BlockFlags, Board, Command, Programmer, ProgrammingTarget, Reply, SckOption};

use crate::error::{HostError, Result};

/// Bytes per read control transfer
pub const READ_BLOCK_SIZE: usize = 200;
/// Bytes per write control transfer
pub const WRITE_BLOCK_SIZE: usize = 200;

/// Read signature byte instruction
const ISP_READ_SIGNATURE: u8 = 0x30;
/// Chip erase instruction
const ISP_CHIP_ERASE: [u8; 4] = [0xAC, 0x80, 0x00, 0x00];

/// Target memory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Memory {
    /// Program memory
    Flash,
    /// Data EEPROM
    Eeprom,
}

impl Memory {
    /// Display name for messages
    pub fn name(self) -> &'static str {
        match self {
            Memory::Flash => "flash",
            Memory::Eeprom => "EEPROM",
        }
    }
}

/// Driver for one programmer
pub struct Host<T, B> {
    prog: Programmer<T, B>,
    extended_address: bool,
}

impl<T: ProgrammingTarget, B: Board> Host<T, B> {
    /// Wrap a programmer
    ///
    /// With `extended_address` every block is preceded by a
    /// SetExtendedAddress request, which is required for parts with more
    /// than 64 KiB of flash.
    pub fn new(prog: Programmer<T, B>, extended_address: bool) -> Self {
        Self {
            prog,
            extended_address,
        }
    }

    /// The wrapped programmer
    pub fn programmer(&self) -> &Programmer<T, B> {
        &self.prog
    }

    /// Consume the driver and return the programmer
    pub fn into_programmer(self) -> Programmer<T, B> {
        self.prog
    }

    /// Control transfer without a streamed data stage
    fn control(&mut self, cmd: Command) -> Result<Vec<u8>> {
        debug_assert!(!cmd.has_data_stage());
        let packet = cmd.encode();
        let raw: [u8; 8] = zerocopy::transmute!(packet);
        match self.prog.setup(&raw) {
            Reply::Immediate(data) => Ok(data.to_vec()),
            Reply::BulkFollows => Err(HostError::UnexpectedReply {
                opcode: cmd.opcode(),
                len: usize::from(BULK_FOLLOWS),
            }),
        }
    }

    /// Control transfer expecting exactly `len` reply bytes
    fn control_expect(&mut self, cmd: Command, len: usize) -> Result<Vec<u8>> {
        let reply = self.control(cmd)?;
        if reply.len() != len {
            return Err(HostError::UnexpectedReply {
                opcode: cmd.opcode(),
                len: reply.len(),
            });
        }
        Ok(reply)
    }

    /// Open a streamed data stage
    fn setup_stream(&mut self, cmd: Command) -> Result<()> {
        debug_assert!(cmd.has_data_stage());
        let packet = cmd.encode();
        let raw: [u8; 8] = zerocopy::transmute!(packet);
        match self.prog.setup(&raw) {
            Reply::BulkFollows => Ok(()),
            Reply::Immediate(data) => Err(HostError::UnexpectedReply {
                opcode: cmd.opcode(),
                len: data.len(),
            }),
        }
    }

    /// IN transfer: the device produces `buf.len()` bytes in packets
    fn control_in(&mut self, cmd: Command, buf: &mut [u8]) -> Result<()> {
        self.setup_stream(cmd)?;
        for packet in buf.chunks_mut(MAX_CHUNK_SIZE) {
            let n = self.prog.read_chunk(packet)?;
            debug_assert_eq!(n, packet.len());
        }
        Ok(())
    }

    /// OUT transfer: the device consumes `data` in packets
    fn control_out(&mut self, cmd: Command, data: &[u8]) -> Result<()> {
        self.setup_stream(cmd)?;
        let mut written = 0;
        let mut done = data.is_empty();
        for packet in data.chunks(MAX_CHUNK_SIZE) {
            if done {
                break;
            }
            done = self.prog.write_chunk(packet)?;
            written += packet.len();
        }
        if !done || written != data.len() {
            return Err(HostError::IncompleteWrite {
                written,
                expected: data.len(),
            });
        }
        Ok(())
    }

    /// Set the clock and connect to the target
    pub fn connect(&mut self, sck: SckOption) -> Result<()> {
        let reply = self.control_expect(Command::SetSckOption(sck), 1)?;
        if reply[0] != 0 {
            return Err(HostError::SckRejected(sck.code()));
        }
        self.control_expect(Command::Connect, 0)?;
        log::debug!("connected with SCK option {}", sck.code());
        Ok(())
    }

    /// Disconnect from the target
    pub fn disconnect(&mut self) -> Result<()> {
        self.control_expect(Command::Disconnect, 0)?;
        Ok(())
    }

    /// Put the target into programming mode
    pub fn enable_programming(&mut self) -> Result<()> {
        let reply = self.control_expect(Command::EnableProgramming, 1)?;
        match reply[0] {
            PROG_ENABLE_OK => Ok(()),
            status => Err(HostError::ProgrammingEnableFailed(status)),
        }
    }

    /// Send one raw 4-byte ISP instruction
    pub fn transmit(&mut self, instruction: [u8; 4]) -> Result<[u8; 4]> {
        let reply = self.control_expect(Command::Transmit(instruction), 4)?;
        Ok([reply[0], reply[1], reply[2], reply[3]])
    }

    /// Read the three signature bytes
    pub fn read_signature(&mut self) -> Result<[u8; 3]> {
        let mut sig = [0u8; 3];
        for (i, byte) in sig.iter_mut().enumerate() {
            *byte = self.transmit([ISP_READ_SIGNATURE, 0x00, i as u8, 0x00])?[3];
        }
        Ok(sig)
    }

    /// Erase flash and EEPROM
    pub fn chip_erase(&mut self) -> Result<()> {
        self.transmit(ISP_CHIP_ERASE)?;
        Ok(())
    }

    fn check_range(&self, memory: Memory, address: u32, len: usize) -> Result<()> {
        let end = address as u64 + len as u64;
        if !self.extended_address && end > 0x1_0000 {
            return Err(HostError::AddressOutOfRange {
                memory: memory.name(),
                address,
                len,
            });
        }
        Ok(())
    }

    /// Block address for the setup packet, loading it separately first
    /// when extended addressing is in use
    fn block_address(&mut self, address: u32) -> Result<u16> {
        if self.extended_address {
            self.control_expect(Command::SetExtendedAddress(address), 0)?;
        }
        Ok(address as u16)
    }

    /// Read `buf.len()` bytes starting at `address`
    pub fn read_memory(
        &mut self,
        memory: Memory,
        address: u32,
        buf: &mut [u8],
        progress: &mut dyn FnMut(usize),
    ) -> Result<()> {
        self.check_range(memory, address, buf.len())?;

        let mut offset = 0;
        for block in buf.chunks_mut(READ_BLOCK_SIZE) {
            let block_addr = address + offset as u32;
            let legacy = self.block_address(block_addr)?;
            let length = block.len() as u16;
            let cmd = match memory {
                Memory::Flash => Command::ReadFlash {
                    address: legacy,
                    length,
                },
                Memory::Eeprom => Command::ReadEeprom {
                    address: legacy,
                    length,
                },
            };
            self.control_in(cmd, block)?;
            offset += block.len();
            progress(offset);
        }
        Ok(())
    }

    /// Write `data` starting at `address`
    ///
    /// `page_size` is the flash page size, 0 for parts programmed byte by
    /// byte; it is ignored for EEPROM.
    pub fn write_memory(
        &mut self,
        memory: Memory,
        address: u32,
        data: &[u8],
        page_size: u16,
        progress: &mut dyn FnMut(usize),
    ) -> Result<()> {
        self.check_range(memory, address, data.len())?;

        let blocks = data.len().div_ceil(WRITE_BLOCK_SIZE);
        let mut offset = 0;
        for (i, block) in data.chunks(WRITE_BLOCK_SIZE).enumerate() {
            let block_addr = address + offset as u32;
            let legacy = self.block_address(block_addr)?;
            let length = block.len() as u16;

            let cmd = match memory {
                Memory::Flash => {
                    let mut flags = BlockFlags::empty();
                    if i == 0 {
                        flags |= BlockFlags::FIRST;
                    }
                    if i + 1 == blocks {
                        flags |= BlockFlags::LAST;
                    }
                    Command::WriteFlash {
                        address: legacy,
                        page_size,
                        flags,
                        length,
                    }
                }
                Memory::Eeprom => Command::WriteEeprom {
                    address: legacy,
                    length,
                },
            };

            log::trace!("{} block {} at 0x{:05X}", memory.name(), i, block_addr);
            self.control_out(cmd, block)?;
            offset += block.len();
            progress(offset);
        }
        Ok(())
    }

    /// Read back `data` at `address` and compare
    pub fn verify_memory(
        &mut self,
        memory: Memory,
        address: u32,
        data: &[u8],
        progress: &mut dyn FnMut(usize),
    ) -> Result<()> {
        let mut readback = vec![0u8; data.len()];
        self.read_memory(memory, address, &mut readback, progress)?;
        match data.iter().zip(&readback).position(|(a, b)| a != b) {
            None => Ok(()),
            Some(i) => Err(HostError::VerifyFailed {
                address: address + i as u32,
                expected: data[i],
                found: readback[i],
            }),
        }
    }
}
