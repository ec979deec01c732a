//! The programming-session engine
//!
//! [`Programmer`] owns the [`Session`] together with the target transport and
//! the board I/O, and exposes the three entry points the USB driver calls:
//!
//! - [`setup`](Programmer::setup) for every vendor setup packet
//! - [`read_chunk`](Programmer::read_chunk) for each IN data packet
//! - [`write_chunk`](Programmer::write_chunk) for each OUT data packet
//!
//! All three take `&mut self`, so calls are serialized by construction.
//!
//! Reads and writes signal the end of a transfer differently. A read ends
//! when the host asks for a chunk shorter than [`MAX_CHUNK_SIZE`]; a write
//! ends when the byte count announced in the setup packet is used up, and
//! `write_chunk` returns `true` at that point. A new read/write command
//! arriving mid-transfer replaces the open transfer without completing it.

use heapless::Vec;

use crate::error::{Error, Result};
use crate::protocol::{
    BlockFlags, Command, SckOption, SetupPacket, BULK_FOLLOWS, MAX_CHUNK_SIZE, PROG_ENABLE_OK,
    SETUP_PACKET_SIZE,
};
use crate::session::{Mode, Session};
use crate::target::{Board, NoBoard, ProgrammingTarget};

/// Maximum length of an immediate setup reply
pub const MAX_REPLY_LEN: usize = 4;

/// Outcome of a setup request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// Short reply sent in the control transfer's data stage
    Immediate(Vec<u8, MAX_REPLY_LEN>),
    /// The data stage is streamed through the read/write engines
    BulkFollows,
}

impl Reply {
    /// Zero-length reply
    pub fn empty() -> Self {
        Self::Immediate(Vec::new())
    }

    fn from_slice(bytes: &[u8]) -> Self {
        let mut data = Vec::new();
        let fits = data.extend_from_slice(bytes).is_ok();
        debug_assert!(fits, "reply longer than {} bytes", MAX_REPLY_LEN);
        Self::Immediate(data)
    }

    /// Reply bytes (empty for [`Reply::BulkFollows`])
    pub fn data(&self) -> &[u8] {
        match self {
            Self::Immediate(data) => data,
            Self::BulkFollows => &[],
        }
    }

    /// Length byte returned to the USB driver
    pub fn wire_len(&self) -> u8 {
        match self {
            Self::Immediate(data) => data.len() as u8,
            Self::BulkFollows => BULK_FOLLOWS,
        }
    }
}

/// USBasp programming-session engine
pub struct Programmer<T, B = NoBoard> {
    session: Session,
    target: T,
    board: B,
}

impl<T: ProgrammingTarget> Programmer<T, NoBoard> {
    /// Create an engine for a target on a board without jumper or LED
    pub fn new(target: T) -> Self {
        Self::with_board(target, NoBoard)
    }
}

impl<T: ProgrammingTarget, B: Board> Programmer<T, B> {
    /// Create an engine with explicit board I/O
    pub fn with_board(target: T, board: B) -> Self {
        Self {
            session: Session::new(),
            target,
            board,
        }
    }

    /// Current session state
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The target transport
    pub fn target(&self) -> &T {
        &self.target
    }

    /// The target transport, mutably
    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    /// The board I/O
    pub fn board(&self) -> &B {
        &self.board
    }

    /// The board I/O, mutably
    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    /// Consume the engine and return the target and board
    pub fn into_parts(self) -> (T, B) {
        (self.target, self.board)
    }

    /// Handle a raw setup packet
    ///
    /// Unknown opcodes are ignored and produce an empty reply.
    pub fn setup(&mut self, raw: &[u8; SETUP_PACKET_SIZE]) -> Reply {
        let packet: SetupPacket = zerocopy::transmute!(*raw);
        match Command::decode(&packet) {
            Some(cmd) => self.dispatch(cmd),
            None => {
                log::debug!("ignoring unknown opcode 0x{:02X}", packet.opcode);
                Reply::empty()
            }
        }
    }

    /// Execute a decoded command
    pub fn dispatch(&mut self, cmd: Command) -> Reply {
        log::trace!("dispatch {:?}", cmd);

        match cmd {
            Command::Connect => {
                let sck = if self.board.slow_sck_jumper() {
                    SckOption::SLOW
                } else {
                    self.session.sck_option
                };
                self.target.set_sck_option(sck);
                self.session.extended_address = false;
                self.board.set_connected_led(true);
                self.target.connect();
                log::debug!("connected, SCK option {}", sck.code());
                Reply::empty()
            }

            Command::Disconnect => {
                self.target.disconnect();
                self.board.set_connected_led(false);
                log::debug!("disconnected");
                Reply::empty()
            }

            Command::Transmit(bytes) => {
                let mut rx = [0u8; 4];
                for (out, byte) in rx.iter_mut().zip(bytes) {
                    *out = self.target.transmit(byte);
                }
                Reply::from_slice(&rx)
            }

            Command::EnableProgramming => {
                let status = self.target.enter_programming_mode();
                if status != PROG_ENABLE_OK {
                    log::warn!("target did not answer programming enable");
                }
                Reply::from_slice(&[status])
            }

            Command::ReadFlash { address, length } => {
                self.session.load_legacy_address(address);
                self.session.open(Mode::ReadFlash, length);
                Reply::BulkFollows
            }

            Command::ReadEeprom { address, length } => {
                self.session.load_legacy_address(address);
                self.session.open(Mode::ReadEeprom, length);
                Reply::BulkFollows
            }

            Command::WriteFlash {
                address,
                page_size,
                flags,
                length,
            } => {
                self.session.load_legacy_address(address);
                self.session.page_size = page_size;
                self.session.block_flags = flags;
                if flags.contains(BlockFlags::FIRST) {
                    self.session.page_counter = page_size;
                }
                self.session.open(Mode::WriteFlash, length);
                log::debug!(
                    "flash write: {} bytes at 0x{:08X}, page size {}, flags {:?}",
                    length,
                    self.session.address,
                    page_size,
                    flags
                );
                Reply::BulkFollows
            }

            Command::WriteEeprom { address, length } => {
                self.session.load_legacy_address(address);
                self.session.page_size = 0;
                self.session.block_flags = BlockFlags::empty();
                self.session.open(Mode::WriteEeprom, length);
                Reply::BulkFollows
            }

            Command::SetExtendedAddress(address) => {
                self.session.extended_address = true;
                self.session.address = address;
                Reply::empty()
            }

            Command::SetSckOption(option) => {
                self.session.sck_option = option;
                Reply::from_slice(&[0])
            }
        }
    }

    /// Fill `buf` with the next bytes of the open read transfer
    ///
    /// A buffer shorter than [`MAX_CHUNK_SIZE`] is the final chunk and
    /// closes the transfer.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mode = self.session.mode;
        if !mode.is_read() {
            log::debug!("read chunk while {:?}", mode);
            return Err(Error::InvalidState);
        }

        for slot in buf.iter_mut() {
            let address = self.session.address;
            *slot = if mode == Mode::ReadFlash {
                self.target.read_flash(address)
            } else {
                self.target.read_eeprom(address)
            };
            self.session.address = address.wrapping_add(1);
            self.session.remaining = self.session.remaining.saturating_sub(1);
        }

        if buf.len() < MAX_CHUNK_SIZE {
            self.session.finish();
        }

        Ok(buf.len())
    }

    /// Consume the next bytes of the open write transfer
    ///
    /// Returns `true` once the announced byte count has been written. Bytes
    /// past that point in the same chunk are dropped.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<bool> {
        let mode = self.session.mode;
        if !mode.is_write() {
            log::debug!("write chunk while {:?}", mode);
            return Err(Error::InvalidState);
        }

        for (i, &byte) in data.iter().enumerate() {
            if self.session.remaining == 0 {
                self.session.finish();
                log::warn!("dropping {} bytes sent to an empty transfer", data.len() - i);
                return Ok(true);
            }

            let address = self.session.address;
            if mode == Mode::WriteEeprom {
                self.target.write_eeprom(address, byte);
            } else {
                self.program_flash_byte(address, byte);
            }

            self.session.remaining -= 1;
            self.session.address = address.wrapping_add(1);

            if self.session.remaining == 0 {
                self.session.finish();
                if self.session.block_flags.contains(BlockFlags::LAST)
                    && self.session.page_size != 0
                    && self.session.page_counter != self.session.page_size
                {
                    log::trace!("flushing partial page at 0x{:08X}", address);
                    self.target.flush_page(address, byte);
                    self.session.page_counter = self.session.page_size;
                }

                let extra = data.len() - i - 1;
                if extra != 0 {
                    log::warn!("dropping {} bytes past the end of the transfer", extra);
                }
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn program_flash_byte(&mut self, address: u32, byte: u8) {
        let page_size = self.session.page_size;
        if page_size == 0 {
            self.target.write_flash(address, byte, true);
            return;
        }

        // A multi-block write continued without FIRST, or with a different
        // geometry, restarts the page count here.
        if self.session.page_counter == 0 || self.session.page_counter > page_size {
            self.session.page_counter = page_size;
        }

        self.target.write_flash(address, byte, false);
        self.session.page_counter -= 1;
        if self.session.page_counter == 0 {
            log::trace!("page full, flushing at 0x{:08X}", address);
            self.target.flush_page(address, byte);
            self.session.page_counter = page_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_page_size, FUNC_WRITEFLASH, PROG_ENABLE_FAILED};
    use std::vec::Vec as StdVec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Connect,
        Disconnect,
        Sck(u8),
        Enable,
        Transmit(u8),
        ReadFlash(u32),
        ReadEeprom(u32),
        WriteFlash(u32, u8, bool),
        Flush(u32, u8),
        WriteEeprom(u32, u8),
    }

    #[derive(Default)]
    struct RecordingTarget {
        ops: StdVec<Op>,
        enable_status: u8,
    }

    impl RecordingTarget {
        fn flushes(&self) -> StdVec<(u32, u8)> {
            self.ops
                .iter()
                .filter_map(|op| match *op {
                    Op::Flush(addr, trigger) => Some((addr, trigger)),
                    _ => None,
                })
                .collect()
        }

        fn clear(&mut self) {
            self.ops.clear();
        }
    }

    impl ProgrammingTarget for RecordingTarget {
        fn connect(&mut self) {
            self.ops.push(Op::Connect);
        }

        fn disconnect(&mut self) {
            self.ops.push(Op::Disconnect);
        }

        fn enter_programming_mode(&mut self) -> u8 {
            self.ops.push(Op::Enable);
            self.enable_status
        }

        fn transmit(&mut self, byte: u8) -> u8 {
            self.ops.push(Op::Transmit(byte));
            byte.wrapping_add(1)
        }

        fn read_flash(&mut self, address: u32) -> u8 {
            self.ops.push(Op::ReadFlash(address));
            address as u8
        }

        fn read_eeprom(&mut self, address: u32) -> u8 {
            self.ops.push(Op::ReadEeprom(address));
            !(address as u8)
        }

        fn write_flash(&mut self, address: u32, value: u8, commit_immediately: bool) {
            self.ops.push(Op::WriteFlash(address, value, commit_immediately));
        }

        fn flush_page(&mut self, address: u32, trigger: u8) {
            self.ops.push(Op::Flush(address, trigger));
        }

        fn write_eeprom(&mut self, address: u32, value: u8) {
            self.ops.push(Op::WriteEeprom(address, value));
        }

        fn set_sck_option(&mut self, option: SckOption) {
            self.ops.push(Op::Sck(option.code()));
        }
    }

    #[derive(Default)]
    struct TestBoard {
        slow_jumper: bool,
        led: bool,
    }

    impl Board for TestBoard {
        fn slow_sck_jumper(&self) -> bool {
            self.slow_jumper
        }

        fn set_connected_led(&mut self, on: bool) {
            self.led = on;
        }
    }

    fn programmer() -> Programmer<RecordingTarget, TestBoard> {
        Programmer::with_board(RecordingTarget::default(), TestBoard::default())
    }

    fn write_flash(address: u16, page_size: u16, flags: BlockFlags, length: u16) -> Command {
        Command::WriteFlash {
            address,
            page_size,
            flags,
            length,
        }
    }

    /// Feed `data` in chunks of at most `chunk` bytes, returning the
    /// completion flag of every call
    fn feed(
        prog: &mut Programmer<RecordingTarget, TestBoard>,
        data: &[u8],
        chunk: usize,
    ) -> StdVec<bool> {
        data.chunks(chunk)
            .map(|c| prog.write_chunk(c).unwrap())
            .collect()
    }

    #[test]
    fn test_connect_selects_clock_and_clears_extended_mode() {
        let mut prog = programmer();
        prog.dispatch(Command::SetSckOption(SckOption::KHZ_1500));
        prog.dispatch(Command::SetExtendedAddress(0x0001_0000));
        assert!(prog.session().extended_address());

        assert_eq!(prog.dispatch(Command::Connect), Reply::empty());
        assert!(!prog.session().extended_address());
        assert!(prog.board().led);
        assert_eq!(
            prog.target().ops,
            [Op::Sck(SckOption::KHZ_1500.code()), Op::Connect]
        );

        prog.dispatch(Command::Disconnect);
        assert!(!prog.board().led);
        assert_eq!(prog.target().ops.last(), Some(&Op::Disconnect));
    }

    #[test]
    fn test_connect_slow_jumper_overrides_option() {
        let mut prog = programmer();
        prog.board_mut().slow_jumper = true;
        prog.dispatch(Command::SetSckOption(SckOption::KHZ_1500));
        prog.dispatch(Command::Connect);
        assert_eq!(prog.target().ops[0], Op::Sck(SckOption::SLOW.code()));
        // The stored option is untouched
        assert_eq!(prog.session().sck_option(), SckOption::KHZ_1500);
    }

    #[test]
    fn test_connect_twice_is_idempotent() {
        let mut prog = programmer();
        prog.dispatch(Command::SetSckOption(SckOption::KHZ_93_75));
        prog.dispatch(Command::SetExtendedAddress(0x1234_5678));

        prog.dispatch(Command::Connect);
        let first = prog.session().clone();
        prog.dispatch(Command::Connect);
        assert_eq!(prog.session(), &first);
        assert!(!first.extended_address());
        assert_eq!(
            prog.target().ops,
            [Op::Sck(8), Op::Connect, Op::Sck(8), Op::Connect]
        );
    }

    #[test]
    fn test_transmit_replies_with_shifted_bytes() {
        let mut prog = programmer();
        let reply = prog.dispatch(Command::Transmit([0x30, 0x00, 0x01, 0x00]));
        assert_eq!(reply.data(), &[0x31, 0x01, 0x02, 0x01]);
        assert_eq!(reply.wire_len(), 4);
        assert_eq!(
            prog.target().ops,
            [
                Op::Transmit(0x30),
                Op::Transmit(0x00),
                Op::Transmit(0x01),
                Op::Transmit(0x00)
            ]
        );
    }

    #[test]
    fn test_reply_holds_full_transmit_answer() {
        let reply = Reply::from_slice(&[1, 2, 3, 4]);
        assert_eq!(reply.data(), &[1, 2, 3, 4]);
        assert_eq!(reply.wire_len(), MAX_REPLY_LEN as u8);
        assert_eq!(Reply::from_slice(&[]), Reply::empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "reply longer than 4 bytes")]
    fn test_oversized_reply_is_caught() {
        let _ = Reply::from_slice(&[0; MAX_REPLY_LEN + 1]);
    }

    #[test]
    fn test_enable_programming_reports_status() {
        let mut prog = programmer();
        assert_eq!(prog.dispatch(Command::EnableProgramming).data(), &[0]);
        prog.target_mut().enable_status = PROG_ENABLE_FAILED;
        assert_eq!(
            prog.dispatch(Command::EnableProgramming).data(),
            &[PROG_ENABLE_FAILED]
        );
    }

    #[test]
    fn test_set_sck_option_replies_success() {
        let mut prog = programmer();
        let reply = prog.dispatch(Command::SetSckOption(SckOption(0x0C)));
        assert_eq!(reply.data(), &[0]);
        assert_eq!(prog.session().sck_option(), SckOption(0x0C));
        assert!(prog.target().ops.is_empty());
    }

    #[test]
    fn test_unknown_opcode_is_noop() {
        let mut prog = programmer();
        let reply = prog.setup(&[0xC0, 0x55, 1, 2, 3, 4, 5, 6]);
        assert_eq!(reply.wire_len(), 0);
        assert_eq!(prog.session(), &Session::new());
        assert!(prog.target().ops.is_empty());
    }

    #[test]
    fn test_bulk_commands_reply_with_sentinel() {
        let mut prog = programmer();
        let reply = prog.dispatch(Command::ReadFlash {
            address: 0,
            length: 8,
        });
        assert_eq!(reply, Reply::BulkFollows);
        assert_eq!(reply.wire_len(), BULK_FOLLOWS);
    }

    #[test]
    fn test_setup_decodes_packed_page_size() {
        let mut prog = programmer();
        let (low, flags) = encode_page_size(0x180, BlockFlags::FIRST);
        let reply = prog.setup(&[0xC0, FUNC_WRITEFLASH, 0x00, 0x01, low, flags, 0x00, 0x03]);
        assert_eq!(reply, Reply::BulkFollows);
        let session = prog.session();
        assert_eq!(session.mode(), Mode::WriteFlash);
        assert_eq!(session.address(), 0x0100);
        assert_eq!(session.page_size(), 0x180);
        assert_eq!(session.page_counter(), 0x180);
        assert_eq!(session.block_flags(), BlockFlags::FIRST);
        assert_eq!(session.remaining(), 0x300);
    }

    #[test]
    fn test_unpaged_flash_commits_every_byte() {
        let mut prog = programmer();
        prog.dispatch(Command::Connect);
        prog.dispatch(write_flash(0x0200, 0, BlockFlags::FIRST | BlockFlags::LAST, 5));
        prog.target_mut().clear();

        let payload = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4];
        let flags = feed(&mut prog, &payload, 1);
        assert_eq!(flags, [false, false, false, false, true]);
        assert_eq!(prog.session().mode(), Mode::Idle);

        let expected: StdVec<Op> = payload
            .iter()
            .enumerate()
            .map(|(i, &b)| Op::WriteFlash(0x0200 + i as u32, b, true))
            .collect();
        assert_eq!(prog.target().ops, expected);
    }

    #[test]
    fn test_full_page_flushes_on_last_byte() {
        let mut prog = programmer();
        prog.dispatch(Command::Connect);
        let reply = prog.setup(&[0xC0, FUNC_WRITEFLASH, 0x00, 0x00, 0x40, 0x01, 0x40, 0x00]);
        assert_eq!(reply, Reply::BulkFollows);
        prog.target_mut().clear();

        let payload: StdVec<u8> = (0..64u8).collect();
        let mut completions = StdVec::new();
        for (n, chunk) in payload.chunks(MAX_CHUNK_SIZE).enumerate() {
            let done = prog.write_chunk(chunk).unwrap();
            completions.push(done);
            if n < 7 {
                assert!(prog.target().flushes().is_empty());
                assert_eq!(prog.session().mode(), Mode::WriteFlash);
            }
        }

        assert_eq!(completions.iter().filter(|&&d| d).count(), 1);
        assert_eq!(completions.last(), Some(&true));
        assert_eq!(prog.target().flushes(), [(63, 63)]);
        assert_eq!(prog.target().ops.last(), Some(&Op::Flush(63, 63)));
        assert_eq!(prog.session().mode(), Mode::Idle);
        assert_eq!(prog.session().address(), 64);
    }

    #[test]
    fn test_whole_pages_flush_once_per_page() {
        let mut prog = programmer();
        prog.dispatch(write_flash(0, 16, BlockFlags::FIRST | BlockFlags::LAST, 64));

        let payload: StdVec<u8> = (0..64u8).map(|b| b ^ 0x5A).collect();
        feed(&mut prog, &payload, 8);

        let flushes = prog.target().flushes();
        assert_eq!(flushes.len(), 4);
        for (page, &(addr, trigger)) in flushes.iter().enumerate() {
            let last = page as u32 * 16 + 15;
            assert_eq!(addr, last);
            assert_eq!(trigger, payload[last as usize]);
        }
    }

    #[test]
    fn test_partial_trailing_page_flushed_on_completion() {
        let mut prog = programmer();
        prog.dispatch(write_flash(0, 16, BlockFlags::FIRST | BlockFlags::LAST, 40));

        let payload: StdVec<u8> = (0..40u8).collect();
        let flags = feed(&mut prog, &payload, 8);
        assert_eq!(flags, [false, false, false, false, true]);

        // Two natural flushes plus the completion flush
        assert_eq!(prog.target().flushes(), [(15, 15), (31, 31), (39, 39)]);
        assert_eq!(prog.session().page_counter(), 16);
    }

    #[test]
    fn test_partial_page_kept_without_last_flag() {
        let mut prog = programmer();
        prog.dispatch(write_flash(0, 16, BlockFlags::FIRST, 20));
        feed(&mut prog, &[0u8; 20], 8);
        assert_eq!(prog.target().flushes(), [(15, 0)]);
        assert_eq!(prog.session().page_counter(), 12);
    }

    #[test]
    fn test_multi_block_write_carries_page_counter() {
        let mut prog = programmer();
        let payload: StdVec<u8> = (0..50u8).collect();

        // 50 bytes in blocks of 20/20/10 with 16-byte pages
        let blocks = [
            (0u16, BlockFlags::FIRST, &payload[0..20]),
            (20, BlockFlags::empty(), &payload[20..40]),
            (40, BlockFlags::LAST, &payload[40..50]),
        ];
        for (address, flags, block) in blocks {
            prog.dispatch(write_flash(address, 16, flags, block.len() as u16));
            let done = feed(&mut prog, block, 8);
            assert_eq!(done.last(), Some(&true));
            assert_eq!(prog.session().mode(), Mode::Idle);
        }

        assert_eq!(
            prog.target().flushes(),
            [(15, 15), (31, 31), (47, 47), (49, 49)]
        );
    }

    #[test]
    fn test_page_boundary_on_final_byte_not_flushed_twice() {
        let mut prog = programmer();
        prog.dispatch(write_flash(0, 8, BlockFlags::FIRST | BlockFlags::LAST, 16));
        feed(&mut prog, &[0xEE; 16], 8);
        assert_eq!(prog.target().flushes(), [(7, 0xEE), (15, 0xEE)]);
    }

    #[test]
    fn test_completion_mid_chunk_drops_tail() {
        let mut prog = programmer();
        prog.dispatch(Command::WriteEeprom {
            address: 0x10,
            length: 3,
        });
        assert!(prog.write_chunk(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap());
        assert_eq!(
            prog.target().ops,
            [
                Op::WriteEeprom(0x10, 1),
                Op::WriteEeprom(0x11, 2),
                Op::WriteEeprom(0x12, 3)
            ]
        );
        assert_eq!(prog.session().mode(), Mode::Idle);
        assert_eq!(prog.write_chunk(&[9]), Err(Error::InvalidState));
    }

    #[test]
    fn test_eeprom_write_resets_page_geometry() {
        let mut prog = programmer();
        prog.dispatch(write_flash(0, 64, BlockFlags::FIRST | BlockFlags::LAST, 1));
        prog.dispatch(Command::WriteEeprom {
            address: 0,
            length: 2,
        });
        assert_eq!(prog.session().page_size(), 0);
        assert_eq!(prog.session().block_flags(), BlockFlags::empty());

        assert!(prog.write_chunk(&[0xAB, 0xCD]).unwrap());
        assert!(prog.target().flushes().is_empty());
    }

    #[test]
    fn test_zero_length_write_completes_immediately() {
        let mut prog = programmer();
        prog.dispatch(write_flash(0, 0, BlockFlags::empty(), 0));
        assert_eq!(prog.session().mode(), Mode::WriteFlash);
        assert_eq!(prog.write_chunk(&[0x00]), Ok(true));
        assert!(prog.target().ops.is_empty());
        assert_eq!(prog.session().mode(), Mode::Idle);
    }

    #[test]
    fn test_read_eeprom_short_chunk_ends_transfer() {
        let mut prog = programmer();
        prog.dispatch(Command::ReadEeprom {
            address: 0x10,
            length: 10,
        });

        let mut first = [0u8; 8];
        assert_eq!(prog.read_chunk(&mut first), Ok(8));
        assert_eq!(prog.session().mode(), Mode::ReadEeprom);
        let expected: StdVec<u8> = (0x10..0x18u32).map(|a| !(a as u8)).collect();
        assert_eq!(&first[..], &expected[..]);

        let mut second = [0u8; 2];
        assert_eq!(prog.read_chunk(&mut second), Ok(2));
        assert_eq!(second, [!0x18u8, !0x19u8]);
        assert_eq!(prog.session().mode(), Mode::Idle);
        assert_eq!(prog.session().address(), 0x1A);
    }

    #[test]
    fn test_read_flash_concatenates_sequential_bytes() {
        let mut prog = programmer();
        prog.dispatch(Command::ReadFlash {
            address: 0x0300,
            length: 21,
        });

        let mut out = StdVec::new();
        for len in [8, 8, 5] {
            let mut buf = [0u8; MAX_CHUNK_SIZE];
            let n = prog.read_chunk(&mut buf[..len]).unwrap();
            out.extend_from_slice(&buf[..n]);
        }

        let expected: StdVec<u8> = (0x0300..0x0315u32).map(|a| a as u8).collect();
        assert_eq!(out, expected);
        assert_eq!(prog.session().mode(), Mode::Idle);
        assert_eq!(prog.session().remaining(), 0);
    }

    #[test]
    fn test_read_zero_length_chunk_ends_transfer() {
        let mut prog = programmer();
        prog.dispatch(Command::ReadFlash {
            address: 0,
            length: 8,
        });
        let mut buf = [0u8; 8];
        assert_eq!(prog.read_chunk(&mut buf), Ok(8));
        assert_eq!(prog.read_chunk(&mut []), Ok(0));
        assert_eq!(prog.session().mode(), Mode::Idle);
    }

    #[test]
    fn test_engines_reject_wrong_mode() {
        let mut prog = programmer();
        let mut buf = [0u8; 8];
        assert_eq!(prog.read_chunk(&mut buf), Err(Error::InvalidState));
        assert_eq!(prog.write_chunk(&buf), Err(Error::InvalidState));
        assert_eq!(Error::InvalidState.wire_code(), 0xFF);

        prog.dispatch(Command::ReadFlash {
            address: 0,
            length: 8,
        });
        assert_eq!(prog.write_chunk(&buf), Err(Error::InvalidState));

        prog.dispatch(Command::WriteEeprom {
            address: 0,
            length: 8,
        });
        assert_eq!(prog.read_chunk(&mut buf), Err(Error::InvalidState));
        assert!(prog.target().ops.is_empty());
    }

    #[test]
    fn test_extended_address_ignores_inline_address() {
        let mut prog = programmer();
        prog.dispatch(Command::SetExtendedAddress(0x0102_0304));
        prog.dispatch(write_flash(0x9999, 0, BlockFlags::empty(), 4));
        assert_eq!(prog.session().address(), 0x0102_0304);

        prog.dispatch(Command::ReadEeprom {
            address: 0x1111,
            length: 1,
        });
        assert_eq!(prog.session().address(), 0x0102_0304);

        // Connect drops back to legacy addressing
        prog.dispatch(Command::Connect);
        prog.dispatch(Command::ReadFlash {
            address: 0x2222,
            length: 1,
        });
        assert_eq!(prog.session().address(), 0x2222);
    }

    #[test]
    fn test_extended_address_streams_past_64k() {
        let mut prog = programmer();
        prog.dispatch(Command::SetExtendedAddress(0x0001_FFFE));
        prog.dispatch(Command::ReadFlash {
            address: 0,
            length: 4,
        });
        let mut buf = [0u8; 4];
        prog.read_chunk(&mut buf).unwrap();
        assert_eq!(
            prog.target().ops,
            [
                Op::ReadFlash(0x0001_FFFE),
                Op::ReadFlash(0x0001_FFFF),
                Op::ReadFlash(0x0002_0000),
                Op::ReadFlash(0x0002_0001)
            ]
        );
    }

    #[test]
    fn test_new_command_abandons_transfer() {
        let mut prog = programmer();
        prog.dispatch(Command::WriteEeprom {
            address: 0,
            length: 16,
        });
        assert!(!prog.write_chunk(&[0; 8]).unwrap());

        prog.dispatch(Command::ReadFlash {
            address: 0x40,
            length: 4,
        });
        assert_eq!(prog.session().mode(), Mode::ReadFlash);
        assert_eq!(prog.session().remaining(), 4);
        assert_eq!(prog.write_chunk(&[0; 8]), Err(Error::InvalidState));
    }
}
