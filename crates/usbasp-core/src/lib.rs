//! usbasp-core - Programming-session engine for USBasp-style ISP programmers
//!
//! This crate implements the device side of the USBasp protocol: it takes
//! the 8-byte setup packets sent by the host, tracks the current transfer
//! session, and streams flash/EEPROM payload in small chunks to and from a
//! target microcontroller. It is `no_std` and never allocates, so the same
//! code can run inside a USB interrupt handler or in a host-side simulator.
//!
//! # Features
//!
//! - `std` - Implement `std::error::Error` for [`Error`]
//!
//! # Example
//!
//! ```ignore
//! use usbasp_core::{Programmer, ProgrammingTarget};
//!
//! fn on_setup<T: ProgrammingTarget>(prog: &mut Programmer<T>, packet: &[u8; 8]) -> u8 {
//!     let reply = prog.setup(packet);
//!     reply.wire_len()
//! }
//!
//! fn on_read<T: ProgrammingTarget>(prog: &mut Programmer<T>, buf: &mut [u8]) -> u8 {
//!     match prog.read_chunk(buf) {
//!         Ok(n) => n as u8,
//!         Err(e) => e.wire_code(),
//!     }
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod error;
pub mod isp;
pub mod programmer;
pub mod protocol;
pub mod session;
pub mod target;

pub use error::{Error, Result};
pub use programmer::{Programmer, Reply};
pub use protocol::{BlockFlags, Command, SckOption, SetupPacket};
pub use session::{Mode, Session};
pub use target::{Board, NoBoard, ProgrammingTarget};
