//! # FiC Protocol Library
//!
//! This crate implements the line-oriented command protocol spoken by the FiC
//! board controller daemon. Clients use it to read and write FPGA registers,
//! query the board status and upload bitstreams.
//!
//! ## Session
//!
//! The server prompts with `OK\r\n`. The client answers with a single command
//! line; the first whitespace separated token selects the command:
//!
//! - **STAT**: latest status snapshot as JSON (`ts,state,hls,linkup,dipsw,led,chup,done,pwr`)
//! - **PROG / PROG8 / PROGPR / PROG8PR** `<size>`: SelectMap x16 / x8 load, with full
//!   reset or as partial reconfiguration. The server replies `OK` twice, then reads
//!   exactly `size` raw bytes.
//! - **WRITE** `<addr_hex> <data_hex>`: write one register byte
//! - **READ** `<addr_hex>`: read one register byte, answered in hex
//! - **INIT**: pulse PROGRAM_B
//! - **HELP**: list the commands
//!
//! Failures are answered with `ERROR\r\n`. Commands without a value report success
//! through the next ready prompt.
//!
//! ## Basic Usage
//!
//! ```
//! use fic_protocol::{Command, Reply};
//!
//! let command = Command::from_line("WRITE fffb 3f\r\n", 1024).expect("Command should parse");
//! assert_eq!(command, Command::Write { addr: 0xfffb, data: 0x3f });
//!
//! let mut out = Vec::new();
//! Reply::Value(0x3f).write_to(&mut out).expect("Writing to vector shouldn't fail");
//! assert_eq!(out, b"3f\r\n");
//! ```
//!
//! ## Features
//!
//! - **tokio**: enables [`framed::RequestCodec`], a `tokio-util` codec that decodes
//!   command lines and bitstream bodies from one stream.
//!
//! ## Error Handling
//!
//! Malformed lines are reported as [`error::ParseError`]. They only concern the
//! connection they arrived on.

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
#[cfg(feature = "tokio")]
pub mod framed;
