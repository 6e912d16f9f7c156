//! # FiC Client
//!
//! Blocking client for the FiC controller daemon: board status, register
//! access and FPGA configuration over the line based TCP protocol.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use fic_client::FicClient;
//! use fic_protocol::{LoadMode, SelectMapWidth};
//!
//! # fn main() -> Result<(), fic_client::ClientError> {
//! let mut client = FicClient::new("fic01:4000")?;
//!
//! let status = client.status()?;
//! println!("DIP switch: {:02x}, configured: {}", status.dipsw, status.done);
//!
//! client.write(0xfffb, 0x0f)?;
//! let led = client.read(0xfffb)?;
//!
//! let bitstream = std::fs::read("design.bin")?;
//! client.program(&bitstream, SelectMapWidth::X16, LoadMode::Reset)?;
//! # Ok(())
//! # }
//! ```
//!
//! Every reply of the daemon ends with its `OK` prompt. A command the daemon
//! answered with `ERROR` surfaces as [`ClientError::Rejected`]; the
//! connection stays usable afterwards unless the bitstream transfer failed.
use std::{
    io::{self, BufRead, BufReader, Write},
    net::{TcpStream, ToSocketAddrs},
};

use fic_protocol::{Command, FicStatus, LoadMode, Reply, SelectMapWidth};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0} rejected by the daemon")]
    Rejected(&'static str),
    #[error("Unexpected reply: {0:?}")]
    UnexpectedReply(String),
    #[error("Invalid status: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed by the daemon")]
    Closed,
}

/// Connection to a FiC daemon.
pub struct FicClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl FicClient {
    /// Connects and waits for the initial prompt.
    pub fn new(addr: impl ToSocketAddrs) -> Result<FicClient, ClientError> {
        let tcp = TcpStream::connect(addr)?;
        let mut client = FicClient {
            reader: BufReader::new(tcp.try_clone()?),
            writer: tcp,
        };
        match client.reply()? {
            Reply::Ready => Ok(client),
            other => Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    fn reply(&mut self) -> Result<Reply, ClientError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(ClientError::Closed);
        }
        Ok(Reply::from_line(&line))
    }

    /// Collects every reply line up to the next prompt.
    fn until_prompt(&mut self) -> Result<Vec<Reply>, ClientError> {
        let mut replies = Vec::new();
        loop {
            match self.reply()? {
                Reply::Ready => return Ok(replies),
                other => replies.push(other),
            }
        }
    }

    /// Sends `command` and returns its single text reply.
    fn query(&mut self, command: Command) -> Result<String, ClientError> {
        command.write_to(&mut self.writer)?;
        match self.until_prompt()?.as_slice() {
            [Reply::Text(text)] => Ok(text.clone()),
            [Reply::Error] => Err(ClientError::Rejected(command.name())),
            other => Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Sends `command`, which has no reply other than the prompt on success.
    fn execute(&mut self, command: Command) -> Result<(), ClientError> {
        command.write_to(&mut self.writer)?;
        match self.until_prompt()?.as_slice() {
            [] => Ok(()),
            [Reply::Error] => Err(ClientError::Rejected(command.name())),
            other => Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Latest status snapshot of the daemon. [`FicStatus::is_fresh`] is false
    /// until the first refresh.
    pub fn status(&mut self) -> Result<FicStatus, ClientError> {
        let json = self.query(Command::Stat)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn read(&mut self, addr: u16) -> Result<u8, ClientError> {
        let value = self.query(Command::Read { addr })?;
        u8::from_str_radix(&value, 16).map_err(|_| ClientError::UnexpectedReply(value))
    }

    pub fn write(&mut self, addr: u16, data: u8) -> Result<(), ClientError> {
        self.execute(Command::Write { addr, data })
    }

    /// Pulses PROGRAM_B, clearing the FPGA configuration.
    pub fn init(&mut self) -> Result<(), ClientError> {
        self.execute(Command::Init)
    }

    pub fn help(&mut self) -> Result<String, ClientError> {
        self.query(Command::Help)
    }

    /// Configures the FPGA with `bitstream`.
    ///
    /// Blocks until the daemon reports the result, which for a full bitstream
    /// can take several seconds.
    pub fn program(
        &mut self,
        bitstream: &[u8],
        width: SelectMapWidth,
        mode: LoadMode,
    ) -> Result<(), ClientError> {
        let command = Command::Program {
            size: bitstream.len(),
            width,
            mode,
        };
        command.write_to(&mut self.writer)?;
        // Size accepted, then ready for the body
        for _ in 0..2 {
            match self.reply()? {
                Reply::Ready => {}
                Reply::Error => {
                    self.until_prompt()?;
                    return Err(ClientError::Rejected(command.name()));
                }
                other => return Err(ClientError::UnexpectedReply(format!("{other:?}"))),
            }
        }
        self.writer.write_all(bitstream)?;
        self.writer.flush()?;
        match self.until_prompt()?.as_slice() {
            [] => Ok(()),
            [Reply::Error] => Err(ClientError::Rejected(command.name())),
            other => Err(ClientError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}
