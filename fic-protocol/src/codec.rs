/// Parse and write implementations for the protocol lines
use std::io::{self, Write};

use crate::{
    error::ParseError,
    protocol::{Command, LoadMode, Reply, SelectMapWidth},
};

const LINE_END: &str = "\r\n";

impl Command {
    const CMD_STAT: &str = "STAT";
    const CMD_PROG: &str = "PROG";
    const CMD_PROG8: &str = "PROG8";
    const CMD_PROG_PR: &str = "PROGPR";
    const CMD_PROG8_PR: &str = "PROG8PR";
    const CMD_WRITE: &str = "WRITE";
    const CMD_READ: &str = "READ";
    const CMD_INIT: &str = "INIT";
    const CMD_HELP: &str = "HELP";

    /// One line summary of all commands, sent in reply to `HELP`.
    pub const HELP_TEXT: &str = "STAT | PROG <size> | PROG8 <size> | PROGPR <size> | PROG8PR <size> | WRITE <addr_hex> <data_hex> | READ <addr_hex> | INIT | HELP";

    /// Parses one command line. Trailing `\r\n` and surplus arguments are ignored.
    ///
    /// `max_bitstream_size` bounds the size accepted by the `PROG` family.
    pub fn from_line(line: &str, max_bitstream_size: usize) -> Result<Command, ParseError> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().ok_or(ParseError::Empty)?;
        match name {
            Self::CMD_STAT => Ok(Command::Stat),
            Self::CMD_INIT => Ok(Command::Init),
            Self::CMD_HELP => Ok(Command::Help),
            Self::CMD_READ => {
                let addr = tokens.next().ok_or(ParseError::MissingArgument {
                    command: Self::CMD_READ,
                    expected: 1,
                })?;
                Ok(Command::Read {
                    addr: parse_hex_u16(addr, "address")?,
                })
            }
            Self::CMD_WRITE => {
                let missing = ParseError::MissingArgument {
                    command: Self::CMD_WRITE,
                    expected: 2,
                };
                let addr = tokens.next().ok_or_else(|| missing.clone())?;
                let data = tokens.next().ok_or(missing)?;
                Ok(Command::Write {
                    addr: parse_hex_u16(addr, "address")?,
                    data: parse_hex_u8(data, "data")?,
                })
            }
            _ => {
                let Some((command, width, mode)) = Self::program_variant(name) else {
                    return Err(ParseError::UnknownCommand(name.to_string()));
                };
                let size = tokens.next().ok_or(ParseError::MissingArgument {
                    command,
                    expected: 1,
                })?;
                let size = size
                    .parse::<usize>()
                    .map_err(|_| ParseError::InvalidNumber {
                        what: "size",
                        value: size.to_string(),
                    })?;
                if size == 0 {
                    return Err(ParseError::ZeroSize);
                }
                if size > max_bitstream_size {
                    return Err(ParseError::TooLarge {
                        max: max_bitstream_size,
                        got: size,
                    });
                }
                Ok(Command::Program { size, width, mode })
            }
        }
    }

    fn program_variant(name: &str) -> Option<(&'static str, SelectMapWidth, LoadMode)> {
        match name {
            Self::CMD_PROG => Some((Self::CMD_PROG, SelectMapWidth::X16, LoadMode::Reset)),
            Self::CMD_PROG8 => Some((Self::CMD_PROG8, SelectMapWidth::X8, LoadMode::Reset)),
            Self::CMD_PROG_PR => Some((
                Self::CMD_PROG_PR,
                SelectMapWidth::X16,
                LoadMode::PartialReconfig,
            )),
            Self::CMD_PROG8_PR => Some((
                Self::CMD_PROG8_PR,
                SelectMapWidth::X8,
                LoadMode::PartialReconfig,
            )),
            _ => None,
        }
    }

    /// The command keyword as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Stat => Self::CMD_STAT,
            Command::Program { width, mode, .. } => match (width, mode) {
                (SelectMapWidth::X16, LoadMode::Reset) => Self::CMD_PROG,
                (SelectMapWidth::X8, LoadMode::Reset) => Self::CMD_PROG8,
                (SelectMapWidth::X16, LoadMode::PartialReconfig) => Self::CMD_PROG_PR,
                (SelectMapWidth::X8, LoadMode::PartialReconfig) => Self::CMD_PROG8_PR,
            },
            Command::Write { .. } => Self::CMD_WRITE,
            Command::Read { .. } => Self::CMD_READ,
            Command::Init => Self::CMD_INIT,
            Command::Help => Self::CMD_HELP,
        }
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        match self {
            Command::Program { size, .. } => write!(writer, "{} {}{LINE_END}", self.name(), size),
            Command::Write { addr, data } => {
                write!(writer, "{} {:x} {:x}{LINE_END}", self.name(), addr, data)
            }
            Command::Read { addr } => write!(writer, "{} {:x}{LINE_END}", self.name(), addr),
            Command::Stat | Command::Init | Command::Help => {
                write!(writer, "{}{LINE_END}", self.name())
            }
        }
    }
}

fn parse_hex_u16(token: &str, what: &'static str) -> Result<u16, ParseError> {
    u16::from_str_radix(token, 16).map_err(|_| ParseError::InvalidNumber {
        what,
        value: token.to_string(),
    })
}

fn parse_hex_u8(token: &str, what: &'static str) -> Result<u8, ParseError> {
    u8::from_str_radix(token, 16).map_err(|_| ParseError::InvalidNumber {
        what,
        value: token.to_string(),
    })
}

impl Reply {
    pub const READY: &str = "OK";
    pub const ERROR: &str = "ERROR";

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        match self {
            Reply::Ready => write!(writer, "{}{LINE_END}", Self::READY),
            Reply::Error => write!(writer, "{}{LINE_END}", Self::ERROR),
            Reply::Value(value) => write!(writer, "{:x}{LINE_END}", value),
            Reply::Json(text) | Reply::Text(text) => write!(writer, "{}{LINE_END}", text),
        }
    }

    /// Classifies a line received from the server. Anything that is neither the
    /// ready prompt nor an error is returned as text for the caller to interpret.
    pub fn from_line(line: &str) -> Reply {
        match line.trim_end() {
            Self::READY => Reply::Ready,
            Self::ERROR => Reply::Error,
            other => Reply::Text(other.to_string()),
        }
    }
}
