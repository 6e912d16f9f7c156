//! [`tokio_util::codec`] implementation of the server side of the protocol.
//!
//! Command lines and bitstream bodies share one byte stream. After a `PROG`
//! family command has been decoded, the decoder switches to body mode and
//! yields the next `size` bytes as one [`Request::Bitstream`].
use std::io;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::ParseError,
    protocol::{Command, Reply},
};

/// Longest accepted command line, terminator included.
pub const MAX_LINE_LENGTH: usize = 1024;

/// One unit decoded from a client connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    Command(Command),
    /// A line that did not parse. The connection stays usable.
    Invalid(ParseError),
    /// Raw body announced by the preceding `PROG` command.
    Bitstream(Bytes),
}

#[derive(Clone, Debug)]
pub struct RequestCodec {
    max_bitstream_size: usize,
    pending_body: Option<usize>,
}

impl RequestCodec {
    pub fn new(max_bitstream_size: usize) -> RequestCodec {
        RequestCodec {
            max_bitstream_size,
            pending_body: None,
        }
    }

    /// Size of the bitstream body the decoder is waiting for, if any.
    pub fn pending_body(&self) -> Option<usize> {
        self.pending_body
    }

    fn decode_line(&mut self, line: &[u8]) -> Request {
        let Ok(text) = std::str::from_utf8(line) else {
            return Request::Invalid(ParseError::InvalidUtf8);
        };
        match Command::from_line(text, self.max_bitstream_size) {
            Ok(command) => {
                if let Command::Program { size, .. } = command {
                    self.pending_body = Some(size);
                }
                Request::Command(command)
            }
            Err(err) => Request::Invalid(err),
        }
    }
}

fn line_too_long() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Command line exceeds {MAX_LINE_LENGTH} bytes"),
    )
}

impl Decoder for RequestCodec {
    type Item = Request;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Request>, io::Error> {
        if let Some(size) = self.pending_body {
            if src.len() < size {
                src.reserve(size - src.len());
                return Ok(None);
            }
            self.pending_body = None;
            return Ok(Some(Request::Bitstream(src.split_to(size).freeze())));
        }

        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > MAX_LINE_LENGTH {
                return Err(line_too_long());
            }
            return Ok(None);
        };
        if newline >= MAX_LINE_LENGTH {
            return Err(line_too_long());
        }
        let line = src.split_to(newline + 1);
        Ok(Some(self.decode_line(&line)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Request>, io::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if let Some(size) = self.pending_body {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Connection closed after {} of {} bitstream bytes",
                    src.len(),
                    size
                ),
            ));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // Last line without terminator
        let line = src.split_to(src.len());
        Ok(Some(self.decode_line(&line)))
    }
}

impl Encoder<Reply> for RequestCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Reply, dst: &mut BytesMut) -> Result<(), io::Error> {
        let mut line = Vec::with_capacity(8);
        item.write_to(&mut line)?;
        dst.extend_from_slice(&line);
        Ok(())
    }
}
