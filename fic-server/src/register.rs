//! # Register Access
//!
//! `read8`/`write8` of the FPGA register space on top of the [`Handshake`].
//!
//! A transfer is an opcode, the 16-bit address and, for writes, the data byte,
//! each split into chunks of the configured [`TransferWidth`] and sent most
//! significant chunk first. With [`TransferWidth::Nibble`] the host sends on
//! DATA3..0 and the device answers on DATA7..4.
//!
//! Every entry point reinitializes the pins first and calls
//! [`Handshake::finish`] on success and on failure, so the bus is idle
//! afterwards whatever happened.
use crate::{
    error::FicError,
    handshake::{Direction, Handshake},
};

pub const CMD_WRITE: u8 = 0x02;
pub const CMD_READ: u8 = 0x03;

/// Well known registers of the FiC design.
pub mod regs {
    pub const STATUS: u16 = 0xffff;
    pub const HLS: u16 = 0xfffe;
    pub const LINKUP: u16 = 0xfffd;
    pub const DIPSW: u16 = 0xfffc;
    pub const LED: u16 = 0xfffb;
    pub const CHUP: u16 = 0xfffa;
}

/// Chunk size of address and data transfers.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TransferWidth {
    /// 4-bit chunks, 4 lanes per direction.
    #[default]
    Nibble,
    /// 8-bit chunks on all 8 lanes. Earlier board revisions.
    Byte,
}

impl TransferWidth {
    pub fn bits(self) -> u32 {
        match self {
            TransferWidth::Nibble => 4,
            TransferWidth::Byte => 8,
        }
    }

    /// Splits the low `total_bits` of `value` into chunks, most significant first.
    pub fn chunks(self, value: u16, total_bits: u32) -> impl Iterator<Item = u8> {
        let bits = self.bits();
        let mask = (1u16 << bits) - 1;
        (0..total_bits / bits)
            .rev()
            .map(move |index| ((value >> (index * bits)) & mask) as u8)
    }
}

fn send_value<H: Handshake + ?Sized>(
    hs: &mut H,
    width: TransferWidth,
    value: u16,
    total_bits: u32,
) -> Result<(), FicError> {
    for chunk in width.chunks(value, total_bits) {
        hs.send(chunk)?;
    }
    Ok(())
}

/// Sends the 16-bit address phase.
pub fn set_addr<H: Handshake + ?Sized>(
    hs: &mut H,
    width: TransferWidth,
    addr: u16,
) -> Result<(), FicError> {
    send_value(hs, width, addr, 16)
}

fn request<H: Handshake + ?Sized>(
    hs: &mut H,
    width: TransferWidth,
    opcode: u8,
    addr: u16,
) -> Result<(), FicError> {
    hs.setup();
    hs.direction(Direction::Send);
    send_value(hs, width, opcode as u16, width.bits())?;
    set_addr(hs, width, addr)
}

pub fn write8<H: Handshake + ?Sized>(
    hs: &mut H,
    width: TransferWidth,
    addr: u16,
    data: u8,
) -> Result<(), FicError> {
    let result = request(hs, width, CMD_WRITE, addr)
        .and_then(|_| send_value(hs, width, data as u16, 8));
    hs.finish();
    result
}

pub fn read8<H: Handshake + ?Sized>(
    hs: &mut H,
    width: TransferWidth,
    addr: u16,
) -> Result<u8, FicError> {
    let result = request(hs, width, CMD_READ, addr).and_then(|_| {
        hs.direction(Direction::Receive);
        match width {
            TransferWidth::Nibble => {
                let high = hs.receive()?;
                let low = hs.receive()?;
                Ok((high & 0xf0) | ((low & 0xf0) >> 4))
            }
            TransferWidth::Byte => hs.receive(),
        }
    });
    hs.finish();
    result
}
