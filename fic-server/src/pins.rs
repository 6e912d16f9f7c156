//! Wiring between the GPIO header and the FiC board.
use fic_protocol::SelectMapWidth;

/// Physical pin of every signal role.
///
/// Built once at startup and shared read-only by all components. The
/// configuration data lanes and the handshake lanes are contiguous pin ranges
/// starting at `config_data` and `comm_data`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PinMap {
    pub init: u32,
    pub program: u32,
    pub done: u32,
    pub cclk: u32,
    /// D0 of the SelectMap data bus. D0..D15 follow.
    pub config_data: u32,
    pub power_ok: u32,
    pub clock_select: u32,
    pub chip_select: u32,
    pub read_write: u32,

    /// Host request
    pub rreq: u32,
    /// Host strobe
    pub rstb: u32,
    /// Device request
    pub freq: u32,
    /// Device acknowledge
    pub fack: u32,
    /// DATA0 of the handshake bus. DATA0..DATA7 follow.
    pub comm_data: u32,
}

impl Default for PinMap {
    /// Raspberry Pi header wiring of the FiC board (BCM numbering).
    fn default() -> Self {
        Self {
            init: 4,
            program: 5,
            done: 6,
            cclk: 7,
            config_data: 8,
            power_ok: 24,
            clock_select: 25,
            chip_select: 26,
            read_write: 27,
            rreq: 23,
            rstb: 22,
            freq: 21,
            fack: 20,
            comm_data: 12,
        }
    }
}

/// Single bit mask of a pin.
pub fn bit(pin: u32) -> u32 {
    1 << pin
}

impl PinMap {
    /// Number of handshake data lanes.
    pub const COMM_LANES: u32 = 8;

    pub fn config_data_pins(&self, width: SelectMapWidth) -> impl Iterator<Item = u32> {
        self.config_data..self.config_data + width.lanes()
    }

    pub fn config_data_mask(&self, width: SelectMapWidth) -> u32 {
        self.config_data_pins(width).fold(0, |mask, pin| mask | bit(pin))
    }

    pub fn comm_data_pins(&self) -> impl Iterator<Item = u32> {
        self.comm_data..self.comm_data + Self::COMM_LANES
    }

    pub fn comm_data_mask(&self) -> u32 {
        self.comm_data_pins().fold(0, |mask, pin| mask | bit(pin))
    }

    /// Host driven handshake outputs: RREQ, RSTB and the data lanes.
    pub fn comm_output_mask(&self) -> u32 {
        bit(self.rreq) | bit(self.rstb) | self.comm_data_mask()
    }

    /// Every pin the controller ever touches.
    pub fn managed_mask(&self) -> u32 {
        [
            self.init,
            self.program,
            self.done,
            self.cclk,
            self.power_ok,
            self.clock_select,
            self.chip_select,
            self.read_write,
            self.rreq,
            self.rstb,
            self.freq,
            self.fack,
        ]
        .into_iter()
        .fold(
            self.config_data_mask(SelectMapWidth::X16) | self.comm_data_mask(),
            |mask, pin| mask | bit(pin),
        )
    }
}
