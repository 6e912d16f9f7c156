//! In-memory FiC board behind the [`Gpio`] trait.
//!
//! Models the GPIO latch and direction registers, the device side of the
//! handshake with a small register file, and enough of the SelectMap
//! configuration logic (PROGRAM_B, INIT_B, DONE, CCLK sampling) to drive the
//! whole controller without hardware. Clones share the same board.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    Gpio,
    pins::{PinMap, bit},
    register::{CMD_READ, CMD_WRITE, TransferWidth, regs},
};

/// Device side of a register transfer.
#[derive(Debug, Clone, Copy)]
enum Transfer {
    Idle,
    Address { opcode: u8, addr: u16, chunks: u32 },
    Data { addr: u16, value: u8, chunks: u32 },
    ReadOut { value: u8, sent: u32 },
}

#[derive(Debug)]
struct SimState {
    pins: PinMap,
    width: TransferWidth,
    outputs: u32,
    latch: u32,

    fack: bool,
    ack_enabled: bool,
    lanes: u8,
    transfer: Transfer,
    registers: HashMap<u16, u8>,

    init: bool,
    done: bool,
    power_ok: bool,
    hold_init_low: bool,
    fail_at_chunk: Option<usize>,
    done_after: usize,
    clocked: Vec<u16>,
    program_pulses: usize,

    prev_program: bool,
    prev_cclk: bool,
    prev_rreq: bool,
    prev_rstb: bool,
}

impl SimState {
    fn driven(&self, pin: u32) -> Option<bool> {
        (self.outputs & bit(pin) != 0).then_some(self.latch & bit(pin) != 0)
    }

    /// Level of a pulled-up active-low input: high unless driven low.
    fn pulled_up(&self, pin: u32) -> bool {
        self.driven(pin).unwrap_or(true)
    }

    fn bus(&self) -> u32 {
        let pins = &self.pins;
        let mut device = (self.lanes as u32) << pins.comm_data;
        for (pin, level) in [
            (pins.init, self.init),
            (pins.done, self.done),
            (pins.power_ok, self.power_ok),
            (pins.fack, self.fack),
        ] {
            if level {
                device |= bit(pin);
            }
        }
        (self.latch & self.outputs) | (device & !self.outputs)
    }

    /// Detects edges on every host driven signal after a register change.
    fn update(&mut self) {
        let program = self.pulled_up(self.pins.program);
        if program != self.prev_program {
            self.prev_program = program;
            if program {
                self.program_pulses += 1;
                self.init = !self.hold_init_low;
            } else {
                self.init = false;
                self.done = false;
                self.clocked.clear();
            }
        }

        let cclk = self.driven(self.pins.cclk).unwrap_or(false);
        if cclk && !self.prev_cclk {
            self.config_clock();
        }
        self.prev_cclk = cclk;

        let rreq = self.driven(self.pins.rreq).unwrap_or(false);
        let rstb = self.driven(self.pins.rstb).unwrap_or(false);
        let comm_active = self.outputs & bit(self.pins.fack) == 0;
        if !rreq && self.prev_rreq {
            self.transfer = Transfer::Idle;
        }
        if comm_active && rreq && rstb && !self.prev_rstb {
            self.strobe();
        }
        if !rstb && self.prev_rstb {
            self.fack = false;
        }
        self.prev_rreq = rreq;
        self.prev_rstb = rstb;
    }

    fn config_clock(&mut self) {
        let selected = !self.pulled_up(self.pins.chip_select) && !self.pulled_up(self.pins.read_write);
        if !(selected && self.init && self.pulled_up(self.pins.program)) {
            return;
        }
        let word = ((self.latch & self.outputs) >> self.pins.config_data) as u16;
        self.clocked.push(word);
        if self.fail_at_chunk == Some(self.clocked.len() - 1) {
            self.init = false;
        }
        if self.clocked.len() >= self.done_after {
            self.done = true;
        }
    }

    fn strobe(&mut self) {
        let host_drives = self.outputs & bit(self.pins.comm_data) != 0;
        if host_drives {
            let lanes = (self.latch >> self.pins.comm_data) as u8;
            let chunk = match self.width {
                TransferWidth::Nibble => lanes & 0x0f,
                TransferWidth::Byte => lanes,
            };
            self.accept(chunk);
        } else {
            self.lanes = self.next_readout();
        }
        if self.ack_enabled {
            self.fack = true;
        }
    }

    fn accept(&mut self, chunk: u8) {
        let bits = self.width.bits();
        self.transfer = match self.transfer {
            Transfer::Idle if chunk == CMD_WRITE || chunk == CMD_READ => Transfer::Address {
                opcode: chunk,
                addr: 0,
                chunks: 0,
            },
            Transfer::Idle => {
                log::warn!("Simulated board ignores opcode {:02x}", chunk);
                Transfer::Idle
            }
            Transfer::Address {
                opcode,
                addr,
                chunks,
            } => {
                let addr = (addr << bits) | chunk as u16;
                let chunks = chunks + 1;
                if chunks < 16 / bits {
                    Transfer::Address {
                        opcode,
                        addr,
                        chunks,
                    }
                } else if opcode == CMD_WRITE {
                    Transfer::Data {
                        addr,
                        value: 0,
                        chunks: 0,
                    }
                } else {
                    Transfer::ReadOut {
                        value: self.registers.get(&addr).copied().unwrap_or(0),
                        sent: 0,
                    }
                }
            }
            Transfer::Data {
                addr,
                value,
                chunks,
            } => {
                let value = ((value as u16) << bits) as u8 | chunk;
                let chunks = chunks + 1;
                if chunks < 8 / bits {
                    Transfer::Data {
                        addr,
                        value,
                        chunks,
                    }
                } else {
                    self.registers.insert(addr, value);
                    Transfer::Idle
                }
            }
            other @ Transfer::ReadOut { .. } => other,
        };
    }

    fn next_readout(&mut self) -> u8 {
        let Transfer::ReadOut { value, sent } = self.transfer else {
            return 0;
        };
        let (lanes, total) = match self.width {
            // Answers on DATA7..4, high nibble first
            TransferWidth::Nibble if sent == 0 => (value & 0xf0, 2),
            TransferWidth::Nibble => ((value & 0x0f) << 4, 2),
            TransferWidth::Byte => (value, 1),
        };
        self.transfer = if sent + 1 < total {
            Transfer::ReadOut {
                value,
                sent: sent + 1,
            }
        } else {
            Transfer::Idle
        };
        lanes
    }
}

/// Simulated board. Every clone drives the same state.
#[derive(Debug, Clone)]
pub struct SimBoard {
    state: Arc<Mutex<SimState>>,
}

impl SimBoard {
    /// A powered, unconfigured board with the status registers preset.
    pub fn new(pins: PinMap, width: TransferWidth) -> SimBoard {
        let registers = HashMap::from([
            (regs::STATUS, 0x01),
            (regs::HLS, 0x00),
            (regs::LINKUP, 0x0f),
            (regs::DIPSW, 0x05),
            (regs::LED, 0x00),
            (regs::CHUP, 0x0f),
        ]);
        let state = SimState {
            pins,
            width,
            outputs: 0,
            latch: 0,
            fack: false,
            ack_enabled: true,
            lanes: 0,
            transfer: Transfer::Idle,
            registers,
            init: true,
            done: false,
            power_ok: true,
            hold_init_low: false,
            fail_at_chunk: None,
            done_after: 1,
            clocked: Vec::new(),
            program_pulses: 0,
            prev_program: true,
            prev_cclk: false,
            prev_rreq: false,
            prev_rstb: false,
        };
        SimBoard {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register(&self, addr: u16) -> u8 {
        self.state().registers.get(&addr).copied().unwrap_or(0)
    }

    pub fn set_register(&self, addr: u16, value: u8) {
        self.state().registers.insert(addr, value);
    }

    /// With acknowledges disabled every handshake times out.
    pub fn set_ack_enabled(&self, enabled: bool) {
        self.state().ack_enabled = enabled;
    }

    pub fn set_power_ok(&self, power_ok: bool) {
        self.state().power_ok = power_ok;
    }

    pub fn set_done(&self, done: bool) {
        self.state().done = done;
    }

    /// DONE rises once this many CCLK cycles were accepted after PROGRAM_B.
    pub fn set_done_after(&self, cycles: usize) {
        self.state().done_after = cycles;
    }

    /// Pull INIT_B low right after the given chunk was clocked in.
    pub fn fail_at_chunk(&self, chunk: Option<usize>) {
        self.state().fail_at_chunk = chunk;
    }

    pub fn hold_init_low(&self, hold: bool) {
        let mut state = self.state();
        state.hold_init_low = hold;
        if hold {
            state.init = false;
        }
    }

    /// Data bus value of every accepted CCLK cycle since the last PROGRAM_B.
    pub fn clocked(&self) -> Vec<u16> {
        self.state().clocked.clone()
    }

    pub fn done(&self) -> bool {
        self.state().done
    }

    pub fn program_pulses(&self) -> usize {
        self.state().program_pulses
    }

    /// Pins currently configured as outputs.
    pub fn output_mask(&self) -> u32 {
        self.state().outputs
    }
}

impl Gpio for SimBoard {
    fn set_all_input(&mut self) {
        let mut state = self.state();
        state.outputs = 0;
        state.update();
    }

    fn set_input(&mut self, pin: u32) {
        let mut state = self.state();
        state.outputs &= !bit(pin);
        state.update();
    }

    fn set_output(&mut self, pin: u32) {
        let mut state = self.state();
        state.outputs |= bit(pin);
        state.update();
    }

    fn set_bus(&mut self, mask: u32) {
        let mut state = self.state();
        state.latch |= mask;
        state.update();
    }

    fn clr_bus(&mut self, mask: u32) {
        let mut state = self.state();
        state.latch &= !mask;
        state.update();
    }

    fn get_bus(&self) -> u32 {
        self.state().bus()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::SimBoard;
    use crate::{
        error::{AckEdge, FicError},
        handshake::GpioHandshake,
        pins::PinMap,
        register::{TransferWidth, read8, regs, write8},
    };

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[test]
    fn nibble_register_round_trip() {
        let pins = PinMap::default();
        let mut sim = SimBoard::new(pins.clone(), TransferWidth::Nibble);
        let mut hs = GpioHandshake::new(&mut sim, &pins, TIMEOUT);
        write8(&mut hs, TransferWidth::Nibble, 0x1234, 0xa5).unwrap();
        assert_eq!(read8(&mut hs, TransferWidth::Nibble, 0x1234).unwrap(), 0xa5);
        assert_eq!(
            read8(&mut hs, TransferWidth::Nibble, regs::DIPSW).unwrap(),
            0x05
        );
        assert_eq!(sim.register(0x1234), 0xa5);
        assert_eq!(sim.output_mask(), 0);
    }

    #[test]
    fn round_trip_across_address_space() {
        let pins = PinMap::default();
        for width in [TransferWidth::Nibble, TransferWidth::Byte] {
            let mut sim = SimBoard::new(pins.clone(), width);
            let mut hs = GpioHandshake::new(&mut sim, &pins, TIMEOUT);
            for (index, addr) in (0..=u16::MAX).step_by(4099).enumerate() {
                let data = (index as u8).wrapping_mul(37) ^ 0x5a;
                write8(&mut hs, width, addr, data).unwrap();
                assert_eq!(read8(&mut hs, width, addr).unwrap(), data, "{addr:04x}");
            }
        }
    }

    #[test]
    fn byte_register_round_trip() {
        let pins = PinMap::default();
        let mut sim = SimBoard::new(pins.clone(), TransferWidth::Byte);
        let mut hs = GpioHandshake::new(&mut sim, &pins, TIMEOUT);
        write8(&mut hs, TransferWidth::Byte, regs::LED, 0x3c).unwrap();
        assert_eq!(read8(&mut hs, TransferWidth::Byte, regs::LED).unwrap(), 0x3c);
    }

    #[test]
    fn silent_device_times_out() {
        let pins = PinMap::default();
        let mut sim = SimBoard::new(pins.clone(), TransferWidth::Nibble);
        sim.set_ack_enabled(false);
        let mut hs = GpioHandshake::new(&mut sim, &pins, TIMEOUT);
        let result = write8(&mut hs, TransferWidth::Nibble, 0x0001, 0x01);
        assert!(matches!(result, Err(FicError::CommTimeout(AckEdge::Up))));
        assert_eq!(sim.register(0x0001), 0);
        assert_eq!(sim.output_mask(), 0);
    }
}
