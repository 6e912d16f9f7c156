//! Request/acknowledge exchange with the FPGA over the shared data bus.
//!
//! The host owns RREQ and RSTB, the device owns FREQ and FACK. Data lanes are
//! bidirectional; their direction is always switched explicitly with
//! [`Handshake::direction`] so both sides never drive them at once.
use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{
    Gpio,
    error::{AckEdge, FicError},
    pins::{PinMap, bit},
};

const FACK_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Who drives the data lanes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Host drives, device samples.
    Send,
    /// Device drives, host samples.
    Receive,
}

/// One side of the byte exchange. Register access is written against this
/// trait so it can be exercised without a bus.
pub trait Handshake {
    /// Reinitialize every handshake pin: FACK/FREQ input, the rest output-low.
    fn setup(&mut self);

    /// Switch the direction of the data lanes.
    fn direction(&mut self, direction: Direction);

    /// Place `value` on the data lanes (DATA0 = bit 0) and strobe it into the device.
    fn send(&mut self, value: u8) -> Result<(), FicError>;

    /// Strobe the device and sample the data lanes it drives.
    fn receive(&mut self) -> Result<u8, FicError>;

    /// Negate request and strobe, then return every pin to input.
    fn finish(&mut self);
}

/// [`Handshake`] over a GPIO backend.
pub struct GpioHandshake<'a, G: Gpio + ?Sized> {
    gpio: &'a mut G,
    pins: &'a PinMap,
    timeout: Duration,
}

impl<'a, G: Gpio + ?Sized> GpioHandshake<'a, G> {
    pub fn new(gpio: &'a mut G, pins: &'a PinMap, timeout: Duration) -> GpioHandshake<'a, G> {
        GpioHandshake {
            gpio,
            pins,
            timeout,
        }
    }

    fn wait_fack(&self, edge: AckEdge) -> Result<(), FicError> {
        let level = edge == AckEdge::Up;
        let start = Instant::now();
        while self.gpio.get_pin(self.pins.fack) != level {
            if start.elapsed() > self.timeout {
                log::debug!("Handshake timed out waiting for {}", edge);
                return Err(FicError::CommTimeout(edge));
            }
            thread::sleep(FACK_POLL_INTERVAL);
        }
        Ok(())
    }

    /// Drive the handshake outputs to exactly `word`.
    fn drive(&mut self, word: u32) {
        let mask = self.pins.comm_output_mask();
        self.gpio.clr_bus(mask & !word);
        self.gpio.set_bus(word & mask);
    }

    fn request(&self) -> u32 {
        bit(self.pins.rreq) | bit(self.pins.rstb)
    }
}

impl<G: Gpio + ?Sized> Handshake for GpioHandshake<'_, G> {
    fn setup(&mut self) {
        self.gpio.set_all_input();
        self.gpio.set_input(self.pins.fack);
        self.gpio.set_input(self.pins.freq);
        let outputs = [self.pins.rreq, self.pins.rstb]
            .into_iter()
            .chain(self.pins.comm_data_pins());
        for pin in outputs {
            // Latch low first so the pin never glitches high
            self.gpio.clr_bus(bit(pin));
            self.gpio.set_output(pin);
        }
    }

    fn direction(&mut self, direction: Direction) {
        for pin in self.pins.comm_data_pins() {
            match direction {
                Direction::Send => self.gpio.set_output(pin),
                Direction::Receive => self.gpio.set_input(pin),
            }
        }
    }

    fn send(&mut self, value: u8) -> Result<(), FicError> {
        let word = self.request() | ((value as u32) << self.pins.comm_data);
        log::trace!("Handshake send {:02x} (bus {:08x})", value, word);
        self.drive(word);
        self.wait_fack(AckEdge::Up)?;
        self.gpio.clr_bus(bit(self.pins.rstb));
        self.wait_fack(AckEdge::Down)
    }

    fn receive(&mut self) -> Result<u8, FicError> {
        self.drive(self.request());
        self.wait_fack(AckEdge::Up)?;
        let value = (self.gpio.get_bus() >> self.pins.comm_data) as u8;
        // RREQ stays asserted until the whole transfer is done
        self.gpio.clr_bus(bit(self.pins.rstb));
        self.wait_fack(AckEdge::Down)?;
        log::trace!("Handshake received {:02x}", value);
        Ok(value)
    }

    fn finish(&mut self) {
        self.gpio.clr_bus(self.request());
        self.gpio.set_all_input();
    }
}
