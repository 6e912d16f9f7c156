//! Xilinx SelectMap slave configuration in x8 and x16 mode.
//!
//! The host drives CCLK and the data bus, the FPGA reports through INIT_B
//! (low: configuration error) and DONE. See Xilinx UG570 for the sequence.
use std::{
    thread,
    time::{Duration, Instant},
};

use fic_protocol::{LoadMode, SelectMapWidth};

use crate::{
    Gpio,
    error::{ConfigPhase, FicError},
    pins::{PinMap, bit},
};

const PROGRESS_STEP: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ConfigTiming {
    /// Longest wait for INIT_B after releasing PROGRAM_B.
    pub init_timeout: Duration,
    /// Longest time spent clocking for DONE after the bitstream.
    pub done_timeout: Duration,
    /// INIT_B poll interval.
    pub poll_interval: Duration,
}

impl Default for ConfigTiming {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
            done_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }
}

fn setup_pins<G: Gpio + ?Sized>(gpio: &mut G, pins: &PinMap, width: SelectMapWidth) {
    gpio.set_all_input();
    for pin in [pins.power_ok, pins.init, pins.done, pins.clock_select] {
        gpio.set_input(pin);
    }
    // Negated before they become outputs, so switching direction cannot pulse PROGRAM_B
    for pin in [pins.program, pins.chip_select, pins.read_write] {
        gpio.set_bus(bit(pin));
        gpio.set_output(pin);
    }
    for pin in std::iter::once(pins.cclk).chain(pins.config_data_pins(width)) {
        gpio.clr_bus(bit(pin));
        gpio.set_output(pin);
    }
}

/// Loads `bitstream` into the FPGA. Pins are returned to input on every path.
///
/// INIT_B going low aborts immediately with [`FicError::ConfigError`]; nothing
/// is rolled back and the next attempt has to start with a full reset load.
pub fn load<G: Gpio + ?Sized>(
    gpio: &mut G,
    pins: &PinMap,
    timing: &ConfigTiming,
    bitstream: &[u8],
    width: SelectMapWidth,
    mode: LoadMode,
) -> Result<(), FicError> {
    if bitstream.len() % width.bytes() != 0 {
        return Err(FicError::OddBitstream(bitstream.len()));
    }
    log::info!(
        "Entering SelectMap {} configuration ({}), {} bytes",
        width,
        mode,
        bitstream.len()
    );
    setup_pins(gpio, pins, width);
    let result = program(gpio, pins, timing, bitstream, width, mode);
    gpio.set_all_input();
    result
}

fn program<G: Gpio + ?Sized>(
    gpio: &mut G,
    pins: &PinMap,
    timing: &ConfigTiming,
    bitstream: &[u8],
    width: SelectMapWidth,
    mode: LoadMode,
) -> Result<(), FicError> {
    let select = bit(pins.chip_select) | bit(pins.read_write);
    match mode {
        LoadMode::Reset => {
            let control = bit(pins.program) | select;
            gpio.set_bus(control);
            gpio.clr_bus(control);
            gpio.set_bus(bit(pins.program));
            wait_init(gpio, pins, timing)?;
        }
        LoadMode::PartialReconfig => {
            gpio.set_bus(select);
            gpio.clr_bus(select);
        }
    }
    log::debug!("FPGA ready to program");

    let cclk = bit(pins.cclk);
    let lanes = pins.config_data_mask(width);
    gpio.clr_bus(cclk);

    for (index, chunk) in bitstream.chunks(width.bytes()).enumerate() {
        // Little endian: the first byte goes to D7..D0
        let value = chunk
            .iter()
            .rev()
            .fold(0u32, |acc, byte| (acc << 8) | *byte as u32);
        let data = value << pins.config_data;
        gpio.clr_bus((!data & lanes) | cclk);
        gpio.set_bus(data & lanes);
        gpio.set_bus(cclk);

        let offset = index * width.bytes();
        if !gpio.get_pin(pins.init) {
            log::error!("INIT_B dropped at byte {}", offset);
            return Err(FicError::ConfigError {
                phase: ConfigPhase::Streaming,
                offset,
            });
        }
        if offset % PROGRESS_STEP == 0 && offset > 0 {
            log::debug!("Programmed {} / {} bytes", offset, bitstream.len());
        }
    }

    if mode == LoadMode::Reset {
        wait_done(gpio, pins, timing, bitstream.len())?;
        gpio.clr_bus(lanes | cclk);
        log::info!("FPGA configuration done");
    } else {
        log::info!("Partial reconfiguration stream sent");
    }
    Ok(())
}

fn wait_init<G: Gpio + ?Sized>(
    gpio: &G,
    pins: &PinMap,
    timing: &ConfigTiming,
) -> Result<(), FicError> {
    let start = Instant::now();
    while !gpio.get_pin(pins.init) {
        if start.elapsed() > timing.init_timeout {
            return Err(FicError::ConfigInitTimeout(timing.init_timeout));
        }
        thread::sleep(timing.poll_interval);
    }
    Ok(())
}

/// Keeps clocking until the startup sequence raises DONE.
fn wait_done<G: Gpio + ?Sized>(
    gpio: &mut G,
    pins: &PinMap,
    timing: &ConfigTiming,
    offset: usize,
) -> Result<(), FicError> {
    log::debug!("Waiting for FPGA DONE");
    let cclk = bit(pins.cclk);
    let start = Instant::now();
    while !gpio.get_pin(pins.done) {
        if !gpio.get_pin(pins.init) {
            return Err(FicError::ConfigError {
                phase: ConfigPhase::Startup,
                offset,
            });
        }
        if start.elapsed() > timing.done_timeout {
            return Err(FicError::ConfigDoneTimeout(timing.done_timeout));
        }
        gpio.set_bus(cclk);
        gpio.clr_bus(cclk);
    }
    Ok(())
}

/// Pulses PROGRAM_B, clearing the FPGA configuration.
pub fn pulse_program<G: Gpio + ?Sized>(gpio: &mut G, pins: &PinMap) {
    log::info!("Pulsing PROGRAM_B");
    setup_pins(gpio, pins, SelectMapWidth::X16);
    gpio.set_bus(bit(pins.program));
    gpio.clr_bus(bit(pins.program));
    gpio.set_all_input();
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use fic_protocol::{LoadMode, SelectMapWidth};

    use super::{ConfigTiming, load, pulse_program};
    use crate::{
        error::{ConfigPhase, FicError},
        pins::PinMap,
        register::TransferWidth,
        sim::SimBoard,
    };

    fn timing() -> ConfigTiming {
        ConfigTiming {
            init_timeout: Duration::from_millis(50),
            done_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn bitstream(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn x16_reset_load() {
        let pins = PinMap::default();
        let mut sim = SimBoard::new(pins.clone(), TransferWidth::Nibble);
        sim.set_done_after(64);
        let data = bitstream(100);
        load(
            &mut sim,
            &pins,
            &timing(),
            &data,
            SelectMapWidth::X16,
            LoadMode::Reset,
        )
        .unwrap();

        let clocked = sim.clocked();
        assert_eq!(clocked.len(), 64, "50 data words plus startup clocks");
        let words: Vec<u16> = data
            .chunks(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        assert_eq!(&clocked[..50], &words[..]);
        assert!(sim.done());
        assert_eq!(sim.program_pulses(), 1);
        assert_eq!(sim.output_mask(), 0, "pins idle after load");
    }

    #[test]
    fn x8_partial_reconfig_skips_program_and_done() {
        let pins = PinMap::default();
        let mut sim = SimBoard::new(pins.clone(), TransferWidth::Nibble);
        sim.set_done_after(usize::MAX);
        let data = bitstream(33);
        load(
            &mut sim,
            &pins,
            &timing(),
            &data,
            SelectMapWidth::X8,
            LoadMode::PartialReconfig,
        )
        .unwrap();

        let clocked: Vec<u8> = sim.clocked().iter().map(|word| *word as u8).collect();
        assert_eq!(clocked, data);
        assert_eq!(sim.program_pulses(), 0);
        assert_eq!(sim.output_mask(), 0);
    }

    #[test]
    fn init_drop_stops_the_stream() {
        let pins = PinMap::default();
        let mut sim = SimBoard::new(pins.clone(), TransferWidth::Nibble);
        sim.fail_at_chunk(Some(9));
        let result = load(
            &mut sim,
            &pins,
            &timing(),
            &bitstream(64),
            SelectMapWidth::X16,
            LoadMode::Reset,
        );
        match result {
            Err(FicError::ConfigError { phase, offset }) => {
                assert_eq!(phase, ConfigPhase::Streaming);
                assert_eq!(offset, 18);
            }
            other => panic!("expected ConfigError, got {other:?}"),
        }
        assert_eq!(sim.clocked().len(), 10, "no transfer after chunk 9");
        assert_eq!(sim.output_mask(), 0);
    }

    #[test]
    fn init_drop_during_startup_is_fatal() {
        let pins = PinMap::default();
        let mut sim = SimBoard::new(pins.clone(), TransferWidth::Nibble);
        sim.set_done_after(usize::MAX);
        // Four data words, INIT_B falls on the third startup clock
        sim.fail_at_chunk(Some(6));
        let result = load(
            &mut sim,
            &pins,
            &timing(),
            &bitstream(8),
            SelectMapWidth::X16,
            LoadMode::Reset,
        );
        match result {
            Err(FicError::ConfigError { phase, offset }) => {
                assert_eq!(phase, ConfigPhase::Startup);
                assert_eq!(offset, 8);
            }
            other => panic!("expected ConfigError, got {other:?}"),
        }
        assert_eq!(sim.clocked().len(), 7);
        assert!(!sim.done());
        assert_eq!(sim.output_mask(), 0);
    }

    #[test]
    fn init_stuck_low_times_out() {
        let pins = PinMap::default();
        let mut sim = SimBoard::new(pins.clone(), TransferWidth::Nibble);
        sim.hold_init_low(true);
        let result = load(
            &mut sim,
            &pins,
            &timing(),
            &bitstream(4),
            SelectMapWidth::X8,
            LoadMode::Reset,
        );
        assert!(matches!(result, Err(FicError::ConfigInitTimeout(_))));
        assert!(sim.clocked().is_empty());
        assert_eq!(sim.output_mask(), 0);
    }

    #[test]
    fn done_never_rising_times_out() {
        let pins = PinMap::default();
        let mut sim = SimBoard::new(pins.clone(), TransferWidth::Nibble);
        sim.set_done_after(usize::MAX);
        let result = load(
            &mut sim,
            &pins,
            &timing(),
            &bitstream(8),
            SelectMapWidth::X8,
            LoadMode::Reset,
        );
        assert!(matches!(result, Err(FicError::ConfigDoneTimeout(_))));
    }

    #[test]
    fn odd_x16_bitstream_is_rejected_untouched() {
        let pins = PinMap::default();
        let mut sim = SimBoard::new(pins.clone(), TransferWidth::Nibble);
        let result = load(
            &mut sim,
            &pins,
            &timing(),
            &bitstream(5),
            SelectMapWidth::X16,
            LoadMode::Reset,
        );
        assert!(matches!(result, Err(FicError::OddBitstream(5))));
        assert_eq!(sim.program_pulses(), 0);
    }

    #[test]
    fn program_pulse_clears_configuration() {
        let pins = PinMap::default();
        let mut sim = SimBoard::new(pins.clone(), TransferWidth::Nibble);
        sim.set_done_after(1);
        load(
            &mut sim,
            &pins,
            &timing(),
            &bitstream(2),
            SelectMapWidth::X8,
            LoadMode::Reset,
        )
        .unwrap();
        assert!(sim.done());
        pulse_program(&mut sim, &pins);
        assert!(!sim.done());
        assert_eq!(sim.program_pulses(), 2);
        assert_eq!(sim.output_mask(), 0);
    }
}
