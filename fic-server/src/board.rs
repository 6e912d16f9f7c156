//! Hardware operations on one board, serialized by the bus lock.
use std::{sync::Arc, time::Duration};

use fic_protocol::{FicStatus, LoadMode, SelectMapWidth};

use crate::{
    Gpio,
    error::FicError,
    handshake::GpioHandshake,
    lock::{BusLock, LockConfig},
    pins::PinMap,
    register::{self, TransferWidth},
    selectmap::{self, ConfigTiming},
    status,
};

#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub lock: LockConfig,
    /// Longest wait for each FACK transition.
    pub comm_timeout: Duration,
    pub transfer_width: TransferWidth,
    pub timing: ConfigTiming,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            comm_timeout: Duration::from_secs(1),
            transfer_width: TransferWidth::default(),
            timing: ConfigTiming::default(),
        }
    }
}

#[derive(Debug)]
pub struct Board<G: Gpio> {
    bus: BusLock<G>,
    pins: PinMap,
    comm_timeout: Duration,
    transfer_width: TransferWidth,
    timing: ConfigTiming,
}

impl<G: Gpio> Board<G> {
    pub fn new(gpio: G, pins: PinMap, config: BoardConfig) -> Board<G> {
        log::debug!(
            "Board config: {:?} transfers, comm timeout {:?}, lock {}",
            config.transfer_width,
            config.comm_timeout,
            config.lock.path.display()
        );
        Board {
            bus: BusLock::new(gpio, config.lock),
            pins,
            comm_timeout: config.comm_timeout,
            transfer_width: config.transfer_width,
            timing: config.timing,
        }
    }

    fn handshake<'a>(&'a self, gpio: &'a mut G) -> GpioHandshake<'a, G> {
        GpioHandshake::new(gpio, &self.pins, self.comm_timeout)
    }

    pub fn read8(&self, addr: u16) -> Result<u8, FicError> {
        let mut gpio = self.bus.acquire()?;
        let value = register::read8(&mut self.handshake(&mut *gpio), self.transfer_width, addr)?;
        log::debug!("Register {:04x} read {:02x}", addr, value);
        Ok(value)
    }

    pub fn write8(&self, addr: u16, data: u8) -> Result<(), FicError> {
        let mut gpio = self.bus.acquire()?;
        register::write8(
            &mut self.handshake(&mut *gpio),
            self.transfer_width,
            addr,
            data,
        )?;
        log::debug!("Register {:04x} written {:02x}", addr, data);
        Ok(())
    }

    /// Loads a bitstream, see [`selectmap::load`].
    pub fn load(
        &self,
        bitstream: &[u8],
        width: SelectMapWidth,
        mode: LoadMode,
    ) -> Result<(), FicError> {
        // Rejected before the lock is taken so the bus is never touched
        if bitstream.len() % width.bytes() != 0 {
            return Err(FicError::OddBitstream(bitstream.len()));
        }
        let mut gpio = self.bus.acquire()?;
        selectmap::load(&mut *gpio, &self.pins, &self.timing, bitstream, width, mode)
    }

    /// Clears the FPGA configuration.
    pub fn reset_fpga(&self) -> Result<(), FicError> {
        let mut gpio = self.bus.acquire()?;
        selectmap::pulse_program(&mut *gpio, &self.pins);
        Ok(())
    }

    /// Reads every status register under a single lock acquisition.
    pub fn read_status(&self) -> Result<FicStatus, FicError> {
        let mut gpio = self.bus.acquire()?;
        status::read_status(
            &mut *gpio,
            &self.pins,
            self.comm_timeout,
            self.transfer_width,
        )
    }
}

/// Runs a hardware operation on the blocking thread pool.
pub async fn run_blocking<G, T, F>(board: &Arc<Board<G>>, operation: F) -> Result<T, FicError>
where
    G: Gpio + 'static,
    T: Send + 'static,
    F: FnOnce(&Board<G>) -> Result<T, FicError> + Send + 'static,
{
    let board = Arc::clone(board);
    tokio::task::spawn_blocking(move || operation(&board))
        .await
        .map_err(|err| FicError::Task(err.to_string()))?
}

#[cfg(test)]
mod test {
    use std::{path::PathBuf, time::Duration};

    use fic_protocol::{LoadMode, SelectMapWidth};

    use super::{Board, BoardConfig};
    use crate::{
        error::FicError,
        lock::LockConfig,
        pins::PinMap,
        register::{TransferWidth, regs},
        selectmap::ConfigTiming,
        sim::SimBoard,
    };

    fn lock_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "fic-board-test-{}-{}.lock",
            std::process::id(),
            name
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn board(name: &str, width: TransferWidth) -> (Board<SimBoard>, SimBoard) {
        let pins = PinMap::default();
        let sim = SimBoard::new(pins.clone(), width);
        let config = BoardConfig {
            lock: LockConfig {
                path: lock_path(name),
                timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
            comm_timeout: Duration::from_millis(50),
            transfer_width: width,
            timing: ConfigTiming {
                init_timeout: Duration::from_millis(50),
                done_timeout: Duration::from_millis(200),
                poll_interval: Duration::from_millis(1),
            },
        };
        (Board::new(sim.clone(), pins, config), sim)
    }

    #[test]
    fn register_round_trip() {
        for width in [TransferWidth::Nibble, TransferWidth::Byte] {
            let (board, sim) = board(&format!("registers-{width:?}"), width);
            board.write8(0x0042, 0x99).unwrap();
            assert_eq!(sim.register(0x0042), 0x99);
            assert_eq!(board.read8(0x0042).unwrap(), 0x99);
        }
    }

    #[test]
    fn status_snapshot() {
        let (board, sim) = board("status", TransferWidth::Nibble);
        sim.set_register(regs::LED, 0x3c);
        sim.set_done(true);
        let status = board.read_status().unwrap();
        assert!(status.is_fresh());
        assert_eq!(status.state, 0x01);
        assert_eq!(status.linkup, 0x0f);
        assert_eq!(status.dipsw, 0x05);
        assert_eq!(status.led, 0x3c);
        assert_eq!(status.done, 1);
        assert_eq!(status.pwr, 1);

        sim.set_power_ok(false);
        let status = board.read_status().unwrap();
        assert_eq!(status.pwr, 0);
    }

    #[test]
    fn timeout_leaves_bus_idle() {
        let (board, sim) = board("timeout", TransferWidth::Nibble);
        sim.set_ack_enabled(false);
        assert!(matches!(
            board.read8(regs::STATUS),
            Err(FicError::CommTimeout(_))
        ));
        assert!(matches!(board.read_status(), Err(FicError::CommTimeout(_))));
        assert_eq!(sim.output_mask(), 0);
        // The lock was released on the error path
        sim.set_ack_enabled(true);
        assert_eq!(board.read8(regs::STATUS).unwrap(), 0x01);
    }

    #[test]
    fn held_lock_touches_nothing() {
        let (board, sim) = board("held", TransferWidth::Nibble);
        let marker = lock_path("held");
        std::fs::File::create(&marker).unwrap();
        assert!(matches!(
            board.write8(0x0001, 0x01),
            Err(FicError::LockTimeout { .. })
        ));
        assert_eq!(sim.register(0x0001), 0);
        std::fs::remove_file(&marker).unwrap();
    }

    #[test]
    fn load_and_reset() {
        let (board, sim) = board("load", TransferWidth::Nibble);
        sim.set_done_after(4);
        board
            .load(&[1, 2, 3, 4], SelectMapWidth::X16, LoadMode::Reset)
            .unwrap();
        assert!(sim.done());
        board.reset_fpga().unwrap();
        assert!(!sim.done());
        assert!(matches!(
            board.load(&[1, 2, 3], SelectMapWidth::X16, LoadMode::Reset),
            Err(FicError::OddBitstream(3))
        ));
        assert_eq!(sim.program_pulses(), 2);
    }
}
