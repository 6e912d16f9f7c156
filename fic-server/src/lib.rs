//! # FiC Server Library
//!
//! Host side controller for FiC FPGA boards attached to a Raspberry Pi GPIO
//! header: register access over the request/acknowledge handshake, SelectMap
//! bitstream loading and the TCP command server that exposes both.
//!
//! ## Architecture
//!
//! - **[`Gpio`] Trait**: the only seam to the hardware. A backend owns the
//!   GPIO function, set, clear and level registers; everything above it is
//!   written against the trait.
//! - **[`board::Board`]**: owns the backend behind a [`lock::BusLock`] and
//!   offers the hardware operations (register read and write, configuration,
//!   PROGRAM_B pulse, status snapshot). Every operation holds the bus lock for
//!   its whole duration and leaves all pins as inputs afterwards.
//! - **[`server::Server`]**: line based TCP command server. Hardware work is
//!   moved to the blocking thread pool, one connection never stalls another.
//! - **[`status`]**: periodic status refresh published through a watch channel
//!   so `STAT` is answered without touching the bus.
//!
//! ## Starting the Server
//!
//! ```no_run
//! use fic_server::{pins::PinMap, register::TransferWidth, server::Builder, sim::SimBoard};
//!
//! # async fn run() -> std::io::Result<()> {
//! let pins = PinMap::default();
//! let board = SimBoard::new(pins.clone(), TransferWidth::Nibble);
//! let server = Builder::new().build(board, pins);
//! server.listen("0.0.0.0:4000").await
//! # }
//! ```
//!
//! ## Logging
//!
//! This crate uses the `log` crate. Connections, commands and configuration
//! progress are reported at `info` and `debug`, single handshake transfers at
//! `trace`.
//!
//! ## Thread Model
//!
//! The server runs on tokio. Hardware operations are synchronous, busy-wait on
//! the FACK, INIT_B and DONE pins and run through `spawn_blocking`; the bus lock
//! serializes them between connections, the status refresh and other processes.
pub mod board;
pub mod error;
pub mod handshake;
pub mod lock;
pub mod pins;
pub mod register;
pub mod selectmap;
pub mod server;
pub mod sim;
pub mod status;

/// Access to the GPIO header the board is wired to.
///
/// Pins are addressed by their BCM number. The `*_bus` methods take a bit mask
/// of pins and write the output latch; a pin configured as input keeps the
/// latched level until it is switched to output. `get_bus` reads the level of
/// every pin at once.
pub trait Gpio: Send {
    /// Returns every pin the controller manages to input.
    fn set_all_input(&mut self);

    fn set_input(&mut self, pin: u32);

    fn set_output(&mut self, pin: u32);

    /// Drives the pins in `mask` high.
    fn set_bus(&mut self, mask: u32);

    /// Drives the pins in `mask` low.
    fn clr_bus(&mut self, mask: u32);

    fn get_bus(&self) -> u32;

    fn get_pin(&self, pin: u32) -> bool {
        self.get_bus() & (1 << pin) != 0
    }
}
