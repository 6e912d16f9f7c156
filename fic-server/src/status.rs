//! # Status Snapshot
//!
//! The board status is read in one bus transaction and published through a
//! [`watch`] channel. A refresh either replaces the whole snapshot or, when
//! any read fails, leaves the previous one untouched. Before the first
//! successful refresh the snapshot is all zero, stamped with
//! [`FicStatus::never_refreshed`].
use std::{sync::Arc, time::Duration};

use chrono::Utc;
use fic_protocol::FicStatus;
use tokio::{sync::watch, time::MissedTickBehavior};

use crate::{
    Gpio,
    board::{Board, run_blocking},
    error::FicError,
    handshake::GpioHandshake,
    pins::PinMap,
    register::{TransferWidth, read8, regs},
};

/// Reads the six status registers and the DONE and PWOK pins.
pub fn read_status<G: Gpio + ?Sized>(
    gpio: &mut G,
    pins: &PinMap,
    comm_timeout: Duration,
    width: TransferWidth,
) -> Result<FicStatus, FicError> {
    let ts = Utc::now();
    let mut hs = GpioHandshake::new(gpio, pins, comm_timeout);
    let mut read = |addr| read8(&mut hs, width, addr);
    let state = read(regs::STATUS)?;
    let hls = read(regs::HLS)?;
    let linkup = read(regs::LINKUP)?;
    let dipsw = read(regs::DIPSW)?;
    let led = read(regs::LED)?;
    let chup = read(regs::CHUP)?;
    Ok(FicStatus {
        ts,
        state,
        hls,
        linkup,
        dipsw,
        led,
        chup,
        done: gpio.get_pin(pins.done) as u8,
        pwr: gpio.get_pin(pins.power_ok) as u8,
    })
}

/// Refreshes the snapshot every `period`, the first time immediately.
///
/// Returns once every receiver is gone.
pub async fn monitor<G: Gpio + 'static>(
    board: Arc<Board<G>>,
    sender: watch::Sender<FicStatus>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log::info!("Status refresh every {:?}", period);
    loop {
        interval.tick().await;
        if sender.is_closed() {
            break;
        }
        match run_blocking(&board, |board| board.read_status()).await {
            Ok(status) => {
                log::trace!("Status refreshed: {:?}", status);
                sender.send_replace(status);
            }
            Err(err) => log::warn!("Status refresh failed, keeping previous snapshot: {}", err),
        }
    }
    log::debug!("Status refresh stopped");
}
