//! # FiC Board Daemon
//!
//! Serves the FiC command protocol on TCP port 4000 for the board attached to
//! the Raspberry Pi GPIO header. Hardware access goes through `/dev/gpiomem`;
//! the `sim` backend runs the same daemon against an in-memory board.
pub mod backends;

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use env_logger::Env;
use fic_server::{
    Gpio,
    pins::PinMap,
    register::TransferWidth,
    server::{Builder, Server},
    sim::SimBoard,
};

use crate::backends::gpiomem::GpioMemBackend;

const GPIOMEM_PATH: &str = "/dev/gpiomem";

#[derive(Parser, Eq, PartialEq, Clone)]
enum DeviceImpl {
    /// Raspberry Pi GPIO registers mapped from /dev/gpiomem
    Gpiomem { path: Option<PathBuf> },
    /// Simulated board, for testing clients without hardware
    Sim,
}

#[derive(ValueEnum, Copy, Clone, Debug, Eq, PartialEq)]
enum Width {
    /// 4-bit transfers, device answers on DATA7..4
    Nibble,
    /// 8-bit transfers of earlier board revisions
    Byte,
}

impl From<Width> for TransferWidth {
    fn from(width: Width) -> Self {
        match width {
            Width::Nibble => TransferWidth::Nibble,
            Width::Byte => TransferWidth::Byte,
        }
    }
}

#[derive(Parser)]
#[command(about = "FiC FPGA board controller daemon", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "4000")]
    port: u16,

    #[arg(short, long, default_value = "0.0.0.0")]
    ip: IpAddr,

    #[arg(long, help = "Bus lock marker file", default_value = "/tmp/gpio.lock")]
    lock_file: PathBuf,

    #[arg(long, help = "Give up on the bus lock after this many seconds", default_value = "10")]
    lock_timeout_secs: u64,

    #[arg(long, help = "Reclaim a bus lock older than this many seconds", default_value = "120")]
    lock_expire_secs: u64,

    #[arg(long, help = "Handshake acknowledge timeout in milliseconds", default_value = "1000")]
    comm_timeout_ms: u64,

    #[arg(long, value_enum, default_value_t = Width::Nibble)]
    transfer_width: Width,

    #[arg(long, help = "Status refresh interval in seconds", default_value = "5")]
    status_period_secs: u64,

    #[arg(long, help = "INIT_B timeout after PROGRAM_B in seconds", default_value = "10")]
    init_timeout_secs: u64,

    #[arg(long, help = "DONE timeout after the bitstream in seconds", default_value = "10")]
    done_timeout_secs: u64,

    #[arg(long, help = "Bitstream body timeout in seconds", default_value = "30")]
    body_timeout_secs: u64,

    #[arg(long, help = "Largest accepted bitstream in bytes", default_value = "268435456")]
    max_bitstream_size: usize,

    #[clap(subcommand)]
    device: Option<DeviceImpl>,
}

impl Args {
    fn builder(&self) -> Builder {
        Builder::new()
            .lock_file(&self.lock_file)
            .lock_timeout(Duration::from_secs(self.lock_timeout_secs))
            .lock_expire(Duration::from_secs(self.lock_expire_secs))
            .comm_timeout(Duration::from_millis(self.comm_timeout_ms))
            .transfer_width(self.transfer_width.into())
            .status_period(Duration::from_secs(self.status_period_secs))
            .init_timeout(Duration::from_secs(self.init_timeout_secs))
            .done_timeout(Duration::from_secs(self.done_timeout_secs))
            .body_timeout(Duration::from_secs(self.body_timeout_secs))
            .max_bitstream_size(self.max_bitstream_size)
    }
}

/// Attempts to automatically find the GPIO memory device
fn gpiomem_path() -> Option<PathBuf> {
    let p = PathBuf::from(GPIOMEM_PATH);
    if p.exists() { Some(p) } else { None }
}

async fn run<G: Gpio + 'static>(server: Server<G>, addr: SocketAddr) -> Result<(), Box<dyn Error>> {
    tokio::select! {
        result = server.listen(addr) => result?,
        _ = tokio::signal::ctrl_c() => log::info!("Interrupted, shutting down"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting FiC daemon");

    let args = Args::parse();
    log::debug!("Parsed arguments: ip={}, port={}", args.ip, args.port);

    let addr = SocketAddr::new(args.ip, args.port);
    log::info!("Binding to address: {}", addr);

    let pins = PinMap::default();
    let builder = args.builder();
    let device_impl = args.device.clone().or_else(|| {
        gpiomem_path().map(|path| {
            log::info!("Auto-detected GPIO memory at {}", path.display());
            DeviceImpl::Gpiomem { path: Some(path) }
        })
    });

    match device_impl {
        Some(DeviceImpl::Gpiomem { path }) => {
            let Some(device_path) = path.or_else(gpiomem_path) else {
                println!(
                    "No GPIO memory device found. Specify a path using ficd gpiomem <path>."
                );
                return Ok(());
            };
            log::info!("Initializing GPIO backend from {}", device_path.display());
            let gpio = GpioMemBackend::new(device_path, pins.managed_mask())?;
            run(builder.build(gpio, pins), addr).await?;
        }
        Some(DeviceImpl::Sim) => {
            log::warn!("Serving a simulated board, no hardware is touched");
            let sim = SimBoard::new(pins.clone(), args.transfer_width.into());
            sim.set_done(true);
            run(builder.build(sim, pins), addr).await?;
        }
        None => {
            println!(
                "No GPIO memory could be auto detected. Use ficd gpiomem <path> or ficd sim to select a backend."
            )
        }
    }
    Ok(())
}
