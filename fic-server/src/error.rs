use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// FACK transition a handshake was waiting for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AckEdge {
    Up,
    Down,
}

impl std::fmt::Display for AckEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckEdge::Up => write!(f, "fack up"),
            AckEdge::Down => write!(f, "fack down"),
        }
    }
}

/// Stage of a SelectMap load in which INIT_B dropped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigPhase {
    Streaming,
    Startup,
}

impl std::fmt::Display for ConfigPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigPhase::Streaming => write!(f, "while programming"),
            ConfigPhase::Startup => write!(f, "while waiting for DONE"),
        }
    }
}

/// Errors raised by hardware operations.
#[derive(Debug, Error)]
pub enum FicError {
    /// The device did not move FACK within the handshake timeout.
    #[error("Communication timed out ({0})")]
    CommTimeout(AckEdge),
    /// INIT_B went low: the device rejected the bitstream. A fresh full reset load is required.
    #[error("Configuration error {phase} (after {offset} bytes)")]
    ConfigError { phase: ConfigPhase, offset: usize },
    #[error("INIT_B did not rise within {0:?} after PROGRAM_B")]
    ConfigInitTimeout(Duration),
    #[error("DONE did not rise within {0:?} after the bitstream")]
    ConfigDoneTimeout(Duration),
    #[error("x16 bitstream must have an even length, got {0} bytes")]
    OddBitstream(usize),
    /// The bus lock is held elsewhere. No hardware has been touched.
    #[error("Bus lock {} not acquired within {timeout:?}", .path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },
    #[error("Bus lock error: {0}")]
    Lock(#[from] io::Error),
    #[error("Hardware task failed: {0}")]
    Task(String),
}
