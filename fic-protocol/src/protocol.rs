use std::fmt::Display;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Width of the SelectMap configuration data path.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SelectMapWidth {
    /// 8 data lines, one byte per CCLK edge.
    X8,
    /// 16 data lines, one little-endian byte pair per CCLK edge.
    #[default]
    X16,
}

impl SelectMapWidth {
    /// Number of bitstream bytes transferred per CCLK edge.
    pub fn bytes(self) -> usize {
        match self {
            SelectMapWidth::X8 => 1,
            SelectMapWidth::X16 => 2,
        }
    }

    /// Number of data lines driven by the host.
    pub fn lanes(self) -> u32 {
        self.bytes() as u32 * 8
    }
}

impl Display for SelectMapWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x{}", self.lanes())
    }
}

/// How a bitstream is loaded into the FPGA.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LoadMode {
    /// Pulse PROGRAM_B, wait for INIT_B and finish by clocking until DONE rises.
    #[default]
    Reset,
    /// Stream into the running design. No PROGRAM_B pulse, no DONE polling.
    PartialReconfig,
}

impl Display for LoadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadMode::Reset => write!(f, "reset"),
            LoadMode::PartialReconfig => write!(f, "partial reconfiguration"),
        }
    }
}

/// A command line sent by a client after the server printed its ready prompt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Report the latest status snapshot as JSON.
    Stat,
    /// Announce a bitstream of `size` bytes. The raw bytes follow the two `OK` replies.
    Program {
        size: usize,
        width: SelectMapWidth,
        mode: LoadMode,
    },
    /// Write one byte into an FPGA register.
    Write { addr: u16, data: u8 },
    /// Read one byte from an FPGA register.
    Read { addr: u16 },
    /// Pulse PROGRAM_B, clearing the FPGA configuration.
    Init,
    /// List the supported commands.
    Help,
}

/// A line written by the server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    /// Ready prompt, also the implicit success of commands without a value.
    Ready,
    /// The command failed.
    Error,
    /// A register value, printed as lower case hex without padding.
    Value(u8),
    /// A serialized [`FicStatus`].
    Json(String),
    /// Free text, used by `HELP`.
    Text(String),
}

/// Snapshot of the board state, refreshed periodically by the daemon.
///
/// Serialized with the field names clients already parse:
/// `ts,state,hls,linkup,dipsw,led,chup,done,pwr`.
/// `ts` is an RFC3339 string. Until the first successful refresh it holds
/// [`FicStatus::never_refreshed`], `0001-01-01T00:00:00Z`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FicStatus {
    /// Time of the refresh that produced this snapshot.
    pub ts: DateTime<Utc>,
    /// Status register
    pub state: u8,
    /// HLS shared register
    pub hls: u8,
    /// Link up register
    pub linkup: u8,
    /// DIP switch register
    pub dipsw: u8,
    /// 7-segment / LED register
    pub led: u8,
    /// Channel up register
    pub chup: u8,
    /// Level of the FPGA DONE pin
    pub done: u8,
    /// Level of the power good pin
    pub pwr: u8,
}

impl FicStatus {
    /// Timestamp of a snapshot that was never refreshed, the zero time
    /// `0001-01-01T00:00:00Z`.
    pub fn never_refreshed() -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(1, 1, 1)
            .unwrap_or_default()
            .and_time(NaiveTime::MIN)
            .and_utc()
    }

    /// Whether this snapshot came from an actual refresh.
    pub fn is_fresh(&self) -> bool {
        self.ts != Self::never_refreshed()
    }
}

impl Default for FicStatus {
    fn default() -> Self {
        Self {
            ts: Self::never_refreshed(),
            state: 0,
            hls: 0,
            linkup: 0,
            dipsw: 0,
            led: 0,
            chup: 0,
            done: 0,
            pwr: 0,
        }
    }
}

#[test]
fn status_serializes_with_wire_names() {
    use chrono::TimeZone;

    let status = FicStatus {
        ts: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        state: 2,
        hls: 3,
        linkup: 4,
        dipsw: 5,
        led: 6,
        chup: 7,
        done: 1,
        pwr: 0,
    };
    let json = serde_json::to_string(&status).unwrap();
    assert_eq!(
        json,
        r#"{"ts":"2024-05-01T12:30:00Z","state":2,"hls":3,"linkup":4,"dipsw":5,"led":6,"chup":7,"done":1,"pwr":0}"#
    );
}

#[test]
fn unrefreshed_status_carries_zero_time() {
    let status = FicStatus::default();
    assert!(!status.is_fresh());
    let json = serde_json::to_string(&status).unwrap();
    assert!(
        json.starts_with(r#"{"ts":"0001-01-01T00:00:00Z","state":0,"#),
        "{json}"
    );
    let parsed: FicStatus = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, status);
}

#[test]
fn status_accepts_offset_timestamps() {
    let json = r#"{"ts":"2024-05-01T21:30:00.25+09:00","state":1,"hls":0,"linkup":15,"dipsw":5,"led":0,"chup":15,"done":1,"pwr":1}"#;
    let status: FicStatus = serde_json::from_str(json).unwrap();
    assert!(status.is_fresh());
    assert_eq!(status.ts.to_rfc3339(), "2024-05-01T12:30:00.250+00:00");
    assert_eq!(status.linkup, 15);
}

#[test]
fn width_display() {
    assert_eq!(SelectMapWidth::X8.to_string(), "x8");
    assert_eq!(SelectMapWidth::X16.to_string(), "x16");
}
