//! Timing and framing constants shared by every subtest.
//!
//! Everything here is fixed at compile time. Derived values are computed
//! from their inputs so the sampling horizon, the cadence and the buffer
//! sizing cannot drift apart.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─── Endpoints ───────────────────────────────────────────────────

/// Selects the download subtest.
pub const DOWNLOAD_URL_PATH: &str = "/ndt/v7/download";

/// Selects the upload subtest.
pub const UPLOAD_URL_PATH: &str = "/ndt/v7/upload";

/// WebSocket sub-protocol identifying the measurement protocol version.
pub const SEC_WEBSOCKET_PROTOCOL: &str = "net.measurementlab.ndt.v7";

// ─── Timing ──────────────────────────────────────────────────────

/// Cadence of periodic samples.
pub const MIN_MEASUREMENT_INTERVAL: Duration = Duration::from_millis(250);

/// How long the collector keeps sampling.
pub const DEFAULT_RUNTIME: Duration = Duration::from_secs(10);

/// Hard write deadline for a subtest. Longer than `DEFAULT_RUNTIME` so
/// buffered samples can still be drained after the collector stops.
pub const MAX_RUNTIME: Duration = Duration::from_secs(15);

/// Periodic samples expected over `DEFAULT_RUNTIME`.
pub const NUM_EXPECTED_MEASUREMENTS: usize =
    (DEFAULT_RUNTIME.as_millis() / MIN_MEASUREMENT_INTERVAL.as_millis()) as usize;

/// Collector channel capacity: every periodic sample plus the initial one.
pub const MEASUREMENT_BUFFER: usize = NUM_EXPECTED_MEASUREMENTS + 1;

// ─── Framing ─────────────────────────────────────────────────────

/// Smallest binary message the bulk sender will write.
pub const MIN_MESSAGE_SIZE: usize = 1 << 10;

/// Size of the first binary message of a download.
pub const INITIAL_MESSAGE_SIZE: usize = 1 << 13;

/// Messages up to this size must always be accepted.
pub const MAX_MESSAGE_SIZE: usize = 1 << 24;

/// Upper bound for adaptively scaled binary messages.
pub const MAX_SCALED_MESSAGE_SIZE: usize = 1 << 20;

/// A message is scaled up while it is smaller than
/// `1 / SCALING_FRACTION` of the bytes sent so far.
pub const SCALING_FRACTION: u64 = 16;

/// Size of the binary message following one of `current` bytes, once
/// `total_sent` bytes have gone out.
pub fn next_message_size(current: usize, total_sent: u64) -> usize {
    let current = current.clamp(MIN_MESSAGE_SIZE, MAX_SCALED_MESSAGE_SIZE);
    if current >= MAX_SCALED_MESSAGE_SIZE || current as u64 >= total_sent / SCALING_FRACTION {
        return current;
    }
    (current * 2).min(MAX_SCALED_MESSAGE_SIZE)
}

// ─── Subtests ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtestKind {
    Download,
    Upload,
}

impl fmt::Display for SubtestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => f.write_str("download"),
            Self::Upload => f.write_str("upload"),
        }
    }
}
