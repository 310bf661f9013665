// ─────────────────────────────────────────────────────────────────────────────
//  pad-flasher :: error
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use serde::Serialize;
use thiserror::Error;

/// Batch-level failures.  These are only raised before any device session
/// starts; once the batch is running, failures are recorded per device.
#[derive(Debug, Error)]
pub enum FlashError {
    #[error("Cannot read firmware '{path}': {source}")]
    FirmwareUnreadable {
        path:   String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed Intel HEX in '{path}': {source}")]
    InvalidHex {
        path:   String,
        #[source]
        source: ihex::ReaderError,
    },

    #[error("Intel HEX image '{path}' spans {first:#010x}..={last:#010x}, more than {limit} bytes")]
    SparseHex { path: String, first: u32, last: u32, limit: u32 },

    #[error("No devices configured")]
    NoDevices,

    #[error("Unknown interface '{0}' — expected one of: uart, jtag, swd")]
    UnknownInterface(String),

    #[error("Invalid batch file '{path}':\n{source}")]
    BatchConfig {
        path:   String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Cannot start device workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FlashError>;

/// Failures raised by a transport.  A session turns these into an
/// [`ErrorKind`]; they never leave the session that hit them.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("link already closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a device ended in the `Failed` state.
///
/// `RecoveryFailed` is advisory: it is reported next to the outcome but never
/// used as a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConnectFailed,
    WriteFailed,
    ValidationFailed,
    RecoveryFailed,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConnectFailed    => "CONNECT_FAILED",
            ErrorKind::WriteFailed      => "WRITE_FAILED",
            ErrorKind::ValidationFailed => "VALIDATION_FAILED",
            ErrorKind::RecoveryFailed   => "RECOVERY_FAILED",
        }
    }

    /// Whether this kind ends a session.
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorKind::RecoveryFailed)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
