// ─────────────────────────────────────────────────────────────────────────────
//  pad-flasher :: config  —  device + batch configuration
//
//  A batch file is plain TOML:
//
//    firmware = "build/app.hex"
//    parallel = true
//    validate = true
//    checksum = "sha256"
//
//    [[device]]
//    interface = "uart"
//    port      = "/dev/ttyUSB0"
//    baudrate  = 115200
//
//    [[device]]
//    interface = "swd"
//    port      = "127.0.0.1:4444"
//    recovery  = true
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlashError, Result};
use crate::verify::Checksum;

pub const DEFAULT_BAUD: u32 = 115_200;

/// Standard rates the UART line discipline accepts.
pub const SUPPORTED_BAUDS: &[u32] = &[
    9_600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800, 921_600,
];

pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// The fixed set of links a target can be reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Uart,
    Jtag,
    Swd,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Uart => "UART",
            TransportKind::Jtag => "JTAG",
            TransportKind::Swd  => "SWD",
        }
    }

    /// Per-call I/O timeout used when the configuration does not set one.
    pub fn default_timeout(self) -> Duration {
        match self {
            TransportKind::Uart => Duration::from_secs(1),
            TransportKind::Jtag | TransportKind::Swd => Duration::from_secs(5),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = FlashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uart" | "serial" => Ok(TransportKind::Uart),
            "jtag"            => Ok(TransportKind::Jtag),
            "swd"             => Ok(TransportKind::Swd),
            other             => Err(FlashError::UnknownInterface(other.to_owned())),
        }
    }
}

/// Result of mapping a requested UART rate onto the supported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudRate {
    pub requested: u32,
    pub active:    u32,
}

impl BaudRate {
    /// Unsupported rates fall back to 115200; that is a warning, never an error.
    pub fn negotiate(requested: u32) -> Self {
        let active = if SUPPORTED_BAUDS.contains(&requested) { requested } else { DEFAULT_BAUD };
        BaudRate { requested, active }
    }

    pub fn fell_back(&self) -> bool {
        self.requested != self.active
    }
}

/// One target device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub kind:      TransportKind,
    /// Serial port, adapter node or `host:port` of a debug-adapter server.
    pub path:      String,
    /// Only meaningful for UART.
    pub baud_rate: u32,
    pub timeout:   Duration,
    pub validate_after_flash: bool,
    pub recovery_mode: bool,
}

impl DeviceConfig {
    pub fn new(kind: TransportKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            baud_rate: DEFAULT_BAUD,
            timeout: kind.default_timeout(),
            validate_after_flash: false,
            recovery_mode: false,
        }
    }

    pub fn uart(path: impl Into<String>) -> Self {
        Self::new(TransportKind::Uart, path)
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(mut self, on: bool) -> Self {
        self.validate_after_flash = on;
        self
    }

    pub fn recovery(mut self, on: bool) -> Self {
        self.recovery_mode = on;
        self
    }

    /// Baud rate after mapping onto [`SUPPORTED_BAUDS`].  `None` for JTAG/SWD.
    pub fn line_rate(&self) -> Option<BaudRate> {
        match self.kind {
            TransportKind::Uart => Some(BaudRate::negotiate(self.baud_rate)),
            TransportKind::Jtag | TransportKind::Swd => None,
        }
    }
}

/// Default device list when only a count is given: `/dev/ttyUSB0..N`
/// (`COM1..N` on Windows).
pub fn numbered_devices(kind: TransportKind, count: usize) -> Vec<DeviceConfig> {
    (0..count)
        .map(|i| {
            let path = if cfg!(windows) { format!("COM{}", i + 1) } else { format!("/dev/ttyUSB{}", i) };
            DeviceConfig::new(kind, path)
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
//  Batch file
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchFile {
    pub firmware:   Option<PathBuf>,
    #[serde(default)]
    pub parallel:   bool,
    #[serde(default)]
    pub validate:   bool,
    #[serde(default)]
    pub recovery:   bool,
    pub checksum:   Option<Checksum>,
    pub chunk_size: Option<usize>,
    #[serde(default, rename = "device")]
    pub devices:    Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceEntry {
    #[serde(default = "default_interface")]
    pub interface:  TransportKind,
    pub port:       String,
    pub baudrate:   Option<u32>,
    pub timeout_ms: Option<u64>,
    pub validate:   Option<bool>,
    pub recovery:   Option<bool>,
}

fn default_interface() -> TransportKind {
    TransportKind::Uart
}

impl BatchFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|source| FlashError::BatchConfig {
            path: origin.display().to_string(),
            source,
        })
    }

    /// Expand the `[[device]]` entries, applying batch-wide flags where an
    /// entry has no override.
    pub fn device_configs(&self) -> Vec<DeviceConfig> {
        self.devices
            .iter()
            .map(|d| {
                let mut cfg = DeviceConfig::new(d.interface, d.port.clone())
                    .validate(d.validate.unwrap_or(self.validate))
                    .recovery(d.recovery.unwrap_or(self.recovery));
                if let Some(baud) = d.baudrate {
                    cfg.baud_rate = baud;
                }
                if let Some(ms) = d.timeout_ms {
                    cfg.timeout = Duration::from_millis(ms);
                }
                cfg
            })
            .collect()
    }
}
