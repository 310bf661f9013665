// ─────────────────────────────────────────────────────────────────────────────
//  pad_flasher  —  public library API
// ─────────────────────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod detect;
pub mod error;
pub mod firmware;
pub mod report;
pub mod session;
pub mod transport;
pub mod verify;

pub use batch::{BatchResult, Coordinator, Mode};
pub use config::{BatchFile, BaudRate, DeviceConfig, TransportKind};
pub use error::{ErrorKind, FlashError, LinkError, Result};
pub use firmware::FirmwareImage;
pub use report::{Console, MemorySink};
pub use session::{DeviceOutcome, DeviceSession, Recovery, State, Validation};
pub use transport::{Connector, SystemConnector, Transport};
pub use verify::{Checksum, DigestVerifier, Verifier};

/// One-shot: flash `firmware` onto every device with the real transports.
///
/// ```no_run
/// use pad_flasher::{flash, Checksum, DeviceConfig, Mode};
/// use std::path::Path;
///
/// let devices = vec![
///     DeviceConfig::uart("/dev/ttyUSB0").validate(true),
///     DeviceConfig::uart("/dev/ttyUSB1").validate(true),
/// ];
/// let result = flash(Path::new("build/app.bin"), &devices, Mode::Parallel, Checksum::Sha256).unwrap();
/// std::process::exit(result.exit_code());
/// ```
pub fn flash(
    firmware: &std::path::Path,
    devices: &[DeviceConfig],
    mode: Mode,
    checksum: Checksum,
) -> Result<BatchResult> {
    Coordinator::system(checksum, Console::stdout(false)).flash_file(firmware, devices, mode)
}
