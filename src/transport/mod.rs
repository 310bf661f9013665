// ─────────────────────────────────────────────────────────────────────────────
//  pad-flasher :: transport  —  byte channels to a target device
//
//  A `Connector` opens one `Transport` per device.  The system connector
//  knows the three link kinds; tests plug in their own.
// ─────────────────────────────────────────────────────────────────────────────

pub mod adapter;
pub mod uart;

use std::time::Duration;

use crate::config::{DeviceConfig, TransportKind};
use crate::error::LinkError;

pub use adapter::AdapterLink;
pub use uart::UartLink;

/// Link-level handshake pattern; a live target echoes a frame starting 0x7E.
pub const SYNC_PATTERN: [u8; 4] = [0x7E, 0xFF, 0xFF, 0x7E];
pub const SYNC_MARKER: u8 = 0x7E;
pub const SYNC_WAIT: Duration = Duration::from_millis(100);

/// An open connection to one device.  Owned by exactly one session.
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Write the whole buffer and flush it.  Partial writes are retried.
    fn send(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Read up to `max_len` bytes.  An empty buffer means the read timed out.
    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, LinkError>;

    /// Release the underlying handle.  Safe to call more than once.
    fn close(&mut self);

    /// Active line rate (UART only).
    fn baud_rate(&self) -> Option<u32> {
        None
    }

    /// Best-effort handshake, see [`sync_handshake`].
    fn sync(&mut self) -> bool {
        sync_handshake(self)
    }
}

/// Send [`SYNC_PATTERN`], give the target [`SYNC_WAIT`] to answer, then look
/// for a [`SYNC_MARKER`] byte in whatever came back.
pub fn sync_handshake<T: Transport + ?Sized>(link: &mut T) -> bool {
    if let Err(e) = link.send(&SYNC_PATTERN) {
        log::debug!("sync: send failed: {}", e);
        return false;
    }
    std::thread::sleep(SYNC_WAIT);

    match link.receive(8) {
        Ok(reply) => reply.contains(&SYNC_MARKER),
        Err(e) => {
            log::debug!("sync: receive failed: {}", e);
            false
        }
    }
}

/// Opens transports for device configurations.
pub trait Connector: Send + Sync {
    fn open(&self, config: &DeviceConfig) -> Result<Box<dyn Transport>, LinkError>;
}

/// Real hardware: serial ports for UART, adapter sessions for JTAG / SWD.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConnector;

impl Connector for SystemConnector {
    fn open(&self, config: &DeviceConfig) -> Result<Box<dyn Transport>, LinkError> {
        match config.kind {
            TransportKind::Uart => Ok(Box::new(UartLink::open(config)?)),
            TransportKind::Jtag | TransportKind::Swd => Ok(Box::new(AdapterLink::open(config)?)),
        }
    }
}
