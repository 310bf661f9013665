// ─────────────────────────────────────────────────────────────────────────────
//  pad-flasher :: transport :: uart  —  raw 8N1 serial line
// ─────────────────────────────────────────────────────────────────────────────

use std::io::{Read, Write};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::config::{BaudRate, DeviceConfig, TransportKind, DEFAULT_BAUD};
use crate::error::LinkError;
use super::Transport;

pub struct UartLink {
    path: String,
    baud: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl UartLink {
    /// Open the port in raw mode: 8 data bits, no parity, 1 stop bit, no flow
    /// control.  The configured rate is mapped onto the supported set first.
    pub fn open(config: &DeviceConfig) -> Result<Self, LinkError> {
        // the session reports a fallback rate, the link only applies it
        let rate = config.line_rate().unwrap_or(BaudRate::negotiate(DEFAULT_BAUD));

        let port = serialport::new(config.path.as_str(), rate.active)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.timeout)
            .open()
            .map_err(|e| LinkError::Open { path: config.path.clone(), reason: e.to_string() })?;

        // stale bytes from a previous session would confuse the sync check
        port.clear(ClearBuffer::All)?;

        log::info!("Opened serial port {} at {} baud", config.path, rate.active);

        Ok(Self { path: config.path.clone(), baud: rate.active, port: Some(port) })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, LinkError> {
        self.port.as_mut().ok_or(LinkError::Closed)
    }
}

impl Transport for UartLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Uart
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, LinkError> {
        let port = self.port()?;
        let mut buf = vec![0u8; max_len];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::debug!("Closed serial port {}", self.path);
        }
    }

    fn baud_rate(&self) -> Option<u32> {
        Some(self.baud)
    }
}

impl Drop for UartLink {
    fn drop(&mut self) {
        self.close();
    }
}
