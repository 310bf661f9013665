// ─────────────────────────────────────────────────────────────────────────────
//  pad-flasher :: transport :: adapter  —  JTAG / SWD probe sessions
//
//  The wire protocol of the probe is not our business: an adapter session is
//  either a TCP connection to a debug-adapter server (`host:port`) or the
//  probe's device node opened read/write.  Both carry opaque bytes.
// ─────────────────────────────────────────────────────────────────────────────

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};

use crate::config::{DeviceConfig, TransportKind};
use crate::error::LinkError;
use super::Transport;

enum Endpoint {
    Tcp(TcpStream),
    Node(File),
}

pub struct AdapterLink {
    kind:     TransportKind,
    path:     String,
    endpoint: Option<Endpoint>,
}

impl AdapterLink {
    pub fn open(config: &DeviceConfig) -> Result<Self, LinkError> {
        let open_err = |reason: String| LinkError::Open { path: config.path.clone(), reason };

        let endpoint = if is_network_endpoint(&config.path) {
            let addrs = config.path
                .to_socket_addrs()
                .map_err(|e| open_err(e.to_string()))?;

            let mut last_err = None;
            let mut stream = None;
            for addr in addrs {
                match TcpStream::connect_timeout(&addr, config.timeout) {
                    Ok(s) => { stream = Some(s); break; }
                    Err(e) => last_err = Some(e),
                }
            }
            let stream = stream.ok_or_else(|| {
                open_err(last_err.map(|e| e.to_string()).unwrap_or_else(|| "no address resolved".into()))
            })?;

            stream.set_nodelay(true)?;
            stream.set_read_timeout(Some(config.timeout))?;
            stream.set_write_timeout(Some(config.timeout))?;
            Endpoint::Tcp(stream)
        } else {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&config.path)
                .map_err(|e| open_err(e.to_string()))?;
            Endpoint::Node(file)
        };

        log::info!("Opened {} adapter session on {}", config.kind, config.path);

        Ok(Self { kind: config.kind, path: config.path.clone(), endpoint: Some(endpoint) })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// `host:port` (but not a filesystem path or a Windows drive letter).
fn is_network_endpoint(path: &str) -> bool {
    if path.starts_with('/') || path.starts_with('.') || path.contains('\\') {
        return false;
    }
    path.rsplit_once(':')
        .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        .unwrap_or(false)
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock)
}

impl Transport for AdapterLink {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        match self.endpoint.as_mut().ok_or(LinkError::Closed)? {
            Endpoint::Tcp(s)  => { s.write_all(data)?; s.flush()?; }
            Endpoint::Node(f) => { f.write_all(data)?; f.flush()?; }
        }
        Ok(())
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, LinkError> {
        let mut buf = vec![0u8; max_len];
        let read = match self.endpoint.as_mut().ok_or(LinkError::Closed)? {
            Endpoint::Tcp(s)  => s.read(&mut buf),
            Endpoint::Node(f) => f.read(&mut buf),
        };
        match read {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if is_timeout(&e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        match self.endpoint.take() {
            Some(Endpoint::Tcp(s)) => {
                let _ = s.shutdown(Shutdown::Both);
                log::debug!("Closed {} session {}", self.kind, self.path);
            }
            Some(Endpoint::Node(_)) => log::debug!("Closed {} session {}", self.kind, self.path),
            None => {}
        }
    }
}

impl Drop for AdapterLink {
    fn drop(&mut self) {
        self.close();
    }
}
