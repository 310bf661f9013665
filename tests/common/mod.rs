//! In-memory targets for driving sessions and batches without hardware.
//!
//! A `MockLink` behaves like a cooperative device: it stores programmed
//! bytes, answers the sync pattern, and answers digest requests with the
//! digest of what it stored.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pad_flasher::transport::SYNC_PATTERN;
use pad_flasher::{Connector, DeviceConfig, FirmwareImage, LinkError, Transport, TransportKind};

#[derive(Debug, Clone, Default)]
pub struct Behaviour {
    pub fail_open:  bool,
    /// Fail the n-th firmware write (0-based).
    pub fail_write: Option<usize>,
    pub send_delay: Duration,
    /// Bytes sent back after the sync pattern.
    pub sync_reply: Vec<u8>,
    /// Store a damaged copy so validation fails.
    pub corrupt:    bool,
}

impl Behaviour {
    pub fn ok() -> Self {
        Self { sync_reply: vec![0x7E], ..Default::default() }
    }

    pub fn unreachable() -> Self {
        Self { fail_open: true, ..Default::default() }
    }

    pub fn write_error_at(chunk: usize) -> Self {
        Self { fail_write: Some(chunk), ..Self::ok() }
    }

    pub fn slow(delay: Duration) -> Self {
        Self { send_delay: delay, ..Self::ok() }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn corrupting() -> Self {
        Self { corrupt: true, ..Self::ok() }
    }
}

/// What happened to one device, observable after the run.
#[derive(Debug, Default)]
pub struct Probe {
    pub opens:       AtomicUsize,
    pub close_calls: AtomicUsize,
    pub released:    AtomicUsize,
    pub programmed:  Mutex<Vec<u8>>,
}

impl Probe {
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn programmed(&self) -> Vec<u8> {
        self.programmed.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct MockConnector {
    devices: HashMap<String, (Behaviour, Arc<Probe>)>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, path: &str, behaviour: Behaviour) -> Self {
        self.devices.insert(path.to_owned(), (behaviour, Arc::new(Probe::default())));
        self
    }

    pub fn probe(&self, path: &str) -> Arc<Probe> {
        self.devices[path].1.clone()
    }
}

impl Connector for MockConnector {
    fn open(&self, config: &DeviceConfig) -> Result<Box<dyn Transport>, LinkError> {
        let (behaviour, probe) = self.devices.get(&config.path).ok_or_else(|| LinkError::Open {
            path:   config.path.clone(),
            reason: "no such device".into(),
        })?;
        probe.opens.fetch_add(1, Ordering::SeqCst);

        if behaviour.fail_open {
            return Err(LinkError::Open { path: config.path.clone(), reason: "device not responding".into() });
        }

        Ok(Box::new(MockLink {
            kind:      config.kind,
            baud:      config.line_rate().map(|r| r.active),
            behaviour: behaviour.clone(),
            probe:     probe.clone(),
            open:      true,
            writes:    0,
            inbox:     Vec::new(),
        }))
    }
}

pub struct MockLink {
    kind:      TransportKind,
    baud:      Option<u32>,
    behaviour: Behaviour,
    probe:     Arc<Probe>,
    open:      bool,
    writes:    usize,
    inbox:     Vec<u8>,
}

impl MockLink {
    pub fn standalone(probe: Arc<Probe>) -> Self {
        MockLink {
            kind: TransportKind::Uart,
            baud: Some(115_200),
            behaviour: Behaviour::ok(),
            probe,
            open: true,
            writes: 0,
            inbox: Vec::new(),
        }
    }

    fn answer_digest(&mut self, algo: u8) {
        let stored = FirmwareImage::from_bytes("device", self.probe.programmed());
        match algo {
            0x01 => self.inbox.extend_from_slice(&stored.sha256()),
            0x02 => self.inbox.extend_from_slice(&stored.djb2().to_le_bytes()),
            _ => {}
        }
    }
}

impl Transport for MockLink {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        if !self.open {
            return Err(LinkError::Closed);
        }
        if !self.behaviour.send_delay.is_zero() {
            std::thread::sleep(self.behaviour.send_delay);
        }

        if data == &SYNC_PATTERN[..] {
            let reply = self.behaviour.sync_reply.clone();
            self.inbox.extend_from_slice(&reply);
            return Ok(());
        }
        if data.len() == 7 && data[0] == 0x7E && data[1] == b'V' {
            self.answer_digest(data[2]);
            return Ok(());
        }

        if self.behaviour.fail_write == Some(self.writes) {
            return Err(LinkError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "simulated I/O error")));
        }
        self.writes += 1;

        let mut programmed = self.probe.programmed.lock().unwrap();
        programmed.extend_from_slice(data);
        if self.behaviour.corrupt && self.writes == 1 {
            if let Some(first) = programmed.first_mut() {
                *first ^= 0xFF;
            }
        }
        Ok(())
    }

    fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, LinkError> {
        if !self.open {
            return Err(LinkError::Closed);
        }
        let n = max_len.min(self.inbox.len());
        Ok(self.inbox.drain(..n).collect())
    }

    fn close(&mut self) {
        self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.open {
            self.open = false;
            self.probe.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn baud_rate(&self) -> Option<u32> {
        self.baud
    }
}

pub fn image(len: usize) -> FirmwareImage {
    let bytes: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
    FirmwareImage::from_bytes("firmware.bin", bytes)
}

/// Console tags (`[n:path]`) of every device line, in output order.
pub fn line_tags(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| l.starts_with('['))
        .filter_map(|l| l.split_once(']').map(|(tag, _)| format!("{}]", tag)))
        .collect()
}
