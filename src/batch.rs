// ─────────────────────────────────────────────────────────────────────────────
//  pad-flasher :: batch  —  fan one image out to many devices
//
//  Sequential mode walks the devices in configuration order on the calling
//  thread.  Parallel mode runs one worker per device (a dedicated rayon pool
//  sized to the device count) and joins them all.  Either way the outcome
//  list is in configuration order, and a device failure only ever affects
//  its own outcome.
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{DeviceConfig, DEFAULT_CHUNK_SIZE};
use crate::error::{FlashError, Result};
use crate::firmware::FirmwareImage;
use crate::report::Console;
use crate::session::{DeviceOutcome, DeviceSession};
use crate::transport::{Connector, SystemConnector};
use crate::verify::{Checksum, DigestVerifier, Verifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Sequential,
    Parallel,
}

impl Mode {
    pub fn from_parallel(parallel: bool) -> Self {
        if parallel { Mode::Parallel } else { Mode::Sequential }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Sequential => "sequential",
            Mode::Parallel   => "parallel",
        })
    }
}

/// Everything one batch run produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub firmware:     String,
    pub firmware_len: usize,
    pub mode:         Mode,
    /// One entry per configured device, in configuration order.
    pub outcomes:     Vec<DeviceOutcome>,
    pub elapsed_ms:   u64,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded() == self.total()
    }

    /// 0 when every device is `Done`, 2 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.all_succeeded() { 0 } else { 2 }
    }
}

pub struct Coordinator {
    connector:  Box<dyn Connector>,
    verifier:   Box<dyn Verifier>,
    console:    Console,
    chunk_size: usize,
}

impl Coordinator {
    pub fn new(
        connector: impl Connector + 'static,
        verifier: impl Verifier + 'static,
        console: Console,
    ) -> Self {
        Self {
            connector: Box::new(connector),
            verifier: Box::new(verifier),
            console,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Real transports with digest validation.
    pub fn system(checksum: Checksum, console: Console) -> Self {
        Self::new(SystemConnector, DigestVerifier::new(checksum), console)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    /// Load the image at `firmware` and run the batch.
    pub fn flash_file(&self, firmware: &Path, devices: &[DeviceConfig], mode: Mode) -> Result<BatchResult> {
        if devices.is_empty() {
            return Err(FlashError::NoDevices);
        }
        let image = FirmwareImage::load(firmware)?;
        self.run(&image, devices, mode)
    }

    /// Only precondition violations are errors; device failures are in the
    /// returned outcomes.
    pub fn run(&self, image: &FirmwareImage, devices: &[DeviceConfig], mode: Mode) -> Result<BatchResult> {
        if devices.is_empty() {
            return Err(FlashError::NoDevices);
        }

        log::info!(
            "flashing {} ({} bytes) to {} device(s), {} mode",
            image.path().display(), image.len(), devices.len(), mode
        );
        self.console.line(format!("Starting batch operation with {} device(s)", devices.len()));
        self.console.line(format!("Running in {} mode", mode));

        let started = Instant::now();

        let outcomes: Vec<DeviceOutcome> = match mode {
            Mode::Sequential => devices
                .iter()
                .enumerate()
                .map(|(i, cfg)| self.run_device(i, cfg, image))
                .collect(),
            Mode::Parallel => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(devices.len())
                    .thread_name(|i| format!("pad-device-{}", i))
                    .build()?;

                // with_max_len(1): every device gets its own job, so one
                // slow link never queues another device behind it
                pool.install(|| {
                    devices
                        .par_iter()
                        .with_max_len(1)
                        .enumerate()
                        .map(|(i, cfg)| self.run_device(i, cfg, image))
                        .collect()
                })
            }
        };

        let result = BatchResult {
            firmware:     image.path().display().to_string(),
            firmware_len: image.len(),
            mode,
            outcomes,
            elapsed_ms:   started.elapsed().as_millis() as u64,
        };

        log::info!("batch completed with {}/{} devices successful", result.succeeded(), result.total());
        self.console.summary(&result);
        Ok(result)
    }

    fn run_device(&self, index: usize, config: &DeviceConfig, image: &FirmwareImage) -> DeviceOutcome {
        let outcome = DeviceSession::new(index, config.clone(), &*self.connector, &*self.verifier)
            .with_chunk_size(self.chunk_size)
            .run(image);
        self.console.device_block(&outcome);
        outcome
    }
}
