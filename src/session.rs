// ─────────────────────────────────────────────────────────────────────────────
//  pad-flasher :: session  —  single-device lifecycle
//
//    Idle → Connecting → [RecoveryPending] → Programming → [Validating]
//         → Disconnecting → Done
//
//  `Failed(kind)` is reachable from every non-terminal state.  Once a link is
//  open it is closed exactly once, whatever happened in between.
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::time::Instant;

use serde::{Serialize, Serializer};

use crate::config::{DeviceConfig, TransportKind, DEFAULT_CHUNK_SIZE};
use crate::error::ErrorKind;
use crate::firmware::FirmwareImage;
use crate::report::{DeviceLog, Event, Stage};
use crate::transport::{Connector, Transport};
use crate::verify::Verifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Connecting,
    RecoveryPending,
    Programming,
    Validating,
    Disconnecting,
    Done,
    Failed(ErrorKind),
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Failed(_))
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Idle            => f.write_str("Idle"),
            State::Connecting      => f.write_str("Connecting"),
            State::RecoveryPending => f.write_str("RecoveryPending"),
            State::Programming     => f.write_str("Programming"),
            State::Validating      => f.write_str("Validating"),
            State::Disconnecting   => f.write_str("Disconnecting"),
            State::Done            => f.write_str("Done"),
            State::Failed(kind)    => write!(f, "Failed({})", kind),
        }
    }
}

impl Serialize for State {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Validation {
    NotRequested,
    /// Requested, but an earlier stage failed first.
    Skipped,
    Passed,
    Failed,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Validation::NotRequested => "validation not requested",
            Validation::Skipped      => "validation skipped",
            Validation::Passed       => "validation passed",
            Validation::Failed       => "validation failed",
        })
    }
}

/// Outcome of the advisory recovery handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    NotRequested,
    Synced,
    /// `RECOVERY_FAILED`; the session carried on regardless.
    Failed,
}

/// Terminal record of one device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceOutcome {
    /// Position in the batch's device list.
    pub index:         usize,
    pub device:        String,
    pub transport:     TransportKind,
    pub state:         State,
    pub error:         Option<ErrorKind>,
    pub message:       Option<String>,
    pub recovery:      Recovery,
    pub validation:    Validation,
    pub baud_rate:     Option<u32>,
    /// Zero unless the whole image was written.
    pub bytes_written: usize,
    /// Every state entered after `Idle`, terminal state last.
    pub stages:        Vec<State>,
    pub elapsed_ms:    u64,
    pub events:        Vec<Event>,
}

impl DeviceOutcome {
    pub fn is_success(&self) -> bool {
        self.state == State::Done
    }

    /// `[n:path]`, the prefix of every console line of this device.
    pub fn tag(&self) -> String {
        format!("[{}:{}]", self.index + 1, self.device)
    }
}

struct StageFailure {
    stage:   Stage,
    kind:    ErrorKind,
    message: String,
}

pub struct DeviceSession<'a> {
    index:      usize,
    config:     DeviceConfig,
    connector:  &'a dyn Connector,
    verifier:   &'a dyn Verifier,
    chunk_size: usize,

    state:      State,
    stages:     Vec<State>,
    last_error: Option<String>,
    recovery:   Recovery,
    validation: Validation,
    baud_rate:  Option<u32>,
    written:    usize,
    log:        DeviceLog,
}

impl<'a> DeviceSession<'a> {
    pub fn new(
        index: usize,
        config: DeviceConfig,
        connector: &'a dyn Connector,
        verifier: &'a dyn Verifier,
    ) -> Self {
        let log = DeviceLog::new(format!("{}:{}", index + 1, config.path));
        let validation = if config.validate_after_flash {
            Validation::Skipped
        } else {
            Validation::NotRequested
        };
        Self {
            index,
            config,
            connector,
            verifier,
            chunk_size: DEFAULT_CHUNK_SIZE,
            state: State::Idle,
            stages: Vec::new(),
            last_error: None,
            recovery: Recovery::NotRequested,
            validation,
            baud_rate: None,
            written: 0,
            log,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Drive the device to a terminal state.  Never panics on device errors
    /// and never returns early without releasing an opened link.
    pub fn run(mut self, image: &FirmwareImage) -> DeviceOutcome {
        let started = Instant::now();

        self.enter(State::Connecting);
        if let Some(rate) = self.config.line_rate() {
            if rate.fell_back() {
                self.log.warn(Stage::Connect, format!(
                    "unsupported baud rate {}, using {}", rate.requested, rate.active
                ));
            }
        }

        let mut link = match self.connector.open(&self.config) {
            Ok(link) => link,
            Err(e) => {
                self.fail(StageFailure {
                    stage:   Stage::Connect,
                    kind:    ErrorKind::ConnectFailed,
                    message: e.to_string(),
                });
                return self.finish(started);
            }
        };

        self.baud_rate = link.baud_rate();
        self.log.info(Stage::Connect, match self.baud_rate {
            Some(baud) => format!("connected via {} at {} baud", self.config.kind, baud),
            None       => format!("connected via {}", self.config.kind),
        });

        let result = self.drive(link.as_mut(), image);

        self.enter(State::Disconnecting);
        link.close();
        drop(link);
        self.log.info(Stage::Disconnect, "link closed");

        match result {
            Ok(()) => {
                self.enter(State::Done);
                self.log.info(Stage::Done, format!("{} bytes programmed, {}", self.written, self.validation));
            }
            Err(failure) => {
                self.written = 0;
                self.fail(failure);
            }
        }
        self.finish(started)
    }

    fn drive(&mut self, link: &mut dyn Transport, image: &FirmwareImage) -> Result<(), StageFailure> {
        if self.config.recovery_mode {
            self.enter(State::RecoveryPending);
            if link.sync() {
                self.recovery = Recovery::Synced;
                self.log.info(Stage::Recovery, "sync reply received");
            } else {
                self.recovery = Recovery::Failed;
                self.log.warn(Stage::Recovery, format!("{}: no sync reply, continuing", ErrorKind::RecoveryFailed));
            }
        }

        self.enter(State::Programming);
        self.program(link, image)?;

        if !self.config.validate_after_flash {
            self.log.info(Stage::Validate, "validation not requested");
            return Ok(());
        }

        self.enter(State::Validating);
        if self.verifier.verify(link, image) {
            self.validation = Validation::Passed;
            self.log.info(Stage::Validate, format!("{} check passed", self.verifier.name()));
            Ok(())
        } else {
            self.validation = Validation::Failed;
            Err(StageFailure {
                stage:   Stage::Validate,
                kind:    ErrorKind::ValidationFailed,
                message: format!("{} check failed", self.verifier.name()),
            })
        }
    }

    fn program(&mut self, link: &mut dyn Transport, image: &FirmwareImage) -> Result<(), StageFailure> {
        let total = image.len();
        let mut sent = 0usize;
        let mut next_step = 10usize;

        for chunk in image.bytes().chunks(self.chunk_size) {
            if let Err(e) = link.send(chunk) {
                return Err(StageFailure {
                    stage:   Stage::Program,
                    kind:    ErrorKind::WriteFailed,
                    message: format!("write failed at offset {}: {}", sent, e),
                });
            }
            sent += chunk.len();

            let pct = sent * 100 / total;
            if pct >= next_step {
                log::debug!("[{}:{}] flashing progress: {}%", self.index + 1, self.config.path, pct);
                next_step = (pct / 10 + 1) * 10;
            }
        }

        self.written = sent;
        self.log.info(Stage::Program, format!("{} bytes written", sent));
        Ok(())
    }

    fn enter(&mut self, state: State) {
        log::trace!("[{}:{}] {} → {}", self.index + 1, self.config.path, self.state, state);
        self.state = state;
        self.stages.push(state);
    }

    fn fail(&mut self, failure: StageFailure) {
        self.log.error(failure.stage, format!("{}: {}", failure.kind, failure.message));
        self.last_error = Some(failure.message);
        self.enter(State::Failed(failure.kind));
    }

    fn finish(self, started: Instant) -> DeviceOutcome {
        let error = match self.state {
            State::Failed(kind) => Some(kind),
            _ => None,
        };
        DeviceOutcome {
            index:         self.index,
            device:        self.config.path,
            transport:     self.config.kind,
            state:         self.state,
            error,
            message:       self.last_error,
            recovery:      self.recovery,
            validation:    self.validation,
            baud_rate:     self.baud_rate,
            bytes_written: self.written,
            stages:        self.stages,
            elapsed_ms:    started.elapsed().as_millis() as u64,
            events:        self.log.into_events(),
        }
    }
}
