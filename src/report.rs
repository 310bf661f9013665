// ─────────────────────────────────────────────────────────────────────────────
//  pad-flasher :: report  —  progress events + serialized console output
//
//  Sessions never print directly.  Each one collects its events in a
//  `DeviceLog`; the coordinator hands the finished log to the `Console`,
//  which writes it as one block under a single lock so that concurrent
//  devices never interleave mid-block.  Every event is also forwarded to the
//  `log` facade as it happens.
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use colored::Colorize;
use serde::Serialize;

use crate::batch::BatchResult;
use crate::session::DeviceOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Connect,
    Recovery,
    Program,
    Validate,
    Disconnect,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Connect    => "connect",
            Stage::Recovery   => "recovery",
            Stage::Program    => "program",
            Stage::Validate   => "validate",
            Stage::Disconnect => "disconnect",
            Stage::Done       => "done",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub stage:   Stage,
    pub level:   Level,
    pub message: String,
}

/// Events of one device, in the order they happened.
#[derive(Debug, Clone)]
pub struct DeviceLog {
    label:  String,
    events: Vec<Event>,
}

impl DeviceLog {
    /// `label` identifies the device in every forwarded log record.
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), events: Vec::new() }
    }

    pub fn info(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        log::info!(target: "pad_flasher::session", "[{}] {}: {}", self.label, stage, message);
        self.events.push(Event { stage, level: Level::Info, message });
    }

    pub fn warn(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        log::warn!(target: "pad_flasher::session", "[{}] {}: {}", self.label, stage, message);
        self.events.push(Event { stage, level: Level::Warn, message });
    }

    pub fn error(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        log::error!(target: "pad_flasher::session", "[{}] {}: {}", self.label, stage, message);
        self.events.push(Event { stage, level: Level::Error, message });
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Console
// ─────────────────────────────────────────────────────────────────────────────

/// The one piece of mutable state shared between device workers.
pub struct Console {
    out:   Mutex<Box<dyn Write + Send>>,
    color: bool,
    quiet: bool,
}

impl Console {
    pub fn new(out: impl Write + Send + 'static, color: bool) -> Self {
        Self { out: Mutex::new(Box::new(out)), color, quiet: false }
    }

    pub fn stdout(color: bool) -> Self {
        Self::new(std::io::stdout(), color)
    }

    /// Only the final summary is printed.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        // a worker that panicked mid-write leaves the sink usable
        self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lines(&self, lines: &[String]) {
        let mut out = self.lock();
        for line in lines {
            if let Err(e) = writeln!(out, "{}", line) {
                log::debug!("console write failed: {}", e);
                return;
            }
        }
        let _ = out.flush();
    }

    pub fn line(&self, text: impl Into<String>) {
        if !self.quiet {
            self.write_lines(&[text.into()]);
        }
    }

    /// Write all events of one device as a single contiguous block.
    pub fn device_block(&self, outcome: &DeviceOutcome) {
        if self.quiet { return; }

        let tag = outcome.tag();
        let mut lines = Vec::with_capacity(outcome.events.len() + 1);
        lines.push(format!(
            "{} {}",
            tag,
            self.paint_header(&format!("── {} device {} ──", outcome.transport, outcome.device)),
        ));
        for ev in &outcome.events {
            lines.push(format!("{} {} {:<10} {}", tag, self.symbol(ev.level, ev.stage), ev.stage.to_string(), ev.message));
        }
        self.write_lines(&lines);
    }

    pub fn summary(&self, result: &BatchResult) {
        let ok = result.succeeded();
        let total = result.total();

        let mut lines = vec![String::new()];
        let headline = format!("batch completed with {}/{} devices successful", ok, total);
        lines.push(if !self.color {
            headline
        } else if ok == total {
            format!("{} {}", "✓".green().bold(), headline)
        } else {
            format!("{} {}", "✗".red().bold(), headline)
        });

        for o in &result.outcomes {
            let status = match o.error {
                None       => self.paint(Level::Info, "Done"),
                Some(kind) => self.paint(Level::Error, &format!("Failed({})", kind)),
            };
            let mut row = format!("  {:<4} {:<5} {:<24} {}", o.index + 1, o.transport.as_str(), o.device, status);
            if let Some(msg) = &o.message {
                row.push_str(&format!("  {}", msg));
            }
            lines.push(row);
        }

        self.write_lines(&lines);
    }

    fn symbol(&self, level: Level, stage: Stage) -> String {
        let plain = match (level, stage) {
            (Level::Error, _)      => "✗",
            (Level::Warn, _)       => "!",
            (Level::Info, Stage::Done) => "✓",
            (Level::Info, _)       => "→",
        };
        self.paint(level, plain)
    }

    fn paint(&self, level: Level, text: &str) -> String {
        if !self.color {
            return text.to_owned();
        }
        match level {
            Level::Info  => text.cyan().to_string(),
            Level::Warn  => text.yellow().to_string(),
            Level::Error => text.red().bold().to_string(),
        }
    }

    fn paint_header(&self, text: &str) -> String {
        if self.color { text.bold().to_string() } else { text.to_owned() }
    }
}

/// In-memory sink, handy for capturing console output.
#[derive(Debug, Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<u8>>>);

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
