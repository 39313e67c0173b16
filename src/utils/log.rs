//! Leveled diagnostics on stderr.
//!
//! Messages are stamped with the time elapsed since the first message of
//! the process, a severity tag and the name of the emitting tool:
//!
//! ```text
//! [   0.004s] error stack-machine: line 3: duplicate label: loop
//! ```
//!
//! Filtering is process-wide through an atomic severity threshold, so a
//! handle never needs to be threaded through call chains just to silence
//! output.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

/// Message severities, in increasing order of importance.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info = 0,
    Warn = 1,
    Error = 2,
}

impl Severity {
    /// Returns the tag printed in front of a message.
    const fn tag(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

static THRESHOLD: AtomicU8 = AtomicU8::new(Severity::Info as u8);
static STARTED: OnceLock<Instant> = OnceLock::new();

/// Raises or lowers the process-wide severity threshold.
pub fn set_threshold(severity: Severity) {
    THRESHOLD.store(severity as u8, Ordering::Relaxed);
}

/// Returns true if messages of `severity` currently pass the threshold.
fn passes(severity: Severity) -> bool {
    severity as u8 >= THRESHOLD.load(Ordering::Relaxed)
}

/// Named log handle; one per tool or subsystem.
///
/// Handles are `Copy` and carry only their name, so they can be created
/// wherever needed without any registration.
#[derive(Clone, Copy)]
pub struct Log {
    name: &'static str,
}

impl Log {
    /// Creates a handle that stamps its messages with `name`.
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    /// Emits an informational message.
    pub fn info(&self, message: &str) {
        self.write(Severity::Info, message);
    }

    /// Emits a warning.
    pub fn warn(&self, message: &str) {
        self.write(Severity::Warn, message);
    }

    /// Emits an error message.
    pub fn error(&self, message: &str) {
        self.write(Severity::Error, message);
    }

    fn write(&self, severity: Severity, message: &str) {
        if !passes(severity) {
            return;
        }
        let elapsed = STARTED.get_or_init(Instant::now).elapsed();
        eprintln!(
            "[{:>8.3}s] {:5} {}: {}",
            elapsed.as_secs_f64(),
            severity.tag(),
            self.name,
            message
        );
    }
}
