//! Events a job sends to its controller
//!
//! Each job owns the sending half of an unbounded channel; the controller
//! holds the receiving half. Nothing else crosses the boundary.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Job progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Progress {
    /// Percentage in `0..=100`
    Percent(u8),
    /// Total amount of work is unknown
    Indeterminate,
}

impl Progress {
    /// Percentage for `done` out of `total`, clamped to 100
    pub fn ratio(done: u64, total: u64) -> Self {
        if total == 0 {
            return Progress::Indeterminate;
        }
        Progress::Percent((done.saturating_mul(100) / total).min(100) as u8)
    }
}

/// Timestamped log line
#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogLine {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Terminal status of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed(String),
    Cancelled,
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed(error) => write!(f, "failed: {}", error),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Log(LogLine),
    Progress { progress: Progress },
    Finished { status: JobStatus },
}

pub type EventSender = UnboundedSender<JobEvent>;
pub type EventReceiver = UnboundedReceiver<JobEvent>;

/// Create a job event channel
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Sink for the telemetry of a single operation
///
/// Leaf operations (download, extraction, commands) report through this trait;
/// `progress` is local to the operation and mapped onto the job by the caller.
pub trait Reporter: Send + Sync {
    fn log(&self, message: String);

    fn progress(&self, _progress: Progress) {}
}

/// Reporter that drops everything
pub struct NullReporter;

impl Reporter for NullReporter {
    fn log(&self, _message: String) {}
}

/// Reporter that keeps everything in memory
#[derive(Default)]
pub struct MemoryReporter {
    lines: Mutex<Vec<String>>,
    progress: Mutex<Vec<Progress>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn progress_values(&self) -> Vec<Progress> {
        self.progress.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Reporter for MemoryReporter {
    fn log(&self, message: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(message);
        }
    }

    fn progress(&self, progress: Progress) {
        if let Ok(mut values) = self.progress.lock() {
            values.push(progress);
        }
    }
}
