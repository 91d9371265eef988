//! Aegnux Library
//!
//! Job engine that installs Adobe After Effects into a self-contained Wine
//! runtime and manages it afterwards. Jobs download, unpack and run external
//! commands on a background task and report log lines, progress and a
//! terminal status to a controller over a channel.

pub mod archive;
pub mod cancel;
pub mod config;
pub mod controller;
pub mod download;
pub mod error;
pub mod events;
pub mod files;
pub mod installer;
pub mod job;
pub mod layout;
pub mod probe;
pub mod process;
pub mod wine;

pub use cancel::CancelFlag;
pub use config::Config;
pub use controller::{JobController, JobReport, Surface};
pub use error::{AegnuxError, Result};
pub use events::{JobEvent, JobStatus, LogLine, Progress, Reporter};
pub use job::{InstallSource, JobHandle, JobKind, JobRequest, JobState};
pub use layout::Layout;
pub use wine::Runtime;
