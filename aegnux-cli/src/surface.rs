//! Terminal rendering of relayed job events

use aegnux_lib::{JobEvent, JobKind, JobStatus, LogLine, Progress, Surface};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;

/// Progress bar on stderr with timestamped log lines printed above it
pub struct TerminalSurface {
    bar: ProgressBar,
    spinning: bool,
}

impl TerminalSurface {
    pub fn new(kind: JobKind) -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>3}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(kind.to_string());
        Self {
            bar,
            spinning: false,
        }
    }
}

impl Surface for TerminalSurface {
    fn log(&mut self, line: &LogLine) {
        // a hidden bar swallows println
        if self.bar.is_hidden() {
            println!("{}", line);
        } else {
            self.bar.println(line.to_string());
        }
    }

    fn progress(&mut self, progress: Progress) {
        match progress {
            Progress::Percent(value) => {
                if self.spinning {
                    self.bar.disable_steady_tick();
                    self.spinning = false;
                }
                self.bar.set_position(u64::from(value));
            }
            Progress::Indeterminate => {
                if !self.spinning {
                    self.bar.enable_steady_tick(Duration::from_millis(120));
                    self.spinning = true;
                }
            }
        }
    }

    fn finished(&mut self, kind: JobKind, status: &JobStatus, last_line: Option<&str>) {
        self.bar.finish_and_clear();
        match status {
            JobStatus::Succeeded => println!("{} finished successfully", capitalize(kind)),
            JobStatus::Cancelled => println!("{} cancelled", capitalize(kind)),
            JobStatus::Failed(error) => {
                eprintln!("Error: {} failed: {}", kind, error);
                if let Some(line) = last_line {
                    eprintln!("Last log line: {}", line);
                }
            }
        }
    }
}

/// One JSON object per event on stdout
pub struct JsonSurface;

impl JsonSurface {
    fn emit<T: Serialize>(value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::warn!("Failed to serialize event: {}", e),
        }
    }
}

impl Surface for JsonSurface {
    fn log(&mut self, line: &LogLine) {
        Self::emit(&JobEvent::Log(line.clone()));
    }

    fn progress(&mut self, progress: Progress) {
        Self::emit(&JobEvent::Progress { progress });
    }

    fn finished(&mut self, _kind: JobKind, status: &JobStatus, _last_line: Option<&str>) {
        Self::emit(&JobEvent::Finished {
            status: status.clone(),
        });
    }
}

fn capitalize(kind: JobKind) -> String {
    let name = kind.to_string();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => name,
    }
}
