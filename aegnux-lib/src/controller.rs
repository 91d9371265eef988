//! Starting jobs, keeping conflicting jobs apart, relaying events to a surface

use crate::config::Config;
use crate::error::{AegnuxError, Result};
use crate::events::{JobEvent, JobStatus, LogLine, Progress};
use crate::job::{JobHandle, JobKind, JobRequest};
use crate::layout::Layout;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Where a relayed job is displayed
pub trait Surface {
    fn log(&mut self, line: &LogLine);

    fn progress(&mut self, progress: Progress);

    /// Called once per job. `last_line` is only given for failures.
    fn finished(&mut self, kind: JobKind, status: &JobStatus, last_line: Option<&str>);
}

/// Everything a relayed job produced
#[derive(Debug, Clone)]
pub struct JobReport {
    pub kind: JobKind,
    pub status: JobStatus,
    pub log: Vec<LogLine>,
}

type ActiveJobs = Arc<Mutex<Vec<(u64, JobKind)>>>;

/// Unregisters a job when its task ends
struct ActiveGuard {
    id: u64,
    active: ActiveJobs,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct JobController {
    config: Config,
    active: ActiveJobs,
    next_id: AtomicU64,
}

impl JobController {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            active: Arc::default(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether a completed installation exists
    pub fn is_installed(&self) -> bool {
        Layout::new(&self.config.data_root).is_installed()
    }

    /// Kinds of the jobs still running
    pub fn active(&self) -> Vec<JobKind> {
        self.active
            .lock()
            .map(|a| a.iter().map(|(_, kind)| *kind).collect())
            .unwrap_or_default()
    }

    /// Start `request` unless it conflicts with a running job
    pub fn start(&self, request: JobRequest) -> Result<JobHandle> {
        let kind = request.kind();
        let id = {
            let mut active = self
                .active
                .lock()
                .map_err(|_| AegnuxError::Task("job registry poisoned".into()))?;
            if let Some(&(_, running)) = active.iter().find(|(_, r)| kind.conflicts_with(*r)) {
                return Err(AegnuxError::JobBusy {
                    requested: kind,
                    running,
                });
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            active.push((id, kind));
            id
        };
        debug!("Starting {} job #{}", kind, id);

        let guard = ActiveGuard {
            id,
            active: self.active.clone(),
        };
        request.spawn_guarded(self.config.clone(), guard)
    }

    /// Forward the events of `handle` to `surface` until the job ends
    ///
    /// A cancelled job is reported without an error line.
    pub async fn relay(&self, mut handle: JobHandle, surface: &mut dyn Surface) -> JobReport {
        let kind = handle.kind();
        let mut log = Vec::new();
        let mut reported = None;

        if let Some(mut events) = handle.take_events() {
            while let Some(event) = events.recv().await {
                match event {
                    JobEvent::Log(line) => {
                        surface.log(&line);
                        log.push(line);
                    }
                    JobEvent::Progress { progress } => surface.progress(progress),
                    JobEvent::Finished { status } => reported = Some(status),
                }
            }
        }

        let joined = handle.wait().await;
        let status = reported.unwrap_or(joined);

        let last_line = match status {
            JobStatus::Failed(_) => log.last().map(|line: &LogLine| line.message.as_str()),
            _ => None,
        };
        surface.finished(kind, &status, last_line);

        JobReport { kind, status, log }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::InstallSource;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        lines: Vec<String>,
        finished: Vec<(JobKind, JobStatus, Option<String>)>,
    }

    impl Surface for Recorder {
        fn log(&mut self, line: &LogLine) {
            self.lines.push(line.message.clone());
        }

        fn progress(&mut self, _progress: Progress) {}

        fn finished(&mut self, kind: JobKind, status: &JobStatus, last_line: Option<&str>) {
            self.finished
                .push((kind, status.clone(), last_line.map(str::to_string)));
        }
    }

    fn controller() -> (tempfile::TempDir, JobController) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        (dir, JobController::new(config))
    }

    #[tokio::test]
    async fn run_without_installation_fails_with_last_line() {
        let (_dir, controller) = controller();
        assert!(!controller.is_installed());

        let handle = controller.start(JobRequest::Run).unwrap();
        let mut surface = Recorder::default();
        let report = controller.relay(handle, &mut surface).await;

        assert_eq!(
            report.status,
            JobStatus::Failed("After Effects is not installed".into())
        );
        let (kind, _, last_line) = &surface.finished[0];
        assert_eq!(*kind, JobKind::Run);
        assert_eq!(
            last_line.as_deref(),
            Some("[FAILED] run failed: After Effects is not installed")
        );
    }

    #[tokio::test]
    async fn conflicting_jobs_are_refused_until_the_first_ends() {
        let (dir, controller) = controller();
        let codecs = dir.path().join("codecs");
        std::fs::create_dir_all(&codecs).unwrap();

        // a missing offline archive fails quickly, after registering
        let install = controller
            .start(JobRequest::Install {
                source: InstallSource::Offline(dir.path().join("missing.zip")),
            })
            .unwrap();

        let err = controller.start(JobRequest::Run).unwrap_err();
        assert!(matches!(
            err,
            AegnuxError::JobBusy {
                requested: JobKind::Run,
                running: JobKind::Install
            }
        ));
        assert!(matches!(
            controller.start(JobRequest::Kill),
            Err(AegnuxError::JobBusy { .. })
        ));

        install.wait().await;
        // the guard is released when the task ends
        for _ in 0..50 {
            if controller.active().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(controller.active().is_empty());

        let import = controller
            .start(JobRequest::ImportCodecs {
                source: codecs,
                overwrite: false,
            })
            .unwrap();
        assert!(matches!(
            controller.start(JobRequest::PluginInstall {
                source: InstallSource::Online
            }),
            Err(AegnuxError::JobBusy { .. })
        ));
        assert_eq!(import.wait().await, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn cancelled_jobs_report_no_error_line() {
        let (dir, controller) = controller();
        let codecs = dir.path().join("codecs");
        std::fs::create_dir_all(&codecs).unwrap();
        std::fs::write(codecs.join("a.dll"), b"a").unwrap();

        let handle = controller
            .start(JobRequest::ImportCodecs {
                source: codecs,
                overwrite: true,
            })
            .unwrap();
        handle.cancel();

        let mut surface = Recorder::default();
        let report = controller.relay(handle, &mut surface).await;

        assert_eq!(report.status, JobStatus::Cancelled);
        assert_eq!(surface.finished[0].2, None);
    }
}
