//! Jobs: named sequences of weighted stages run on a background task
//!
//! A [`Workflow`] plans its stages and executes them one at a time. The
//! pipeline maps each stage's local progress onto the job's overall
//! percentage, turns errors into the terminal [`JobStatus`] and sends every
//! log line, progress value and the final status over the job's event
//! channel.

pub mod codecs;
pub mod install;
pub mod kill;
pub mod plugins;
pub mod remove;
pub mod run;

use crate::archive::{self, ExtractOptions, ExtractStats};
use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::download::{DownloadSummary, Downloader, FetchOptions};
use crate::error::{AegnuxError, Result};
use crate::events::{self, EventReceiver, EventSender, JobEvent, JobStatus, LogLine, Progress, Reporter};
use crate::layout::Layout;
use crate::process::{CommandSpec, ProcessRunner};
use crate::wine::Runtime;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use codecs::{CodecStats, ImportCodecsJob};
pub use install::{InstallJob, InstallStep};
pub use kill::KillJob;
pub use plugins::{PluginInstallJob, PluginStep};
pub use remove::RemoveJob;
pub use run::RunJob;

/// Job variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Install,
    Remove,
    PluginInstall,
    ImportCodecs,
    Run,
    RunExe,
    Kill,
}

impl JobKind {
    /// Whether `self` may not run while `other` is active
    ///
    /// Jobs that touch the installation tree exclude each other. Kill only
    /// has to wait for jobs that create or delete the runtime.
    pub fn conflicts_with(self, other: JobKind) -> bool {
        match (self, other) {
            (JobKind::Kill, JobKind::Kill) => false,
            (JobKind::Kill, other) | (other, JobKind::Kill) => {
                matches!(other, JobKind::Install | JobKind::Remove)
            }
            _ => true,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Install => "install",
            JobKind::Remove => "remove",
            JobKind::PluginInstall => "plugin install",
            JobKind::ImportCodecs => "codec import",
            JobKind::Run => "run",
            JobKind::RunExe => "run executable",
            JobKind::Kill => "kill",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a job: `Idle -> Running -> {Succeeded | Failed | Cancelled}`
///
/// `Cancelling` marks a running job whose cancel flag is raised but whose
/// current stage has not yet stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Cancelling,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }
}

impl From<&JobStatus> for JobState {
    fn from(status: &JobStatus) -> Self {
        match status {
            JobStatus::Succeeded => JobState::Succeeded,
            JobStatus::Failed(_) => JobState::Failed,
            JobStatus::Cancelled => JobState::Cancelled,
        }
    }
}

/// What a stage mainly does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOperation {
    Download,
    ExtractArchive,
    RunCommand,
    FileCopy,
    Custom,
}

/// How a stage failure affects the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePolicy {
    /// Failure aborts the job
    Required,
    /// Failure is logged as a warning and the job continues
    BestEffort,
}

/// One planned step of a workflow
#[derive(Debug, Clone)]
pub struct Stage<S> {
    pub step: S,
    pub description: String,
    pub operation: StageOperation,
    /// Share of overall progress, relative to the other planned stages
    pub weight: u32,
    pub policy: StagePolicy,
}

impl<S> Stage<S> {
    pub fn new(
        step: S,
        description: impl Into<String>,
        operation: StageOperation,
        weight: u32,
    ) -> Self {
        Self {
            step,
            description: description.into(),
            operation,
            weight,
            policy: StagePolicy::Required,
        }
    }

    pub fn best_effort(mut self) -> Self {
        self.policy = StagePolicy::BestEffort;
        self
    }
}

/// A job's stages and their implementation
pub trait Workflow: Send + Sync + 'static {
    type Step: Copy + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> JobKind;

    /// Stages to run, in order. Errors here fail the job before any stage runs.
    fn plan(
        &self,
        ctx: &JobContext,
    ) -> impl Future<Output = Result<Vec<Stage<Self::Step>>>> + Send;

    fn run_stage(
        &self,
        step: Self::Step,
        ctx: &JobContext,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Runs once after the last stage, whatever the outcome
    fn cleanup(&self, _ctx: &JobContext) -> impl Future<Output = ()> + Send {
        async {}
    }
}

#[derive(Debug, Default)]
struct ProgressTracker {
    total_weight: u32,
    completed_weight: u32,
    stage_weight: u32,
    last: Option<u8>,
}

impl ProgressTracker {
    /// Overall percentage for `local` percent of the current stage
    fn overall(&self, local: u8) -> u8 {
        if self.total_weight == 0 {
            return 0;
        }
        let done = u64::from(self.completed_weight) * 100
            + u64::from(self.stage_weight) * u64::from(local.min(100));
        (done / u64::from(self.total_weight)).min(100) as u8
    }

    /// Record `value` if it moves progress forward
    fn advance(&mut self, value: u8) -> Option<u8> {
        match self.last {
            Some(last) if value <= last => None,
            _ => {
                self.last = Some(value);
                Some(value)
            }
        }
    }
}

struct ContextInner {
    kind: JobKind,
    config: Config,
    layout: Layout,
    runtime: Runtime,
    runner: ProcessRunner,
    downloader: Downloader,
    cancel: CancelFlag,
    events: EventSender,
    state: Arc<Mutex<JobState>>,
    progress: Mutex<ProgressTracker>,
}

/// Everything a running stage may use; cheap to clone
#[derive(Clone)]
pub struct JobContext {
    inner: Arc<ContextInner>,
}

impl JobContext {
    fn new(
        kind: JobKind,
        config: Config,
        cancel: CancelFlag,
        events: EventSender,
        state: Arc<Mutex<JobState>>,
    ) -> Result<Self> {
        let layout = Layout::new(&config.data_root);
        let runtime = Runtime::new(&layout);
        let runner = ProcessRunner::new(config.poll_interval(), config.kill_grace())
            .with_runtime(runtime.clone());
        let downloader = Downloader::new(config.progress_interval(), config.poll_interval())?;

        Ok(Self {
            inner: Arc::new(ContextInner {
                kind,
                config,
                layout,
                runtime,
                runner,
                downloader,
                cancel,
                events,
                state,
                progress: Mutex::new(ProgressTracker::default()),
            }),
        })
    }

    pub fn kind(&self) -> JobKind {
        self.inner.kind
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.inner.cancel
    }

    /// `Err(Cancelled)` once the job was asked to stop
    pub fn check_cancelled(&self) -> Result<()> {
        self.inner.cancel.check()
    }

    /// Log a warning line
    pub fn warn(&self, message: impl fmt::Display) {
        self.log(format!("[WARNING] {}", message));
    }

    /// Report `done` of `total` units of the current stage
    pub fn stage_progress(&self, done: u64, total: u64) {
        self.progress(Progress::ratio(done, total));
    }

    /// Tell the surface that the remaining work has no known size
    pub fn indeterminate(&self) {
        self.send(JobEvent::Progress {
            progress: Progress::Indeterminate,
        });
    }

    /// Shared handle usable where a `'static` reporter is required
    pub fn reporter(&self) -> Arc<dyn Reporter> {
        Arc::new(self.clone())
    }

    pub async fn run(&self, spec: CommandSpec) -> Result<i32> {
        self.inner.runner.run(&spec, &self.inner.cancel, self).await
    }

    pub async fn run_checked(&self, spec: CommandSpec) -> Result<()> {
        self.inner
            .runner
            .run_checked(&spec, &self.inner.cancel, self)
            .await
    }

    /// Run `wine <args>` inside the prefix
    pub fn wine(&self) -> CommandSpec {
        CommandSpec::new(self.inner.runtime.wine_bin()).in_prefix()
    }

    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        options: &FetchOptions,
    ) -> Result<DownloadSummary> {
        self.inner
            .downloader
            .fetch(url, dest, options, &self.inner.cancel, self)
            .await
    }

    pub async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        mut options: ExtractOptions,
    ) -> Result<ExtractStats> {
        options.progress_interval = self.inner.config.progress_interval();
        let stats = archive::extract(
            archive.to_path_buf(),
            dest.to_path_buf(),
            options,
            self.inner.cancel.clone(),
            self.reporter(),
        )
        .await?;
        if stats.errors > 0 {
            self.warn(format!(
                "{} entries of {} could not be extracted",
                stats.errors,
                archive.display()
            ));
        }
        Ok(stats)
    }

    /// Fail unless `archive` is a readable archive
    pub async fn validate_archive(&self, archive: &Path) -> Result<()> {
        let path = archive.to_path_buf();
        let valid = tokio::task::spawn_blocking(move || archive::validate(&path)).await?;
        if valid {
            Ok(())
        } else {
            Err(AegnuxError::Archive(format!(
                "{} is not a valid archive",
                archive.display()
            )))
        }
    }

    /// Run blocking filesystem work off the async threads
    pub async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancelFlag) -> Result<T> + Send + 'static,
    {
        let cancel = self.inner.cancel.clone();
        tokio::task::spawn_blocking(move || work(&cancel)).await?
    }

    fn send(&self, event: JobEvent) {
        // a dropped receiver only means nobody is watching
        let _ = self.inner.events.send(event);
    }

    fn set_state(&self, state: JobState) {
        if let Ok(mut current) = self.inner.state.lock() {
            *current = state;
        }
    }

    fn mark_running(&self) {
        if let Ok(mut current) = self.inner.state.lock() {
            if *current == JobState::Idle {
                *current = JobState::Running;
            }
        }
    }

    fn begin(&self, total_weight: u32) {
        if let Ok(mut tracker) = self.inner.progress.lock() {
            *tracker = ProgressTracker {
                total_weight,
                ..ProgressTracker::default()
            };
        }
        self.emit_overall(0);
    }

    fn enter_stage(&self, weight: u32) {
        if let Ok(mut tracker) = self.inner.progress.lock() {
            tracker.stage_weight = weight;
        }
    }

    fn complete_stage(&self) {
        let value = match self.inner.progress.lock() {
            Ok(mut tracker) => {
                tracker.completed_weight += tracker.stage_weight;
                tracker.stage_weight = 0;
                tracker.overall(0)
            }
            Err(_) => return,
        };
        self.emit_overall(value);
    }

    fn emit_overall(&self, value: u8) {
        let advanced = match self.inner.progress.lock() {
            Ok(mut tracker) => tracker.advance(value),
            Err(_) => None,
        };
        if let Some(value) = advanced {
            self.send(JobEvent::Progress {
                progress: Progress::Percent(value),
            });
        }
    }
}

impl Reporter for JobContext {
    fn log(&self, message: String) {
        info!(job = %self.inner.kind, "{}", message);
        self.send(JobEvent::Log(LogLine::now(message)));
    }

    fn progress(&self, progress: Progress) {
        // unknown totals keep the last overall value
        let Progress::Percent(local) = progress else {
            return;
        };
        let value = match self.inner.progress.lock() {
            Ok(tracker) => tracker.overall(local),
            Err(_) => return,
        };
        self.emit_overall(value);
    }
}

async fn execute<W: Workflow>(workflow: &W, ctx: &JobContext) -> Result<()> {
    let stages = workflow.plan(ctx).await?;
    ctx.begin(stages.iter().map(|s| s.weight).sum());

    for stage in &stages {
        ctx.check_cancelled()?;
        ctx.log(format!("[STAGE] {}", stage.description));
        ctx.enter_stage(stage.weight);

        match workflow.run_stage(stage.step, ctx).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) if stage.policy == StagePolicy::BestEffort => {
                warn!("Best-effort stage {:?} failed: {}", stage.step, e);
                ctx.warn(format!("{} failed: {}", stage.description, e));
            }
            Err(e) => {
                ctx.log(format!("[ERROR] {} failed: {}", stage.description, e));
                return Err(e);
            }
        }
        ctx.complete_stage();
    }
    Ok(())
}

async fn drive<W: Workflow>(workflow: W, ctx: JobContext) -> JobStatus {
    ctx.mark_running();
    info!("Starting {} job", ctx.kind());

    let result = execute(&workflow, &ctx).await;
    workflow.cleanup(&ctx).await;

    let status = match result {
        Ok(()) => JobStatus::Succeeded,
        Err(e) if e.is_cancelled() => {
            ctx.log("[CANCELLED] Job cancelled by user".into());
            JobStatus::Cancelled
        }
        Err(e) => {
            ctx.log(format!("[FAILED] {} failed: {}", ctx.kind(), e));
            JobStatus::Failed(e.to_string())
        }
    };
    info!("{} job {}", ctx.kind(), status);

    ctx.set_state(JobState::from(&status));
    ctx.send(JobEvent::Finished {
        status: status.clone(),
    });
    status
}

/// Start `workflow` on a background task
pub fn spawn<W: Workflow>(workflow: W, config: Config) -> Result<JobHandle> {
    spawn_guarded(workflow, config, ())
}

/// Like [`spawn`]; `guard` is dropped when the job task ends
pub(crate) fn spawn_guarded<W, G>(workflow: W, config: Config, guard: G) -> Result<JobHandle>
where
    W: Workflow,
    G: Send + 'static,
{
    let kind = workflow.kind();
    let cancel = CancelFlag::new();
    let state = Arc::new(Mutex::new(JobState::Idle));
    let (tx, rx) = events::channel();
    let ctx = JobContext::new(kind, config, cancel.clone(), tx, state.clone())?;

    let task = tokio::spawn(async move {
        let _guard = guard;
        drive(workflow, ctx).await
    });

    Ok(JobHandle {
        kind,
        cancel,
        state,
        events: Some(rx),
        task,
    })
}

/// Controller-side view of a running job
#[derive(Debug)]
pub struct JobHandle {
    kind: JobKind,
    cancel: CancelFlag,
    state: Arc<Mutex<JobState>>,
    events: Option<EventReceiver>,
    task: JoinHandle<JobStatus>,
}

impl JobHandle {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn state(&self) -> JobState {
        self.state.lock().map(|s| *s).unwrap_or(JobState::Failed)
    }

    /// Ask the job to stop; it ends as Cancelled unless it was already done
    pub fn cancel(&self) {
        self.cancel.cancel();
        if let Ok(mut state) = self.state.lock() {
            if matches!(*state, JobState::Idle | JobState::Running) {
                *state = JobState::Cancelling;
            }
        }
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Take the event receiver; only the first call gets it
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.events.take()
    }

    /// Wait for the terminal status; a panicking job counts as failed
    pub async fn wait(self) -> JobStatus {
        match self.task.await {
            Ok(status) => status,
            Err(e) => {
                let status = JobStatus::Failed(format!("job task ended abnormally: {}", e));
                if let Ok(mut state) = self.state.lock() {
                    *state = JobState::Failed;
                }
                status
            }
        }
    }
}

/// Where an archive a job installs from comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// Download into the cache; the file is removed when the job ends
    Online,
    /// A file supplied by the user; never deleted
    Offline(PathBuf),
}

/// A request to start a job
#[derive(Debug, Clone)]
pub enum JobRequest {
    Install { source: InstallSource },
    PluginInstall { source: InstallSource },
    ImportCodecs { source: PathBuf, overwrite: bool },
    Run,
    RunExe { args: Vec<String> },
    Kill,
    Remove,
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Install { .. } => JobKind::Install,
            JobRequest::PluginInstall { .. } => JobKind::PluginInstall,
            JobRequest::ImportCodecs { .. } => JobKind::ImportCodecs,
            JobRequest::Run => JobKind::Run,
            JobRequest::RunExe { .. } => JobKind::RunExe,
            JobRequest::Kill => JobKind::Kill,
            JobRequest::Remove => JobKind::Remove,
        }
    }

    pub(crate) fn spawn_guarded<G: Send + 'static>(
        self,
        config: Config,
        guard: G,
    ) -> Result<JobHandle> {
        match self {
            JobRequest::Install { source } => spawn_guarded(InstallJob::new(source), config, guard),
            JobRequest::PluginInstall { source } => {
                spawn_guarded(PluginInstallJob::new(source), config, guard)
            }
            JobRequest::ImportCodecs { source, overwrite } => {
                spawn_guarded(ImportCodecsJob::new(source, overwrite), config, guard)
            }
            JobRequest::Run => spawn_guarded(RunJob::app(), config, guard),
            JobRequest::RunExe { args } => spawn_guarded(RunJob::exe(args), config, guard),
            JobRequest::Kill => spawn_guarded(KillJob, config, guard),
            JobRequest::Remove => spawn_guarded(RemoveJob, config, guard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        One,
        Two,
        Three,
        Four,
    }

    #[derive(Clone, Copy)]
    enum Outcome {
        Succeed,
        Fail,
        WaitForCancel,
    }

    struct Scripted {
        outcomes: [Outcome; 4],
        best_effort_two: bool,
        ran: Arc<Mutex<Vec<Step>>>,
        cleanups: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(outcomes: [Outcome; 4]) -> Self {
            Self {
                outcomes,
                best_effort_two: false,
                ran: Arc::default(),
                cleanups: Arc::default(),
            }
        }
    }

    impl Workflow for Scripted {
        type Step = Step;

        fn kind(&self) -> JobKind {
            JobKind::Install
        }

        async fn plan(&self, _ctx: &JobContext) -> Result<Vec<Stage<Step>>> {
            let two = Stage::new(Step::Two, "two", StageOperation::Custom, 30);
            Ok(vec![
                Stage::new(Step::One, "one", StageOperation::Custom, 10),
                if self.best_effort_two { two.best_effort() } else { two },
                Stage::new(Step::Three, "three", StageOperation::Custom, 40),
                Stage::new(Step::Four, "four", StageOperation::Custom, 20),
            ])
        }

        async fn run_stage(&self, step: Step, ctx: &JobContext) -> Result<()> {
            self.ran.lock().unwrap().push(step);
            let outcome = self.outcomes[step as usize];
            for done in [25, 50, 75, 100] {
                ctx.stage_progress(done, 100);
            }
            match outcome {
                Outcome::Succeed => Ok(()),
                Outcome::Fail => Err(AegnuxError::Archive("broken".into())),
                Outcome::WaitForCancel => loop {
                    ctx.check_cancelled()?;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                },
            }
        }

        async fn cleanup(&self, _ctx: &JobContext) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        (dir, config)
    }

    async fn collect(mut rx: EventReceiver) -> (Vec<u8>, Vec<String>, Vec<JobStatus>) {
        let (mut progress, mut lines, mut finished) = (Vec::new(), Vec::new(), Vec::new());
        while let Some(event) = rx.recv().await {
            match event {
                JobEvent::Progress {
                    progress: Progress::Percent(p),
                } => progress.push(p),
                JobEvent::Progress { .. } => {}
                JobEvent::Log(line) => lines.push(line.message),
                JobEvent::Finished { status } => finished.push(status),
            }
        }
        (progress, lines, finished)
    }

    #[tokio::test]
    async fn failing_required_stage_aborts_the_rest() {
        let (_dir, config) = config();
        let workflow = Scripted::new([
            Outcome::Succeed,
            Outcome::Fail,
            Outcome::Succeed,
            Outcome::Succeed,
        ]);
        let ran = workflow.ran.clone();
        let cleanups = workflow.cleanups.clone();

        let mut handle = spawn(workflow, config).unwrap();
        let events = handle.take_events().unwrap();
        let status = handle.wait().await;
        let (_, lines, finished) = collect(events).await;

        assert_eq!(status, JobStatus::Failed("Archive error: broken".into()));
        assert_eq!(*ran.lock().unwrap(), vec![Step::One, Step::Two]);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(finished, vec![status]);
        assert!(lines.iter().any(|l| l.contains("[ERROR] two failed")));
    }

    #[tokio::test]
    async fn best_effort_failure_continues() {
        let (_dir, config) = config();
        let mut workflow = Scripted::new([
            Outcome::Succeed,
            Outcome::Fail,
            Outcome::Succeed,
            Outcome::Succeed,
        ]);
        workflow.best_effort_two = true;
        let ran = workflow.ran.clone();

        let mut handle = spawn(workflow, config).unwrap();
        let events = handle.take_events().unwrap();
        assert_eq!(handle.wait().await, JobStatus::Succeeded);
        let (progress, lines, _) = collect(events).await;

        assert_eq!(ran.lock().unwrap().len(), 4);
        assert_eq!(progress.last(), Some(&100));
        assert!(lines.iter().any(|l| l.starts_with("[WARNING] two failed")));
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_bounded() {
        let (_dir, config) = config();
        let workflow = Scripted::new([Outcome::Succeed; 4]);

        let mut handle = spawn(workflow, config).unwrap();
        let events = handle.take_events().unwrap();
        handle.wait().await;
        let (progress, _, _) = collect(events).await;

        assert_eq!(progress.first(), Some(&0));
        assert_eq!(progress.last(), Some(&100));
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        // stage one (weight 10) at 50% of its work
        assert!(progress.contains(&5));
    }

    #[tokio::test]
    async fn cancellation_ends_as_cancelled() {
        let (_dir, config) = config();
        let workflow = Scripted::new([
            Outcome::Succeed,
            Outcome::WaitForCancel,
            Outcome::Succeed,
            Outcome::Succeed,
        ]);
        let ran = workflow.ran.clone();

        let mut handle = spawn(workflow, config).unwrap();
        let events = handle.take_events().unwrap();
        while ran.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.cancel();
        assert_eq!(handle.state(), JobState::Cancelling);

        let status = handle.wait().await;
        let (_, _, finished) = collect(events).await;

        assert_eq!(status, JobStatus::Cancelled);
        assert_eq!(finished, vec![JobStatus::Cancelled]);
        assert_eq!(ran.lock().unwrap().len(), 2);
    }

    #[test]
    fn conflicts_follow_shared_state() {
        use JobKind::*;
        assert!(Install.conflicts_with(Run));
        assert!(PluginInstall.conflicts_with(ImportCodecs));
        assert!(Kill.conflicts_with(Install));
        assert!(Remove.conflicts_with(Kill));
        assert!(!Kill.conflicts_with(Run));
        assert!(!RunExe.conflicts_with(Kill));
        assert!(!Kill.conflicts_with(Kill));
    }

    #[test]
    fn weights_are_renormalised() {
        let tracker = ProgressTracker {
            total_weight: 95,
            completed_weight: 95,
            stage_weight: 0,
            last: None,
        };
        assert_eq!(tracker.overall(0), 100);

        let tracker = ProgressTracker {
            total_weight: 200,
            completed_weight: 50,
            stage_weight: 50,
            last: None,
        };
        assert_eq!(tracker.overall(50), 37);
    }
}
