//! Launching After Effects, or any executable, inside the prefix

use super::{JobContext, JobKind, Stage, StageOperation, Workflow};
use crate::error::{AegnuxError, Result};
use crate::events::Reporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStep {
    Launch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    App,
    Exe(Vec<String>),
}

/// Runs `wine <program>` from the application directory
///
/// The exit code of the launched program is reported but never fails the job.
pub struct RunJob {
    target: Target,
}

impl RunJob {
    /// The installed After Effects executable
    pub fn app() -> Self {
        Self {
            target: Target::App,
        }
    }

    /// `wine <args...>`
    pub fn exe(args: Vec<String>) -> Self {
        Self {
            target: Target::Exe(args),
        }
    }
}

impl Workflow for RunJob {
    type Step = RunStep;

    fn kind(&self) -> JobKind {
        match self.target {
            Target::App => JobKind::Run,
            Target::Exe(_) => JobKind::RunExe,
        }
    }

    async fn plan(&self, ctx: &JobContext) -> Result<Vec<Stage<RunStep>>> {
        if !ctx.layout().is_installed() {
            return Err(AegnuxError::NotInstalled);
        }
        if let Target::Exe(ref args) = self.target {
            if args.is_empty() {
                return Err(AegnuxError::Config("no executable given".into()));
            }
        }
        let description = match self.target {
            Target::App => "Running After Effects",
            Target::Exe(_) => "Running executable",
        };
        Ok(vec![Stage::new(
            RunStep::Launch,
            description,
            StageOperation::RunCommand,
            100,
        )])
    }

    async fn run_stage(&self, _step: RunStep, ctx: &JobContext) -> Result<()> {
        let spec = match self.target {
            Target::App => ctx.wine().arg(&ctx.config().app_executable),
            Target::Exe(ref args) => ctx.wine().args(args),
        }
        .current_dir(ctx.layout().app_dir());

        ctx.indeterminate();
        let code = ctx.run(spec).await?;
        ctx.log(format!("[INFO] Program exited with code {}", code));
        Ok(())
    }
}
