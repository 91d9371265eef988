//! Stopping every process of the managed runtime

use super::{JobContext, JobKind, Stage, StageOperation, Workflow};
use crate::error::{AegnuxError, Result};
use crate::events::Reporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillStep {
    StopServer,
}

/// `wineserver -k` inside the prefix
pub struct KillJob;

/// Ask the prefix's wineserver to kill all its processes; returns the exit code
pub(crate) async fn stop_runtime(ctx: &JobContext) -> Result<i32> {
    let spec = crate::process::CommandSpec::new(ctx.runtime().wineserver_bin())
        .arg("-k")
        .in_prefix();
    ctx.run(spec).await
}

impl Workflow for KillJob {
    type Step = KillStep;

    fn kind(&self) -> JobKind {
        JobKind::Kill
    }

    async fn plan(&self, ctx: &JobContext) -> Result<Vec<Stage<KillStep>>> {
        if !ctx.runtime().is_present() {
            return Err(AegnuxError::Runtime("the Wine runner is not installed".into()));
        }
        Ok(vec![Stage::new(
            KillStep::StopServer,
            "Stopping After Effects",
            StageOperation::RunCommand,
            100,
        )])
    }

    async fn run_stage(&self, _step: KillStep, ctx: &JobContext) -> Result<()> {
        match stop_runtime(ctx).await? {
            0 => ctx.log("[INFO] All Wine processes stopped".into()),
            // wineserver exits non-zero when no server was running
            code => ctx.log(format!("[INFO] wineserver -k exited with code {}", code)),
        }
        Ok(())
    }
}
