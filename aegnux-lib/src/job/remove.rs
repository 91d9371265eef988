//! Deleting the installation

use super::kill::stop_runtime;
use super::{JobContext, JobKind, Stage, StageOperation, Workflow};
use crate::error::{AegnuxError, Result};
use crate::events::Reporter;
use crate::files;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveStep {
    StopRuntime,
    DeleteTree,
}

/// Stops the runtime if present, then deletes the whole data root
pub struct RemoveJob;

impl Workflow for RemoveJob {
    type Step = RemoveStep;

    fn kind(&self) -> JobKind {
        JobKind::Remove
    }

    async fn plan(&self, ctx: &JobContext) -> Result<Vec<Stage<RemoveStep>>> {
        let mut stages = Vec::with_capacity(2);
        if ctx.runtime().is_present() {
            stages.push(
                Stage::new(
                    RemoveStep::StopRuntime,
                    "Stopping Wine processes",
                    StageOperation::RunCommand,
                    10,
                )
                .best_effort(),
            );
        }
        stages.push(Stage::new(
            RemoveStep::DeleteTree,
            "Removing After Effects",
            StageOperation::Custom,
            90,
        ));
        Ok(stages)
    }

    async fn run_stage(&self, step: RemoveStep, ctx: &JobContext) -> Result<()> {
        match step {
            RemoveStep::StopRuntime => match stop_runtime(ctx).await? {
                0 => Ok(()),
                code => Err(AegnuxError::CommandFailed {
                    command: "wineserver -k".into(),
                    code,
                }),
            },
            RemoveStep::DeleteTree => {
                ctx.layout().clear_installed()?;
                let root = ctx.layout().root().to_path_buf();
                let removed = ctx.blocking(move |_| files::remove_tree(&root)).await?;
                if removed {
                    ctx.log("[INFO] After Effects removed".into());
                } else {
                    ctx.log("[INFO] Nothing to remove".into());
                }
                Ok(())
            }
        }
    }
}
