//! Importing Windows codec libraries into the prefix

use super::{JobContext, JobKind, Stage, StageOperation, Workflow};
use crate::cancel::CancelFlag;
use crate::error::{AegnuxError, Result};
use crate::events::{Progress, Reporter};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Outcome counts of a codec import; one file copied into two targets counts twice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CodecStats {
    pub found: usize,
    pub copied: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecStep {
    Import,
}

/// Copies codec files found under a directory into `system32` and `syswow64`
pub struct ImportCodecsJob {
    source: PathBuf,
    overwrite: bool,
}

impl ImportCodecsJob {
    pub fn new(source: PathBuf, overwrite: bool) -> Self {
        Self { source, overwrite }
    }
}

fn has_codec_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };
    let ext = ext.to_string_lossy();
    extensions
        .iter()
        .any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(&ext))
}

/// Recursively copy files with one of `extensions` from `source` into every
/// directory of `targets`, keeping their path relative to `source`
pub fn import_codecs(
    source: &Path,
    targets: &[PathBuf],
    extensions: &[String],
    overwrite: bool,
    cancel: &CancelFlag,
    reporter: &dyn Reporter,
) -> Result<CodecStats> {
    if !source.is_dir() {
        return Err(AegnuxError::Config(format!(
            "source directory does not exist: {}",
            source.display()
        )));
    }

    let mut candidates = Vec::new();
    for entry in WalkDir::new(source).follow_links(true) {
        cancel.check()?;
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                if has_codec_extension(entry.path(), extensions) {
                    candidates.push(entry.into_path());
                }
            }
            Ok(_) => {}
            Err(e) => reporter.log(format!("[WARNING] Cannot read {}", e)),
        }
    }

    let mut stats = CodecStats {
        found: candidates.len(),
        ..CodecStats::default()
    };
    reporter.log(format!("[CODECS] Found {} codec files", stats.found));
    reporter.progress(Progress::ratio(0, stats.found as u64));

    for (index, file) in candidates.iter().enumerate() {
        cancel.check()?;
        let relative = pathdiff::diff_paths(file, source).unwrap_or_else(|| file.clone());

        for target_root in targets {
            let target = target_root.join(&relative);
            let result = target
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|()| {
                    if target.exists() && !overwrite {
                        Ok(false)
                    } else {
                        fs::copy(file, &target).map(|_| true)
                    }
                });
            match result {
                Ok(true) => {
                    stats.copied += 1;
                    reporter.log(format!(
                        "[CODECS] Copied: {} -> {}",
                        file.display(),
                        target.display()
                    ));
                }
                Ok(false) => {
                    stats.skipped += 1;
                    reporter.log(format!("[CODECS] Skipped existing: {}", target.display()));
                }
                Err(e) => {
                    stats.errors += 1;
                    reporter.log(format!("[ERROR] Error copying {}: {}", file.display(), e));
                }
            }
        }
        reporter.progress(Progress::ratio(index as u64 + 1, stats.found as u64));
    }

    reporter.log(format!(
        "[CODECS] Found {}, copied {}, skipped {}, errors {}",
        stats.found, stats.copied, stats.skipped, stats.errors
    ));
    Ok(stats)
}

impl Workflow for ImportCodecsJob {
    type Step = CodecStep;

    fn kind(&self) -> JobKind {
        JobKind::ImportCodecs
    }

    async fn plan(&self, _ctx: &JobContext) -> Result<Vec<Stage<CodecStep>>> {
        Ok(vec![Stage::new(
            CodecStep::Import,
            format!("Importing codecs from {}", self.source.display()),
            StageOperation::FileCopy,
            100,
        )])
    }

    async fn run_stage(&self, _step: CodecStep, ctx: &JobContext) -> Result<()> {
        let source = self.source.clone();
        let targets = vec![ctx.layout().system32_dir(), ctx.layout().syswow64_dir()];
        let extensions = ctx.config().codec_extensions.clone();
        let overwrite = self.overwrite;
        let reporter = ctx.reporter();

        let stats = ctx
            .blocking(move |cancel| {
                import_codecs(
                    &source,
                    &targets,
                    &extensions,
                    overwrite,
                    cancel,
                    reporter.as_ref(),
                )
            })
            .await?;

        if stats.errors > 0 {
            ctx.warn(format!("{} codec files could not be copied", stats.errors));
        }
        Ok(())
    }
}
