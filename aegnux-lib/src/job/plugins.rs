//! Plugin bundle installation into an existing installation
//!
//! The bundle is unpacked into `<root>/private-plugins` and distributed from
//! there: `aex/` into the plug-in folder, `CEP/` into the prefix,
//! `preset-backup/` into the user presets and `installer/*.exe` through Wine.

use super::{InstallSource, JobContext, JobKind, Stage, StageOperation, Workflow};
use crate::archive::ExtractOptions;
use crate::download::FetchOptions;
use crate::error::{AegnuxError, Result};
use crate::events::Reporter;
use crate::files;
use crate::installer;
use std::path::{Path, PathBuf};

/// Files of the Element 3D plugin that ship next to its installer
const ELEMENT_FILES: [&str; 2] = ["Element.aex", "Element.license"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStep {
    ClearScratch,
    Acquire,
    Extract,
    AexPlugins,
    CepExtensions,
    Presets,
    Installers,
    Element,
}

pub struct PluginInstallJob {
    source: InstallSource,
}

impl PluginInstallJob {
    pub fn new(source: InstallSource) -> Self {
        Self { source }
    }

    fn archive_path(&self, ctx: &JobContext) -> PathBuf {
        match self.source {
            InstallSource::Online => ctx.config().plugins_download_path(),
            InstallSource::Offline(ref path) => path.clone(),
        }
    }

    fn scratch(ctx: &JobContext, sub: &str) -> PathBuf {
        ctx.layout().private_plugins_dir().join(sub)
    }

    async fn clear_scratch(ctx: &JobContext) -> Result<()> {
        let scratch = ctx.layout().private_plugins_dir();
        if ctx.blocking(move |_| files::remove_tree(&scratch)).await? {
            ctx.log("[DEBUG] Temporary folder removed successfully.".into());
        }
        Ok(())
    }

    async fn acquire(&self, ctx: &JobContext) -> Result<()> {
        let archive = self.archive_path(ctx);
        match self.source {
            InstallSource::Online => {
                ctx.fetch(
                    &ctx.config().plugins_download_url,
                    &archive,
                    &FetchOptions::default(),
                )
                .await?;
            }
            InstallSource::Offline(_) if !archive.is_file() => {
                return Err(AegnuxError::Archive(format!(
                    "plugin archive not found: {}",
                    archive.display()
                )));
            }
            InstallSource::Offline(_) => {}
        }
        ctx.validate_archive(&archive).await
    }

    /// Copy the children of a scratch sub-directory into `dest`
    async fn distribute(ctx: &JobContext, sub: &str, dest: PathBuf) -> Result<()> {
        let src = Self::scratch(ctx, sub);
        let target = dest.clone();
        match ctx
            .blocking(move |cancel| files::copy_children(&src, &target, cancel))
            .await?
        {
            Some(count) => ctx.log(format!(
                "[INFO] Copied {} files from {} to {}",
                count,
                sub,
                dest.display()
            )),
            None => ctx.warn(format!("Bundle has no {} folder, skipping", sub)),
        }
        Ok(())
    }

    async fn cep_extensions(ctx: &JobContext) -> Result<()> {
        let cep = Self::scratch(ctx, "CEP");
        if !cep.is_dir() {
            ctx.warn("Bundle has no CEP folder, skipping");
            return Ok(());
        }

        let keys = cep.join("AddKeys.reg");
        if keys.is_file() {
            let code = ctx.run(ctx.wine().arg("regedit").arg(&keys)).await?;
            if code != 0 {
                ctx.warn(format!("Importing {} exited with code {}", keys.display(), code));
            }
        }

        let dest = ctx.layout().cep_extensions_dir();
        let copied = ctx
            .blocking(move |cancel| {
                let mut extensions = Vec::new();
                for entry in std::fs::read_dir(&cep)? {
                    let entry = entry?;
                    if entry.file_type()?.is_dir() {
                        cancel.check()?;
                        files::copy_tree(&entry.path(), &dest.join(entry.file_name()), cancel)?;
                        extensions.push(entry.file_name().to_string_lossy().into_owned());
                    }
                }
                Ok(extensions)
            })
            .await?;

        for name in copied {
            ctx.log(format!("[INFO] CEP extension {} installed", name));
        }
        Ok(())
    }

    async fn installers(ctx: &JobContext) -> Result<()> {
        let dir = Self::scratch(ctx, "installer");
        let set = installer::discover(&dir, &ctx.config().manual_installers)?;
        if set.silent.is_empty() && set.manual.is_empty() {
            ctx.warn("Bundle has no installers, skipping");
            return Ok(());
        }

        let total = (set.silent.len() + set.manual.len()) as u64;
        for (index, exe) in set.silent.iter().enumerate() {
            let kind = installer::detect(exe);
            ctx.log(format!("[INFO] Installing: {} ({:?})", file_name(exe), kind));
            let spec = ctx
                .wine()
                .arg(exe)
                .args(kind.silent_switches())
                .current_dir(&dir);
            let code = ctx.run(spec).await?;
            if code != 0 {
                ctx.warn(format!("{} exited with code {}", file_name(exe), code));
            }
            ctx.stage_progress(index as u64 + 1, total);
        }

        for (index, exe) in set.manual.iter().enumerate() {
            ctx.log(format!("[INFO] Please manually install: {}", file_name(exe)));
            let code = ctx.run(ctx.wine().arg(exe).current_dir(&dir)).await?;
            if code != 0 {
                ctx.warn(format!("{} exited with code {}", file_name(exe), code));
            }
            ctx.stage_progress((set.silent.len() + index) as u64 + 1, total);
        }
        Ok(())
    }

    async fn element(ctx: &JobContext) -> Result<()> {
        let src = Self::scratch(ctx, "installer");
        let dest = ctx.layout().plugins_dir().join("VideoCopilot");
        for name in ELEMENT_FILES {
            let file = src.join(name);
            if !file.is_file() {
                continue;
            }
            tokio::fs::create_dir_all(&dest).await?;
            tokio::fs::copy(&file, dest.join(name)).await?;
            ctx.log(format!("[INFO] {} copied successfully", name));
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Workflow for PluginInstallJob {
    type Step = PluginStep;

    fn kind(&self) -> JobKind {
        JobKind::PluginInstall
    }

    async fn plan(&self, ctx: &JobContext) -> Result<Vec<Stage<PluginStep>>> {
        use PluginStep::*;
        use StageOperation as Op;

        if !ctx.layout().is_installed() {
            return Err(AegnuxError::NotInstalled);
        }

        let acquire = match self.source {
            InstallSource::Online => Stage::new(Acquire, "Downloading plugin bundle", Op::Download, 15),
            InstallSource::Offline(_) => Stage::new(Acquire, "Checking plugin archive", Op::Custom, 15),
        };
        Ok(vec![
            Stage::new(ClearScratch, "Clearing temporary folder", Op::Custom, 5).best_effort(),
            acquire,
            Stage::new(Extract, "Unpacking plugins from the archive", Op::ExtractArchive, 15),
            Stage::new(AexPlugins, "Installing aex plugins", Op::FileCopy, 10),
            Stage::new(CepExtensions, "Installing CEP extensions", Op::FileCopy, 10),
            Stage::new(Presets, "Installing presets", Op::FileCopy, 10),
            Stage::new(Installers, "Running installers", Op::RunCommand, 30),
            Stage::new(Element, "Copying Element files", Op::FileCopy, 5),
        ])
    }

    async fn run_stage(&self, step: PluginStep, ctx: &JobContext) -> Result<()> {
        match step {
            PluginStep::ClearScratch => Self::clear_scratch(ctx).await,
            PluginStep::Acquire => self.acquire(ctx).await,
            PluginStep::Extract => {
                let scratch = ctx.layout().private_plugins_dir();
                ctx.extract(&self.archive_path(ctx), &scratch, ExtractOptions::default())
                    .await
                    .map(|_| ())
            }
            PluginStep::AexPlugins => {
                Self::distribute(ctx, "aex", ctx.layout().plugins_dir()).await
            }
            PluginStep::CepExtensions => Self::cep_extensions(ctx).await,
            PluginStep::Presets => {
                Self::distribute(ctx, "preset-backup", ctx.layout().presets_dir()).await
            }
            PluginStep::Installers => Self::installers(ctx).await,
            PluginStep::Element => Self::element(ctx).await,
        }
    }

    async fn cleanup(&self, ctx: &JobContext) {
        let scratch = ctx.layout().private_plugins_dir();
        let leftover = scratch.clone();
        if let Err(e) = ctx.blocking(move |_| files::remove_tree(&leftover)).await {
            ctx.warn(format!(
                "Failed to remove temporary folder {}: {}",
                scratch.display(),
                e
            ));
        }

        if self.source != InstallSource::Online {
            return;
        }
        let archive = ctx.config().plugins_download_path();
        match tokio::fs::remove_file(&archive).await {
            Ok(()) => ctx.log("[CLEANUP] Removed temporary plugin archive".into()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => ctx.warn(format!("Could not remove {}: {}", archive.display(), e)),
        }
    }
}
