//! Full provisioning: application files, Wine runner, prefix and components

use super::{InstallSource, JobContext, JobKind, Stage, StageOperation, Workflow};
use crate::archive::ExtractOptions;
use crate::download::FetchOptions;
use crate::error::{AegnuxError, Result};
use crate::events::Reporter;
use crate::files;
use crate::probe;
use crate::process::CommandSpec;
use std::path::PathBuf;
use tracing::debug;

const DLL_OVERRIDES_KEY: &str = r"HKEY_CURRENT_USER\Software\Wine\DllOverrides";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    RemoveStale,
    Acquire,
    ExtractApp,
    ExtractRunner,
    InitPrefix,
    Winetricks,
    VcRedist,
    Msxml,
    DarkTheme,
    Nvidia,
    MarkInstalled,
}

pub struct InstallJob {
    source: InstallSource,
}

impl InstallJob {
    pub fn new(source: InstallSource) -> Self {
        Self { source }
    }

    fn archive_path(&self, ctx: &JobContext) -> PathBuf {
        match self.source {
            InstallSource::Online => ctx.config().app_download_path(),
            InstallSource::Offline(ref path) => path.clone(),
        }
    }

    async fn remove_stale(&self, ctx: &JobContext) -> Result<()> {
        let root = ctx.layout().root().to_path_buf();
        if ctx.blocking(move |_| files::remove_tree(&root)).await? {
            ctx.log("[CLEANUP] Removed previous installation".into());
        }
        Ok(())
    }

    async fn acquire(&self, ctx: &JobContext) -> Result<()> {
        let archive = self.archive_path(ctx);
        match self.source {
            InstallSource::Online => {
                let options = FetchOptions {
                    sha256: ctx.config().app_sha256.clone(),
                    ..FetchOptions::default()
                };
                ctx.fetch(&ctx.config().app_download_url, &archive, &options)
                    .await?;
            }
            InstallSource::Offline(_) => {
                if !archive.is_file() {
                    return Err(AegnuxError::Archive(format!(
                        "offline archive not found: {}",
                        archive.display()
                    )));
                }
                ctx.log(format!("[INFO] Using offline archive {}", archive.display()));
            }
        }
        ctx.validate_archive(&archive).await
    }

    /// Unpack into `<root>/unpack` and move the application folder to `AE/`,
    /// so nothing else in the archive lands in the managed tree
    async fn extract_app(&self, ctx: &JobContext) -> Result<()> {
        let scratch = ctx.layout().unpack_dir();
        let app_dir = ctx.layout().app_dir();
        let subdir = ctx.config().app_archive_subdir.clone();

        let stale = scratch.clone();
        ctx.blocking(move |_| files::remove_tree(&stale)).await?;
        ctx.extract(&self.archive_path(ctx), &scratch, ExtractOptions::default())
            .await?;

        let unpacked = if subdir.is_empty() {
            scratch.clone()
        } else {
            scratch.join(&subdir)
        };
        if !unpacked.is_dir() {
            return Err(AegnuxError::Archive(format!(
                "archive does not contain '{}'",
                subdir
            )));
        }

        let target = app_dir.clone();
        ctx.blocking(move |_| {
            files::remove_tree(&target)?;
            std::fs::rename(&unpacked, &target)?;
            files::remove_tree(&scratch)?;
            Ok(())
        })
        .await?;
        ctx.log(format!("[INFO] Moved '{}' to {}", subdir, app_dir.display()));
        Ok(())
    }

    async fn extract_runner(&self, ctx: &JobContext) -> Result<()> {
        let archive = ctx.config().asset(&ctx.config().runner_archive);
        let runner_dir = ctx.layout().runner_dir();
        ctx.extract(&archive, &runner_dir, ExtractOptions::executables())
            .await?;

        if !ctx.runtime().is_present() {
            return Err(AegnuxError::Runtime(format!(
                "{} does not contain bin/wineserver",
                archive.display()
            )));
        }
        Ok(())
    }

    async fn init_prefix(&self, ctx: &JobContext) -> Result<()> {
        tokio::fs::create_dir_all(ctx.layout().prefix_dir()).await?;
        ctx.run_checked(ctx.wine().args(["wineboot", "-u"])).await
    }

    async fn winetricks(&self, ctx: &JobContext, verbs: &[String]) -> Result<()> {
        if verbs.is_empty() {
            ctx.log("[INFO] No winetricks verbs configured".into());
            return Ok(());
        }
        // a winetricks shipped with the runner wins over the host's
        let bundled = ctx.runtime().winetricks_bin();
        let program = if bundled.is_file() {
            bundled.into_os_string()
        } else {
            "winetricks".into()
        };
        let spec = CommandSpec::new(program)
            .arg("-q")
            .args(verbs)
            .env("WINE", ctx.runtime().wine_bin())
            .env("WINESERVER", ctx.runtime().wineserver_bin())
            .in_prefix();
        ctx.run_checked(spec).await
    }

    async fn vcredist(&self, ctx: &JobContext) -> Result<()> {
        let archive = ctx.config().asset(&ctx.config().vcredist_archive);
        let dir = ctx.runtime().vcredist_dir();
        ctx.extract(&archive, &dir, ExtractOptions::default()).await?;

        let code = ctx
            .run(ctx.wine().arg("install_all.bat").current_dir(&dir))
            .await?;
        if code != 0 {
            ctx.warn(format!(
                "Visual C++ redistributables installer exited with code {}",
                code
            ));
        }
        Ok(())
    }

    async fn msxml(&self, ctx: &JobContext) -> Result<()> {
        let archive = ctx.config().asset(&ctx.config().msxml_archive);
        let dir = ctx.runtime().msxml_dir();
        ctx.extract(&archive, &dir, ExtractOptions::default()).await?;

        let dll = files::find_file(&dir, "msxml3.dll").ok_or_else(|| {
            AegnuxError::Archive(format!("{} does not contain msxml3.dll", archive.display()))
        })?;
        for target in [ctx.layout().system32_dir(), ctx.layout().syswow64_dir()] {
            tokio::fs::create_dir_all(&target).await?;
            tokio::fs::copy(&dll, target.join("msxml3.dll")).await?;
            debug!("Copied msxml3.dll into {:?}", target);
        }

        let spec = ctx.wine().args([
            "reg",
            "add",
            DLL_OVERRIDES_KEY,
            "/v",
            "msxml3",
            "/d",
            "native,builtin",
            "/f",
        ]);
        ctx.run_checked(spec).await
    }

    async fn dark_theme(&self, ctx: &JobContext) -> Result<()> {
        let reg = ctx.config().asset(&ctx.config().theme_registry_file);
        if !reg.is_file() {
            return Err(AegnuxError::Config(format!(
                "theme registry file not found: {}",
                reg.display()
            )));
        }
        ctx.run_checked(ctx.wine().arg("regedit").arg(&reg)).await
    }
}

impl Workflow for InstallJob {
    type Step = InstallStep;

    fn kind(&self) -> JobKind {
        JobKind::Install
    }

    async fn plan(&self, ctx: &JobContext) -> Result<Vec<Stage<InstallStep>>> {
        use InstallStep::*;
        use StageOperation as Op;

        // a stale sentinel must never survive a new attempt
        ctx.layout().clear_installed()?;

        let acquire = match self.source {
            InstallSource::Online => Stage::new(Acquire, "Downloading After Effects", Op::Download, 15),
            InstallSource::Offline(_) => {
                Stage::new(Acquire, "Checking offline archive", Op::Custom, 15)
            }
        };

        let mut stages = vec![
            Stage::new(RemoveStale, "Removing previous installation", Op::Custom, 10).best_effort(),
            acquire,
            Stage::new(ExtractApp, "Extracting After Effects", Op::ExtractArchive, 15),
            Stage::new(ExtractRunner, "Unpacking Wine runner", Op::ExtractArchive, 10),
            Stage::new(InitPrefix, "Initializing Wine prefix", Op::RunCommand, 10),
            Stage::new(Winetricks, "Installing winetricks components", Op::RunCommand, 15),
            Stage::new(VcRedist, "Installing Visual C++ redistributables", Op::RunCommand, 10),
            Stage::new(Msxml, "Installing MSXML", Op::FileCopy, 5),
            Stage::new(DarkTheme, "Applying dark theme", Op::RunCommand, 3).best_effort(),
        ];

        if !ctx.config().nvidia_verbs.is_empty()
            && tokio::task::spawn_blocking(probe::nvidia_present).await?
        {
            ctx.log("[INFO] NVIDIA GPU detected".into());
            stages.push(
                Stage::new(Nvidia, "Installing NVIDIA libraries", Op::RunCommand, 5).best_effort(),
            );
        }

        stages.push(Stage::new(MarkInstalled, "Finishing installation", Op::Custom, 2));
        Ok(stages)
    }

    async fn run_stage(&self, step: InstallStep, ctx: &JobContext) -> Result<()> {
        match step {
            InstallStep::RemoveStale => self.remove_stale(ctx).await,
            InstallStep::Acquire => self.acquire(ctx).await,
            InstallStep::ExtractApp => self.extract_app(ctx).await,
            InstallStep::ExtractRunner => self.extract_runner(ctx).await,
            InstallStep::InitPrefix => self.init_prefix(ctx).await,
            InstallStep::Winetricks => self.winetricks(ctx, &ctx.config().winetricks_verbs).await,
            InstallStep::VcRedist => self.vcredist(ctx).await,
            InstallStep::Msxml => self.msxml(ctx).await,
            InstallStep::DarkTheme => self.dark_theme(ctx).await,
            InstallStep::Nvidia => self.winetricks(ctx, &ctx.config().nvidia_verbs).await,
            InstallStep::MarkInstalled => {
                ctx.layout().mark_installed()?;
                ctx.log("[INFO] After Effects installed".into());
                Ok(())
            }
        }
    }

    async fn cleanup(&self, ctx: &JobContext) {
        let scratch = ctx.layout().unpack_dir();
        let leftover = scratch.clone();
        if let Err(e) = ctx.blocking(move |_| files::remove_tree(&leftover)).await {
            ctx.warn(format!("Could not remove {}: {}", scratch.display(), e));
        }

        if self.source != InstallSource::Online {
            return;
        }
        let archive = ctx.config().app_download_path();
        match tokio::fs::remove_file(&archive).await {
            Ok(()) => ctx.log("[CLEANUP] Removed temporary After Effects archive".into()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => ctx.warn(format!("Could not remove {}: {}", archive.display(), e)),
        }
    }
}
