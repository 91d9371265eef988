//! On-disk layout of an installation and the `installed` sentinel

use crate::error::Result;
use std::path::{Path, PathBuf};

const SENTINEL_CONTENTS: &str = "have fun :)";

/// Every persistent location, derived from the data root
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/AE`
    pub fn app_dir(&self) -> PathBuf {
        self.root.join("AE")
    }

    /// `<root>/AE/Plug-ins`
    pub fn plugins_dir(&self) -> PathBuf {
        self.app_dir().join("Plug-ins")
    }

    /// `<root>/wineprefix`
    pub fn prefix_dir(&self) -> PathBuf {
        self.root.join("wineprefix")
    }

    /// `<root>/runner`
    pub fn runner_dir(&self) -> PathBuf {
        self.root.join("runner")
    }

    /// `<root>/private-plugins`, scratch space for plugin bundles
    pub fn private_plugins_dir(&self) -> PathBuf {
        self.root.join("private-plugins")
    }

    /// `<root>/unpack`, scratch space for the application archive
    pub fn unpack_dir(&self) -> PathBuf {
        self.root.join("unpack")
    }

    /// `<root>/installed`
    pub fn sentinel_path(&self) -> PathBuf {
        self.root.join("installed")
    }

    pub fn drive_c(&self) -> PathBuf {
        self.prefix_dir().join("drive_c")
    }

    pub fn system32_dir(&self) -> PathBuf {
        self.drive_c().join("windows").join("system32")
    }

    pub fn syswow64_dir(&self) -> PathBuf {
        self.drive_c().join("windows").join("syswow64")
    }

    /// Adobe CEP extensions directory inside the prefix
    pub fn cep_extensions_dir(&self) -> PathBuf {
        self.drive_c()
            .join("Program Files (x86)")
            .join("Common Files")
            .join("Adobe")
            .join("CEP")
            .join("extensions")
    }

    /// After Effects user presets inside the prefix
    pub fn presets_dir(&self) -> PathBuf {
        // Wine maps the Windows profile to the Unix login name
        let user = std::env::var("USER").unwrap_or_else(|_| "user".into());
        self.drive_c()
            .join("users")
            .join(user)
            .join("Documents")
            .join("Adobe")
            .join("After Effects 2024")
            .join("User Presets")
    }

    /// Whether a previous Install completed; the sentinel is the only source of truth
    pub fn is_installed(&self) -> bool {
        self.sentinel_path().is_file()
    }

    /// Record a completed installation
    pub fn mark_installed(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.sentinel_path(), SENTINEL_CONTENTS)?;
        Ok(())
    }

    /// Forget a completed installation
    pub fn clear_installed(&self) -> Result<()> {
        match std::fs::remove_file(self.sentinel_path()) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
