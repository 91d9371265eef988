//! The managed Wine runtime: binaries under `<root>/runner` and the prefix it drives

use crate::layout::Layout;
use std::ffi::OsString;
use std::path::PathBuf;

/// Wine runtime bundled with an installation
#[derive(Debug, Clone)]
pub struct Runtime {
    /// Root of the unpacked runner (contains `bin/`)
    pub runner_dir: PathBuf,

    /// WINEPREFIX the runtime operates on
    pub prefix_dir: PathBuf,
}

impl Runtime {
    pub fn new(layout: &Layout) -> Self {
        Self {
            runner_dir: layout.runner_dir(),
            prefix_dir: layout.prefix_dir(),
        }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.runner_dir.join("bin")
    }

    pub fn wine_bin(&self) -> PathBuf {
        self.bin_dir().join("wine")
    }

    pub fn wineserver_bin(&self) -> PathBuf {
        self.bin_dir().join("wineserver")
    }

    pub fn winetricks_bin(&self) -> PathBuf {
        self.bin_dir().join("winetricks")
    }

    /// Unpacked Visual C++ redistributables
    pub fn vcredist_dir(&self) -> PathBuf {
        self.runner_dir.join("vcr")
    }

    /// Unpacked MSXML bundle
    pub fn msxml_dir(&self) -> PathBuf {
        self.runner_dir.join("msxml")
    }

    /// Whether the runner has been unpacked
    pub fn is_present(&self) -> bool {
        self.wineserver_bin().is_file()
    }

    /// `PATH` with the runner's `bin/` prepended to `current`
    pub fn search_path(&self, current: Option<OsString>) -> OsString {
        let mut paths = vec![self.bin_dir()];
        if let Some(current) = current {
            paths.extend(std::env::split_paths(&current));
        }
        // only fails if a component contains ':'; fall back to the runner alone
        std::env::join_paths(paths).unwrap_or_else(|_| self.bin_dir().into_os_string())
    }

    /// Variables that address the managed runtime from a child process
    pub fn environment(&self) -> Vec<(String, OsString)> {
        vec![
            ("WINEPREFIX".to_string(), self.prefix_dir.clone().into_os_string()),
            (
                "PATH".to_string(),
                self.search_path(std::env::var_os("PATH")),
            ),
        ]
    }
}
