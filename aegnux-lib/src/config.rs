//! Configuration management for aegnux

use crate::error::{AegnuxError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const APP_DIR: &str = "aegnux";
const ENV_PREFIX: &str = "AEGNUX";

/// Aegnux configuration
///
/// Missing keys fall back to [`Config::default`], so a config file only needs
/// the values it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-user data root holding the app, the prefix and the runner
    pub data_root: PathBuf,

    /// Cache directory for downloaded archives
    pub cache_dir: PathBuf,

    /// Directory with bundled assets (runner, redistributables, theme)
    pub assets_dir: PathBuf,

    /// Where the application archive is downloaded from
    pub app_download_url: String,

    /// Expected SHA-256 of the downloaded application archive
    pub app_sha256: Option<String>,

    /// Where the plugin bundle is downloaded from
    pub plugins_download_url: String,

    /// Directory inside the application archive that becomes `<root>/AE`
    pub app_archive_subdir: String,

    /// Runtime archive, relative to `assets_dir` unless absolute
    pub runner_archive: PathBuf,

    /// Visual C++ redistributables bundle, relative to `assets_dir` unless absolute
    pub vcredist_archive: PathBuf,

    /// MSXML bundle, relative to `assets_dir` unless absolute
    pub msxml_archive: PathBuf,

    /// Registry file with the dark Wine theme, relative to `assets_dir` unless absolute
    pub theme_registry_file: PathBuf,

    /// Executable launched by the Run job
    pub app_executable: String,

    /// Verbs passed to winetricks while provisioning the prefix
    pub winetricks_verbs: Vec<String>,

    /// Verbs installed when NVIDIA hardware is present
    pub nvidia_verbs: Vec<String>,

    /// File extensions (with leading dot) picked up by the codec import
    pub codec_extensions: Vec<String>,

    /// Plugin installers that need user interaction
    pub manual_installers: Vec<String>,

    /// Minimum interval between progress log lines, in milliseconds
    pub progress_interval_ms: u64,

    /// Cancellation poll interval for blocking operations, in milliseconds
    pub poll_interval_ms: u64,

    /// Grace period between terminate and kill, in seconds
    pub kill_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_home = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".local/share"));
        let cache_home = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));

        Self {
            data_root: data_home.join(APP_DIR),
            cache_dir: cache_home.join(APP_DIR),
            assets_dir: PathBuf::from("/usr/share").join(APP_DIR).join("assets"),
            app_download_url:
                "https://huggingface.co/cutefishae/AeNux-model/resolve/main/2024.zip".into(),
            app_sha256: None,
            plugins_download_url:
                "https://huggingface.co/cutefishae/AeNux-model/resolve/main/aenux-require-plugin.zip"
                    .into(),
            app_archive_subdir: "Support Files".into(),
            runner_archive: PathBuf::from("wine.tar.gz"),
            vcredist_archive: PathBuf::from("vcr.zip"),
            msxml_archive: PathBuf::from("msxml3.zip"),
            theme_registry_file: PathBuf::from("wine_dark_theme.reg"),
            app_executable: "AfterFX.exe".into(),
            winetricks_verbs: ["dxvk", "corefonts", "gdiplus", "fontsmooth=rgb"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            nvidia_verbs: vec!["dxvk_nvapi".into()],
            codec_extensions: [".dll", ".ax", ".acm", ".drv", ".qtx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            manual_installers: vec!["E3D.exe".into(), "saber.exe".into()],
            progress_interval_ms: 100,
            poll_interval_ms: 100,
            kill_grace_secs: 5,
        }
    }
}

impl Config {
    /// Load configuration from the default file location and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_config_file().as_deref())
    }

    /// Load configuration layered as defaults, then `file` (if it exists),
    /// then `AEGNUX_*` environment variables
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            debug!("Reading configuration file {:?}", path);
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("winetricks_verbs")
                    .with_list_parse_key("nvidia_verbs")
                    .with_list_parse_key("codec_extensions")
                    .with_list_parse_key("manual_installers"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        info!("Using data root {:?}", config.data_root);
        Ok(config)
    }

    /// `$XDG_CONFIG_HOME/aegnux/config.toml`
    pub fn default_config_file() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.data_root.as_os_str().is_empty() {
            return Err(AegnuxError::Config("data_root must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(AegnuxError::Config("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Resolve an asset path against `assets_dir`
    pub fn asset(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.assets_dir.join(path)
        }
    }

    /// Temporary location of the downloaded application archive
    pub fn app_download_path(&self) -> PathBuf {
        self.cache_dir.join("ae2024.zip")
    }

    /// Temporary location of the downloaded plugin bundle
    pub fn plugins_download_path(&self) -> PathBuf {
        self.cache_dir.join("aenux-require-plugin.zip")
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    /// Configuration rooted entirely inside `root`, used by tests and portable installs
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            data_root: root.join("data"),
            cache_dir: root.join("cache"),
            assets_dir: root.join("assets"),
            ..Self::default()
        }
    }
}
