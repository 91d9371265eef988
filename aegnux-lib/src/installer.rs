//! Plugin installer discovery and silent switch selection
//!
//! Plugin bundles ship Windows setup executables. Each one is classified by
//! the signature strings its stub carries, falling back to its file name, and
//! gets the unattended switches of that installer family.

use crate::error::Result;
use glob::MatchOptions;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Bytes read from the start of an executable when sniffing signatures
const SNIFF_LEN: usize = 32 * 1024;

/// Installer family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerKind {
    /// Nullsoft Scriptable Install System
    Nsis,
    InnoSetup,
    InstallShield,
    /// EXE wrapping an MSI package
    MsiBootstrapper,
    Generic,
}

impl InstallerKind {
    /// Switches that make this installer run without interaction
    pub fn silent_switches(self) -> &'static [&'static str] {
        match self {
            InstallerKind::Nsis => &["/S"],
            InstallerKind::InnoSetup => &["/VERYSILENT", "/SUPPRESSMSGBOXES", "/NORESTART", "/SP-"],
            InstallerKind::InstallShield => &["/s"],
            InstallerKind::MsiBootstrapper => &["/quiet", "/norestart"],
            // most bundled plugin installers are Inno based
            InstallerKind::Generic => &["/verysilent", "/suppressmsgboxes"],
        }
    }
}

/// Classify an installer from its contents, then its name
pub fn detect(path: &Path) -> InstallerKind {
    detect_from_contents(path).unwrap_or_else(|| {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        detect_from_name(&name)
    })
}

/// Look for installer signatures in the first 32 KiB of the file
pub fn detect_from_contents(path: &Path) -> Option<InstallerKind> {
    let mut file = File::open(path).ok()?;
    let mut buffer = Vec::with_capacity(SNIFF_LEN);
    file.by_ref()
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut buffer)
        .ok()?;
    let content = String::from_utf8_lossy(&buffer).to_lowercase();

    if content.contains("nullsoft") || content.contains("nsis") {
        Some(InstallerKind::Nsis)
    } else if content.contains("inno setup") || content.contains("innosetup") {
        Some(InstallerKind::InnoSetup)
    } else if content.contains("installshield") {
        Some(InstallerKind::InstallShield)
    } else if content.contains("msiexec") || content.contains("windows installer") {
        Some(InstallerKind::MsiBootstrapper)
    } else {
        None
    }
}

pub fn detect_from_name(filename: &str) -> InstallerKind {
    let name = filename.to_lowercase();

    if name.contains("nsis") || name.contains("nullsoft") {
        InstallerKind::Nsis
    } else if name.contains("inno")
        || name == "setup.exe"
        || name.ends_with("-setup.exe")
        || name.ends_with("_setup.exe")
    {
        InstallerKind::InnoSetup
    } else if name.contains("installshield") {
        InstallerKind::InstallShield
    } else if name.contains("msi") {
        InstallerKind::MsiBootstrapper
    } else {
        InstallerKind::Generic
    }
}

/// Installers found in a plugin bundle's `installer/` directory
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InstallerSet {
    /// Run unattended, in name order
    pub silent: Vec<PathBuf>,
    /// Present but listed as needing user interaction
    pub manual: Vec<PathBuf>,
}

/// Collect `*.exe` under `dir`, splitting off the names in `manual`
pub fn discover(dir: &Path, manual: &[String]) -> Result<InstallerSet> {
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::default()
    };
    let pattern = glob::Pattern::escape(&dir.to_string_lossy()) + "/*.exe";

    let mut found: Vec<PathBuf> = glob::glob_with(&pattern, options)
        .map_err(|e| crate::error::AegnuxError::Config(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    found.sort();

    let mut set = InstallerSet::default();
    for path in found {
        let is_manual = path
            .file_name()
            .map(|n| manual.iter().any(|m| m.eq_ignore_ascii_case(&n.to_string_lossy())))
            .unwrap_or(false);
        if is_manual {
            set.manual.push(path);
        } else {
            set.silent.push(path);
        }
    }
    Ok(set)
}
