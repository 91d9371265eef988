//! Hardware capability probes

use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;
use which::which;

const NVIDIA_PROC_DIR: &str = "/proc/driver/nvidia";

/// Detect an NVIDIA GPU through the driver tools, the kernel interface or `lspci`
pub fn nvidia_present() -> bool {
    if which("nvidia-smi").is_ok() {
        debug!("nvidia-smi found in PATH");
        return true;
    }

    if Path::new(NVIDIA_PROC_DIR).exists() {
        debug!("{} exists", NVIDIA_PROC_DIR);
        return true;
    }

    match Command::new("lspci")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
    {
        Ok(output) => mentions_nvidia(&output.stdout),
        Err(e) => {
            debug!("lspci unavailable: {}", e);
            false
        }
    }
}

fn mentions_nvidia(lspci_output: &[u8]) -> bool {
    String::from_utf8_lossy(lspci_output)
        .to_uppercase()
        .contains("NVIDIA")
}
