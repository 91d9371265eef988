//! Aegnux CLI

mod surface;

use aegnux_lib::{
    Config, InstallSource, JobController, JobRequest, JobStatus, Layout, Result, Surface,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use surface::{JsonSurface, TerminalSurface};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aegnux")]
#[command(about = "Run Adobe After Effects on Linux through a managed Wine runtime")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (default: $XDG_CONFIG_HOME/aegnux/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit diagnostics as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print job events as JSON lines instead of a progress bar
    #[arg(long, global = true)]
    events_json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Install After Effects, the Wine runner and all components
    Install {
        /// Install from a local archive instead of downloading
        #[arg(long, value_name = "ARCHIVE")]
        offline: Option<PathBuf>,
    },
    /// Install the plugin bundle (downloaded unless ARCHIVE is given)
    Plugins { archive: Option<PathBuf> },
    /// Start After Effects
    Run,
    /// Run any Windows executable inside the prefix
    RunExe {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Stop every process of the Wine runtime
    Kill,
    /// Delete the installation
    Remove,
    /// Copy codec libraries from a Windows directory into the prefix
    ImportCodecs {
        source: PathBuf,
        /// Replace codec files that already exist
        #[arg(long)]
        overwrite: bool,
    },
    /// Show installation status and paths
    Status,
}

fn init_logging(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // job log lines are already shown by the surface
    let lib_level = if verbosity == 0 { "warn" } else { level };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("aegnux={},aegnux_lib={}", level, lib_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_status(config: &Config) {
    let layout = Layout::new(&config.data_root);
    let state = if layout.is_installed() {
        "installed"
    } else {
        "not installed"
    };
    println!("After Effects: {}", state);
    println!("Data root:     {}", layout.root().display());
    println!("Application:   {}", layout.app_dir().display());
    println!("Wine prefix:   {}", layout.prefix_dir().display());
    println!("Wine runner:   {}", layout.runner_dir().display());
}

fn request_for(command: Command) -> Option<JobRequest> {
    let request = match command {
        Command::Install { offline } => JobRequest::Install {
            source: offline.map_or(InstallSource::Online, InstallSource::Offline),
        },
        Command::Plugins { archive } => JobRequest::PluginInstall {
            source: archive.map_or(InstallSource::Online, InstallSource::Offline),
        },
        Command::Run => JobRequest::Run,
        Command::RunExe { args } => JobRequest::RunExe { args },
        Command::Kill => JobRequest::Kill,
        Command::Remove => JobRequest::Remove,
        Command::ImportCodecs { source, overwrite } => {
            JobRequest::ImportCodecs { source, overwrite }
        }
        Command::Status => return None,
    };
    Some(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let config = match cli.config {
        Some(ref path) => Config::load_from(Some(path.as_path()))?,
        None => Config::load()?,
    };

    let Some(request) = request_for(cli.command) else {
        print_status(&config);
        return Ok(());
    };

    let controller = JobController::new(config);
    let kind = request.kind();
    let handle = controller.start(request)?;
    info!("Started {} job", kind);

    let cancel = handle.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling {} job", kind);
            cancel.cancel();
        }
    });

    let mut surface: Box<dyn Surface> = if cli.events_json {
        Box::new(JsonSurface)
    } else {
        Box::new(TerminalSurface::new(kind))
    };
    let report = controller.relay(handle, surface.as_mut()).await;

    match report.status {
        JobStatus::Succeeded => Ok(()),
        JobStatus::Cancelled => std::process::exit(130),
        JobStatus::Failed(_) => std::process::exit(1),
    }
}
