//! Subprocess runner
//!
//! Runs one external command in its own process group, streams stdout and
//! stderr as log lines in arrival order, and escalates from SIGTERM to SIGKILL
//! when the job is cancelled.

use crate::cancel::CancelFlag;
use crate::error::{AegnuxError, Result};
use crate::events::Reporter;
use crate::wine::Runtime;
use command_group::{AsyncCommandGroup, AsyncGroupChild, Signal, UnixChildExt};
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// A command to execute
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, OsString>,
    in_prefix: bool,
}

impl CommandSpec {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            in_prefix: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Override one variable; applied after the managed-runtime variables
    pub fn env(mut self, key: impl Into<String>, value: impl AsRef<OsStr>) -> Self {
        self.env.insert(key.into(), value.as_ref().to_os_string());
        self
    }

    /// Run inside the managed Wine environment (WINEPREFIX and PATH)
    pub fn in_prefix(mut self) -> Self {
        self.in_prefix = true;
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

struct OutputLine {
    stream: Stream,
    text: String,
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stream {
            Stream::Stdout => write!(f, "[STDOUT] {}", self.text),
            Stream::Stderr => write!(f, "[STDERR] {}", self.text),
        }
    }
}

/// Executes [`CommandSpec`]s
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    runtime: Option<Runtime>,
    poll_interval: Duration,
    grace_period: Duration,
}

impl ProcessRunner {
    pub fn new(poll_interval: Duration, grace_period: Duration) -> Self {
        Self {
            runtime: None,
            poll_interval,
            grace_period,
        }
    }

    /// Runtime used for commands flagged with [`CommandSpec::in_prefix`]
    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Run `spec` to completion and return its exit code
    ///
    /// A non-zero exit code is still `Ok`. Fails with `CommandNotFound` when
    /// the program cannot be located and with `Cancelled` when `cancel` is
    /// raised before the process exits.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancelFlag,
        reporter: &dyn Reporter,
    ) -> Result<i32> {
        reporter.log(format!("[COMMAND] Running command: {}", spec));
        cancel.check()?;

        let env = self.environment(spec)?;
        let program = self.resolve(spec, &env)?;
        debug!("Resolved {:?} to {:?}", spec.program, program);

        let mut command = Command::new(&program);
        command
            .args(&spec.args)
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = spec.cwd {
            command.current_dir(dir);
        }

        let mut child = command.group_spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AegnuxError::CommandNotFound(spec.program.to_string_lossy().into_owned())
            } else {
                AegnuxError::CommandExecution {
                    command: spec.to_string(),
                    error: e.to_string(),
                }
            }
        })?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.inner().stdout.take() {
            readers.push(tokio::spawn(drain(stdout, Stream::Stdout, line_tx.clone())));
        }
        if let Some(stderr) = child.inner().stderr.take() {
            readers.push(tokio::spawn(drain(stderr, Stream::Stderr, line_tx)));
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut streams_open = true;

        let status = loop {
            tokio::select! {
                line = line_rx.recv(), if streams_open => match line {
                    Some(line) => reporter.log(line.to_string()),
                    None => streams_open = false,
                },
                _ = ticker.tick() => {
                    if cancel.is_cancelled() {
                        self.terminate(&mut child, reporter).await;
                        // flush what was already read, then drop the rest
                        while let Ok(line) = line_rx.try_recv() {
                            reporter.log(line.to_string());
                        }
                        readers.iter().for_each(JoinHandle::abort);
                        return Err(AegnuxError::Cancelled);
                    }
                    if let Some(status) = child.try_wait()? {
                        break status;
                    }
                }
            }
        };

        // Grandchildren may keep the pipes open; bound the final drain
        let deadline = tokio::time::sleep(self.grace_period);
        tokio::pin!(deadline);
        while streams_open {
            tokio::select! {
                line = line_rx.recv() => match line {
                    Some(line) => reporter.log(line.to_string()),
                    None => streams_open = false,
                },
                _ = &mut deadline => {
                    warn!("Output of {:?} still open after exit, detaching", spec.program);
                    break;
                }
            }
        }
        readers.iter().for_each(JoinHandle::abort);

        let code = exit_code(status);
        if code == 0 {
            reporter.log(format!(
                "[COMMAND] Command finished successfully. Return code: {}",
                code
            ));
        } else {
            reporter.log(format!("[COMMAND] Command failed. Return code: {}", code));
        }
        Ok(code)
    }

    /// Like [`ProcessRunner::run`], but a non-zero exit code is an error
    pub async fn run_checked(
        &self,
        spec: &CommandSpec,
        cancel: &CancelFlag,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        match self.run(spec, cancel, reporter).await? {
            0 => Ok(()),
            code => Err(AegnuxError::CommandFailed {
                command: spec.to_string(),
                code,
            }),
        }
    }

    /// Variable overlay for `spec`; keys are unique, explicit overrides win
    fn environment(&self, spec: &CommandSpec) -> Result<BTreeMap<String, OsString>> {
        let mut env = BTreeMap::new();
        if spec.in_prefix {
            let runtime = self.runtime.as_ref().ok_or_else(|| {
                AegnuxError::Runtime(format!("no managed runtime to run {} in", spec))
            })?;
            env.extend(runtime.environment());
        }
        env.extend(spec.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(env)
    }

    /// Locate the program using the child's PATH
    fn resolve(&self, spec: &CommandSpec, env: &BTreeMap<String, OsString>) -> Result<PathBuf> {
        let search_path = env
            .get("PATH")
            .cloned()
            .or_else(|| std::env::var_os("PATH"));
        let cwd = match spec.cwd {
            Some(ref dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        which::which_in(&spec.program, search_path, cwd).map_err(|_| {
            AegnuxError::CommandNotFound(spec.program.to_string_lossy().into_owned())
        })
    }

    /// SIGTERM the process group, then SIGKILL it after the grace period
    async fn terminate(&self, child: &mut AsyncGroupChild, reporter: &dyn Reporter) {
        reporter.log("[COMMAND] Process cancelled by user. Terminating...".into());
        if let Err(e) = child.signal(Signal::SIGTERM) {
            debug!("SIGTERM failed: {}", e);
        }

        if self.wait_for_exit(child, self.grace_period).await {
            return;
        }

        reporter.log("[COMMAND] Process did not terminate, killing...".into());
        if let Err(e) = child.kill() {
            warn!("Failed to kill process group: {}", e);
        }
        if !self.wait_for_exit(child, self.grace_period).await {
            warn!("Process group survived SIGKILL");
        }
    }

    async fn wait_for_exit(&self, child: &mut AsyncGroupChild, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) => {}
                Err(e) => {
                    debug!("try_wait failed: {}", e);
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Forward complete lines of `reader`; the final partial line is flushed at EOF
async fn drain<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf).trim_end().to_string();
                if text.is_empty() {
                    continue;
                }
                if tx.send(OutputLine { stream, text }).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Reading {:?} failed: {}", stream, e);
                break;
            }
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}
