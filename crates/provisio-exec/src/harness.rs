//! Process execution harness.
//!
//! Spawns an external command with stdout and stderr merged into a single
//! capture buffer, enforces a wall-clock deadline, and folds every outcome
//! (nonzero exit, timeout, missing binary, spawn error) into an
//! [`ExecutionResult`]. Nothing in here returns an error to the caller.
//!
//! The child's exit status decides the outcome. Descendants that inherit the
//! output pipes do not hold a finished command open, and on unix a timeout
//! kills the child's whole process group.

use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// How a command invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// The process ran and exited (with any code, or by signal).
    Exited,
    /// The deadline elapsed and the process was killed.
    TimedOut,
    /// The binary could not be found.
    NotFound,
    /// Spawning failed for another reason (permissions, bad cwd, ...).
    SpawnFailed,
}

/// Outcome of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// True only for a zero exit status.
    pub success: bool,
    /// Merged stdout + stderr, lossily decoded.
    pub output: String,
    pub exit_code: Option<i32>,
    pub kind: ExitKind,
}

impl ExecutionResult {
    /// A zero-exit result carrying `output`.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            exit_code: Some(0),
            kind: ExitKind::Exited,
        }
    }

    /// A nonzero-exit result.
    pub fn failed(code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            exit_code: Some(code),
            kind: ExitKind::Exited,
        }
    }

    pub fn not_found(program: &str) -> Self {
        Self {
            success: false,
            output: format!("command not found: {program}"),
            exit_code: None,
            kind: ExitKind::NotFound,
        }
    }

    pub fn spawn_failed(program: &str, err: &std::io::Error) -> Self {
        Self {
            success: false,
            output: format!("failed to start {program}: {err}"),
            exit_code: None,
            kind: ExitKind::SpawnFailed,
        }
    }

    /// A killed-on-deadline result. `partial` is whatever was captured.
    pub fn timed_out(partial: impl Into<String>, timeout: Duration) -> Self {
        let mut output = partial.into();
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!(
            "[timeout] command exceeded {}s and was terminated\n",
            timeout.as_secs()
        ));
        Self {
            success: false,
            output,
            exit_code: None,
            kind: ExitKind::TimedOut,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ExitKind::TimedOut
    }
}

/// A fully described command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs commands. Implementations must never panic or propagate errors;
/// every failure is encoded in the returned [`ExecutionResult`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> ExecutionResult;
}

/// The real runner, backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> ExecutionResult {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(program = %spec.program, "binary not found");
                return ExecutionResult::not_found(&spec.program);
            }
            Err(e) => {
                warn!(program = %spec.program, error = %e, "spawn failed");
                return ExecutionResult::spawn_failed(&spec.program, &e);
            }
        };

        let started = Instant::now();
        let capture = Mutex::new(Vec::<u8>::new());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // The exit status decides the outcome. Pipes may outlive the child
        // when a descendant inherits them, so they only get a short drain
        // window once the child is gone.
        let outcome = {
            let mut pumps = std::pin::pin!(async {
                tokio::join!(pump(stdout, &capture), pump(stderr, &capture));
            });
            let mut drained = false;
            let waited = tokio::time::timeout(spec.timeout, async {
                let exited = tokio::select! {
                    status = child.wait() => Some(status),
                    () = pumps.as_mut() => None,
                };
                match exited {
                    Some(status) => status,
                    None => {
                        drained = true;
                        child.wait().await
                    }
                }
            })
            .await;

            if waited.is_err() {
                warn!(command = %spec, timeout_secs = spec.timeout.as_secs(), "command timed out, killing");
                terminate(&mut child);
                let _ = child.wait().await;
            }
            if !drained && tokio::time::timeout(DRAIN_GRACE, pumps.as_mut()).await.is_err() {
                debug!(command = %spec, "output pipes held open after exit, capture stopped");
            }
            waited
        };

        let captured = match capture.into_inner() {
            Ok(bytes) => bytes,
            Err(poisoned) => poisoned.into_inner(),
        };
        let output = String::from_utf8_lossy(&captured).into_owned();

        match outcome {
            Ok(Ok(status)) => {
                debug!(
                    command = %spec,
                    code = ?status.code(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "command exited"
                );
                ExecutionResult {
                    success: status.success(),
                    output,
                    exit_code: status.code(),
                    kind: ExitKind::Exited,
                }
            }
            Ok(Err(e)) => {
                warn!(command = %spec, error = %e, "failed to wait on child");
                ExecutionResult {
                    success: false,
                    output: format!("{output}failed to wait on {}: {e}\n", spec.program),
                    exit_code: None,
                    kind: ExitKind::SpawnFailed,
                }
            }
            Err(_) => ExecutionResult::timed_out(output, spec.timeout),
        }
    }
}

/// How long output is still collected after the child has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Kill the child together with everything in its process group.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
        // SAFETY: kill(2) on the group created for this child at spawn.
        if unsafe { libc::kill(-pid, libc::SIGKILL) } == 0 {
            return;
        }
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "kill after timeout failed");
    }
}

/// Copy lines from one pipe into the shared capture buffer until EOF.
async fn pump<R>(reader: Option<R>, sink: &Mutex<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else { return };
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if let Ok(mut buf) = sink.lock() {
                    buf.extend_from_slice(&line);
                }
            }
            Err(e) => {
                debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod testing {
    //! A scripted [`CommandRunner`] for driving the pipeline and prechecker
    //! without real binaries.

    use super::*;

    /// Returns canned results keyed by command prefix and records every call.
    ///
    /// A rule matches when the rendered command line (`program arg1 arg2 ...`)
    /// starts with its prefix; the first matching rule wins. Unmatched
    /// commands get the default result (zero exit, empty output).
    pub struct ScriptedRunner {
        rules: Vec<(String, ExecutionResult)>,
        default: ExecutionResult,
        calls: Mutex<Vec<CommandSpec>>,
    }

    impl Default for ScriptedRunner {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self {
                rules: Vec::new(),
                default: ExecutionResult::ok(""),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn on(mut self, prefix: impl Into<String>, result: ExecutionResult) -> Self {
            self.rules.push((prefix.into(), result));
            self
        }

        pub fn otherwise(mut self, result: ExecutionResult) -> Self {
            self.default = result;
            self
        }

        /// Every command run so far, in order.
        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        /// Rendered command lines run so far.
        pub fn lines(&self) -> Vec<String> {
            self.calls().iter().map(ToString::to_string).collect()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec) -> ExecutionResult {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(spec.clone());
            }
            let line = spec.to_string();
            self.rules
                .iter()
                .find(|(prefix, _)| line.starts_with(prefix.as_str()))
                .map(|(_, result)| result.clone())
                .unwrap_or_else(|| self.default.clone())
        }
    }
}
