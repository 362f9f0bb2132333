//! Single-run command execution and evidence capture.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::CommandSpec;
use crate::config::RunnerConfig;
use crate::error::{ReproError, Result};

/// Exit code recorded when the command could not be started at all.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 127;

/// Exit code recorded when the command was killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Raw result of one process invocation, before any evidence is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Exit code (0 = success, sentinel codes for launch failure / timeout).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,
}

impl Execution {
    fn launch_failure(program: &str, err: &std::io::Error) -> Self {
        Self {
            exit_code: LAUNCH_FAILURE_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("failed to launch '{}': {}", program, err),
        }
    }

    /// Keeps whatever the command printed before it was killed and appends
    /// a note to stderr.
    fn timed_out(timeout_ms: u64, stdout: String, mut stderr: String) -> Self {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "command timed out after {} ms and was killed",
            timeout_ms
        ));
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout,
            stderr,
        }
    }
}

/// How long to keep draining pipes after a timeout kill. A grandchild that
/// inherited the pipe can hold it open long after the direct child died.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Reads one child pipe in the background into a shared buffer, so the
/// bytes read so far survive even if the reader never sees EOF.
struct StreamCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl StreamCapture {
    fn spawn<R>(reader: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let task = tokio::spawn(async move {
            let Some(mut reader) = reader else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        });
        Self { buf, task }
    }

    /// Wait for EOF (bounded by `grace` when given) and return the text.
    async fn finish(mut self, grace: Option<Duration>) -> String {
        match grace {
            Some(grace) => {
                let _ = tokio::time::timeout(grace, &mut self.task).await;
                self.task.abort();
            }
            None => {
                let _ = (&mut self.task).await;
            }
        }
        let bytes = self.buf.lock().map(|buf| buf.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Seam between the runner and the operating system.
///
/// Implementations must never fail: a command that cannot be started is
/// reported as an [`Execution`] with [`LAUNCH_FAILURE_EXIT_CODE`].
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, command: &CommandSpec, working_dir: &Path) -> Execution;
}

/// Launches real processes with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemLauncher {
    config: RunnerConfig,
}

impl SystemLauncher {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Launcher for SystemLauncher {
    async fn launch(&self, command: &CommandSpec, working_dir: &Path) -> Execution {
        let (program, args) = command.to_argv(&self.config.shell);

        let child = Command::new(&program)
            .args(&args)
            .current_dir(working_dir)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, error = %e, "command failed to launch");
                return Execution::launch_failure(&program, &e);
            }
        };

        let stdout = StreamCapture::spawn(child.stdout.take());
        let stderr = StreamCapture::spawn(child.stderr.take());

        let status = match self.config.timeout_ms {
            Some(timeout_ms) => {
                let waited =
                    tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await;
                match waited {
                    Ok(status) => status,
                    Err(_) => {
                        warn!(program = %program, timeout_ms, "command timed out");
                        if let Err(e) = child.kill().await {
                            warn!(
                                program = %program,
                                error = %e,
                                "failed to kill timed out command"
                            );
                        }
                        return Execution::timed_out(
                            timeout_ms,
                            stdout.finish(Some(DRAIN_GRACE)).await,
                            stderr.finish(Some(DRAIN_GRACE)).await,
                        );
                    }
                }
            }
            None => child.wait().await,
        };

        let stdout = stdout.finish(None).await;
        let stderr = stderr.finish(None).await;

        match status {
            Ok(status) => Execution {
                exit_code: exit_code_of(&status),
                stdout,
                stderr,
            },
            Err(e) => {
                warn!(program = %program, error = %e, "failed to wait for command");
                Execution::launch_failure(&program, &e)
            }
        }
    }
}

#[cfg(unix)]
fn exit_code_of(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Result of one completed run within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// 1-based ordinal of this run within its batch.
    pub index: usize,

    pub exit_code: i32,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    pub stdout: String,
    pub stderr: String,

    /// Where stdout was persisted.
    pub stdout_file: PathBuf,

    /// Where stderr was persisted.
    pub stderr_file: PathBuf,
}

impl RunOutcome {
    /// Whether this run exited cleanly.
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr, a newline, then stdout: the text signatures and forbidden
    /// patterns are matched against.
    pub fn merged_output(&self) -> String {
        let mut merged = String::with_capacity(self.stderr.len() + self.stdout.len() + 1);
        merged.push_str(&self.stderr);
        merged.push('\n');
        merged.push_str(&self.stdout);
        merged
    }
}

/// Executes a command once and writes its output streams to disk.
#[derive(Clone)]
pub struct CommandRunner {
    launcher: Arc<dyn Launcher>,
    output_dir: PathBuf,
}

impl CommandRunner {
    pub fn new(launcher: Arc<dyn Launcher>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            launcher,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create the output directory if it does not exist yet.
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| ReproError::io(&self.output_dir, e))
    }

    /// Execute `command` once as run number `index`.
    ///
    /// Writes `run_<index>.stdout.log` and `run_<index>.stderr.log` into the
    /// output directory before returning. A command that fails or cannot be
    /// launched still yields `Ok`; only I/O faults on the evidence files
    /// are errors.
    pub async fn run_once(
        &self,
        command: &CommandSpec,
        working_dir: &Path,
        index: usize,
    ) -> Result<RunOutcome> {
        if index == 0 {
            return Err(ReproError::InvalidInput(
                "run index must be at least 1".to_string(),
            ));
        }
        command.validate()?;
        self.prepare().await?;

        let start = Instant::now();
        let execution = self.launcher.launch(command, working_dir).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let stdout_file = self.output_dir.join(format!("run_{}.stdout.log", index));
        let stderr_file = self.output_dir.join(format!("run_{}.stderr.log", index));
        tokio::fs::write(&stdout_file, &execution.stdout)
            .await
            .map_err(|e| ReproError::io(&stdout_file, e))?;
        tokio::fs::write(&stderr_file, &execution.stderr)
            .await
            .map_err(|e| ReproError::io(&stderr_file, e))?;

        debug!(
            index,
            exit_code = execution.exit_code,
            duration_ms,
            "run completed"
        );

        Ok(RunOutcome {
            index,
            exit_code: execution.exit_code,
            duration_ms,
            stdout: execution.stdout,
            stderr: execution.stderr,
            stdout_file,
            stderr_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLauncher(Execution);

    #[async_trait]
    impl Launcher for FixedLauncher {
        async fn launch(&self, _command: &CommandSpec, _working_dir: &Path) -> Execution {
            self.0.clone()
        }
    }

    fn outcome(stdout: &str, stderr: &str, exit_code: i32) -> RunOutcome {
        RunOutcome {
            index: 1,
            exit_code,
            duration_ms: 10,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            stdout_file: PathBuf::from("run_1.stdout.log"),
            stderr_file: PathBuf::from("run_1.stderr.log"),
        }
    }

    #[test]
    fn test_run_outcome_passed() {
        assert!(outcome("", "", 0).passed());
        assert!(!outcome("", "", 1).passed());
        assert!(!outcome("", "", LAUNCH_FAILURE_EXIT_CODE).passed());
    }

    #[test]
    fn test_merged_output_puts_stderr_first() {
        assert_eq!(outcome("out", "err", 1).merged_output(), "err\nout");
        assert_eq!(outcome("", "", 0).merged_output(), "\n");
    }

    #[tokio::test]
    async fn test_run_once_writes_both_logs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out_dir = dir.path().join("nested").join("out");
        let launcher = Arc::new(FixedLauncher(Execution {
            exit_code: 2,
            stdout: "hello\n".to_string(),
            stderr: "TypeError: boom\n".to_string(),
        }));
        let runner = CommandRunner::new(launcher, &out_dir);

        let run = runner
            .run_once(&CommandSpec::shell("ignored"), dir.path(), 3)
            .await
            .expect("run_once failed");

        assert_eq!(run.index, 3);
        assert_eq!(run.exit_code, 2);
        assert_eq!(run.stdout_file, out_dir.join("run_3.stdout.log"));
        assert_eq!(run.stderr_file, out_dir.join("run_3.stderr.log"));
        assert_eq!(std::fs::read_to_string(&run.stdout_file).unwrap(), "hello\n");
        assert_eq!(
            std::fs::read_to_string(&run.stderr_file).unwrap(),
            "TypeError: boom\n"
        );
    }

    #[tokio::test]
    async fn test_run_once_rejects_index_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = CommandRunner::new(Arc::new(SystemLauncher::default()), dir.path());
        let err = runner
            .run_once(&CommandSpec::shell("true"), dir.path(), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ReproError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_run_once_rejects_empty_command() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = CommandRunner::new(Arc::new(SystemLauncher::default()), dir.path());
        let err = runner
            .run_once(&CommandSpec::shell(""), dir.path(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ReproError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_missing_program_becomes_launch_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = CommandRunner::new(Arc::new(SystemLauncher::default()), dir.path());
        let run = runner
            .run_once(
                &CommandSpec::argv("repcheck-definitely-not-a-program", vec![]),
                dir.path(),
                1,
            )
            .await
            .expect("launch failure must not be an error");

        assert_eq!(run.exit_code, LAUNCH_FAILURE_EXIT_CODE);
        assert!(run.stderr.contains("failed to launch"));
        assert!(run.stderr_file.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_command_captures_streams_and_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let runner = CommandRunner::new(Arc::new(SystemLauncher::default()), dir.path());
        let run = runner
            .run_once(
                &CommandSpec::shell("echo out; echo err >&2; exit 3"),
                dir.path(),
                1,
            )
            .await
            .expect("run_once failed");

        assert_eq!(run.exit_code, 3);
        assert_eq!(run.stdout, "out\n");
        assert_eq!(run.stderr, "err\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_and_records_sentinel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RunnerConfig {
            timeout_ms: Some(100),
            ..RunnerConfig::default()
        };
        let runner = CommandRunner::new(Arc::new(SystemLauncher::new(config)), dir.path());
        let run = runner
            .run_once(&CommandSpec::argv("sleep", vec!["5".to_string()]), dir.path(), 1)
            .await
            .expect("timeout must not be an error");

        assert_eq!(run.exit_code, TIMEOUT_EXIT_CODE);
        assert!(run.stderr.contains("timed out"));
        assert!(run.duration_ms < 5000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_keeps_output_printed_before_kill() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RunnerConfig {
            timeout_ms: Some(500),
            ..RunnerConfig::default()
        };
        let runner = CommandRunner::new(Arc::new(SystemLauncher::new(config)), dir.path());
        let run = runner
            .run_once(
                &CommandSpec::shell("echo before; echo 'Error: stuck' >&2; sleep 5"),
                dir.path(),
                1,
            )
            .await
            .expect("timeout must not be an error");

        assert_eq!(run.exit_code, TIMEOUT_EXIT_CODE);
        assert!(run.duration_ms < 5000);
        assert_eq!(run.stdout, "before\n");
        assert!(run.stderr.starts_with("Error: stuck\n"));
        assert!(run.stderr.ends_with("timed out after 500 ms and was killed"));
        assert_eq!(std::fs::read_to_string(&run.stdout_file).unwrap(), "before\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_overrides_are_visible() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = RunnerConfig::default();
        config
            .env
            .insert("REPCHECK_TEST_VALUE".to_string(), "marker-42".to_string());
        let runner = CommandRunner::new(Arc::new(SystemLauncher::new(config)), dir.path());
        let run = runner
            .run_once(
                &CommandSpec::shell("printf %s \"$REPCHECK_TEST_VALUE\""),
                dir.path(),
                1,
            )
            .await
            .expect("run_once failed");
        assert_eq!(run.stdout, "marker-42");
    }
}
