//! Batch execution: `run_count` independent runs of one command.
//!
//! Runs share nothing but the output directory, and each writes to its own
//! `run_<index>.*` files. A semaphore bounds how many are in flight; with the
//! default of one permit the batch is strictly sequential. Results always
//! come back in index order.

use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tracing::{info, instrument};

use crate::command::CommandSpec;
use crate::error::{ReproError, Result};
use crate::runner::{CommandRunner, Launcher, RunOutcome};

/// What to run, where, and how many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSpec {
    pub command: CommandSpec,

    /// Working directory the command runs in.
    pub working_dir: PathBuf,

    /// Directory receiving per-run logs and the report.
    pub output_dir: PathBuf,

    /// Number of runs; must be at least 1.
    pub run_count: usize,
}

impl BatchSpec {
    pub fn new(
        command: CommandSpec,
        working_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        run_count: usize,
    ) -> Self {
        Self {
            command,
            working_dir: working_dir.into(),
            output_dir: output_dir.into(),
            run_count,
        }
    }

    /// Reject batches that must not be executed.
    pub fn validate(&self) -> Result<()> {
        if self.run_count == 0 {
            return Err(ReproError::InvalidInput(
                "run count must be at least 1".to_string(),
            ));
        }
        self.command.validate()
    }
}

/// Caller-level abort. Once raised, no new run is started; runs already in
/// flight finish (or hit their timeout).
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal paired with the sender that raises it.
    pub fn channel() -> (watch::Sender<bool>, AbortSignal) {
        let (tx, rx) = watch::channel(false);
        (tx, AbortSignal { rx })
    }

    /// A signal that is never raised.
    pub fn never() -> AbortSignal {
        let (_tx, signal) = AbortSignal::channel();
        signal
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Runs that actually executed, in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub runs: Vec<RunOutcome>,

    /// Number of runs requested.
    pub requested: usize,

    /// Whether an abort stopped the batch before every run started.
    pub aborted: bool,
}

/// Execute `spec.run_count` runs with at most `max_parallel` in flight.
///
/// A run whose command fails to launch is still a run; it never stops the
/// batch. An I/O error writing any run's evidence fails the whole batch:
/// no further run is started, runs already in flight finish, and the first
/// error is returned.
#[instrument(skip_all, fields(command = %spec.command, runs = spec.run_count))]
pub async fn run_batch(
    launcher: Arc<dyn Launcher>,
    spec: &BatchSpec,
    max_parallel: usize,
    abort: &AbortSignal,
) -> Result<BatchOutcome> {
    spec.validate()?;
    if max_parallel == 0 {
        return Err(ReproError::InvalidInput(
            "max_parallel must be at least 1".to_string(),
        ));
    }
    let runner = CommandRunner::new(launcher, &spec.output_dir);
    runner.prepare().await?;

    info!(max_parallel, "starting batch");

    let sem = Arc::new(Semaphore::new(max_parallel));
    let command = Arc::new(spec.command.clone());
    // Raised by the first run whose evidence could not be written.
    let (fail_tx, _fail_rx) = watch::channel(false);
    let fail_flag = Arc::new(fail_tx);
    let mut tasks = Vec::with_capacity(spec.run_count);

    for index in 1..=spec.run_count {
        let sem = Arc::clone(&sem);
        let runner = runner.clone();
        let command = Arc::clone(&command);
        let working_dir = spec.working_dir.clone();
        let abort = abort.clone();
        let fail_flag = Arc::clone(&fail_flag);
        let fail_rx = fail_flag.subscribe();

        tasks.push(tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| ReproError::TaskFailed(e.to_string()))?;

            if abort.is_aborted() || *fail_rx.borrow() {
                return Ok(None);
            }

            let result = runner.run_once(&command, &working_dir, index).await;
            if result.is_err() {
                let _ = fail_flag.send(true);
            }
            result.map(Some)
        }));
    }

    let mut runs = Vec::with_capacity(spec.run_count);
    let mut first_error = None;
    for joined in join_all(tasks).await {
        match joined {
            Ok(Ok(Some(run))) => runs.push(run),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(ReproError::TaskFailed(e.to_string()));
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    runs.sort_by_key(|run| run.index);
    let aborted = runs.len() < spec.run_count;
    if aborted {
        info!(
            executed = runs.len(),
            requested = spec.run_count,
            "batch aborted before all runs started"
        );
    }

    Ok(BatchOutcome {
        runs,
        requested: spec.run_count,
        aborted,
    })
}
