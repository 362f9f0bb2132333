//! Reproduction analysis: does the command fail (or pass) the same way on
//! every run?

use std::sync::Arc;
use tracing::info;

use crate::batch::{run_batch, AbortSignal, BatchSpec};
use crate::config::{ReproConfig, SignatureConfig};
use crate::error::Result;
use crate::report::{
    write_report_json, Expectation, ReproRunDetail, ReproductionReport, REPRO_REPORT_FILE,
};
use crate::runner::{Launcher, RunOutcome, SystemLauncher};
use crate::signature::extract_signature;

/// Process exit code for a batch that ran but did not reproduce.
pub const NOT_REPRODUCIBLE_EXIT_CODE: u8 = 10;

impl ReproductionReport {
    /// 0 when reproducible, [`NOT_REPRODUCIBLE_EXIT_CODE`] otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.reproducible {
            0
        } else {
            NOT_REPRODUCIBLE_EXIT_CODE
        }
    }
}

/// Runs a command repeatedly and judges whether its failure is stable.
pub struct ReproAnalyzer {
    config: ReproConfig,
    launcher: Arc<dyn Launcher>,
}

impl ReproAnalyzer {
    /// Analyzer that launches real processes.
    pub fn new(config: ReproConfig) -> Self {
        let launcher = Arc::new(SystemLauncher::new(config.runner.clone()));
        Self { config, launcher }
    }

    /// Analyzer with a custom launcher.
    pub fn with_launcher(config: ReproConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self { config, launcher }
    }

    /// Run the batch, judge it, and persist `repro_report.json` into the
    /// batch's output directory.
    ///
    /// A negative verdict is still `Ok`; only invalid input and I/O faults
    /// are errors.
    pub async fn analyze(
        &self,
        spec: &BatchSpec,
        expectation: Expectation,
        abort: &AbortSignal,
    ) -> Result<ReproductionReport> {
        self.config.validate()?;
        spec.validate()?;

        info!(
            command = %spec.command,
            runs = spec.run_count,
            expected = %expectation,
            "analyzing reproduction"
        );

        let batch = run_batch(
            Arc::clone(&self.launcher),
            spec,
            self.config.runner.max_parallel,
            abort,
        )
        .await?;

        let mut report = judge_reproduction(
            spec.command.to_string(),
            expectation,
            batch.requested,
            &batch.runs,
            &self.config.signature,
        );
        report.aborted = batch.aborted;

        let report_path = spec.output_dir.join(REPRO_REPORT_FILE);
        write_report_json(&report_path, &report)?;

        info!(
            reproducible = report.reproducible,
            signature_consistent = report.signature_consistent,
            failed_runs = report.failed_runs,
            report = %report_path.display(),
            "reproduction analysis finished"
        );

        Ok(report)
    }
}

/// Pure verdict over a set of run outcomes.
///
/// `requested` is the number of runs the caller asked for; a batch with
/// fewer executed runs (after an abort) can never be reproducible.
pub fn judge_reproduction(
    command: String,
    expectation: Expectation,
    requested: usize,
    runs: &[RunOutcome],
    config: &SignatureConfig,
) -> ReproductionReport {
    let details: Vec<ReproRunDetail> = runs
        .iter()
        .map(|run| ReproRunDetail {
            index: run.index,
            exit_code: run.exit_code,
            duration_ms: run.duration_ms,
            signature: extract_signature(&run.merged_output(), config),
            stdout_file: run.stdout_file.clone(),
            stderr_file: run.stderr_file.clone(),
        })
        .collect();

    let failed_runs = details.iter().filter(|d| d.exit_code != 0).count();
    let passed_runs = details.len() - failed_runs;

    let signatures: Vec<&str> = details
        .iter()
        .filter(|d| d.exit_code != 0 && !d.signature.is_empty())
        .map(|d| d.signature.as_str())
        .collect();
    let signature_consistent = match signatures.first() {
        Some(first) => signatures.iter().all(|s| s == first),
        None => false,
    };

    let reproducible = match expectation {
        Expectation::Fail => failed_runs == requested && signature_consistent,
        Expectation::Pass => passed_runs == requested,
    };

    let common_signature = if signature_consistent {
        signatures[0].to_string()
    } else {
        String::new()
    };

    ReproductionReport {
        command,
        expected: expectation,
        reproducible,
        runs: details.len(),
        failed_runs,
        passed_runs,
        signature_consistent,
        common_signature,
        details,
        aborted: false,
    }
}
