//! Fix verification: the command must now exit cleanly on every run and the
//! old failure signature must not appear anywhere in its output.

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::batch::{run_batch, AbortSignal, BatchSpec};
use crate::config::ReproConfig;
use crate::error::Result;
use crate::report::{write_report_json, VerificationReport, VerifyRunDetail, VERIFY_REPORT_FILE};
use crate::runner::{Launcher, RunOutcome, SystemLauncher};
use crate::signature::truncate_chars;

/// Process exit code for a batch that ran but did not verify.
pub const NOT_VERIFIED_EXIT_CODE: u8 = 11;

impl VerificationReport {
    /// 0 when verified, [`NOT_VERIFIED_EXIT_CODE`] otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.verified {
            0
        } else {
            NOT_VERIFIED_EXIT_CODE
        }
    }
}

/// Read `common_signature` from a persisted reproduction report.
///
/// A missing, unreadable or malformed file, or one without a string
/// `common_signature`, yields `None`; it never fails verification.
pub fn load_prior_signature(path: &Path) -> Option<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "signature file unreadable, ignoring");
            return None;
        }
    };

    let data: Value = match serde_json::from_str(&content) {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "signature file is not valid JSON, ignoring");
            return None;
        }
    };

    match data.get("common_signature").and_then(Value::as_str) {
        Some(signature) if !signature.is_empty() => Some(signature.to_string()),
        Some(_) => None,
        None => {
            warn!(path = %path.display(), "signature file has no common_signature, ignoring");
            None
        }
    }
}

/// Explicit patterns followed by the prior signature, with empty strings
/// and duplicates dropped. First occurrence keeps its position.
pub fn resolve_forbidden_patterns(
    explicit: &[String],
    prior_signature: Option<&str>,
) -> Vec<String> {
    let mut patterns: Vec<String> = Vec::with_capacity(explicit.len() + 1);
    for candidate in explicit.iter().map(String::as_str).chain(prior_signature) {
        if !candidate.is_empty() && !patterns.iter().any(|p| p == candidate) {
            patterns.push(candidate.to_string());
        }
    }
    patterns
}

/// The first pattern (in order) occurring anywhere in `output`, truncated
/// to `max_len` characters; empty when none occurs.
pub fn find_forbidden_hit(output: &str, patterns: &[String], max_len: usize) -> String {
    patterns
        .iter()
        .find(|pattern| !pattern.is_empty() && output.contains(pattern.as_str()))
        .map(|pattern| truncate_chars(pattern, max_len))
        .unwrap_or_default()
}

/// Runs a fixed command repeatedly and checks that the old failure is gone.
pub struct FixVerifier {
    config: ReproConfig,
    launcher: Arc<dyn Launcher>,
}

impl FixVerifier {
    /// Verifier that launches real processes.
    pub fn new(config: ReproConfig) -> Self {
        let launcher = Arc::new(SystemLauncher::new(config.runner.clone()));
        Self { config, launcher }
    }

    /// Verifier with a custom launcher.
    pub fn with_launcher(config: ReproConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self { config, launcher }
    }

    /// Run the batch against `forbidden_patterns` plus the prior signature,
    /// judge it, and persist `verify_report.json` into the output directory.
    pub async fn verify(
        &self,
        spec: &BatchSpec,
        forbidden_patterns: &[String],
        prior_signature: Option<&str>,
        abort: &AbortSignal,
    ) -> Result<VerificationReport> {
        self.config.validate()?;
        spec.validate()?;

        let patterns = resolve_forbidden_patterns(forbidden_patterns, prior_signature);
        info!(
            command = %spec.command,
            runs = spec.run_count,
            forbidden = patterns.len(),
            "verifying fix"
        );

        let batch = run_batch(
            Arc::clone(&self.launcher),
            spec,
            self.config.runner.max_parallel,
            abort,
        )
        .await?;

        let mut report = judge_verification(
            spec.command.to_string(),
            batch.requested,
            &batch.runs,
            patterns,
            self.config.signature.max_signature_length,
        );
        report.aborted = batch.aborted;

        let report_path = spec.output_dir.join(VERIFY_REPORT_FILE);
        write_report_json(&report_path, &report)?;

        info!(
            verified = report.verified,
            all_passed = report.all_passed,
            no_forbidden_signature = report.no_forbidden_signature,
            report = %report_path.display(),
            "fix verification finished"
        );

        Ok(report)
    }
}

/// Pure verdict over a set of run outcomes.
///
/// With no forbidden patterns the verdict is exactly "every requested run
/// exited 0".
pub fn judge_verification(
    command: String,
    requested: usize,
    runs: &[RunOutcome],
    forbidden_patterns: Vec<String>,
    max_hit_length: usize,
) -> VerificationReport {
    let details: Vec<VerifyRunDetail> = runs
        .iter()
        .map(|run| VerifyRunDetail {
            index: run.index,
            exit_code: run.exit_code,
            duration_ms: run.duration_ms,
            stdout_file: run.stdout_file.clone(),
            stderr_file: run.stderr_file.clone(),
            forbidden_hit: if forbidden_patterns.is_empty() {
                String::new()
            } else {
                find_forbidden_hit(&run.merged_output(), &forbidden_patterns, max_hit_length)
            },
        })
        .collect();

    let all_passed = details.len() == requested && details.iter().all(|d| d.exit_code == 0);
    let no_forbidden_signature = details.iter().all(|d| d.forbidden_hit.is_empty());
    let verified = all_passed && no_forbidden_signature;

    VerificationReport {
        command,
        runs: details.len(),
        all_passed,
        no_forbidden_signature,
        verified,
        forbidden_patterns,
        details,
        aborted: false,
    }
}
