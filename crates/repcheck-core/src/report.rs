//! Persisted report artifacts.
//!
//! Field names here are a cross-tool contract: the verifier reads
//! `common_signature` back out of a `repro_report.json` written by the
//! analyzer, possibly by an older or newer build.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ReproError, Result};

/// File name of the analyzer report inside the output directory.
pub const REPRO_REPORT_FILE: &str = "repro_report.json";

/// File name of the verifier report inside the output directory.
pub const VERIFY_REPORT_FILE: &str = "verify_report.json";

/// What the caller expects the command to do on every run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    #[default]
    Fail,
    Pass,
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Fail => f.write_str("fail"),
            Expectation::Pass => f.write_str("pass"),
        }
    }
}

/// Per-run entry of a [`ReproductionReport`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReproRunDetail {
    pub index: usize,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub signature: String,
    pub stdout_file: PathBuf,
    pub stderr_file: PathBuf,
}

/// Outcome of a reproduction batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReproductionReport {
    pub command: String,
    pub expected: Expectation,
    pub reproducible: bool,

    /// Number of runs that executed.
    pub runs: usize,
    pub failed_runs: usize,
    pub passed_runs: usize,
    pub signature_consistent: bool,

    /// Signature shared by every failing run, or empty.
    pub common_signature: String,
    pub details: Vec<ReproRunDetail>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub aborted: bool,
}

/// Per-run entry of a [`VerificationReport`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyRunDetail {
    pub index: usize,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub stdout_file: PathBuf,
    pub stderr_file: PathBuf,

    /// First forbidden pattern found in this run's output, or empty.
    pub forbidden_hit: String,
}

/// Outcome of a verification batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationReport {
    pub command: String,

    /// Number of runs that executed.
    pub runs: usize,
    pub all_passed: bool,
    pub no_forbidden_signature: bool,
    pub verified: bool,
    pub forbidden_patterns: Vec<String>,
    pub details: Vec<VerifyRunDetail>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub aborted: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Serialize `report` as pretty JSON into `path`.
pub fn write_report_json<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(report)?;
    std::fs::write(path, content).map_err(|e| ReproError::io(path, e))
}
