//! repcheck core - deterministic failure reproduction and fix verification
//!
//! Provides:
//! - A command runner that captures exit code, duration and both output
//!   streams of a single run, and persists them as evidence
//! - A reproduction analyzer that runs a command repeatedly and decides
//!   whether it fails with a stable signature
//! - A fix verifier that confirms a forbidden signature no longer appears
//!   and every run exits cleanly

pub mod analyzer;
pub mod batch;
pub mod command;
pub mod config;
pub mod error;
pub mod report;
pub mod runner;
pub mod signature;
pub mod telemetry;
pub mod verifier;

// Re-export key types
pub use analyzer::{judge_reproduction, ReproAnalyzer, NOT_REPRODUCIBLE_EXIT_CODE};
pub use batch::{run_batch, AbortSignal, BatchOutcome, BatchSpec};
pub use command::CommandSpec;
pub use config::{ReproConfig, RunnerConfig, SignatureConfig};
pub use error::{ReproError, Result};
pub use report::{
    write_report_json, Expectation, ReproRunDetail, ReproductionReport, VerificationReport,
    VerifyRunDetail, REPRO_REPORT_FILE, VERIFY_REPORT_FILE,
};
pub use runner::{
    CommandRunner, Execution, Launcher, RunOutcome, SystemLauncher, LAUNCH_FAILURE_EXIT_CODE,
    TIMEOUT_EXIT_CODE,
};
pub use signature::extract_signature;
pub use telemetry::init_tracing;
pub use verifier::{
    find_forbidden_hit, judge_verification, load_prior_signature, resolve_forbidden_patterns,
    FixVerifier, NOT_VERIFIED_EXIT_CODE,
};

/// repcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
