//! Integration tests for the reproduce-then-verify workflow.
#![cfg(unix)]

use repcheck_core::{
    load_prior_signature, AbortSignal, BatchSpec, CommandSpec, Expectation, FixVerifier,
    ReproAnalyzer, ReproConfig, VerificationReport, NOT_VERIFIED_EXIT_CODE, REPRO_REPORT_FILE,
    VERIFY_REPORT_FILE,
};
use std::path::Path;

fn batch(dir: &Path, script: &str, out: &str, runs: usize) -> BatchSpec {
    BatchSpec::new(CommandSpec::shell(script), dir, dir.join(out), runs)
}

/// Test: no forbidden patterns and a passing command verifies
#[tokio::test]
async fn test_no_patterns_passing_command_verifies() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = batch(dir.path(), "echo fine", "verify", 2);

    let report = FixVerifier::new(ReproConfig::default())
        .verify(&spec, &[], None, &AbortSignal::never())
        .await
        .expect("verify failed");

    assert!(report.forbidden_patterns.is_empty());
    assert!(report.all_passed);
    assert!(report.verified);
    assert_eq!(report.exit_code(), 0);
}

/// Test: no forbidden patterns and a failing command does not verify
#[tokio::test]
async fn test_no_patterns_failing_command_does_not_verify() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = batch(dir.path(), "exit 4", "verify", 2);

    let report = FixVerifier::new(ReproConfig::default())
        .verify(&spec, &[], None, &AbortSignal::never())
        .await
        .expect("verify failed");

    assert!(!report.all_passed);
    assert!(report.no_forbidden_signature);
    assert!(!report.verified);
    assert_eq!(report.exit_code(), NOT_VERIFIED_EXIT_CODE);
}

/// Test: reproduce a failure, fix it, and verify against the saved report
#[tokio::test]
async fn test_reproduce_then_verify_fixed_command() {
    let dir = tempfile::tempdir().expect("tempdir");

    let repro_spec = batch(
        dir.path(),
        r#"echo "TypeError: x is undefined" >&2; exit 1"#,
        "repro",
        3,
    );
    let repro = ReproAnalyzer::new(ReproConfig::default())
        .analyze(&repro_spec, Expectation::Fail, &AbortSignal::never())
        .await
        .expect("analyze failed");
    assert!(repro.reproducible);

    let prior = load_prior_signature(&repro_spec.output_dir.join(REPRO_REPORT_FILE));
    assert_eq!(prior.as_deref(), Some("TypeError: x is undefined"));

    let verify_spec = batch(dir.path(), "echo 'x is defined now'", "verify", 3);
    let report = FixVerifier::new(ReproConfig::default())
        .verify(&verify_spec, &[], prior.as_deref(), &AbortSignal::never())
        .await
        .expect("verify failed");

    assert_eq!(report.forbidden_patterns, vec!["TypeError: x is undefined"]);
    assert!(report.verified);
    assert_eq!(report.runs, 3);

    let content = std::fs::read_to_string(verify_spec.output_dir.join(VERIFY_REPORT_FILE))
        .expect("report written");
    let persisted: VerificationReport = serde_json::from_str(&content).expect("valid report");
    assert_eq!(persisted, report);
}

/// Test: exit code 0 is not enough if the old signature is still printed
#[tokio::test]
async fn test_signature_still_present_fails_verification() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = batch(
        dir.path(),
        r#"echo "caught TypeError: x is undefined" >&2; exit 0"#,
        "verify",
        3,
    );

    let report = FixVerifier::new(ReproConfig::default())
        .verify(
            &spec,
            &[],
            Some("TypeError: x is undefined"),
            &AbortSignal::never(),
        )
        .await
        .expect("verify failed");

    assert!(report.all_passed);
    assert!(!report.no_forbidden_signature);
    assert!(!report.verified);
    assert!(report
        .details
        .iter()
        .all(|d| d.forbidden_hit == "TypeError: x is undefined"));
}

/// Test: explicit patterns are checked in order, prior signature last
#[tokio::test]
async fn test_explicit_patterns_checked_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = batch(dir.path(), "echo 'beta alpha'", "verify", 1);
    let explicit = vec!["alpha".to_string(), "beta".to_string()];

    let report = FixVerifier::new(ReproConfig::default())
        .verify(&spec, &explicit, Some("gamma"), &AbortSignal::never())
        .await
        .expect("verify failed");

    assert_eq!(report.forbidden_patterns, vec!["alpha", "beta", "gamma"]);
    assert_eq!(report.details[0].forbidden_hit, "alpha");
    assert!(!report.verified);
}

/// Test: a malformed signature file degrades to the explicit patterns
#[tokio::test]
async fn test_malformed_signature_file_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, "{ truncated").unwrap();

    let prior = load_prior_signature(&bad);
    assert!(prior.is_none());

    let spec = batch(dir.path(), "echo ok", "verify", 1);
    let report = FixVerifier::new(ReproConfig::default())
        .verify(&spec, &["panic".to_string()], prior.as_deref(), &AbortSignal::never())
        .await
        .expect("verify failed");

    assert_eq!(report.forbidden_patterns, vec!["panic"]);
    assert!(report.verified);
}
