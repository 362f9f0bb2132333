//! repcheck - deterministic failure reproduction and fix verification CLI
//!
//! ## Commands
//!
//! - `repro`: run a command several times and decide whether it fails (or
//!   passes) with a stable signature
//! - `verify`: rerun a fixed command and confirm the old signature is gone
//!
//! Exit codes: `0` success, `10` not reproducible, `11` not verified,
//! `1` internal fault, `2` usage error.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use repcheck_core::{
    load_prior_signature, AbortSignal, BatchSpec, CommandSpec, Expectation, FixVerifier,
    ReproAnalyzer, ReproConfig, RunnerConfig, SignatureConfig, REPRO_REPORT_FILE,
    VERIFY_REPORT_FILE,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "repcheck")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reproduce failures deterministically and verify their fixes", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command repeatedly and check that it fails the same way every time
    Repro {
        #[command(flatten)]
        target: TargetArgs,

        /// Expected outcome of every run
        #[arg(long, value_enum, env = "REPCHECK_EXPECT", default_value_t = ExpectArg::Fail)]
        expect: ExpectArg,

        /// Directory for run logs and repro_report.json
        #[arg(long, env = "REPCHECK_REPRO_DIR", default_value = ".debug/repro")]
        output_dir: PathBuf,

        #[command(flatten)]
        tuning: TuningArgs,
    },

    /// Rerun a fixed command and check that the old failure signature is gone
    Verify {
        #[command(flatten)]
        target: TargetArgs,

        /// Directory for run logs and verify_report.json
        #[arg(long, env = "REPCHECK_VERIFY_DIR", default_value = ".debug/verify")]
        output_dir: PathBuf,

        /// repro_report.json whose common_signature must not reappear
        #[arg(long)]
        signature_file: Option<PathBuf>,

        /// Text that must not appear in any run's output (repeatable)
        #[arg(long = "must-not-contain", value_name = "PATTERN")]
        must_not_contain: Vec<String>,

        #[command(flatten)]
        tuning: TuningArgs,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Working directory the command runs in
    #[arg(long, env = "REPCHECK_PROJECT_ROOT", default_value = ".")]
    project_root: PathBuf,

    /// Number of runs
    #[arg(
        long,
        env = "REPCHECK_RUNS",
        default_value_t = 2,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    runs: u64,

    /// Command string executed through the shell
    #[arg(
        long,
        visible_aliases = ["repro-cmd", "verify-cmd"],
        required_unless_present = "argv",
        conflicts_with = "argv"
    )]
    cmd: Option<String>,

    /// Program and arguments executed directly, without a shell
    #[arg(last = true, value_name = "PROGRAM")]
    argv: Vec<String>,
}

impl TargetArgs {
    fn command_spec(&self) -> Result<CommandSpec> {
        let spec = match &self.cmd {
            Some(script) => CommandSpec::shell(script.clone()),
            None => CommandSpec::from_argv(self.argv.clone())?,
        };
        spec.validate()?;
        Ok(spec)
    }

    fn batch(&self, output_dir: &Path) -> Result<BatchSpec> {
        let run_count = usize::try_from(self.runs).context("run count out of range")?;
        Ok(BatchSpec::new(
            self.command_spec()?,
            absolutize(&self.project_root)?,
            absolutize(output_dir)?,
            run_count,
        ))
    }
}

#[derive(Args)]
struct TuningArgs {
    /// Kill a run that takes longer than this many milliseconds
    #[arg(long, env = "REPCHECK_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Maximum number of runs in flight at once
    #[arg(
        long,
        env = "REPCHECK_PARALLEL",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    parallel: u64,

    /// Shell used for --cmd
    #[arg(long, env = "REPCHECK_SHELL", default_value = repcheck_core::config::DEFAULT_SHELL)]
    shell: String,

    /// Extra environment variable for the command (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    env: Vec<(String, String)>,

    /// Error hint marker; replaces the built-in list when given (repeatable)
    #[arg(long = "hint", value_name = "TEXT")]
    hints: Vec<String>,

    /// Maximum signature length in characters
    #[arg(
        long,
        env = "REPCHECK_MAX_SIGNATURE_LEN",
        default_value_t = repcheck_core::config::DEFAULT_MAX_SIGNATURE_LENGTH
    )]
    max_signature_len: usize,
}

impl TuningArgs {
    fn config(&self) -> Result<ReproConfig> {
        let mut signature = SignatureConfig {
            max_signature_length: self.max_signature_len,
            ..SignatureConfig::default()
        };
        if !self.hints.is_empty() {
            signature.hint_markers = self.hints.clone();
        }

        let config = ReproConfig {
            signature,
            runner: RunnerConfig {
                timeout_ms: self.timeout_ms,
                max_parallel: usize::try_from(self.parallel).context("parallelism out of range")?,
                env: self.env.iter().cloned().collect(),
                shell: self.shell.clone(),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ExpectArg {
    Fail,
    Pass,
}

impl From<ExpectArg> for Expectation {
    fn from(arg: ExpectArg) -> Self {
        match arg {
            ExpectArg::Fail => Expectation::Fail,
            ExpectArg::Pass => Expectation::Pass,
        }
    }
}

fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Ok(cwd.join(path))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    repcheck_core::init_tracing(cli.json, level);

    let abort = abort_on_ctrl_c();

    let code = match cli.command {
        Commands::Repro {
            target,
            expect,
            output_dir,
            tuning,
        } => cmd_repro(&target, expect.into(), &output_dir, &tuning, &abort).await?,
        Commands::Verify {
            target,
            output_dir,
            signature_file,
            must_not_contain,
            tuning,
        } => {
            cmd_verify(
                &target,
                &output_dir,
                signature_file.as_deref(),
                &must_not_contain,
                &tuning,
                &abort,
            )
            .await?
        }
    };

    Ok(ExitCode::from(code))
}

/// Stop scheduling new runs on the first Ctrl-C.
fn abort_on_ctrl_c() -> AbortSignal {
    let (tx, signal) = AbortSignal::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, no further runs will be started");
            let _ = tx.send(true);
        }
    });
    signal
}

/// Run the reproduction batch and print its report
async fn cmd_repro(
    target: &TargetArgs,
    expectation: Expectation,
    output_dir: &Path,
    tuning: &TuningArgs,
    abort: &AbortSignal,
) -> Result<u8> {
    let config = tuning.config()?;
    let spec = target.batch(output_dir)?;

    let report = ReproAnalyzer::new(config)
        .analyze(&spec, expectation, abort)
        .await
        .context("Reproduction analysis failed")?;

    print_report(&report, &spec.output_dir.join(REPRO_REPORT_FILE))?;
    Ok(report.exit_code())
}

/// Run the verification batch and print its report
async fn cmd_verify(
    target: &TargetArgs,
    output_dir: &Path,
    signature_file: Option<&Path>,
    must_not_contain: &[String],
    tuning: &TuningArgs,
    abort: &AbortSignal,
) -> Result<u8> {
    let config = tuning.config()?;
    let spec = target.batch(output_dir)?;

    let prior = signature_file.and_then(load_prior_signature);
    if let Some(signature) = &prior {
        info!(signature = %signature, "loaded prior failure signature");
    }

    let report = FixVerifier::new(config)
        .verify(&spec, must_not_contain, prior.as_deref(), abort)
        .await
        .context("Fix verification failed")?;

    print_report(&report, &spec.output_dir.join(VERIFY_REPORT_FILE))?;
    Ok(report.exit_code())
}

fn print_report<T: Serialize>(report: &T, path: &Path) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    println!("report: {}", path.display());
    Ok(())
}
