//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ReproError, Result};

/// Hint markers that flag a line as an error fingerprint, in scan order.
pub const DEFAULT_HINT_MARKERS: &[&str] = &[
    "TypeError",
    "ReferenceError",
    "TimeoutError",
    "AssertionError",
    "expect(",
    "Error:",
];

/// Maximum signature length in characters.
pub const DEFAULT_MAX_SIGNATURE_LENGTH: usize = 240;

/// Shell used for [`CommandSpec::Shell`](crate::command::CommandSpec::Shell) commands.
#[cfg(windows)]
pub const DEFAULT_SHELL: &str = "cmd";
#[cfg(not(windows))]
pub const DEFAULT_SHELL: &str = "sh";

/// Controls how a signature is extracted from run output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureConfig {
    /// Substrings marking a line as an error line. First matching line wins.
    pub hint_markers: Vec<String>,

    /// Signatures and forbidden hits are truncated to this many characters.
    pub max_signature_length: usize,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            hint_markers: DEFAULT_HINT_MARKERS.iter().map(|s| s.to_string()).collect(),
            max_signature_length: DEFAULT_MAX_SIGNATURE_LENGTH,
        }
    }
}

/// Controls how runs within a batch are executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Kill a run after this many milliseconds. `None` waits forever.
    pub timeout_ms: Option<u64>,

    /// Maximum number of runs in flight at once (1 = sequential).
    pub max_parallel: usize,

    /// Extra environment variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,

    /// Program used to interpret shell command strings.
    pub shell: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            max_parallel: 1,
            env: BTreeMap::new(),
            shell: DEFAULT_SHELL.to_string(),
        }
    }
}

/// Top-level configuration shared by the analyzer and the verifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReproConfig {
    pub signature: SignatureConfig,
    pub runner: RunnerConfig,
}

impl ReproConfig {
    /// Reject configurations that cannot drive a batch.
    pub fn validate(&self) -> Result<()> {
        if self.runner.max_parallel == 0 {
            return Err(ReproError::InvalidInput(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.runner.shell.trim().is_empty() {
            return Err(ReproError::InvalidInput(
                "shell program must not be empty".to_string(),
            ));
        }
        if self.signature.max_signature_length == 0 {
            return Err(ReproError::InvalidInput(
                "max_signature_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_config_default() {
        let config = SignatureConfig::default();
        assert_eq!(config.max_signature_length, 240);
        assert_eq!(config.hint_markers.len(), 6);
        assert_eq!(config.hint_markers[0], "TypeError");
        assert_eq!(config.hint_markers[5], "Error:");
    }

    #[test]
    fn test_runner_config_default_is_sequential_without_timeout() {
        let config = RunnerConfig::default();
        assert_eq!(config.max_parallel, 1);
        assert!(config.timeout_ms.is_none());
        assert!(config.env.is_empty());
    }

    #[test]
    fn test_default_config_validates() {
        assert!(ReproConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let mut config = ReproConfig::default();
        config.runner.max_parallel = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_parallel"));
    }

    #[test]
    fn test_zero_signature_length_rejected() {
        let mut config = ReproConfig::default();
        config.signature.max_signature_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_from_json() {
        let raw = r#"{
            "signature": { "hint_markers": ["panicked at"], "max_signature_length": 80 },
            "runner": { "timeout_ms": 5000, "max_parallel": 2, "env": {"CI": "1"}, "shell": "bash" }
        }"#;
        let config: ReproConfig = serde_json::from_str(raw).expect("parse config");
        assert_eq!(config.signature.hint_markers, vec!["panicked at".to_string()]);
        assert_eq!(config.runner.timeout_ms, Some(5000));
        assert_eq!(config.runner.env.get("CI").map(String::as_str), Some("1"));
    }
}
