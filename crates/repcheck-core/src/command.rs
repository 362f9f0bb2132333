//! The command a batch runs: a program with arguments, or a shell script.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ReproError, Result};

/// The command under test.
///
/// `Argv` passes arguments to the program as discrete elements and never
/// goes through a shell. `Shell` hands a script string to the configured
/// shell and is only needed when the caller relies on pipes, redirection
/// or other shell syntax.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CommandSpec {
    Argv { program: String, args: Vec<String> },
    Shell { script: String },
}

impl CommandSpec {
    /// Structured command from a program and its arguments.
    pub fn argv(program: impl Into<String>, args: Vec<String>) -> Self {
        CommandSpec::Argv {
            program: program.into(),
            args,
        }
    }

    /// Shell script executed through the configured shell.
    pub fn shell(script: impl Into<String>) -> Self {
        CommandSpec::Shell {
            script: script.into(),
        }
    }

    /// Build an `Argv` command from a full argument vector
    /// (first element is the program).
    pub fn from_argv(mut argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            return Err(ReproError::InvalidInput(
                "command argument vector is empty".to_string(),
            ));
        }
        let program = argv.remove(0);
        let spec = CommandSpec::argv(program, argv);
        spec.validate()?;
        Ok(spec)
    }

    /// Reject commands that cannot be executed.
    pub fn validate(&self) -> Result<()> {
        match self {
            CommandSpec::Argv { program, .. } if program.trim().is_empty() => Err(
                ReproError::InvalidInput("command program must not be empty".to_string()),
            ),
            CommandSpec::Shell { script } if script.trim().is_empty() => Err(
                ReproError::InvalidInput("command string must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Program and arguments to hand to the OS.
    ///
    /// `shell` is only consulted for [`CommandSpec::Shell`].
    pub fn to_argv(&self, shell: &str) -> (String, Vec<String>) {
        match self {
            CommandSpec::Argv { program, args } => (program.clone(), args.clone()),
            CommandSpec::Shell { script } => {
                (shell.to_string(), vec![shell_flag(shell).to_string(), script.clone()])
            }
        }
    }
}

/// `cmd` and `cmd.exe` take `/C`; every POSIX-style shell takes `-c`.
fn shell_flag(shell: &str) -> &'static str {
    let name = shell
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(shell)
        .to_ascii_lowercase();
    if name == "cmd" || name == "cmd.exe" {
        "/C"
    } else {
        "-c"
    }
}

impl fmt::Display for CommandSpec {
    /// The string recorded as `command` in reports.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSpec::Shell { script } => f.write_str(script),
            CommandSpec::Argv { program, args } => {
                write!(f, "{}", quote_word(program))?;
                for arg in args {
                    write!(f, " {}", quote_word(arg))?;
                }
                Ok(())
            }
        }
    }
}

fn quote_word(word: &str) -> String {
    if !word.is_empty() && !word.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}
