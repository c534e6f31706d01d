//! Thin wrapper over `std::process::Command` for the external tools we drive.

#![allow(missing_docs)]

use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;

use crate::core::errors::{Result, WstError};

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout when the command succeeded, otherwise a `Command` error.
    pub fn into_stdout(self, command: &str) -> Result<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            Err(WstError::Command {
                command: command.to_string(),
                details: format!(
                    "exit {}: {}",
                    self.code.unwrap_or(-1),
                    first_non_empty(&self.stderr, &self.stdout)
                ),
            })
        }
    }

    /// stderr and stdout joined, for matching on tool messages.
    #[must_use]
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

fn first_non_empty<'a>(a: &'a str, b: &'a str) -> &'a str {
    let a = a.trim();
    if a.is_empty() { b.trim() } else { a }
}

/// Run `program` with `args`, optionally inside `cwd`, and capture its output.
///
/// Failing to spawn is an error; a non-zero exit is reported through
/// [`CommandOutput::success`].
pub fn run<I, S>(program: impl AsRef<OsStr>, args: I, cwd: Option<&Path>) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let mut command = Command::new(program);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let output = command.output().map_err(|source| WstError::Command {
        command: program.to_string_lossy().into_owned(),
        details: source.to_string(),
    })?;
    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_of_successful_command() {
        let output = run("sh", ["-c", "printf hello"], None).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.into_stdout("sh").unwrap(), "hello");
    }

    #[test]
    fn non_zero_exit_becomes_command_error() {
        let output = run("sh", ["-c", "echo boom >&2; exit 3"], None).unwrap();
        assert!(!output.success);
        assert_eq!(output.code, Some(3));
        let err = output.into_stdout("sh").unwrap_err();
        assert_eq!(err.code(), "WST-2003");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn missing_binary_is_error() {
        let err = run("wst-definitely-not-a-binary", ["x"], None).unwrap_err();
        assert_eq!(err.code(), "WST-2003");
    }

    #[test]
    fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let output = run("pwd", std::iter::empty::<&str>(), Some(dir.path())).unwrap();
        let reported = std::fs::canonicalize(output.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }
}
