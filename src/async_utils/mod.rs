//! Asynchronous utilities for use with Tokio.

use std::{process::Output, sync::LazyLock};

use regex::Regex;

use crate::prelude::*;

pub mod io;

/// A default error regex for checking command output.
pub static DEFAULT_ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Report any command failures, and include any error output.
///
/// Standard output and standard error are logged. Standard error may
/// optionally be checked against a regex, for tools which print errors but
/// still exit successfully.
pub fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    error_regex: Option<&Regex>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(command_name, output = %stdout, "Standard output from command");
    if !stderr.is_empty() {
        debug!(command_name, output = %stderr, "Standard error from command");
    }

    if output.status.success() {
        match error_regex {
            Some(regex) if regex.is_match(&stderr) => Err(anyhow!(
                "{} printed error output:\n{}",
                command_name,
                stderr,
            )),
            _ => Ok(()),
        }
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        Err(anyhow!(
            "{} was killed by a signal, with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}

#[cfg(test)]
mod tests {
    use tokio::process::Command;

    use super::*;

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let output = Command::new("sh")
            .args(["-c", "echo 'no device' >&2; exit 3"])
            .output()
            .await
            .unwrap();
        let err = check_for_command_failure("sh", &output, None).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit code 3"), "{msg}");
        assert!(msg.contains("no device"), "{msg}");
    }

    #[tokio::test]
    async fn error_regex_catches_successful_failures() {
        let output = Command::new("sh")
            .args(["-c", "echo 'Error opening /dev/video0' >&2"])
            .output()
            .await
            .unwrap();
        assert!(check_for_command_failure("sh", &output, None).is_ok());
        assert!(
            check_for_command_failure("sh", &output, Some(&DEFAULT_ERROR_REGEX)).is_err()
        );
    }
}
