//! Completion hook.
//!
//! Runs a user-supplied command once a backup has been produced and rotated.
//! The command string is split on whitespace and executed directly, without a
//! shell, so pipes and redirects are passed through as literal arguments.

use std::process::Command;

use tracing::{error, info, warn};

/// What happened when the completion command was run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Command exited with status 0
    Succeeded,
    /// Command ran but reported failure; None when killed by a signal
    ExitedWithFailure(Option<i32>),
    /// Command could not be started
    LaunchFailed(String),
    /// Command string was empty
    Skipped,
}

/// Split `command` into program and arguments and run it to completion.
///
/// Never fails: every problem is logged and returned as an outcome.
pub fn run_completion(command: &str) -> NotifyOutcome {
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        warn!("Completion command is empty, nothing to run");
        return NotifyOutcome::Skipped;
    };

    info!("Executing completion command: {}", command.trim());
    match Command::new(program).args(parts).status() {
        Ok(status) if status.success() => NotifyOutcome::Succeeded,
        Ok(status) => {
            error!("Completion command exited with {}", status);
            NotifyOutcome::ExitedWithFailure(status.code())
        }
        Err(e) => {
            error!("Could not run completion command {}: {}", program, e);
            NotifyOutcome::LaunchFailed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_is_skipped() {
        assert_eq!(run_completion("   "), NotifyOutcome::Skipped);
    }

    #[test]
    fn test_missing_program_is_launch_failure() {
        let outcome = run_completion("definitely-not-a-real-program-4711 --flag");
        assert!(matches!(outcome, NotifyOutcome::LaunchFailed(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_arguments_are_passed_literally() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("done");
        let outcome = run_completion(&format!("touch {}", marker.display()));
        assert_eq!(outcome, NotifyOutcome::Succeeded);
        assert!(marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_reported() {
        assert_eq!(run_completion("false"), NotifyOutcome::ExitedWithFailure(Some(1)));
    }
}
