//! Readiness from an external tracker command.

use std::process::Command;

use corral_coord::ReadinessProvider;
use corral_core::{CoreError, TaskId};

/// Runs a shell command and reads one ready task id per output line.
///
/// The tracker owns dependency resolution and ordering; lines come back in
/// the order printed, which is the order tasks will be considered.
#[derive(Debug, Clone)]
pub struct CommandReadiness {
    command: String,
}

impl CommandReadiness {
    /// Provider running the given shell command.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl ReadinessProvider for CommandReadiness {
    fn ready_tasks(&self) -> Result<Vec<TaskId>, CoreError> {
        let output = Command::new("sh")
            .args(["-c", &self.command])
            .output()
            .map_err(|e| CoreError::provider("ready command", e))?;
        if !output.status.success() {
            return Err(CoreError::provider(
                "ready command",
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(TaskId::new)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_tasks_in_order() {
        let provider = CommandReadiness::new("printf 'a\\nb\\n\\nc\\n'");
        let tasks = provider.ready_tasks().unwrap();
        assert_eq!(
            tasks,
            vec![TaskId::new("a"), TaskId::new("b"), TaskId::new("c")]
        );
    }

    #[test]
    fn test_failing_command_is_provider_failure() {
        let provider = CommandReadiness::new("exit 3");
        assert!(matches!(
            provider.ready_tasks().unwrap_err(),
            CoreError::ProviderFailure { .. }
        ));
    }
}
