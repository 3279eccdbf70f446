//! Run bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, RunId, RunStatus};

/// Record of one task execution.
///
/// Owned and mutated by the runner that started it; finalized exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Unique run identifier.
    pub run_id: RunId,

    /// Name of the task that was executed.
    pub task_name: String,

    /// Current run status.
    pub status: RunStatus,

    /// When the child was spawned (or the run was rejected).
    pub started_at: Option<DateTime<Utc>>,

    /// When the run reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,

    /// Exit code; absent when killed by a signal or cancelled.
    pub exit_code: Option<i32>,

    /// Why the run failed without producing an exit code.
    pub error: Option<String>,

    /// Last lines written to stderr.
    pub stderr_tail: Vec<String>,
}

impl RunResult {
    /// Create a pending run for a task.
    pub fn new(task_name: impl Into<String>) -> Self {
        Self::with_id(RunId::generate(), task_name)
    }

    /// Create a pending run with a specific ID.
    pub fn with_id(run_id: RunId, task_name: impl Into<String>) -> Self {
        Self {
            run_id,
            task_name: task_name.into(),
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
            exit_code: None,
            error: None,
            stderr_tail: Vec::new(),
        }
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Mark the run as started.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.transition(RunStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Finalize from the child's exit code.
    ///
    /// `None` means the child was terminated by a signal.
    pub fn complete(&mut self, exit_code: Option<i32>) -> Result<(), CoreError> {
        let next = if exit_code == Some(0) {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        self.transition(next)?;
        self.exit_code = exit_code;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the run as failed without an exit code.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.transition(RunStatus::Failed)?;
        let now = Utc::now();
        self.started_at.get_or_insert(now);
        self.ended_at = Some(now);
        self.error = Some(error.into());
        Ok(())
    }

    /// Mark the run as cancelled.
    pub fn cancel(&mut self) -> Result<(), CoreError> {
        self.transition(RunStatus::Cancelled)?;
        self.exit_code = None;
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Wall-clock duration, once finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        let secs = self
            .duration()
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
            .unwrap_or_default();
        match self.status {
            RunStatus::Succeeded => format!("{} finished in {:.2}s", self.task_name, secs),
            RunStatus::Failed => match (self.exit_code, &self.error) {
                (Some(code), _) => {
                    format!("{} failed with code {} ({:.2}s)", self.task_name, code, secs)
                }
                (None, Some(error)) => format!("{} failed: {}", self.task_name, error),
                (None, None) => format!("{} was killed by a signal ({:.2}s)", self.task_name, secs),
            },
            RunStatus::Cancelled => format!("{} cancelled after {:.2}s", self.task_name, secs),
            status => format!("{} is {}", self.task_name, status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_lifecycle() {
        let mut run = RunResult::new("lintian");
        assert_eq!(run.status, RunStatus::Pending);
        run.start().unwrap();
        assert!(run.started_at.is_some());
        run.complete(Some(0)).unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.exit_code, Some(0));
        assert!(run.duration().is_some());
        assert!(run.summary().starts_with("lintian finished"));
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let mut run = RunResult::new("debuild");
        run.start().unwrap();
        run.complete(Some(2)).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.summary().contains("failed with code 2"));
    }

    #[test]
    fn test_finalized_exactly_once() {
        let mut run = RunResult::new("uscan");
        run.start().unwrap();
        run.cancel().unwrap();
        let err = run.complete(Some(0)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.exit_code, None);
    }

    #[test]
    fn test_fail_before_start() {
        let mut run = RunResult::new("sbuild");
        run.fail("Command 'sbuild' is not available on PATH").unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.started_at.is_some());
        assert!(run.summary().contains("not available"));
    }

    #[test]
    fn test_cannot_start_twice() {
        let mut run = RunResult::new("x");
        run.start().unwrap();
        assert!(run.start().is_err());
    }
}
