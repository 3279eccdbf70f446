//! Error types for the task runner.

use std::path::PathBuf;

use debide_core::CoreError;
use thiserror::Error;

/// Errors that can occur while starting or executing a task.
///
/// Everything except [`RunnerError::Busy`] is folded into a failed
/// `RunResult` rather than returned to the caller.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Another task is already running.
    #[error("Task runner is busy running '{active_task}'")]
    Busy { active_task: String },

    /// The command's executable is not on PATH.
    #[error("Command '{0}' is not available on PATH. Check that required packages are installed.")]
    ExecutableNotFound(String),

    /// The task's working directory does not exist.
    #[error("Working directory does not exist: {}", .0.display())]
    WorkingDir(PathBuf),

    /// Failed to spawn the child process.
    #[error("Failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),

    /// Run bookkeeping rejected a transition.
    #[error(transparent)]
    Core(#[from] CoreError),
}
