//! Core domain errors.

use thiserror::Error;

/// A task definition that cannot enter a layer.
///
/// The offending task is dropped; callers turn the error into a diagnostic
/// and keep loading the rest of the layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The task has no name (or only whitespace).
    #[error("Task definition missing 'name'")]
    EmptyName,

    /// The task has no command (or only whitespace).
    #[error("Task '{name}' missing 'command'")]
    EmptyCommand { name: String },

    /// The name was already used earlier in the same layer.
    #[error("Duplicate task name '{name}' in {layer} layer")]
    DuplicateName { name: String, layer: String },

    /// An `env` key is not a valid environment variable identifier.
    #[error("Task '{task}' has invalid environment variable name '{key}'")]
    InvalidEnvKey { task: String, key: String },

    /// The raw entry could not be read as a task at all.
    #[error("Malformed task entry: {0}")]
    Malformed(String),
}

impl ValidationError {
    /// Short machine-readable kind tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyName => "empty-name",
            Self::EmptyCommand { .. } => "empty-command",
            Self::DuplicateName { .. } => "duplicate-name-in-layer",
            Self::InvalidEnvKey { .. } => "invalid-env-key",
            Self::Malformed(_) => "malformed-entry",
        }
    }
}

/// Core domain errors for DebIDE.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// A task definition failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_kinds() {
        assert_eq!(ValidationError::EmptyName.kind(), "empty-name");
        let err = ValidationError::InvalidEnvKey {
            task: "build".to_string(),
            key: "1BAD".to_string(),
        };
        assert_eq!(err.kind(), "invalid-env-key");
        assert_eq!(
            err.to_string(),
            "Task 'build' has invalid environment variable name '1BAD'"
        );
    }
}
