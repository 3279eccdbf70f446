//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Problems with the project configuration document.
///
/// None of these stop the built-in and plugin tasks from loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    Parse { line: Option<usize>, message: String },

    #[error("configuration at {path} must be a mapping")]
    NotAMapping { path: PathBuf },

    #[error("'tasks' must be a list in configuration")]
    TasksNotAList,

    #[error("default_task '{name}' is not defined in tasks list")]
    UnknownDefaultTask { name: String },
}

impl ConfigError {
    pub(crate) fn parse(error: serde_yaml::Error) -> Self {
        Self::Parse {
            line: error.location().map(|l| l.line()),
            message: error.to_string(),
        }
    }
}
