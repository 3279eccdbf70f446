//! User-visible diagnostics produced while resolving and running tasks.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

use crate::TaskSource;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// Component or layer that produced a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    Builtin,
    Project,
    Plugin(String),
    Runner,
    Host,
}

impl From<&TaskSource> for Origin {
    fn from(source: &TaskSource) -> Self {
        match source {
            TaskSource::Builtin => Self::Builtin,
            TaskSource::Plugin(id) => Self::Plugin(id.clone()),
            TaskSource::Project => Self::Project,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("builtin"),
            Self::Project => f.write_str("project"),
            Self::Plugin(id) => write!(f, "plugin:{}", id),
            Self::Runner => f.write_str("runner"),
            Self::Host => f.write_str("host"),
        }
    }
}

impl Serialize for Origin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A timestamped message tagged by severity and origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub origin: Origin,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, origin: Origin, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            origin,
            message: message.into(),
        }
    }

    pub fn info(origin: Origin, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, origin, message)
    }

    pub fn warning(origin: Origin, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, origin, message)
    }

    pub fn error(origin: Origin, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, origin, message)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.severity,
            self.origin,
            self.message
        )
    }
}
