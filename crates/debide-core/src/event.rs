//! Streamed output events for a running task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::RunId;

/// Which child stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTag {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// One line of output from a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Run this event belongs to.
    pub run_id: RunId,
    /// Source stream.
    pub stream: StreamTag,
    /// Decoded text without the line terminator.
    pub line: String,
    /// True when the child exited without terminating this line.
    pub partial: bool,
    /// When the line was read.
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    /// Create a complete-line event.
    pub fn new(run_id: RunId, stream: StreamTag, line: impl Into<String>) -> Self {
        Self {
            run_id,
            stream,
            line: line.into(),
            partial: false,
            timestamp: Utc::now(),
        }
    }

    pub fn stdout(run_id: RunId, line: impl Into<String>) -> Self {
        Self::new(run_id, StreamTag::Stdout, line)
    }

    pub fn stderr(run_id: RunId, line: impl Into<String>) -> Self {
        Self::new(run_id, StreamTag::Stderr, line)
    }

    /// Mark as trailing data flushed at process exit.
    pub fn into_partial(mut self) -> Self {
        self.partial = true;
        self
    }

    pub fn is_stderr(&self) -> bool {
        self.stream == StreamTag::Stderr
    }
}
