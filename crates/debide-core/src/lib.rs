//! DebIDE Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Child processes
//! - The filesystem
//! - Runtime specifics
//!
//! Task definitions, provenance layers and the merge engine live here, along
//! with the run bookkeeping types shared by the runner and its consumers.

pub mod builtin;
pub mod diagnostic;
pub mod error;
pub mod event;
pub mod ids;
pub mod merge;
pub mod run;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use builtin::{builtin_layer, BUILTIN_TASKS};
pub use diagnostic::{Diagnostic, Origin, Severity};
pub use error::{CoreError, ValidationError};
pub use event::{RunEvent, StreamTag};
pub use ids::RunId;
pub use merge::MergedTaskSet;
pub use run::RunResult;
pub use status::RunStatus;
pub use task::{
    deserialize_scalar, is_valid_env_key, EnvValue, RawTask, TaskBuilder, TaskDefinition,
    TaskLayer, TaskSource,
};
