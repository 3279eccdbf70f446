//! Task runner for DebIDE
//!
//! Executes a resolved [`TaskDefinition`](debide_core::TaskDefinition) as a
//! child process, streaming its output as [`RunEvent`](debide_core::RunEvent)s
//! and recording the outcome in a [`RunResult`](debide_core::RunResult).
//!
//! # Example
//!
//! ```rust,no_run
//! use debide_core::{TaskDefinition, TaskSource};
//! use debide_runner::{CollectingSink, TaskRunner};
//!
//! async fn run() -> Result<(), Box<dyn std::error::Error>> {
//!     let task = TaskDefinition::builder("lintian", "lintian --info")
//!         .build(TaskSource::Builtin)?;
//!     let runner = TaskRunner::new("/src/hello");
//!
//!     let sink = CollectingSink::new();
//!     let result = runner.start(&task)?.forward_to(&sink).await;
//!
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```

mod error;
pub mod precheck;
mod runner;
pub mod sink;

pub use error::RunnerError;
pub use runner::{
    RunCompletion, RunHandle, TaskRunner, DEFAULT_DRAIN_TIMEOUT, DEFAULT_GRACE_PERIOD,
    EVENT_CHANNEL_CAPACITY, STDERR_TAIL_LINES,
};
pub use sink::{ChannelSink, CollectingSink, EventSink, SinkMessage};
