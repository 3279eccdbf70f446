//! Consumers of run output.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use debide_core::{Diagnostic, RunEvent, RunResult};
use tokio::sync::mpsc;
use tracing::trace;

/// Receives the output of a run, then its final result.
///
/// Implement this to render output in a console or forward it elsewhere.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Called for every output line, in production order per stream.
    async fn on_event(&self, event: RunEvent);

    /// Called once when the run is finalized.
    async fn on_finished(&self, result: RunResult);

    /// Called for user-visible diagnostics related to the run.
    async fn on_diagnostic(&self, diagnostic: Diagnostic);
}

/// Message delivered by a [`ChannelSink`].
#[derive(Debug, Clone)]
pub enum SinkMessage {
    Event(RunEvent),
    Finished(RunResult),
    Diagnostic(Diagnostic),
}

/// Forwards everything into a bounded channel.
///
/// A slow receiver applies backpressure to the run. Messages are dropped
/// once the receiver is gone.
pub struct ChannelSink {
    tx: mpsc::Sender<SinkMessage>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    async fn send(&self, message: SinkMessage) {
        if self.tx.send(message).await.is_err() {
            trace!("Sink receiver dropped");
        }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn on_event(&self, event: RunEvent) {
        self.send(SinkMessage::Event(event)).await;
    }

    async fn on_finished(&self, result: RunResult) {
        self.send(SinkMessage::Finished(result)).await;
    }

    async fn on_diagnostic(&self, diagnostic: Diagnostic) {
        self.send(SinkMessage::Diagnostic(diagnostic)).await;
    }
}

#[derive(Debug, Default)]
struct Collected {
    events: Vec<RunEvent>,
    results: Vec<RunResult>,
    diagnostics: Vec<Diagnostic>,
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    inner: Mutex<Collected>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Collected) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.with(|c| c.events.clone())
    }

    /// Text of stdout lines, in order.
    pub fn stdout_lines(&self) -> Vec<String> {
        self.with(|c| {
            c.events
                .iter()
                .filter(|e| !e.is_stderr())
                .map(|e| e.line.clone())
                .collect()
        })
    }

    /// Text of stderr lines, in order.
    pub fn stderr_lines(&self) -> Vec<String> {
        self.with(|c| {
            c.events
                .iter()
                .filter(|e| e.is_stderr())
                .map(|e| e.line.clone())
                .collect()
        })
    }

    /// Most recent finished result.
    pub fn last_result(&self) -> Option<RunResult> {
        self.with(|c| c.results.last().cloned())
    }

    pub fn results(&self) -> Vec<RunResult> {
        self.with(|c| c.results.clone())
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.with(|c| c.diagnostics.clone())
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn on_event(&self, event: RunEvent) {
        self.with(|c| c.events.push(event));
    }

    async fn on_finished(&self, result: RunResult) {
        self.with(|c| c.results.push(result));
    }

    async fn on_diagnostic(&self, diagnostic: Diagnostic) {
        self.with(|c| c.diagnostics.push(diagnostic));
    }
}
