//! Task runner for executing task commands as child processes.
//!
//! Each run spawns `sh -c <command>` in its own process group, streams both
//! output pipes line by line as [`RunEvent`]s, and finalizes a [`RunResult`]
//! exactly once.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use debide_core::{RunEvent, RunId, RunResult, StreamTag, TaskDefinition};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::precheck::ensure_executable;
use crate::sink::EventSink;
use crate::RunnerError;

/// Grace period before SIGKILL after SIGTERM.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// How long output may stay idle after the child exits before reading stops.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the per-run event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Number of stderr lines kept in `RunResult::stderr_tail`.
pub const STDERR_TAIL_LINES: usize = 10;

#[derive(Debug, Clone)]
struct ActiveRun {
    run_id: RunId,
    task_name: String,
}

type Slot = Arc<Mutex<Option<ActiveRun>>>;

/// Clears the busy slot when the run ends, however it ends.
struct SlotGuard {
    slot: Slot,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Executes tasks for one workspace, one at a time.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    workspace: PathBuf,
    grace_period: Duration,
    drain_timeout: Duration,
    check_executable: bool,
    active: Slot,
}

impl TaskRunner {
    /// Create a runner bound to a workspace root.
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            grace_period: DEFAULT_GRACE_PERIOD,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            check_executable: true,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Set the delay between SIGTERM and SIGKILL on cancellation.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Set how long output may stay idle after the child exits.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Enable or disable the PATH lookup performed before spawning.
    pub fn with_executable_check(mut self, enabled: bool) -> Self {
        self.check_executable = enabled;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Name of the task currently running, if any.
    pub fn active_task(&self) -> Option<String> {
        self.lock_slot().as_ref().map(|run| run.task_name.clone())
    }

    pub fn is_busy(&self) -> bool {
        self.lock_slot().is_some()
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start running a task.
    ///
    /// Must be called from within a Tokio runtime. Returns
    /// [`RunnerError::Busy`] if another run is active; every other problem
    /// surfaces as a failed [`RunResult`] from the returned handle.
    pub fn start(&self, task: &TaskDefinition) -> Result<RunHandle, RunnerError> {
        let run_id = RunId::generate();
        {
            let mut slot = self.lock_slot();
            if let Some(active) = slot.as_ref() {
                warn!(
                    task = %task.name(),
                    active_task = %active.task_name,
                    active_run = %active.run_id.short(),
                    "Rejecting run while another task is active"
                );
                return Err(RunnerError::Busy {
                    active_task: active.task_name.clone(),
                });
            }
            *slot = Some(ActiveRun {
                run_id: run_id.clone(),
                task_name: task.name().to_string(),
            });
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (result_tx, result_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let execution = Execution {
            run_id: run_id.clone(),
            task: task.clone(),
            cwd: task.resolve_working_dir(&self.workspace),
            grace_period: self.grace_period,
            drain_timeout: self.drain_timeout,
            check_executable: self.check_executable,
            events: event_tx,
            cancel: cancel.clone(),
            guard: SlotGuard {
                slot: Arc::clone(&self.active),
            },
        };
        tokio::spawn(execution.run(result_tx));

        Ok(RunHandle {
            events: event_rx,
            completion: RunCompletion {
                run_id,
                task_name: task.name().to_string(),
                result: result_rx,
                cancel,
            },
        })
    }
}

/// Live handle to a started run.
///
/// Dropping the handle does not stop the run; output keeps draining and the
/// result is discarded.
pub struct RunHandle {
    events: mpsc::Receiver<RunEvent>,
    completion: RunCompletion,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.completion.run_id
    }

    pub fn task_name(&self) -> &str {
        &self.completion.task_name
    }

    /// Request cancellation: SIGTERM to the process group, SIGKILL after the
    /// grace period.
    pub fn cancel(&self) {
        self.completion.cancel();
    }

    /// Token that cancels this run when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.completion.cancel.clone()
    }

    /// Receive the next output event; `None` once output is exhausted.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    pub fn events(&mut self) -> &mut mpsc::Receiver<RunEvent> {
        &mut self.events
    }

    /// Split into an event stream and the completion half.
    pub fn into_stream(self) -> (ReceiverStream<RunEvent>, RunCompletion) {
        (ReceiverStream::new(self.events), self.completion)
    }

    /// Wait for the final result, discarding unread output.
    pub async fn wait(self) -> RunResult {
        drop(self.events);
        self.completion.wait().await
    }

    /// Push every event into `sink`, then the final result.
    pub async fn forward_to(mut self, sink: &dyn EventSink) -> RunResult {
        while let Some(event) = self.events.recv().await {
            sink.on_event(event).await;
        }
        let result = self.completion.wait().await;
        sink.on_finished(result.clone()).await;
        result
    }
}

/// The result half of a run.
pub struct RunCompletion {
    run_id: RunId,
    task_name: String,
    result: oneshot::Receiver<RunResult>,
    cancel: CancellationToken,
}

impl RunCompletion {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn cancel(&self) {
        debug!(run_id = %self.run_id.short(), task = %self.task_name, "Cancellation requested");
        self.cancel.cancel();
    }

    /// Wait for the run to be finalized.
    pub async fn wait(self) -> RunResult {
        match self.result.await {
            Ok(result) => result,
            Err(_) => {
                error!(run_id = %self.run_id, "Run ended without reporting a result");
                let mut result = RunResult::with_id(self.run_id, self.task_name);
                let _ = result.fail("run ended without reporting a result");
                result
            }
        }
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
}

/// Everything the background task needs for one run.
struct Execution {
    run_id: RunId,
    task: TaskDefinition,
    cwd: PathBuf,
    grace_period: Duration,
    drain_timeout: Duration,
    check_executable: bool,
    events: mpsc::Sender<RunEvent>,
    cancel: CancellationToken,
    guard: SlotGuard,
}

impl Execution {
    async fn run(self, result_tx: oneshot::Sender<RunResult>) {
        let Execution {
            run_id,
            task,
            cwd,
            grace_period,
            drain_timeout,
            check_executable,
            events,
            cancel,
            guard,
        } = self;

        let mut result = RunResult::with_id(run_id.clone(), task.name());

        match spawn_child(&task, &cwd, check_executable) {
            Err(e) => {
                warn!(task = %task.name(), error = %e, "Task failed to start");
                if let Err(e) = result.fail(e.to_string()) {
                    error!(error = %e, "Failed to record spawn failure");
                }
                drop(events);
            }
            Ok(mut child) => {
                if let Err(e) = result.start() {
                    error!(error = %e, "Failed to record run start");
                }
                let pid = child.id();
                info!(
                    task = %task.name(),
                    run_id = %run_id.short(),
                    pid = ?pid,
                    cwd = %cwd.display(),
                    "Task started"
                );

                let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
                let activity = Arc::new(AtomicU64::new(0));
                let mut readers = Vec::with_capacity(2);
                if let Some(stdout) = child.stdout.take() {
                    readers.push(tokio::spawn(pump(
                        stdout,
                        StreamTag::Stdout,
                        run_id.clone(),
                        events.clone(),
                        None,
                        Arc::clone(&activity),
                    )));
                }
                if let Some(stderr) = child.stderr.take() {
                    readers.push(tokio::spawn(pump(
                        stderr,
                        StreamTag::Stderr,
                        run_id.clone(),
                        events.clone(),
                        Some(Arc::clone(&tail)),
                        Arc::clone(&activity),
                    )));
                }
                drop(events);

                let outcome = tokio::select! {
                    status = child.wait() => Outcome::Exited(status),
                    _ = cancel.cancelled() => Outcome::Cancelled,
                };
                if matches!(outcome, Outcome::Cancelled) {
                    terminate(&mut child, pid, grace_period).await;
                }

                if !drain(&mut readers, &activity, drain_timeout).await {
                    warn!(
                        task = %task.name(),
                        "Output still open after exit; a descendant may hold the pipes"
                    );
                }

                result.stderr_tail = tail
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .cloned()
                    .collect();

                let finalized = match outcome {
                    Outcome::Cancelled => result.cancel(),
                    Outcome::Exited(Ok(status)) => result.complete(status.code()),
                    Outcome::Exited(Err(e)) => {
                        result.fail(format!("Failed to wait for process: {}", e))
                    }
                };
                if let Err(e) = finalized {
                    error!(error = %e, "Failed to finalize run");
                }
            }
        }

        info!(
            task = %task.name(),
            run_id = %run_id.short(),
            status = %result.status,
            exit_code = ?result.exit_code,
            "{}",
            result.summary()
        );

        drop(guard);
        if result_tx.send(result).is_err() {
            debug!(run_id = %run_id.short(), "Run result receiver dropped");
        }
    }
}

fn spawn_child(
    task: &TaskDefinition,
    cwd: &Path,
    check_executable: bool,
) -> Result<Child, RunnerError> {
    if !cwd.is_dir() {
        return Err(RunnerError::WorkingDir(cwd.to_path_buf()));
    }
    if check_executable {
        let path = task.env().get("PATH").map(std::ffi::OsStr::new);
        ensure_executable(task.command(), path, cwd)?;
    }

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(task.command())
        .current_dir(cwd)
        .envs(task.env())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    debug!(command = %task.command(), "Spawning task process");
    Ok(cmd.spawn()?)
}

/// Wait for the readers to reach EOF.
///
/// Gives up only after `idle` passes with no reader making progress, so a
/// slow consumer still receives every line. Returns false if readers were
/// aborted.
async fn drain(readers: &mut [JoinHandle<()>], activity: &AtomicU64, idle: Duration) -> bool {
    let mut seen = activity.load(Ordering::Relaxed);
    loop {
        let finished = timeout(idle, async {
            for reader in readers.iter_mut() {
                if !reader.is_finished() {
                    let _ = reader.await;
                }
            }
        })
        .await;
        if finished.is_ok() {
            return true;
        }

        let now = activity.load(Ordering::Relaxed);
        if now == seen {
            for reader in readers.iter() {
                reader.abort();
            }
            return false;
        }
        seen = now;
    }
}

/// Read one pipe to EOF, emitting an event per line.
///
/// Keeps draining after the receiver goes away so the child never blocks on
/// a full pipe. Every line read and delivered bumps `activity`.
async fn pump<R>(
    reader: R,
    stream: StreamTag,
    run_id: RunId,
    events: mpsc::Sender<RunEvent>,
    tail: Option<Arc<Mutex<VecDeque<String>>>>,
    activity: Arc<AtomicU64>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut receiver_open = true;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                activity.fetch_add(1, Ordering::Relaxed);
                let terminated = buf.last() == Some(&b'\n');
                if terminated {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();

                if let Some(tail) = &tail {
                    let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.clone());
                }

                if receiver_open {
                    let mut event = RunEvent::new(run_id.clone(), stream, line);
                    if !terminated {
                        event = event.into_partial();
                    }
                    if events.send(event).await.is_err() {
                        debug!(stream = %stream, "Event receiver dropped; discarding output");
                        receiver_open = false;
                    } else {
                        activity.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Err(e) => {
                warn!(stream = %stream, error = %e, "Error reading task output");
                break;
            }
        }
    }
}

/// Stop a cancelled child: SIGTERM to its group, SIGKILL after the grace
/// period, then reap it.
async fn terminate(child: &mut Child, pid: Option<u32>, grace_period: Duration) {
    signal_group(child, pid, GroupSignal::Terminate);
    tokio::select! {
        _ = child.wait() => {}
        _ = sleep(grace_period) => {
            debug!(pid = ?pid, "Grace period elapsed");
        }
    }
    // Also reaches descendants that outlived the leader.
    signal_group(child, pid, GroupSignal::Kill);
    if let Err(e) = child.wait().await {
        warn!(error = %e, "Failed to reap cancelled process");
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(_child: &mut Child, pid: Option<u32>, signal: GroupSignal) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    debug!(pgid = pid, signal = ?signal, "Signalling process group");
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = pid, error = %e, "Failed to signal process group"),
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _pid: Option<u32>, _signal: GroupSignal) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "Failed to kill process");
    }
}
