//! The capability object handed to plugins during registration.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use debide_core::{Diagnostic, Origin, RawTask, ValidationError};

use crate::PluginError;

/// Callback producing tasks once the workspace is known.
pub type TaskProvider =
    Arc<dyn Fn(&ProviderContext) -> Result<Vec<RawTask>, PluginError> + Send + Sync>;

/// Handed to a task provider for its one invocation.
///
/// Providers that start processes must stop them by [`deadline`]; the
/// registry stops waiting at that point.
///
/// [`deadline`]: ProviderContext::deadline
#[derive(Debug)]
pub struct ProviderContext {
    workspace: PathBuf,
    timeout: Duration,
    deadline: Instant,
    rejected: Mutex<Vec<ValidationError>>,
}

impl ProviderContext {
    pub fn new(workspace: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workspace: workspace.into(),
            timeout,
            deadline: Instant::now() + timeout,
            rejected: Mutex::new(Vec::new()),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Report an entry that could not be read; it is shown like any other
    /// invalid task in the plugin's layer.
    pub fn reject(&self, error: ValidationError) {
        self.rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error);
    }

    pub(crate) fn take_rejected(&self) -> Vec<ValidationError> {
        std::mem::take(&mut *self.rejected.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Callback fired once when the application is ready.
pub type AppReadyHook = Box<dyn FnOnce(&AppHandle) -> Result<(), PluginError> + Send>;

/// What plugins may see of the running application.
#[derive(Debug, Clone)]
pub struct AppHandle {
    workspace: PathBuf,
    task_names: Vec<String>,
}

impl AppHandle {
    pub fn new(workspace: impl Into<PathBuf>, task_names: Vec<String>) -> Self {
        Self {
            workspace: workspace.into(),
            task_names,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Resolved task names in display order.
    pub fn task_names(&self) -> &[String] {
        &self.task_names
    }

    pub fn has_task(&self, name: &str) -> bool {
        self.task_names.iter().any(|n| n == name)
    }
}

/// Registration-time API.
///
/// Everything added here is staged; the registry commits it only if the
/// plugin's `register` succeeds.
pub struct PluginApi {
    plugin_id: String,
    tasks: Vec<RawTask>,
    providers: Vec<TaskProvider>,
    hooks: Vec<AppReadyHook>,
    messages: Vec<Diagnostic>,
}

/// Contributions staged by one plugin.
pub(crate) struct Staged {
    pub tasks: Vec<RawTask>,
    pub providers: Vec<TaskProvider>,
    pub hooks: Vec<AppReadyHook>,
    pub messages: Vec<Diagnostic>,
}

impl PluginApi {
    pub(crate) fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            tasks: Vec::new(),
            providers: Vec::new(),
            hooks: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Id of the plugin being registered.
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Contribute a static task.
    pub fn add_task(&mut self, task: RawTask) {
        self.tasks.push(task);
    }

    /// Contribute tasks computed from the workspace path.
    ///
    /// The provider runs once, on a helper thread, bounded by the registry's
    /// provider timeout.
    pub fn provide_tasks<F>(&mut self, provider: F)
    where
        F: Fn(&ProviderContext) -> Result<Vec<RawTask>, PluginError> + Send + Sync + 'static,
    {
        self.providers.push(Arc::new(provider));
    }

    /// Subscribe to the app-ready event.
    pub fn on_app_ready<F>(&mut self, hook: F)
    where
        F: FnOnce(&AppHandle) -> Result<(), PluginError> + Send + 'static,
    {
        self.hooks.push(Box::new(hook));
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.messages.push(Diagnostic::info(self.origin(), message));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.messages.push(Diagnostic::warning(self.origin(), message));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.messages.push(Diagnostic::error(self.origin(), message));
    }

    fn origin(&self) -> Origin {
        Origin::Plugin(self.plugin_id.clone())
    }

    pub(crate) fn into_staged(self) -> Staged {
        Staged {
            tasks: self.tasks,
            providers: self.providers,
            hooks: self.hooks,
            messages: self.messages,
        }
    }
}
