//! DebIDE workbench
//!
//! Wires plugin discovery, configuration resolution and the task runner
//! together for one workspace. This is what a presentation layer (the
//! `debide` CLI, or an editor front end) talks to.

use std::path::{Path, PathBuf};
use std::time::Duration;

use debide_config::{ConfigResolver, MaintainerIdentity, Resolution};
use debide_core::{Diagnostic, MergedTaskSet, Origin, RunResult, TaskDefinition};
use debide_plugin::{
    AppHandle, ManifestDiscovery, PluginHandle, PluginRegistry, StaticDiscovery,
    DEFAULT_PROVIDER_TIMEOUT,
};
use debide_runner::{EventSink, RunHandle, RunnerError, TaskRunner, DEFAULT_GRACE_PERIOD};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use debide_config;
pub use debide_core;
pub use debide_plugin;
pub use debide_runner;

/// Errors surfaced by the workbench.
#[derive(Debug, Error)]
pub enum WorkbenchError {
    #[error("Workspace not found: {}", .0.display())]
    Workspace(PathBuf),

    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("No tasks are defined")]
    NoTasks,

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// How to open a workspace.
pub struct WorkbenchOptions {
    workspace: PathBuf,
    config_path: Option<PathBuf>,
    plugins: Vec<PluginHandle>,
    plugin_dirs: Option<Vec<PathBuf>>,
    provider_timeout: Duration,
    grace_period: Duration,
    check_executables: bool,
}

impl WorkbenchOptions {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            config_path: None,
            plugins: Vec::new(),
            plugin_dirs: None,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            grace_period: DEFAULT_GRACE_PERIOD,
            check_executables: true,
        }
    }

    /// Load this configuration file instead of probing the workspace.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Register an in-process plugin ahead of manifest plugins.
    pub fn with_plugin(mut self, handle: PluginHandle) -> Self {
        self.plugins.push(handle);
        self
    }

    /// Replace the manifest search path; an empty list disables manifests.
    pub fn with_plugin_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.plugin_dirs = Some(dirs);
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_executable_check(mut self, enabled: bool) -> Self {
        self.check_executables = enabled;
        self
    }
}

/// An opened workspace with its resolved tasks.
pub struct Workbench {
    workspace: PathBuf,
    resolution: Resolution,
    registry: PluginRegistry,
    runner: TaskRunner,
    diagnostics: Vec<Diagnostic>,
}

impl Workbench {
    /// Discover and register plugins, resolve the task set, fire app-ready
    /// hooks and prepare the runner.
    ///
    /// Only a missing workspace is an error; everything else becomes a
    /// diagnostic.
    pub fn open(options: WorkbenchOptions) -> Result<Self, WorkbenchError> {
        let WorkbenchOptions {
            workspace,
            config_path,
            plugins,
            plugin_dirs,
            provider_timeout,
            grace_period,
            check_executables,
        } = options;

        if !workspace.is_dir() {
            return Err(WorkbenchError::Workspace(workspace));
        }
        info!(workspace = %workspace.display(), "Opening workspace");

        let mut diagnostics = Vec::new();
        let mut registry = PluginRegistry::new().with_provider_timeout(provider_timeout);

        let mut in_process = StaticDiscovery::new(plugins);
        registry.discover(&mut in_process, &workspace);

        let mut manifests = match plugin_dirs {
            Some(dirs) => ManifestDiscovery::new(dirs),
            None => ManifestDiscovery::for_workspace(&workspace),
        };
        registry.discover(&mut manifests, &workspace);
        diagnostics.extend(registry.take_diagnostics());

        let layers = registry.collect_layers(&workspace);
        diagnostics.extend(registry.take_diagnostics());

        let mut resolver = ConfigResolver::new(&workspace);
        if let Some(path) = config_path {
            resolver = resolver.with_config_path(path);
        }
        let mut resolution = resolver.resolve(layers);
        diagnostics.append(&mut resolution.diagnostics);

        let app = AppHandle::new(&workspace, resolution.task_set.names().to_vec());
        let fired = registry.dispatch_app_ready(&app);
        diagnostics.extend(registry.take_diagnostics());
        debug!(hooks = fired, "Dispatched app-ready");

        let runner = TaskRunner::new(&workspace)
            .with_grace_period(grace_period)
            .with_executable_check(check_executables);

        Ok(Self {
            workspace,
            resolution,
            registry,
            runner,
            diagnostics,
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn tasks(&self) -> &MergedTaskSet {
        &self.resolution.task_set
    }

    pub fn task(&self, name: &str) -> Option<&TaskDefinition> {
        self.resolution.task_set.get(name)
    }

    /// The configured default task, if it resolved.
    pub fn default_task(&self) -> Option<&str> {
        self.resolution.default_task.as_deref()
    }

    /// Task a UI should preselect.
    pub fn default_selection(&self) -> Option<&TaskDefinition> {
        self.resolution.default_selection()
    }

    /// When true, callers must persist open buffers before starting a run.
    pub fn autosave(&self) -> bool {
        self.resolution.autosave
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.resolution.config_path.as_deref()
    }

    pub fn loaded_plugins(&self) -> Vec<&str> {
        self.registry.loaded_plugins()
    }

    pub fn maintainer(&self) -> MaintainerIdentity {
        MaintainerIdentity::from_env()
    }

    /// Everything reported so far, in order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Pick a task by name, falling back to the default selection.
    pub fn select(&self, name: Option<&str>) -> Result<&TaskDefinition, WorkbenchError> {
        match name {
            Some(name) => self
                .task(name)
                .ok_or_else(|| WorkbenchError::UnknownTask(name.to_string())),
            None => self.default_selection().ok_or(WorkbenchError::NoTasks),
        }
    }

    /// Start a task without waiting for it.
    pub fn start(&mut self, name: Option<&str>) -> Result<RunHandle, WorkbenchError> {
        let task = self.select(name)?.clone();
        match self.runner.start(&task) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                if let RunnerError::Busy { active_task } = &e {
                    let message = format!(
                        "Cannot start '{}': '{}' is still running",
                        task.name(),
                        active_task
                    );
                    warn!("{}", message);
                    self.diagnostics
                        .push(Diagnostic::warning(Origin::Runner, message));
                }
                Err(e.into())
            }
        }
    }

    /// Run a task to completion, streaming into `sink`.
    pub async fn run(
        &mut self,
        name: Option<&str>,
        sink: &dyn EventSink,
    ) -> Result<RunResult, WorkbenchError> {
        self.run_until_cancelled(name, sink, CancellationToken::new())
            .await
    }

    /// Like [`Workbench::run`], cancelling the run when `cancel` fires.
    pub async fn run_until_cancelled(
        &mut self,
        name: Option<&str>,
        sink: &dyn EventSink,
        cancel: CancellationToken,
    ) -> Result<RunResult, WorkbenchError> {
        let handle = match self.start(name) {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(diagnostic) = self.diagnostics.last() {
                    if matches!(e, WorkbenchError::Runner(RunnerError::Busy { .. })) {
                        sink.on_diagnostic(diagnostic.clone()).await;
                    }
                }
                return Err(e);
            }
        };

        let run_token = handle.cancellation_token();
        let link = tokio::spawn(async move {
            cancel.cancelled().await;
            run_token.cancel();
        });
        let result = handle.forward_to(sink).await;
        link.abort();

        if let Some(error) = &result.error {
            let diagnostic = Diagnostic::error(Origin::Runner, error.clone());
            sink.on_diagnostic(diagnostic.clone()).await;
            self.diagnostics.push(diagnostic);
        }
        Ok(result)
    }
}
