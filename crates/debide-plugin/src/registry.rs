//! Plugin registration, contribution collection and the lifecycle bus.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use debide_core::{Diagnostic, Origin, RawTask, Severity, TaskLayer, TaskSource};
use tracing::{debug, error, info, warn};

use crate::api::{AppHandle, AppReadyHook, PluginApi, ProviderContext, TaskProvider};
use crate::discovery::{PluginDiscovery, PluginHandle};
use crate::{panic_message, PluginError, Result};

/// How long a dynamic task provider may run.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

struct LoadedPlugin {
    id: String,
    tasks: Vec<RawTask>,
    providers: Vec<TaskProvider>,
}

/// Registered plugins and their committed contributions.
pub struct PluginRegistry {
    plugins: Vec<LoadedPlugin>,
    hooks: Vec<(String, AppReadyHook)>,
    diagnostics: Vec<Diagnostic>,
    provider_timeout: Duration,
    app_ready_dispatched: bool,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            hooks: Vec::new(),
            diagnostics: Vec::new(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            app_ready_dispatched: false,
        }
    }

    /// Set the time limit for each dynamic task provider.
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn provider_timeout(&self) -> Duration {
        self.provider_timeout
    }

    /// Discover plugins and register them in discovery order.
    ///
    /// Returns the number of plugins that registered successfully.
    pub fn discover(&mut self, discovery: &mut dyn PluginDiscovery, workspace: &Path) -> usize {
        match discovery.discover(workspace) {
            Ok(handles) => {
                debug!(discovery = discovery.name(), found = handles.len(), "Discovered plugins");
                self.register_all(handles)
            }
            Err(e) => {
                self.record(Diagnostic::error(
                    Origin::Host,
                    format!("Plugin discovery '{}' failed: {}", discovery.name(), e),
                ));
                0
            }
        }
    }

    /// Register plugins in order; a failure only excludes that plugin.
    pub fn register_all<I>(&mut self, handles: I) -> usize
    where
        I: IntoIterator<Item = PluginHandle>,
    {
        let mut registered = 0;
        for handle in handles {
            if self.register(handle).is_ok() {
                registered += 1;
            }
        }
        registered
    }

    /// Run one plugin's registration and commit what it staged.
    ///
    /// Errors and panics are caught, reported as a diagnostic tagged with the
    /// plugin id, and returned; nothing the plugin staged is kept.
    pub fn register(&mut self, handle: PluginHandle) -> Result<()> {
        let PluginHandle { id, plugin } = handle;

        if id.trim().is_empty() {
            let e = PluginError::Registration("plugin id must not be empty".to_string());
            self.record(Diagnostic::error(Origin::Host, e.to_string()));
            return Err(e);
        }
        if self.is_loaded(&id) {
            let e = PluginError::Registration(format!("plugin id '{}' is already registered", id));
            self.record(Diagnostic::error(Origin::Plugin(id), e.to_string()));
            return Err(e);
        }

        let mut api = PluginApi::new(id.clone());
        let outcome = match catch_unwind(AssertUnwindSafe(|| plugin.register(&mut api))) {
            Ok(result) => result,
            Err(payload) => Err(PluginError::Panicked(panic_message(payload))),
        };

        let staged = api.into_staged();
        for message in staged.messages {
            self.record(message);
        }

        if let Err(e) = outcome {
            self.record(Diagnostic::error(Origin::Plugin(id), e.to_string()));
            return Err(e);
        }

        debug!(
            plugin = %id,
            tasks = staged.tasks.len(),
            providers = staged.providers.len(),
            hooks = staged.hooks.len(),
            "Plugin contributions staged"
        );
        self.record(Diagnostic::info(Origin::Plugin(id.clone()), "Registered plugin"));
        self.hooks
            .extend(staged.hooks.into_iter().map(|hook| (id.clone(), hook)));
        self.plugins.push(LoadedPlugin {
            id,
            tasks: staged.tasks,
            providers: staged.providers,
        });
        Ok(())
    }

    /// Build one task layer per loaded plugin, in registration order.
    ///
    /// Static tasks come first, then whatever each provider returns. Provider
    /// failures are reported and contribute nothing; invalid entries are left
    /// in the layer's rejected list for the resolver to report.
    pub fn collect_layers(&mut self, workspace: &Path) -> Vec<TaskLayer> {
        let mut layers = Vec::with_capacity(self.plugins.len());
        let mut failures = Vec::new();

        for plugin in &self.plugins {
            let mut layer = TaskLayer::build(
                TaskSource::Plugin(plugin.id.clone()),
                plugin.tasks.iter().cloned(),
            );
            for provider in &plugin.providers {
                let ctx = Arc::new(ProviderContext::new(workspace, self.provider_timeout));
                match run_provider(provider, &ctx) {
                    Ok(tasks) => {
                        debug!(plugin = %plugin.id, count = tasks.len(), "Provider returned tasks");
                        for task in tasks {
                            layer.push_raw(task);
                        }
                        for rejected in ctx.take_rejected() {
                            layer.reject(rejected);
                        }
                    }
                    Err(e) => failures.push(Diagnostic::error(
                        Origin::Plugin(plugin.id.clone()),
                        e.to_string(),
                    )),
                }
            }
            layers.push(layer);
        }

        for failure in failures {
            self.record(failure);
        }
        layers
    }

    /// Fire every app-ready hook once, in registration order.
    ///
    /// Returns the number of hooks run; later calls run nothing.
    pub fn dispatch_app_ready(&mut self, app: &AppHandle) -> usize {
        if self.app_ready_dispatched {
            debug!("app-ready already dispatched");
            return 0;
        }
        self.app_ready_dispatched = true;

        let hooks = std::mem::take(&mut self.hooks);
        let fired = hooks.len();
        for (id, hook) in hooks {
            let outcome = match catch_unwind(AssertUnwindSafe(|| hook(app))) {
                Ok(result) => result,
                Err(payload) => Err(PluginError::Panicked(panic_message(payload))),
            };
            if let Err(e) = outcome {
                self.record(Diagnostic::error(
                    Origin::Plugin(id),
                    format!("app-ready hook failed: {}", e),
                ));
            }
        }
        fired
    }

    pub fn app_ready_dispatched(&self) -> bool {
        self.app_ready_dispatched
    }

    /// Drain accumulated diagnostics.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Ids of successfully registered plugins, in registration order.
    pub fn loaded_plugins(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.plugins.iter().any(|p| p.id == id)
    }

    fn record(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Info => info!(origin = %diagnostic.origin, "{}", diagnostic.message),
            Severity::Warning => warn!(origin = %diagnostic.origin, "{}", diagnostic.message),
            Severity::Error => error!(origin = %diagnostic.origin, "{}", diagnostic.message),
        }
        self.diagnostics.push(diagnostic);
    }
}

/// Run a provider on its own thread; a provider that misses the deadline is
/// abandoned.
fn run_provider(provider: &TaskProvider, ctx: &Arc<ProviderContext>) -> Result<Vec<RawTask>> {
    let (tx, rx) = mpsc::channel();
    let provider = Arc::clone(provider);
    let thread_ctx = Arc::clone(ctx);
    let timeout = ctx.timeout();

    thread::Builder::new()
        .name("debide-provider".to_string())
        .spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| provider(&thread_ctx)));
            let _ = tx.send(outcome);
        })?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => Err(PluginError::Panicked(panic_message(payload))),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(PluginError::ProviderTimeout(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(PluginError::ProviderFailed(
            "provider thread exited without a result".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StaticDiscovery;
    use debide_core::ValidationError;
    use std::sync::Mutex;

    fn static_plugin(id: &str, tasks: &[(&str, &str)]) -> PluginHandle {
        let tasks: Vec<RawTask> = tasks
            .iter()
            .map(|(name, command)| RawTask::new(*name, *command))
            .collect();
        PluginHandle::from_fn(id, move |api| {
            for task in &tasks {
                api.add_task(task.clone());
            }
            Ok(())
        })
    }

    fn layer_names(layer: &TaskLayer) -> Vec<&str> {
        layer.tasks().iter().map(|t| t.name()).collect()
    }

    #[test]
    fn test_failing_plugin_is_isolated() {
        let mut registry = PluginRegistry::new();
        let loaded = registry.register_all(vec![
            static_plugin("first", &[("pdebuild", "pdebuild")]),
            PluginHandle::from_fn("broken", |api| {
                api.add_task(RawTask::new("never", "true"));
                Err(PluginError::Registration("missing pbuilderrc".to_string()))
            }),
            static_plugin("last", &[("autopkgtest", "autopkgtest .")]),
        ]);

        assert_eq!(loaded, 2);
        assert_eq!(registry.loaded_plugins(), vec!["first", "last"]);

        let layers = registry.collect_layers(Path::new("."));
        assert_eq!(layers.len(), 2);
        assert!(layers
            .iter()
            .all(|layer| layer.tasks().iter().all(|t| t.name() != "never")));

        let diagnostics = registry.take_diagnostics();
        let failure = diagnostics.iter().find(|d| d.is_error()).unwrap();
        assert_eq!(failure.origin, Origin::Plugin("broken".to_string()));
        assert!(failure.message.contains("missing pbuilderrc"));
        assert_eq!(
            diagnostics
                .iter()
                .filter(|d| d.message == "Registered plugin")
                .count(),
            2
        );
        assert!(registry.take_diagnostics().is_empty());
    }

    #[test]
    fn test_registration_is_recorded_after_plugin_messages() {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginHandle::from_fn("sbuild", |api| {
                api.warning("no chroot configured");
                Ok(())
            }))
            .unwrap();

        let diagnostics = registry.take_diagnostics();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
        assert_eq!(diagnostics[0].message, "no chroot configured");
        assert_eq!(diagnostics[1].severity, Severity::Info);
        assert_eq!(diagnostics[1].origin, Origin::Plugin("sbuild".to_string()));
        assert_eq!(diagnostics[1].message, "Registered plugin");
    }

    #[test]
    fn test_panicking_plugin_is_caught() {
        let mut registry = PluginRegistry::new();
        let result = registry.register(PluginHandle::from_fn("panicky", |_| -> Result<()> {
            panic!("boom")
        }));
        assert!(matches!(result, Err(PluginError::Panicked(ref m)) if m == "boom"));
        assert!(registry.loaded_plugins().is_empty());

        registry.register(static_plugin("after", &[("x", "true")])).unwrap();
        assert_eq!(registry.loaded_plugins(), vec!["after"]);
    }

    #[test]
    fn test_duplicate_and_empty_ids_rejected() {
        let mut registry = PluginRegistry::new();
        registry.register(static_plugin("dup", &[])).unwrap();
        assert!(registry.register(static_plugin("dup", &[])).is_err());
        assert!(registry.register(static_plugin("  ", &[])).is_err());
        assert_eq!(registry.loaded_plugins(), vec!["dup"]);
    }

    #[test]
    fn test_static_then_dynamic_within_layer() {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginHandle::from_fn("dists", |api| {
                api.add_task(RawTask::new("sbuild-sid", "sbuild -d sid"));
                api.provide_tasks(|ctx| {
                    assert!(ctx.workspace().ends_with("pkg"));
                    ctx.reject(ValidationError::Malformed("provider[2]: not a mapping".to_string()));
                    Ok(vec![
                        RawTask::new("sbuild-bookworm", "sbuild -d bookworm"),
                        RawTask::new("", "invalid"),
                    ])
                });
                Ok(())
            }))
            .unwrap();

        let layers = registry.collect_layers(Path::new("/src/pkg"));
        assert_eq!(layer_names(&layers[0]), vec!["sbuild-sid", "sbuild-bookworm"]);
        let kinds: Vec<&str> = layers[0].rejected().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["empty-name", "malformed-entry"]);
        assert_eq!(
            layers[0].source(),
            &TaskSource::Plugin("dists".to_string())
        );
    }

    #[test]
    fn test_hanging_provider_times_out() {
        let mut registry = PluginRegistry::new().with_provider_timeout(Duration::from_millis(100));
        registry
            .register(PluginHandle::from_fn("slow", |api| {
                api.add_task(RawTask::new("slow-static", "true"));
                api.provide_tasks(|_| {
                    thread::sleep(Duration::from_secs(2));
                    Ok(vec![RawTask::new("late", "true")])
                });
                Ok(())
            }))
            .unwrap();
        registry
            .register(PluginHandle::from_fn("fast", |api| {
                api.provide_tasks(|_| Ok(vec![RawTask::new("quick", "true")]));
                Ok(())
            }))
            .unwrap();
        registry.take_diagnostics();

        let layers = registry.collect_layers(Path::new("."));
        assert_eq!(layer_names(&layers[0]), vec!["slow-static"]);
        assert_eq!(layer_names(&layers[1]), vec!["quick"]);

        let diagnostics = registry.take_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].origin, Origin::Plugin("slow".to_string()));
        assert!(diagnostics[0].message.contains("100ms"));
    }

    #[test]
    fn test_provider_panic_and_error_reported() {
        let mut registry = PluginRegistry::new();
        registry
            .register(PluginHandle::from_fn("bad", |api| {
                api.provide_tasks(|_| panic!("provider exploded"));
                api.provide_tasks(|_| Err(PluginError::ProviderFailed("no chroot".to_string())));
                Ok(())
            }))
            .unwrap();
        registry.take_diagnostics();

        let layers = registry.collect_layers(Path::new("."));
        assert!(layers[0].is_empty());
        let messages: Vec<String> = registry
            .take_diagnostics()
            .into_iter()
            .map(|d| d.message)
            .collect();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("provider exploded"));
        assert!(messages[1].contains("no chroot"));
    }

    #[test]
    fn test_app_ready_fires_once_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        for id in ["one", "two", "three"] {
            let seen = Arc::clone(&seen);
            registry
                .register(PluginHandle::from_fn(id, move |api| {
                    let seen = Arc::clone(&seen);
                    let id = api.plugin_id().to_string();
                    api.on_app_ready(move |app| {
                        if id == "two" {
                            return Err(PluginError::Registration("hook failed".to_string()));
                        }
                        seen.lock().unwrap().push((id, app.task_names().len()));
                        Ok(())
                    });
                    Ok(())
                }))
                .unwrap();
        }
        registry.take_diagnostics();

        let app = AppHandle::new("/src/pkg", vec!["lintian".to_string(), "sbuild".to_string()]);
        assert_eq!(registry.dispatch_app_ready(&app), 3);
        assert_eq!(registry.dispatch_app_ready(&app), 0);
        assert!(registry.app_ready_dispatched());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("one".to_string(), 2), ("three".to_string(), 2)]
        );
        let diagnostics = registry.take_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].origin, Origin::Plugin("two".to_string()));
    }

    #[test]
    fn test_failed_plugin_hooks_are_discarded() {
        let fired = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&fired);
        let mut registry = PluginRegistry::new();
        let _ = registry.register(PluginHandle::from_fn("half", move |api| {
            let flag = Arc::clone(&flag);
            api.on_app_ready(move |_| {
                *flag.lock().unwrap() = true;
                Ok(())
            });
            api.warning("about to fail");
            Err(PluginError::Registration("nope".to_string()))
        }));

        assert_eq!(registry.dispatch_app_ready(&AppHandle::new(".", Vec::new())), 0);
        assert!(!*fired.lock().unwrap());
        let severities: Vec<Severity> = registry
            .take_diagnostics()
            .iter()
            .map(|d| d.severity)
            .collect();
        assert_eq!(severities, vec![Severity::Warning, Severity::Error]);
    }

    #[test]
    fn test_discover_from_static_source() {
        let mut discovery = StaticDiscovery::new(vec![
            static_plugin("a", &[("a", "true")]),
            static_plugin("b", &[("b", "true")]),
        ]);
        let mut registry = PluginRegistry::new();
        assert_eq!(registry.discover(&mut discovery, Path::new(".")), 2);
        assert_eq!(registry.loaded_plugins(), vec!["a", "b"]);
    }
}
