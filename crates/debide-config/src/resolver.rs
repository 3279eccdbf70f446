//! Resolution of the final task set for a workspace.

use std::path::{Path, PathBuf};

use debide_core::{
    builtin_layer, Diagnostic, MergedTaskSet, Origin, Severity, TaskDefinition, TaskLayer,
    TaskSource,
};
use tracing::{debug, error, info, warn};

use crate::{ConfigDocument, ConfigError, DEFAULT_CONFIG_FILENAMES};

/// Outcome of resolving a workspace's tasks.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Final merged tasks.
    pub task_set: MergedTaskSet,

    /// Callers must persist open buffers before starting a run.
    pub autosave: bool,

    /// Configured default task, if it resolved to an existing task.
    pub default_task: Option<String>,

    /// Configuration file that was loaded.
    pub config_path: Option<PathBuf>,

    /// Everything reported while resolving, in order.
    pub diagnostics: Vec<Diagnostic>,
}

impl Resolution {
    /// The task a UI should preselect.
    pub fn default_selection(&self) -> Option<&TaskDefinition> {
        self.task_set.default_selection(self.default_task.as_deref())
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Loads the project configuration and merges it with the other layers.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    workspace: PathBuf,
    config_path: Option<PathBuf>,
}

impl ConfigResolver {
    /// Create a resolver for the given workspace root.
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
            config_path: None,
        }
    }

    /// Use an explicit configuration file instead of probing the workspace.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Find the configuration file to load.
    ///
    /// An explicit path must exist; otherwise the first existing default
    /// file name in the workspace is used, if any.
    pub fn locate(&self) -> Result<Option<PathBuf>, ConfigError> {
        if let Some(path) = &self.config_path {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                self.workspace.join(path)
            };
            if !path.is_file() {
                return Err(ConfigError::NotFound { path });
            }
            return Ok(Some(path));
        }

        Ok(DEFAULT_CONFIG_FILENAMES
            .iter()
            .map(|name| self.workspace.join(name))
            .find(|candidate| candidate.is_file()))
    }

    /// Locate and parse the configuration document.
    pub fn load_document(&self) -> Result<Option<(PathBuf, ConfigDocument)>, ConfigError> {
        match self.locate()? {
            Some(path) => {
                debug!(path = %path.display(), "Loading configuration");
                let document = ConfigDocument::load(&path)?;
                Ok(Some((path, document)))
            }
            None => Ok(None),
        }
    }

    /// Merge built-in, plugin and project layers, in that order.
    ///
    /// Never fails: configuration problems become diagnostics and the
    /// remaining layers still load.
    pub fn resolve(&self, plugin_layers: Vec<TaskLayer>) -> Resolution {
        let mut diagnostics = Vec::new();

        let builtin = builtin_layer();
        diagnostics.extend(layer_diagnostics(&builtin));
        for layer in &plugin_layers {
            diagnostics.extend(layer_diagnostics(layer));
        }

        let (config_path, document) = match self.load_document() {
            Ok(Some((path, document))) => (Some(path), document),
            Ok(None) => (None, ConfigDocument::default()),
            Err(e) => {
                diagnostics.push(report(Diagnostic::error(Origin::Project, e.to_string())));
                (None, ConfigDocument::default())
            }
        };

        let mut project = TaskLayer::build(TaskSource::Project, document.tasks);
        for rejected in document.rejected {
            project.reject(rejected);
        }
        diagnostics.extend(layer_diagnostics(&project));

        let task_set = MergedTaskSet::merge(
            std::iter::once(&builtin)
                .chain(plugin_layers.iter())
                .chain(std::iter::once(&project)),
        );

        let default_task = match document.default_task {
            Some(name) if task_set.contains(&name) => Some(name),
            Some(name) => {
                let e = ConfigError::UnknownDefaultTask { name };
                diagnostics.push(report(Diagnostic::error(Origin::Project, e.to_string())));
                None
            }
            None => None,
        };

        info!(
            workspace = %self.workspace.display(),
            tasks = task_set.len(),
            plugin_layers = plugin_layers.len(),
            config = ?config_path,
            "Resolved task set"
        );

        Resolution {
            task_set,
            autosave: document.autosave,
            default_task,
            config_path,
            diagnostics,
        }
    }
}

/// One error diagnostic per task dropped from a layer.
pub fn layer_diagnostics(layer: &TaskLayer) -> Vec<Diagnostic> {
    let origin = Origin::from(layer.source());
    layer
        .rejected()
        .iter()
        .map(|e| report(Diagnostic::error(origin.clone(), e.to_string())))
        .collect()
}

fn report(diagnostic: Diagnostic) -> Diagnostic {
    match diagnostic.severity {
        Severity::Info => info!(origin = %diagnostic.origin, "{}", diagnostic.message),
        Severity::Warning => warn!(origin = %diagnostic.origin, "{}", diagnostic.message),
        Severity::Error => error!(origin = %diagnostic.origin, "{}", diagnostic.message),
    }
    diagnostic
}

#[cfg(test)]
mod tests {
    use super::*;
    use debide_core::RawTask;
    use std::fs;
    use tempfile::tempdir;

    fn write_config(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_no_config_yields_builtins_unmodified() {
        let dir = tempdir().unwrap();
        let resolution = ConfigResolver::new(dir.path()).resolve(Vec::new());

        let builtin = builtin_layer();
        assert_eq!(resolution.task_set.len(), 5);
        for (resolved, original) in resolution.task_set.iter().zip(builtin.tasks()) {
            assert_eq!(resolved, original);
        }
        assert!(resolution.diagnostics.is_empty());
        assert!(resolution.config_path.is_none());
        assert!(!resolution.autosave);
    }

    #[test]
    fn test_project_override_of_builtin() {
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            ".debide.yaml",
            "tasks:\n  - name: lintian\n    command: \"lintian --info\"\n",
        );
        let resolution = ConfigResolver::new(dir.path()).resolve(Vec::new());

        let lintian = resolution.task_set.get("lintian").unwrap();
        assert_eq!(lintian.command(), "lintian --info");
        assert_eq!(lintian.source(), &TaskSource::Project);
        assert_eq!(resolution.task_set.names()[0], "lintian");
        assert_eq!(resolution.task_set.len(), 5);
    }

    #[test]
    fn test_yml_fallback_and_precedence() {
        let dir = tempdir().unwrap();
        write_config(dir.path(), ".debide.yml", "autosave: true\n");
        let resolver = ConfigResolver::new(dir.path());
        assert_eq!(
            resolver.locate().unwrap(),
            Some(dir.path().join(".debide.yml"))
        );

        write_config(dir.path(), ".debide.yaml", "autosave: false\n");
        assert_eq!(
            resolver.locate().unwrap(),
            Some(dir.path().join(".debide.yaml"))
        );
    }

    #[test]
    fn test_explicit_config_path() {
        let dir = tempdir().unwrap();
        write_config(dir.path(), "custom.yaml", "autosave: true\n");
        let resolution = ConfigResolver::new(dir.path())
            .with_config_path("custom.yaml")
            .resolve(Vec::new());
        assert!(resolution.autosave);
        assert_eq!(resolution.config_path, Some(dir.path().join("custom.yaml")));

        let resolver = ConfigResolver::new(dir.path()).with_config_path("missing.yaml");
        assert!(matches!(
            resolver.locate(),
            Err(ConfigError::NotFound { .. })
        ));
        let resolution = resolver.resolve(Vec::new());
        assert_eq!(resolution.task_set.len(), 5);
        assert_eq!(resolution.diagnostics.len(), 1);
        assert!(resolution.has_errors());
    }

    #[test]
    fn test_empty_name_dropped_with_one_diagnostic() {
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            ".debide.yaml",
            "tasks:\n  - name: \"\"\n    command: echo hi\n  - name: ok\n    command: echo ok\n",
        );
        let resolution = ConfigResolver::new(dir.path()).resolve(Vec::new());

        assert_eq!(resolution.task_set.len(), 6);
        assert!(resolution.task_set.contains("ok"));
        assert_eq!(resolution.diagnostics.len(), 1);
        let diag = &resolution.diagnostics[0];
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.origin, Origin::Project);
        assert!(diag.message.contains("missing 'name'"));
    }

    #[test]
    fn test_unknown_default_task_falls_back() {
        let dir = tempdir().unwrap();
        write_config(dir.path(), ".debide.yaml", "default_task: nope\n");
        let resolution = ConfigResolver::new(dir.path()).resolve(Vec::new());

        assert_eq!(resolution.default_task, None);
        assert_eq!(resolution.diagnostics.len(), 1);
        assert!(resolution.diagnostics[0].message.contains("default_task 'nope'"));
        assert_eq!(resolution.default_selection().unwrap().name(), "lintian");
    }

    #[test]
    fn test_default_task_may_name_plugin_task() {
        let dir = tempdir().unwrap();
        write_config(dir.path(), ".debide.yaml", "default_task: pbuilder\n");
        let plugin = TaskLayer::build(
            TaskSource::Plugin("pbuilder".to_string()),
            vec![RawTask::new("pbuilder", "pdebuild")],
        );
        let resolution = ConfigResolver::new(dir.path()).resolve(vec![plugin]);
        assert_eq!(resolution.default_task.as_deref(), Some("pbuilder"));
        assert_eq!(resolution.default_selection().unwrap().command(), "pdebuild");
    }

    #[test]
    fn test_layer_precedence_with_plugins() {
        let dir = tempdir().unwrap();
        write_config(
            dir.path(),
            ".debide.yaml",
            "tasks:\n  - name: sbuild\n    command: sbuild -d unstable\n",
        );
        let first = TaskLayer::build(
            TaskSource::Plugin("a".to_string()),
            vec![
                RawTask::new("sbuild", "sbuild --arch=i386"),
                RawTask::new("uscan", "uscan --report"),
            ],
        );
        let second = TaskLayer::build(
            TaskSource::Plugin("b".to_string()),
            vec![RawTask::new("uscan", "uscan --download-current-version")],
        );
        let resolution = ConfigResolver::new(dir.path()).resolve(vec![first, second]);

        let sbuild = resolution.task_set.get("sbuild").unwrap();
        assert_eq!(sbuild.command(), "sbuild -d unstable");
        assert_eq!(sbuild.source(), &TaskSource::Project);

        let uscan = resolution.task_set.get("uscan").unwrap();
        assert_eq!(uscan.command(), "uscan --download-current-version");
        assert_eq!(uscan.source().to_string(), "plugin:b");
    }

    #[test]
    fn test_broken_config_still_loads_other_layers() {
        let dir = tempdir().unwrap();
        write_config(dir.path(), ".debide.yaml", "tasks: [unterminated\n");
        let plugin = TaskLayer::build(
            TaskSource::Plugin("p".to_string()),
            vec![RawTask::new("extra", "true")],
        );
        let resolution = ConfigResolver::new(dir.path()).resolve(vec![plugin]);
        assert_eq!(resolution.task_set.len(), 6);
        assert!(resolution.has_errors());
        assert_eq!(resolution.diagnostics[0].origin, Origin::Project);
    }
}
