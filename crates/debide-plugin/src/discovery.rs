//! Plugin discovery
//!
//! Finds plugins either supplied by the embedding host or declared by
//! `plugin.yaml` manifests in plugin directories.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use debide_config::parse_task_entries;
use debide_core::{RawTask, ValidationError};
use serde::Deserialize;
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::{PluginApi, PluginError, ProviderContext, Result};

/// Manifest file expected in every plugin directory.
pub const MANIFEST_FILE: &str = "plugin.yaml";

/// How often a running provider command is checked for exit.
const PROVIDER_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A DebIDE plugin.
pub trait Plugin: Send {
    /// Declare contributions through the capability object.
    fn register(&self, api: &mut PluginApi) -> Result<()>;
}

impl<F> Plugin for F
where
    F: Fn(&mut PluginApi) -> Result<()> + Send,
{
    fn register(&self, api: &mut PluginApi) -> Result<()> {
        self(api)
    }
}

/// A discovered plugin awaiting registration.
pub struct PluginHandle {
    pub id: String,
    pub plugin: Box<dyn Plugin>,
}

impl PluginHandle {
    pub fn new(id: impl Into<String>, plugin: impl Plugin + 'static) -> Self {
        Self {
            id: id.into(),
            plugin: Box::new(plugin),
        }
    }

    /// Wrap a registration closure.
    pub fn from_fn<F>(id: impl Into<String>, register: F) -> Self
    where
        F: Fn(&mut PluginApi) -> Result<()> + Send + 'static,
    {
        Self::new(id, register)
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle").field("id", &self.id).finish()
    }
}

/// Source of plugin handles, in registration order.
pub trait PluginDiscovery {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn discover(&mut self, workspace: &Path) -> Result<Vec<PluginHandle>>;
}

/// In-process plugins supplied by the host.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    handles: Vec<PluginHandle>,
}

impl StaticDiscovery {
    pub fn new(handles: Vec<PluginHandle>) -> Self {
        Self { handles }
    }

    pub fn push(&mut self, handle: PluginHandle) {
        self.handles.push(handle);
    }
}

impl PluginDiscovery for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    fn discover(&mut self, _workspace: &Path) -> Result<Vec<PluginHandle>> {
        Ok(std::mem::take(&mut self.handles))
    }
}

/// A `plugin.yaml` manifest.
///
/// ```yaml
/// name: pbuilder
/// description: pbuilder integration
/// tasks:
///   - name: pdebuild
///     command: pdebuild --debbuildopts -us
/// provider: ./list-dists.sh
/// ```
#[derive(Debug, Clone)]
pub struct PluginManifest {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,

    /// Static task contributions that could be read.
    pub tasks: Vec<RawTask>,

    /// Task entries that could not be read.
    pub rejected: Vec<ValidationError>,

    /// Shell command run in the workspace; stdout is a YAML task list.
    pub provider: Option<String>,
}

#[derive(Deserialize)]
struct RawManifest {
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tasks: Value,
    #[serde(default)]
    provider: Option<String>,
}

impl PluginManifest {
    /// Load and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse a manifest; a malformed task entry only rejects that entry.
    pub fn parse(content: &str) -> Result<Self> {
        let raw: RawManifest = serde_yaml::from_str(content)?;
        let entries = match raw.tasks {
            Value::Null => Vec::new(),
            Value::Sequence(entries) => entries,
            _ => {
                return Err(PluginError::InvalidManifest(
                    "'tasks' must be a list".to_string(),
                ))
            }
        };
        let (tasks, rejected) = parse_task_entries(entries, "tasks");
        let manifest = Self {
            name: raw.name,
            version: raw.version,
            description: raw.description,
            tasks,
            rejected,
            provider: raw.provider,
        };

        if manifest.name.trim().is_empty() {
            return Err(PluginError::InvalidManifest(
                "'name' must not be empty".to_string(),
            ));
        }
        if manifest
            .provider
            .as_deref()
            .is_some_and(|p| p.trim().is_empty())
        {
            return Err(PluginError::InvalidManifest(format!(
                "plugin {} declares an empty provider command",
                manifest.name
            )));
        }
        Ok(manifest)
    }
}

/// Plugin backed by a manifest.
struct ManifestPlugin {
    manifest: PluginManifest,
}

impl Plugin for ManifestPlugin {
    fn register(&self, api: &mut PluginApi) -> Result<()> {
        for task in &self.manifest.tasks {
            api.add_task(task.clone());
        }
        for rejected in &self.manifest.rejected {
            api.error(rejected.to_string());
        }
        if let Some(command) = self.manifest.provider.clone() {
            api.provide_tasks(move |ctx| run_provider_command(&command, ctx));
        }
        Ok(())
    }
}

/// Stand-in for a manifest that could not be loaded; fails registration so
/// the problem is reported like any other plugin failure.
struct BrokenManifest {
    path: PathBuf,
    message: String,
}

impl Plugin for BrokenManifest {
    fn register(&self, _api: &mut PluginApi) -> Result<()> {
        Err(PluginError::InvalidManifest(format!(
            "{}: {}",
            self.path.display(),
            self.message
        )))
    }
}

/// Run a provider command in its own process group and read its stdout as
/// a YAML task list.
///
/// The whole group is killed when the context deadline passes, and after
/// the command exits so stragglers cannot hold the pipes open.
fn run_provider_command(command: &str, ctx: &ProviderContext) -> Result<Vec<RawTask>> {
    debug!(command = %command, workspace = %ctx.workspace().display(), "Running task provider");
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(ctx.workspace())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().map(read_to_end);
    let stderr = child.stderr.take().map(read_to_end);

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= ctx.deadline() => {
                warn!(command = %command, pid = child.id(), "Task provider timed out; killing it");
                kill_provider(&mut child);
                return Err(PluginError::ProviderTimeout(ctx.timeout()));
            }
            Ok(None) => thread::sleep(PROVIDER_POLL_INTERVAL.min(ctx.remaining())),
            Err(e) => {
                kill_provider(&mut child);
                return Err(e.into());
            }
        }
    };
    kill_group(&mut child);

    let stdout = join_output(stdout);
    if !status.success() {
        let stderr = join_output(stderr);
        return Err(PluginError::ProviderFailed(format!(
            "'{}' exited with {}: {}",
            command,
            status,
            String::from_utf8_lossy(&stderr).trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&stdout);
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    let output: Value = serde_yaml::from_str(&stdout)?;
    let entries = match output {
        Value::Null => Vec::new(),
        Value::Sequence(entries) => entries,
        _ => {
            return Err(PluginError::ProviderFailed(format!(
                "'{}' did not print a list of tasks",
                command
            )))
        }
    };
    let (tasks, rejected) = parse_task_entries(entries, "provider");
    for error in rejected {
        ctx.reject(error);
    }
    Ok(tasks)
}

fn read_to_end<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!(error = %e, "Failed to read provider output");
        }
        buf
    })
}

fn join_output(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|reader| reader.join().ok())
        .unwrap_or_default()
}

/// Kill the provider's process group and reap the leader.
fn kill_provider(child: &mut Child) {
    kill_group(child);
    if let Err(e) = child.wait() {
        warn!(error = %e, "Failed to reap task provider");
    }
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = child.id(), error = %e, "Failed to kill provider process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "Failed to kill task provider");
    }
}

/// Scans plugin directories for `<dir>/plugin.yaml`.
///
/// Directories are visited in the order given; plugins within a directory
/// in name order.
#[derive(Debug, Clone)]
pub struct ManifestDiscovery {
    search_path: Vec<PathBuf>,
}

impl ManifestDiscovery {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    /// The workspace's `.debide/plugins` followed by the user's
    /// `$XDG_CONFIG_HOME/debide/plugins`.
    pub fn for_workspace(workspace: &Path) -> Self {
        let mut search_path = vec![workspace.join(".debide").join("plugins")];
        if let Some(config) = dirs::config_dir() {
            search_path.push(config.join("debide").join("plugins"));
        }
        Self::new(search_path)
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    fn scan(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut plugin_dirs = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() && path.join(MANIFEST_FILE).is_file() {
                plugin_dirs.push(path);
            }
        }
        plugin_dirs.sort();
        Ok(plugin_dirs)
    }
}

impl PluginDiscovery for ManifestDiscovery {
    fn name(&self) -> &str {
        "manifest"
    }

    fn discover(&mut self, _workspace: &Path) -> Result<Vec<PluginHandle>> {
        let mut handles = Vec::new();

        for dir in &self.search_path {
            if !dir.is_dir() {
                continue;
            }
            let plugin_dirs = match Self::scan(dir) {
                Ok(found) => found,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Skipping unreadable plugin directory");
                    continue;
                }
            };

            for plugin_dir in plugin_dirs {
                let manifest_path = plugin_dir.join(MANIFEST_FILE);
                match PluginManifest::load(&manifest_path) {
                    Ok(manifest) => {
                        debug!(plugin = %manifest.name, path = %manifest_path.display(), "Found plugin manifest");
                        handles.push(PluginHandle::new(
                            manifest.name.clone(),
                            ManifestPlugin { manifest },
                        ));
                    }
                    Err(e) => {
                        let id = plugin_dir
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| manifest_path.display().to_string());
                        handles.push(PluginHandle::new(
                            id,
                            BrokenManifest {
                                path: manifest_path,
                                message: e.to_string(),
                            },
                        ));
                    }
                }
            }
        }

        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn context(workspace: &Path) -> ProviderContext {
        ProviderContext::new(workspace, Duration::from_secs(10))
    }

    fn write_manifest(root: &Path, dir: &str, contents: &str) {
        let plugin_dir = root.join(dir);
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join(MANIFEST_FILE), contents).unwrap();
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = PluginManifest::parse(
            r#"
name: pbuilder
version: "1.0"
tasks:
  - name: pdebuild
    command: pdebuild
provider: echo
"#,
        )
        .unwrap();
        assert_eq!(manifest.name, "pbuilder");
        assert_eq!(manifest.tasks.len(), 1);
        assert_eq!(manifest.provider.as_deref(), Some("echo"));

        assert!(matches!(
            PluginManifest::parse("name: \"\"\n"),
            Err(PluginError::InvalidManifest(_))
        ));
        assert!(matches!(
            PluginManifest::parse("tasks: []\n"),
            Err(PluginError::Yaml(_))
        ));
        assert!(matches!(
            PluginManifest::parse("name: ci\ntasks: lintian\n"),
            Err(PluginError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_malformed_entries_only_reject_themselves() {
        let workspace = tempdir().unwrap();
        fs::write(
            workspace.path().join("tasks.yaml"),
            "- name: piuparts\n  command: piuparts\n- [not, a, task]\n",
        )
        .unwrap();
        let manifest = PluginManifest::parse(
            r#"
name: ci
tasks:
  - name: blhc
    command: blhc
  - name: bad-env
    command: "true"
    env: [A]
provider: cat tasks.yaml
"#,
        )
        .unwrap();
        assert_eq!(manifest.tasks.len(), 1);
        assert_eq!(manifest.rejected.len(), 1);

        let mut api = PluginApi::new("ci");
        ManifestPlugin { manifest }.register(&mut api).unwrap();
        let staged = api.into_staged();
        assert_eq!(staged.tasks.len(), 1);
        assert_eq!(staged.messages.len(), 1);
        assert!(staged.messages[0].message.contains("tasks[1]"));

        let ctx = context(workspace.path());
        let provided = (staged.providers[0])(&ctx).unwrap();
        assert_eq!(provided.len(), 1);
        assert_eq!(provided[0].name.as_deref(), Some("piuparts"));
        let rejected = ctx.take_rejected();
        assert_eq!(rejected.len(), 1);
        assert!(rejected[0].to_string().contains("provider[1]"));
    }

    #[test]
    fn test_static_discovery_drains_handles() {
        let mut discovery = StaticDiscovery::default();
        discovery.push(PluginHandle::from_fn("a", |_| Ok(())));
        let handles = discovery.discover(Path::new(".")).unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].id, "a");
        assert!(discovery.discover(Path::new(".")).unwrap().is_empty());
    }

    #[test]
    fn test_manifest_discovery_orders_by_directory() {
        let root = tempdir().unwrap();
        write_manifest(root.path(), "b-second", "name: second\n");
        write_manifest(root.path(), "a-first", "name: first\n");
        fs::create_dir_all(root.path().join("no-manifest")).unwrap();

        let mut discovery = ManifestDiscovery::new(vec![
            root.path().to_path_buf(),
            root.path().join("missing"),
        ]);
        let handles = discovery.discover(root.path()).unwrap();
        let ids: Vec<&str> = handles.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn test_broken_manifest_fails_registration() {
        let root = tempdir().unwrap();
        write_manifest(root.path(), "broken", "name: [unclosed\n");

        let mut discovery = ManifestDiscovery::new(vec![root.path().to_path_buf()]);
        let handles = discovery.discover(root.path()).unwrap();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].id, "broken");

        let mut api = PluginApi::new("broken");
        let err = handles[0].plugin.register(&mut api).unwrap_err();
        assert!(matches!(err, PluginError::InvalidManifest(_)));
    }

    #[test]
    fn test_manifest_plugin_contributes_static_and_provider_tasks() {
        let workspace = tempdir().unwrap();
        fs::write(
            workspace.path().join("tasks.yaml"),
            "- name: autopkgtest\n  command: autopkgtest . -- null\n",
        )
        .unwrap();
        let plugins = workspace.path().join(".debide").join("plugins");
        write_manifest(
            &plugins,
            "ci",
            "name: ci\ntasks:\n  - name: blhc\n    command: blhc ../*.build\nprovider: cat tasks.yaml\n",
        );

        let mut discovery = ManifestDiscovery::new(vec![plugins]);
        let handles = discovery.discover(workspace.path()).unwrap();
        let mut api = PluginApi::new("ci");
        handles[0].plugin.register(&mut api).unwrap();

        let staged = api.into_staged();
        assert_eq!(staged.tasks[0].name.as_deref(), Some("blhc"));
        assert_eq!(staged.providers.len(), 1);
        let provided = (staged.providers[0])(&context(workspace.path())).unwrap();
        assert_eq!(provided.len(), 1);
        assert_eq!(provided[0].command.as_deref(), Some("autopkgtest . -- null"));
    }

    #[test]
    fn test_provider_command_failure() {
        let workspace = tempdir().unwrap();
        let ctx = context(workspace.path());
        let err = run_provider_command("echo broken >&2; exit 3", &ctx).unwrap_err();
        match err {
            PluginError::ProviderFailed(message) => assert!(message.contains("broken")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(run_provider_command("true", &ctx).unwrap().is_empty());
        assert!(matches!(
            run_provider_command("echo lintian", &ctx),
            Err(PluginError::ProviderFailed(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_timed_out_provider_process_is_killed() {
        use crate::PluginRegistry;
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let workspace = tempdir().unwrap();
        let manifest =
            PluginManifest::parse("name: hang\nprovider: echo $$ > provider.pid; exec sleep 30\n")
                .unwrap();
        let mut registry = PluginRegistry::new().with_provider_timeout(Duration::from_millis(200));
        registry
            .register(PluginHandle::new("hang", ManifestPlugin { manifest }))
            .unwrap();
        registry.take_diagnostics();

        let started = Instant::now();
        let layers = registry.collect_layers(workspace.path());
        assert!(layers[0].is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
        let diagnostics = registry.take_diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("did not return within 200ms"));

        let pid: i32 = fs::read_to_string(workspace.path().join("provider.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH)) {
            assert!(Instant::now() < deadline, "provider process survived its timeout");
            thread::sleep(Duration::from_millis(50));
        }
    }

    #[test]
    fn test_for_workspace_search_path() {
        let discovery = ManifestDiscovery::for_workspace(Path::new("/src/hello"));
        assert_eq!(
            discovery.search_path()[0],
            PathBuf::from("/src/hello/.debide/plugins")
        );
    }
}
