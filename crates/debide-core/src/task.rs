//! Task definitions and provenance layers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::ValidationError;

/// Where a task definition came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskSource {
    /// Shipped with DebIDE.
    Builtin,
    /// Contributed by the plugin with the given id.
    Plugin(String),
    /// Declared in the project configuration file.
    Project,
}

impl TaskSource {
    /// Plugin id, if this is a plugin contribution.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::Plugin(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("builtin"),
            Self::Plugin(id) => write!(f, "plugin:{}", id),
            Self::Project => f.write_str("project"),
        }
    }
}

impl Serialize for TaskSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A fully-specified, validated task recipe.
///
/// Instances can only be created through [`TaskBuilder::build`], so `name`
/// and `command` are always non-empty and every `env` key is a valid
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDefinition {
    name: String,
    command: String,
    description: String,
    working_dir: PathBuf,
    env: BTreeMap<String, String>,
    source: TaskSource,
}

impl TaskDefinition {
    /// Start building a task with the required fields.
    pub fn builder(name: impl Into<String>, command: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name, command)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Working directory as declared; `.` means the workspace root.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Variables overlaid on the inherited process environment.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn source(&self) -> &TaskSource {
        &self.source
    }

    /// Return the directory the command should execute in.
    pub fn resolve_working_dir(&self, workspace: &Path) -> PathBuf {
        if self.working_dir.as_os_str().is_empty() || self.working_dir == Path::new(".") {
            workspace.to_path_buf()
        } else if self.working_dir.is_absolute() {
            self.working_dir.clone()
        } else {
            workspace.join(&self.working_dir)
        }
    }

    pub(crate) fn retag(mut self, source: TaskSource) -> Self {
        self.source = source;
        self
    }
}

/// Builder for [`TaskDefinition`]; defaulting happens here.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    name: String,
    command: String,
    description: String,
    working_dir: PathBuf,
    env: BTreeMap<String, String>,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            description: String::new(),
            working_dir: PathBuf::from("."),
            env: BTreeMap::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Validate and produce the final record.
    pub fn build(self, source: TaskSource) -> Result<TaskDefinition, ValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        let command = self.command.trim().to_string();
        if command.is_empty() {
            return Err(ValidationError::EmptyCommand { name });
        }
        if let Some(key) = self.env.keys().find(|k| !is_valid_env_key(k)) {
            return Err(ValidationError::InvalidEnvKey {
                task: name,
                key: key.clone(),
            });
        }
        let working_dir = if self.working_dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            self.working_dir
        };

        Ok(TaskDefinition {
            name,
            command,
            description: self.description.trim().to_string(),
            working_dir,
            env: self.env,
            source,
        })
    }
}

/// Returns true for `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// YAML scalar accepted where text is expected, such as an `env` value.
///
/// `~` reads as the empty string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Null => Ok(()),
        }
    }
}

/// Read an optional scalar as text, so `name: 2024` or `command: true` work.
pub fn deserialize_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<EnvValue>::deserialize(deserializer)?.map(|value| value.to_string()))
}

/// Partially-specified task as found in YAML or handed over by a plugin.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawTask {
    #[serde(deserialize_with = "deserialize_scalar")]
    pub name: Option<String>,
    #[serde(deserialize_with = "deserialize_scalar")]
    pub command: Option<String>,
    #[serde(deserialize_with = "deserialize_scalar")]
    pub description: Option<String>,
    #[serde(deserialize_with = "deserialize_scalar")]
    pub working_dir: Option<String>,
    pub env: Option<BTreeMap<String, EnvValue>>,
}

impl RawTask {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), EnvValue::Text(value.into()));
        self
    }

    /// Apply defaults and validate.
    pub fn into_definition(self, source: TaskSource) -> Result<TaskDefinition, ValidationError> {
        let mut builder = TaskBuilder::new(
            self.name.unwrap_or_default(),
            self.command.unwrap_or_default(),
        );
        if let Some(description) = self.description {
            builder = builder.description(description);
        }
        if let Some(dir) = self.working_dir {
            builder = builder.working_dir(dir);
        }
        if let Some(env) = self.env {
            builder = builder.envs(env.into_iter().map(|(k, v)| (k, v.to_string())));
        }
        builder.build(source)
    }
}

/// One provenance tier's validated tasks, in declaration order.
#[derive(Debug, Clone)]
pub struct TaskLayer {
    source: TaskSource,
    tasks: Vec<TaskDefinition>,
    seen: HashSet<String>,
    rejected: Vec<ValidationError>,
}

impl TaskLayer {
    /// Create an empty layer.
    pub fn new(source: TaskSource) -> Self {
        Self {
            source,
            tasks: Vec::new(),
            seen: HashSet::new(),
            rejected: Vec::new(),
        }
    }

    /// Build a layer from raw entries, dropping invalid ones.
    pub fn build<I>(source: TaskSource, raws: I) -> Self
    where
        I: IntoIterator<Item = RawTask>,
    {
        let mut layer = Self::new(source);
        for raw in raws {
            layer.push_raw(raw);
        }
        layer
    }

    /// Validate and add a raw entry.
    pub fn push_raw(&mut self, raw: RawTask) {
        match raw.into_definition(self.source.clone()) {
            Ok(task) => self.push(task),
            Err(e) => self.rejected.push(e),
        }
    }

    /// Add a definition, re-tagging it with this layer's source.
    ///
    /// A name already present in this layer is rejected; the first entry stays.
    pub fn push(&mut self, task: TaskDefinition) {
        if !self.seen.insert(task.name().to_string()) {
            self.rejected.push(ValidationError::DuplicateName {
                name: task.name().to_string(),
                layer: self.source.to_string(),
            });
            return;
        }
        self.tasks.push(task.retag(self.source.clone()));
    }

    /// Record an entry that never made it to a `RawTask`.
    pub fn reject(&mut self, error: ValidationError) {
        self.rejected.push(error);
    }

    pub fn source(&self) -> &TaskSource {
        &self.source
    }

    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    /// Validation failures encountered while building the layer.
    pub fn rejected(&self) -> &[ValidationError] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
