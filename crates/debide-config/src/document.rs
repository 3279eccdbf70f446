//! The project configuration document.

use std::path::Path;

use debide_core::{deserialize_scalar, RawTask, ValidationError};
use serde::Deserialize;
use serde_yaml::Value;

use crate::ConfigError;

/// File names probed in the workspace root, in order.
pub const DEFAULT_CONFIG_FILENAMES: &[&str] = &[".debide.yaml", ".debide.yml"];

/// Parsed `.debide.yaml`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigDocument {
    /// Callers must persist open buffers before starting a run.
    pub autosave: bool,

    /// Task preselected in the UI; must exist after merge.
    pub default_task: Option<String>,

    /// Task entries that parsed, in file order.
    pub tasks: Vec<RawTask>,

    /// Entries that could not be read as tasks.
    pub rejected: Vec<ValidationError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDocument {
    autosave: bool,
    #[serde(deserialize_with = "deserialize_scalar")]
    default_task: Option<String>,
    tasks: Value,
}

impl ConfigDocument {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents).map_err(|e| match e {
            ConfigError::NotAMapping { .. } => ConfigError::NotAMapping {
                path: path.to_path_buf(),
            },
            other => other,
        })
    }

    /// Parse configuration text.
    ///
    /// A malformed task entry only rejects that entry; a document that is not
    /// a mapping, or whose `tasks` is not a list, is an error.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        if is_blank(contents) {
            return Ok(Self::default());
        }
        let value: Value = serde_yaml::from_str(contents).map_err(ConfigError::parse)?;
        let raw: RawDocument = match value {
            Value::Null => return Ok(Self::default()),
            Value::Mapping(_) => serde_yaml::from_value(value).map_err(ConfigError::parse)?,
            _ => {
                return Err(ConfigError::NotAMapping {
                    path: Default::default(),
                })
            }
        };

        let entries = match raw.tasks {
            Value::Null => Vec::new(),
            Value::Sequence(entries) => entries,
            _ => return Err(ConfigError::TasksNotAList),
        };

        let (tasks, rejected) = parse_task_entries(entries, "tasks");
        Ok(Self {
            autosave: raw.autosave,
            default_task: raw.default_task.filter(|name| !name.trim().is_empty()),
            tasks,
            rejected,
        })
    }
}

/// Only whitespace, comments and document markers.
fn is_blank(contents: &str) -> bool {
    contents.lines().map(str::trim).all(|line| {
        line.is_empty() || line.starts_with('#') || line == "---" || line == "..."
    })
}

/// Read a list of task entries one by one.
///
/// Entries that cannot be read are returned as `Malformed` errors labelled
/// `<label>[<index>]`; the rest still load.
pub fn parse_task_entries(entries: Vec<Value>, label: &str) -> (Vec<RawTask>, Vec<ValidationError>) {
    let mut tasks = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        match parse_task_entry(entry) {
            Ok(task) => tasks.push(task),
            Err(message) => rejected.push(ValidationError::Malformed(format!(
                "{}[{}]: {}",
                label, index, message
            ))),
        }
    }
    (tasks, rejected)
}

fn parse_task_entry(entry: Value) -> Result<RawTask, String> {
    if !entry.is_mapping() {
        return Err("task entry must be a mapping".to_string());
    }
    if let Some(env) = entry.get("env") {
        if !env.is_mapping() && !env.is_null() {
            return Err("'env' must be a mapping".to_string());
        }
    }
    serde_yaml::from_value(entry).map_err(|e| e.to_string())
}
