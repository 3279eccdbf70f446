//! Merging provenance layers into the final task set.

use std::collections::HashMap;

use crate::{TaskDefinition, TaskLayer};

/// Resolved tasks keyed by name, in first-introduction order.
///
/// Layers are applied in order; a later layer mentioning an existing name
/// replaces the whole stored record (including its source) but keeps the
/// name's original display position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedTaskSet {
    order: Vec<String>,
    tasks: HashMap<String, TaskDefinition>,
}

impl MergedTaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge layers in the given order, last writer wins.
    pub fn merge<'a, I>(layers: I) -> Self
    where
        I: IntoIterator<Item = &'a TaskLayer>,
    {
        let mut set = Self::new();
        for layer in layers {
            set.apply_layer(layer);
        }
        set
    }

    /// Apply one layer on top of the current set.
    pub fn apply_layer(&mut self, layer: &TaskLayer) {
        for task in layer.tasks() {
            self.insert(task.clone());
        }
    }

    fn insert(&mut self, task: TaskDefinition) {
        let name = task.name().to_string();
        if self.tasks.insert(name.clone(), task).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Tasks in display order.
    pub fn iter(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.order.iter().filter_map(|name| self.tasks.get(name))
    }

    /// Task names in display order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Task to preselect: the configured default if it exists, else the first.
    pub fn default_selection(&self, default_task: Option<&str>) -> Option<&TaskDefinition> {
        default_task
            .and_then(|name| self.get(name))
            .or_else(|| self.iter().next())
    }
}
