//! Plugin system for DebIDE
//!
//! Plugins contribute tasks to the resolved task set and may subscribe to
//! lifecycle events. Registration is two-phase:
//!
//! 1. **Discovery** yields an ordered list of [`PluginHandle`]s, either
//!    supplied in-process ([`StaticDiscovery`]) or read from manifest
//!    directories ([`ManifestDiscovery`]).
//! 2. **Registration** hands each plugin a [`PluginApi`] capability object.
//!    Contributions are staged and only committed when `register` returns
//!    `Ok` without panicking.
//!
//! Manifest plugins live in `.debide/plugins/` inside the workspace and in
//! the user's configuration directory:
//! ```text
//! .debide/plugins/
//! ├── pbuilder/plugin.yaml
//! └── autopkgtest/plugin.yaml
//! ```

pub mod api;
pub mod discovery;
pub mod registry;

pub use api::{AppHandle, AppReadyHook, PluginApi, ProviderContext, TaskProvider};
pub use discovery::{
    ManifestDiscovery, Plugin, PluginDiscovery, PluginHandle, PluginManifest, StaticDiscovery,
};
pub use registry::{PluginRegistry, DEFAULT_PROVIDER_TIMEOUT};

use std::time::Duration;

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

/// Errors that can occur in the plugin system.
///
/// Every variant is confined to the plugin that caused it.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The plugin's `register` returned an error
    #[error("Plugin registration failed: {0}")]
    Registration(String),

    /// The plugin panicked inside a callback
    #[error("Plugin panicked: {0}")]
    Panicked(String),

    /// A dynamic task provider did not return in time
    #[error("Task provider did not return within {}ms", .0.as_millis())]
    ProviderTimeout(Duration),

    /// A dynamic task provider reported a failure
    #[error("Task provider failed: {0}")]
    ProviderFailed(String),

    /// Invalid plugin manifest
    #[error("Invalid plugin manifest: {0}")]
    InvalidManifest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Turn a caught panic payload into a message.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
