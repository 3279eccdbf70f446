//! Configuration for DebIDE workspaces.
//!
//! Loads the project's `.debide.yaml` and resolves the final task set from
//! the built-in, plugin and project layers.
//!
//! ```yaml
//! autosave: true
//! default_task: lintian
//! tasks:
//!   - name: lintian
//!     command: lintian --info --display-info
//!   - name: test
//!     command: dh_auto_test
//!     working_dir: build
//!     env:
//!       DEB_BUILD_OPTIONS: parallel=4
//! ```

pub mod document;
pub mod error;
pub mod maintainer;
pub mod resolver;

pub use document::{parse_task_entries, ConfigDocument, DEFAULT_CONFIG_FILENAMES};
pub use error::ConfigError;
pub use maintainer::MaintainerIdentity;
pub use resolver::{layer_diagnostics, ConfigResolver, Resolution};
