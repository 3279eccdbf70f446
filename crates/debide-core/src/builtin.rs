//! Tasks every workspace starts with.

use crate::{TaskDefinition, TaskLayer, TaskSource};

/// `(name, command, description)` for the built-in defaults.
pub const BUILTIN_TASKS: &[(&str, &str, &str)] = &[
    ("lintian", "lintian", "Check the package for policy violations"),
    (
        "debuild",
        "debuild -us -uc",
        "Build unsigned source and binary packages",
    ),
    (
        "dpkg-buildpackage",
        "dpkg-buildpackage -us -uc",
        "Build packages with dpkg-buildpackage",
    ),
    (
        "uscan",
        "uscan --verbose",
        "Look for newer upstream releases",
    ),
    ("sbuild", "sbuild", "Build in a clean sbuild chroot"),
];

/// The built-in layer, lowest precedence.
pub fn builtin_layer() -> TaskLayer {
    let mut layer = TaskLayer::new(TaskSource::Builtin);
    for (name, command, description) in BUILTIN_TASKS {
        match TaskDefinition::builder(*name, *command)
            .description(*description)
            .build(TaskSource::Builtin)
        {
            Ok(task) => layer.push(task),
            Err(e) => layer.reject(e),
        }
    }
    layer
}
