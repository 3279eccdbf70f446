//! Executable availability check performed before spawning.

use std::ffi::OsStr;
use std::path::Path;

use debide_core::is_valid_env_key;

use crate::RunnerError;

/// Words `sh` resolves without a PATH lookup.
const SHELL_BUILTINS: &[&str] = &[
    ".", ":", "[", "alias", "break", "cd", "command", "continue", "eval", "exec", "exit",
    "export", "false", "getopts", "hash", "kill", "local", "printf", "pwd", "read", "readonly",
    "return", "set", "shift", "source", "test", "times", "trap", "true", "type", "ulimit",
    "umask", "unalias", "unset", "wait", "echo",
];

const SHELL_KEYWORDS: &[&str] = &[
    "!", "case", "do", "done", "elif", "else", "esac", "fi", "for", "if", "in", "then", "until",
    "while", "{", "}",
];

const SEPARATORS: &[&str] = &["&&", "||", "|", ";", "\n"];

/// First word of the first simple command, skipping `VAR=value` prefixes.
///
/// Returns `None` when the command cannot be lexed or has no such word.
pub fn primary_executable(command: &str) -> Option<String> {
    let end = SEPARATORS
        .iter()
        .filter_map(|sep| command.find(sep))
        .min()
        .unwrap_or(command.len());
    let words = shlex::split(&command[..end])?;
    words.into_iter().find(|word| !is_assignment(word))
}

fn is_assignment(word: &str) -> bool {
    word.split_once('=')
        .is_some_and(|(key, _)| is_valid_env_key(key))
}

/// Whether the word is resolved by the shell itself or cannot be checked.
fn skip_lookup(word: &str) -> bool {
    word.contains('/')
        || word.starts_with(['$', '(', '`', '~'])
        || SHELL_BUILTINS.contains(&word)
        || SHELL_KEYWORDS.contains(&word)
}

/// Fail if the command's executable cannot be found.
///
/// `path` overrides the inherited `PATH` when the task sets its own.
pub fn ensure_executable(
    command: &str,
    path: Option<&OsStr>,
    cwd: &Path,
) -> Result<(), RunnerError> {
    let Some(executable) = primary_executable(command) else {
        return Ok(());
    };
    if skip_lookup(&executable) {
        return Ok(());
    }

    let found = match path {
        Some(path) => which::which_in(&executable, Some(path), cwd).is_ok(),
        None => which::which(&executable).is_ok(),
    };
    if found {
        Ok(())
    } else {
        Err(RunnerError::ExecutableNotFound(executable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_executable() {
        assert_eq!(primary_executable("lintian --info").as_deref(), Some("lintian"));
        assert_eq!(
            primary_executable("DEB_BUILD_OPTIONS=nocheck debuild -us -uc").as_deref(),
            Some("debuild")
        );
        assert_eq!(
            primary_executable("cd debian && dch -i").as_deref(),
            Some("cd")
        );
        assert_eq!(
            primary_executable("'dpkg-buildpackage' -b | tee log").as_deref(),
            Some("dpkg-buildpackage")
        );
        assert_eq!(primary_executable("FOO=1"), None);
        assert_eq!(primary_executable("echo \"unbalanced"), None);
    }

    #[test]
    fn test_missing_executable_reported() {
        let err = ensure_executable(
            "definitely-not-installed-tool --flag",
            None,
            Path::new("."),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Command 'definitely-not-installed-tool' is not available on PATH. \
             Check that required packages are installed."
        );
    }

    #[test]
    fn test_builtins_and_paths_skipped() {
        let cwd = Path::new(".");
        assert!(ensure_executable("cd /tmp && missing-thing", None, cwd).is_ok());
        assert!(ensure_executable("./debian/rules build", None, cwd).is_ok());
        assert!(ensure_executable("$MAKE all", None, cwd).is_ok());
        assert!(ensure_executable("sh -c true", None, cwd).is_ok());
    }

    #[test]
    fn test_path_override() {
        let empty = tempfile::tempdir().unwrap();
        let err = ensure_executable("sh -c true", Some(empty.path().as_os_str()), empty.path());
        assert!(matches!(err, Err(RunnerError::ExecutableNotFound(ref x)) if x == "sh"));
    }
}
