//! Maintainer identity from the environment.

use std::fmt;

const DEFAULT_NAME: &str = "Debian Maintainer";
const DEFAULT_EMAIL: &str = "maintainer@example.com";

const NAME_VARS: &[&str] = &["DEBFULLNAME", "DEBNAME", "NAME"];
const EMAIL_VARS: &[&str] = &["DEBEMAIL", "EMAIL"];

/// Name and email used when templating packaging files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintainerIdentity {
    pub name: String,
    pub email: String,
}

impl MaintainerIdentity {
    /// Read the identity from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the identity through an arbitrary variable lookup.
    ///
    /// Empty values are skipped in favour of the next variable.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |vars: &[&str], fallback: &str| {
            vars.iter()
                .filter_map(|key| lookup(key))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        Self {
            name: first(NAME_VARS, DEFAULT_NAME),
            email: first(EMAIL_VARS, DEFAULT_EMAIL),
        }
    }
}

impl fmt::Display for MaintainerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}
