//! Arguments, environment variables and working directory seen by the guest.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PROGRAM_NAME: &str = "wasm-app";

/// The guest's process environment. Built per session; nothing here reads
/// or changes the host process's own environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    args: Vec<String>,
    vars: BTreeMap<String, String>,
    cwd: String,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            args: vec![DEFAULT_PROGRAM_NAME.to_string()],
            vars: default_vars(),
            cwd: "/".to_string(),
        }
    }
}

impl Environment {
    pub fn new(args: Vec<String>, vars: BTreeMap<String, String>, cwd: impl Into<String>) -> Self {
        Self {
            args,
            vars,
            cwd: cwd.into(),
        }
    }

    /// Variables as `(name, value)` pairs, sorted by name.
    pub fn get_environment(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn get_arguments(&self) -> Vec<String> {
        self.args.clone()
    }

    pub fn initial_cwd(&self) -> Option<String> {
        Some(self.cwd.clone())
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }
}

/// `LANG`, `PATH` and `HOME` for a generic Unix-like guest.
pub fn default_vars() -> BTreeMap<String, String> {
    [
        ("HOME", "/home/user"),
        ("LANG", "en_US.UTF-8"),
        ("PATH", "/usr/local/bin:/usr/bin:/bin"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
