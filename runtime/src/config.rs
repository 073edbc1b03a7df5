//! Session configuration.

use std::collections::BTreeMap;

use p2shim_bridge::BridgeConfig;
use p2shim_sys::env::{default_vars, DEFAULT_PROGRAM_NAME};
use p2shim_sys::Environment;
use p2shim_vfs::FsSnapshot;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How the guest thread reaches a delegate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topology {
    /// A dedicated delegate thread, connected to the guest thread by a
    /// private channel. The embedder's runtime is not involved once the
    /// session is running.
    #[default]
    TwoThread,
    /// Only the guest thread is spawned. Requests travel to the embedder's
    /// runtime, which acts as the delegate.
    HostDelegate,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::TwoThread => f.write_str("two-thread"),
            Topology::HostDelegate => f.write_str("host-delegate"),
        }
    }
}

/// Everything a session needs, passed by value to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Absolute path the guest's `.` resolves to.
    pub cwd: String,
    pub filesystem: FsSnapshot,
    pub topology: Topology,
    pub bridge: BridgeConfig,
    pub startup_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            args: vec![DEFAULT_PROGRAM_NAME.to_string()],
            env: default_vars(),
            cwd: "/".to_string(),
            filesystem: FsSnapshot::new()
                .with_directory("home/user")
                .with_directory("tmp"),
            topology: Topology::default(),
            bridge: BridgeConfig::default(),
            startup_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn environment(&self) -> Environment {
        Environment::new(self.args.clone(), self.env.clone(), self.cwd.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2shim_vfs::SnapshotEntry;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.args, vec!["wasm-app"]);
        assert_eq!(config.env.get("PATH").map(String::as_str), Some("/usr/local/bin:/usr/bin:/bin"));
        assert_eq!(config.cwd, "/");
        assert_eq!(config.topology, Topology::TwoThread);
        assert_eq!(config.startup_timeout_ms, 10_000);
        assert!(matches!(config.filesystem.dir.get("tmp"), Some(SnapshotEntry::Directory { .. })));
        assert!(matches!(config.filesystem.dir.get("home"), Some(SnapshotEntry::Directory { .. })));
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let config = SessionConfig::from_json(
            r#"{
                "topology": "host-delegate",
                "cwd": "/home/user",
                "bridge": {"min_ceiling_ms": 250},
                "filesystem": {"dir": {"data": {"source": "42"}}}
            }"#,
        )
        .unwrap();

        assert_eq!(config.topology, Topology::HostDelegate);
        assert_eq!(config.cwd, "/home/user");
        assert_eq!(config.bridge.min_ceiling_ms, 250);
        assert_eq!(config.bridge.safety_factor, 2);
        assert_eq!(config.args, vec!["wasm-app"]);
        assert!(config.filesystem.dir.contains_key("data"));
    }

    #[test]
    fn invalid_document_is_config_error() {
        let err = SessionConfig::from_json(r#"{"topology": "carrier-pigeon"}"#).unwrap_err();
        assert!(err.to_string().starts_with("invalid session configuration"));
    }

    #[test]
    fn environment_follows_config() {
        let config = SessionConfig {
            args: vec!["tool".to_string(), "-v".to_string()],
            cwd: "/tmp".to_string(),
            ..SessionConfig::default()
        };
        let env = config.environment();
        assert_eq!(env.get_arguments(), vec!["tool", "-v"]);
        assert_eq!(env.initial_cwd(), Some("/tmp".to_string()));
        assert_eq!(env.var("HOME"), Some("/home/user"));
    }
}
