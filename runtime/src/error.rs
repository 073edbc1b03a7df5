//! Error types for the session runtime.

use p2shim_vfs::SnapshotError;
use thiserror::Error;

use crate::message::WorkerRole;

/// Errors that can occur while setting up or running a session.
///
/// These are host-side failures. None of them is visible to the guest.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A thread reported an error during the startup handshake.
    #[error("{role} thread failed during startup: {message}")]
    Startup { role: WorkerRole, message: String },

    /// The OS refused to spawn a thread.
    #[error("failed to spawn {role} thread: {source}")]
    ThreadSpawn {
        role: WorkerRole,
        #[source]
        source: std::io::Error,
    },

    /// A guest module could not be resolved or compiled.
    #[error("failed to load module {name}: {message}")]
    ModuleLoad { name: String, message: String },

    /// The loader could not instantiate the guest.
    #[error("failed to instantiate guest: {0}")]
    Instantiate(String),

    /// The filesystem snapshot was invalid.
    #[error("invalid filesystem snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    /// The session configuration document was invalid.
    #[error("invalid session configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Not every thread was ready in time.
    #[error("startup did not complete within {timeout_ms}ms")]
    StartupTimeout { timeout_ms: u64 },

    /// A thread sent a message that does not fit the handshake.
    #[error("startup protocol violation: {0}")]
    Protocol(String),

    /// The channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,
}

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
