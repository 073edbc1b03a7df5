//! Stream error types.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ErrorCode;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier for an input or output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(u64);

impl StreamId {
    /// Allocate the next stream id.
    pub fn next() -> Self {
        Self(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// An I/O error resource, carrying a human-readable message and, for
/// filesystem-backed failures, the underlying [`ErrorCode`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct IoError {
    message: String,
    code: Option<ErrorCode>,
}

impl IoError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// The message shown to the guest by `to-debug-string`.
    pub fn to_debug_string(&self) -> String {
        self.message.clone()
    }
}

impl From<ErrorCode> for IoError {
    fn from(code: ErrorCode) -> Self {
        Self {
            message: format!("filesystem error: {}", code),
            code: Some(code),
        }
    }
}

/// Recover the filesystem error code behind a stream's I/O error, if any.
pub fn filesystem_error_code(error: &IoError) -> Option<ErrorCode> {
    error.code
}

/// Errors returned by stream operations.
///
/// `Closed` is terminal: once a stream reports it, every later operation
/// on that stream reports it too.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The last operation failed. The stream is closed afterwards.
    #[error("last operation failed: {0}")]
    LastOperationFailed(IoError),

    /// The stream is closed.
    #[error("stream closed")]
    Closed,
}
