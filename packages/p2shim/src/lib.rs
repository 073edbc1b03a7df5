//! p2shim: a host-side system interface for guest programs.
//!
//! The guest runs on its own thread and makes ordinary blocking calls.
//! Filesystem, clocks, randomness and standard streams are answered in
//! place; timers and other asynchronous work are handed to a delegate and
//! waited on through shared flag cells.
//!
//! ```text
//! (root)    error codes, datetimes, stream errors
//! vfs       in-memory filesystem
//! bridge    blocking waits over shared memory
//! sys       streams, clocks, random, environment, exit
//! runtime   sessions: threads, handshake, module loading
//! ```

pub use p2shim_bridge as bridge;
pub use p2shim_runtime as runtime;
pub use p2shim_sys as sys;
pub use p2shim_vfs as vfs;

pub use p2shim_core::{Datetime, ErrorCode, StreamError};
pub use p2shim_runtime::{
    GuestLoader, GuestOutcome, HostImports, Orchestrator, Result, RuntimeError, Session,
    SessionConfig, Topology,
};
