//! # p2shim-runtime
//!
//! Runs one guest program per session on a dedicated thread, with its
//! asynchronous work performed by a delegate.
//!
//! ## Topologies
//!
//! ```text
//! two-thread                              host-delegate
//!
//!   embedder (tokio)                        embedder (tokio) = delegate
//!      │  start / events                       │  start / events / results
//!      ├──────────────┐                        │
//!   guest thread ◀──▶ delegate thread       guest thread
//!        private channel + shared memory       shared memory
//! ```
//!
//! In both, the orchestrator spawns the threads, waits for each to report
//! `Initialized`, sends `Start` (shared memory plus channel endpoint), and
//! waits for `Ready`. [`Orchestrator::launch`] returns only after the guest
//! is instantiated; any error before that is final.
//!
//! The guest program itself is linked by a [`GuestLoader`], which receives
//! the session's [`HostImports`].

mod config;
mod error;
mod host_transport;
mod loader;
mod message;
mod orchestrator;
mod worker;

pub use config::{SessionConfig, Topology};
pub use error::{Result, RuntimeError};
pub use loader::{
    FileModuleResolver, GuestExports, GuestFailure, GuestLoader, GuestOutcome, HostImports,
    ModuleResolver, ResolvedModule,
};
pub use message::WorkerRole;
pub use orchestrator::{Orchestrator, Session, SessionId};
