//! Messages between the orchestrator and the threads it spawns.
//!
//! ```text
//! thread                     orchestrator
//!   Initialized     ───────▶
//!                   ◀───────   Start { memory, endpoint }
//!   (setup, instantiate)
//!   Ready           ───────▶   surfaces success
//!   OperationRequest ──────▶   (host delegate only)
//!                   ◀───────   OperationComplete
//!   Finished        ───────▶
//! ```
//!
//! `Error` may be sent at any phase before `Ready` and aborts startup.

use std::fmt;

use p2shim_bridge::{ChannelEndpoint, OperationRequest, OperationResult, SharedMemory};

use crate::loader::GuestOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    /// Hosts and runs the guest. Allowed to block.
    Guest,
    /// Runs asynchronous work for the guest.
    Delegate,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::Guest => f.write_str("guest"),
            WorkerRole::Delegate => f.write_str("delegate"),
        }
    }
}

/// Thread to orchestrator.
#[derive(Debug)]
pub enum WorkerMessage {
    Initialized,
    Ready,
    Error { message: String },
    OperationRequest(OperationRequest),
    Finished(GuestOutcome),
}

#[derive(Debug)]
pub struct WorkerEvent {
    pub role: WorkerRole,
    pub message: WorkerMessage,
}

/// Orchestrator to thread.
#[derive(Debug)]
pub enum HostMessage {
    /// The shared memory and, for the two-thread topology, this thread's
    /// end of the private channel. Delivered together so neither can be
    /// observed without the other.
    Start {
        memory: SharedMemory,
        endpoint: Option<ChannelEndpoint>,
    },
    OperationComplete(OperationResult),
    Shutdown,
}
