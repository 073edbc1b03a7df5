//! # p2shim-bridge
//!
//! Lets a guest thread make synchronous, blocking calls whose real work is
//! asynchronous and runs on another thread.
//!
//! ```text
//!   guest thread                          delegate (tokio)
//!   ------------                          ----------------
//!   Pollable::block()
//!     allocate FlagCell (pending)
//!     send OperationRequest  ───────────▶ Delegate::on_request
//!     wait on cell (ceiling)                perform operation
//!                                           deliver OperationResult ──▶ mailbox
//!                             ◀─────────── complete cell + notify
//!     take result from mailbox
//! ```
//!
//! For a given correlation id the result is stored before the cell is
//! completed, and the cell is completed before the waiter resumes.
//!
//! A wait never hangs: it is bounded by a ceiling derived from the
//! operation's nominal duration, and with no reachable delegate it degrades
//! to immediate completion.

mod bridge;
mod delegate;
mod memory;
mod message;
mod pollable;
mod transport;

pub use bridge::{Bridge, BridgeConfig, BridgeError, WaitOutcome};
pub use delegate::{Delegate, OperationHandler, TimerHandler};
pub use memory::{CellError, FlagCell, FlagCellRef, SharedMemory};
pub use message::{CorrelationId, Operation, OperationPayload, OperationRequest, OperationResult};
pub use pollable::{poll_list, Pollable, PollableKind};
pub use transport::{
    port_pair, ChannelEndpoint, DelegatePort, GuestPort, Mailbox, ResultSink, Transport,
    TransportError,
};
