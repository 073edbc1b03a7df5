//! Pollables: the guest's handle on a pending condition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use p2shim_core::StreamId;

use crate::bridge::{Bridge, WaitOutcome};
use crate::message::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollableKind {
    /// Ready once this much time has passed since the timer was dispatched.
    Timer(Duration),
    /// Ready when the stream can make progress. In-memory streams always can.
    StreamReady(StreamId),
}

/// A pending condition created for one blocking call and owned by its
/// creator.
#[derive(Debug)]
pub struct Pollable {
    kind: PollableKind,
    bridge: Bridge,
    dispatched_at: OnceLock<Instant>,
    forced_ready: AtomicBool,
}

impl Pollable {
    pub(crate) fn new(kind: PollableKind, bridge: Bridge) -> Self {
        Self {
            kind,
            bridge,
            dispatched_at: OnceLock::new(),
            forced_ready: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> PollableKind {
        self.kind
    }

    /// Never blocks. A timer that has not been dispatched is not ready.
    pub fn ready(&self) -> bool {
        match self.kind {
            PollableKind::StreamReady(_) => true,
            PollableKind::Timer(duration) => {
                if self.forced_ready.load(Ordering::Acquire) {
                    return true;
                }
                self.dispatched_at
                    .get()
                    .map(|at| at.elapsed() >= duration)
                    .unwrap_or(false)
            }
        }
    }

    /// Block until ready.
    ///
    /// Sends one request to the delegate and waits on a fresh flag cell,
    /// bounded by the bridge's ceiling. Blocking again after a timer was
    /// already dispatched only waits for the time still remaining.
    pub fn block(&self) -> WaitOutcome {
        if self.ready() {
            return WaitOutcome::AlreadyReady;
        }
        let PollableKind::Timer(duration) = self.kind else {
            return WaitOutcome::AlreadyReady;
        };

        let remaining = match self.dispatched_at.get() {
            Some(at) => duration.saturating_sub(at.elapsed()),
            None => duration,
        };
        let outcome = self.bridge.execute(Operation::Timer { duration: remaining }, || {
            self.dispatched_at.get_or_init(Instant::now);
        });

        match &outcome {
            // The delegate fired the timer, so it is ready whatever the
            // two threads' clocks say.
            WaitOutcome::Completed { .. } | WaitOutcome::Degraded(_) => {
                self.forced_ready.store(true, Ordering::Release);
            }
            WaitOutcome::AlreadyReady | WaitOutcome::TimedOut { .. } => {}
        }
        outcome
    }
}

/// Return the index of the first ready pollable. If none is ready, block on
/// the first and return 0. Returns `None` for an empty list.
///
/// Only the first entry is waited on; callers wanting to wait on several
/// must loop.
pub fn poll_list(pollables: &[&Pollable]) -> Option<usize> {
    if let Some(index) = pollables.iter().position(|p| p.ready()) {
        return Some(index);
    }
    let first = pollables.first()?;
    first.block();
    Some(0)
}
