//! Monotonic and wall clocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use p2shim_bridge::{Bridge, Pollable};
use p2shim_core::Datetime;

// A consistent monotonic reference point for every clock in the process.
lazy_static::lazy_static! {
    static ref MONOTONIC_START: Instant = Instant::now();
}

/// Nanoseconds since an arbitrary, fixed point. Never goes backwards.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicU64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        let _ = *MONOTONIC_START;
        Self::default()
    }

    /// Current instant in nanoseconds. Each call returns a strictly larger
    /// value than the last.
    pub fn now(&self) -> u64 {
        let raw = u64::try_from(MONOTONIC_START.elapsed().as_nanos()).unwrap_or(u64::MAX);
        let next = |last: u64| raw.max(last.saturating_add(1));
        match self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(next(last)))
        {
            Ok(last) | Err(last) => next(last),
        }
    }

    /// Clock resolution in nanoseconds.
    pub fn resolution(&self) -> u64 {
        1
    }

    /// A pollable that becomes ready `nanos` nanoseconds after it is first
    /// blocked on.
    pub fn subscribe_duration(&self, bridge: &Bridge, nanos: u64) -> Pollable {
        bridge.subscribe_duration(Duration::from_nanos(nanos))
    }

    /// A pollable for an absolute instant. Instants already passed give a
    /// zero-length timer.
    pub fn subscribe_instant(&self, bridge: &Bridge, when: u64) -> Pollable {
        self.subscribe_duration(bridge, when.saturating_sub(self.now()))
    }
}

/// Calendar time from the host clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl WallClock {
    pub fn new() -> Self {
        Self
    }

    pub fn now(&self) -> Datetime {
        Datetime::now()
    }

    pub fn resolution(&self) -> Datetime {
        Datetime {
            seconds: 0,
            nanoseconds: 1,
        }
    }
}
