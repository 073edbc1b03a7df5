//! The guest-side coordinator that turns delegate operations into
//! synchronous waits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use p2shim_core::StreamId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::memory::{FlagCell, SharedMemory};
use crate::message::{CorrelationId, Operation, OperationRequest, OperationResult};
use crate::pollable::{Pollable, PollableKind};
use crate::transport::{Transport, TransportError};

/// Why a wait fell back to immediate completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("no delegate is registered")]
    NoDelegate,

    #[error("failed to send request: {0}")]
    Send(#[from] TransportError),

    #[error("all {capacity} shared flag cells are in use")]
    CellsExhausted { capacity: usize },
}

/// Timing and sizing knobs for a bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Multiplier applied to an operation's nominal duration to get its
    /// wait ceiling.
    pub safety_factor: u32,
    /// Lower bound on any ceiling.
    pub min_ceiling_ms: u64,
    /// Ceiling for operations with no nominal duration.
    pub default_ceiling_ms: u64,
    /// Number of flag cells in the shared region.
    pub shared_cells: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            safety_factor: 2,
            min_ceiling_ms: 100,
            default_ceiling_ms: 5000,
            shared_cells: 64,
        }
    }
}

impl BridgeConfig {
    /// How long a blocking wait may last before it is treated as lost.
    pub fn ceiling_for(&self, nominal: Option<Duration>) -> Duration {
        match nominal {
            Some(duration) => duration
                .saturating_mul(self.safety_factor)
                .max(Duration::from_millis(self.min_ceiling_ms)),
            None => Duration::from_millis(self.default_ceiling_ms),
        }
    }
}

/// How a blocking call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The pollable was already ready; nothing was dispatched.
    AlreadyReady,
    /// The delegate completed the cell. `result` is `None` only if the
    /// completion signal arrived without a result.
    Completed {
        correlation_id: CorrelationId,
        result: Option<OperationResult>,
    },
    /// The ceiling expired with no completion.
    TimedOut {
        correlation_id: CorrelationId,
        ceiling: Duration,
    },
    /// No delegate could be reached; the wait completed immediately.
    Degraded(BridgeError),
}

struct BridgeInner {
    memory: SharedMemory,
    transport: Option<Box<dyn Transport>>,
    config: BridgeConfig,
    next_id: AtomicU64,
}

/// Creates pollables and performs their blocking waits.
///
/// Cloning is cheap; clones share the shared memory, transport and
/// correlation counter.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("memory", &self.inner.memory)
            .field("detached", &self.is_detached())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Bridge {
    pub fn new(memory: SharedMemory, transport: impl Transport + 'static, config: BridgeConfig) -> Self {
        Self::build(memory, Some(Box::new(transport)), config)
    }

    /// A bridge with no delegate. Every blocking call degrades to immediate
    /// completion.
    pub fn detached(memory: SharedMemory, config: BridgeConfig) -> Self {
        Self::build(memory, None, config)
    }

    fn build(
        memory: SharedMemory,
        transport: Option<Box<dyn Transport>>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                memory,
                transport,
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.inner.memory
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn is_detached(&self) -> bool {
        self.inner.transport.is_none()
    }

    /// Create a pollable. No request is sent until it is blocked on.
    pub fn subscribe(&self, kind: PollableKind) -> Pollable {
        Pollable::new(kind, self.clone())
    }

    pub fn subscribe_duration(&self, duration: Duration) -> Pollable {
        self.subscribe(PollableKind::Timer(duration))
    }

    pub fn subscribe_stream(&self, stream: StreamId) -> Pollable {
        self.subscribe(PollableKind::StreamReady(stream))
    }

    fn next_correlation_id(&self) -> CorrelationId {
        CorrelationId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Dispatch `operation` and block until it completes or its ceiling
    /// passes. `on_dispatch` runs once the request has been handed off.
    pub(crate) fn execute(&self, operation: Operation, on_dispatch: impl FnOnce()) -> WaitOutcome {
        let correlation_id = self.next_correlation_id();

        let Some(transport) = self.inner.transport.as_deref() else {
            return self.degrade(correlation_id, None, BridgeError::NoDelegate);
        };
        let Some(cell) = self.inner.memory.allocate() else {
            let capacity = self.inner.memory.capacity();
            return self.degrade(correlation_id, None, BridgeError::CellsExhausted { capacity });
        };

        let ceiling = self.inner.config.ceiling_for(operation.nominal_duration());
        let kind = operation.kind();
        let request = OperationRequest {
            correlation_id,
            operation,
            flag_cell: cell.cell_ref(),
        };
        if let Err(e) = transport.send(request) {
            return self.degrade(correlation_id, Some(&cell), e.into());
        }
        on_dispatch();

        debug!(
            %correlation_id,
            cell = %cell.cell_ref(),
            kind,
            ceiling_ms = ceiling.as_millis() as u64,
            "Dispatched operation"
        );

        let started = Instant::now();
        if cell.wait(ceiling) {
            let result = transport.take_result(correlation_id);
            if result.is_none() {
                warn!(%correlation_id, "Flag cell completed but no result arrived");
            }
            debug!(
                %correlation_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Operation completed"
            );
            WaitOutcome::Completed {
                correlation_id,
                result,
            }
        } else if let Some(result) = transport.take_result(correlation_id) {
            // Stored, but the cell was not completed before the ceiling.
            debug!(%correlation_id, "Result found at the wait ceiling");
            WaitOutcome::Completed {
                correlation_id,
                result: Some(result),
            }
        } else {
            warn!(
                %correlation_id,
                ceiling_ms = ceiling.as_millis() as u64,
                "Wait ceiling expired without completion, possible message loss"
            );
            transport.abandon(correlation_id);
            WaitOutcome::TimedOut {
                correlation_id,
                ceiling,
            }
        }
    }

    fn degrade(
        &self,
        correlation_id: CorrelationId,
        cell: Option<&FlagCell>,
        reason: BridgeError,
    ) -> WaitOutcome {
        warn!(%correlation_id, %reason, "No delegate reachable, completing immediately");
        if let Some(cell) = cell {
            // Nobody else holds this cell's reference, so this cannot fail.
            let _ = self.inner.memory.complete(cell.cell_ref());
        }
        WaitOutcome::Degraded(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_scales_nominal_duration() {
        let config = BridgeConfig::default();
        assert_eq!(
            config.ceiling_for(Some(Duration::from_millis(500))),
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn ceiling_has_a_floor() {
        let config = BridgeConfig::default();
        assert_eq!(config.ceiling_for(Some(Duration::ZERO)), Duration::from_millis(100));
        assert_eq!(config.ceiling_for(None), Duration::from_millis(5000));
    }

    #[test]
    fn ceiling_saturates() {
        let config = BridgeConfig::default();
        assert_eq!(config.ceiling_for(Some(Duration::MAX)), Duration::MAX);
    }

    #[test]
    fn config_fills_missing_fields_from_defaults() {
        let config: BridgeConfig = serde_json::from_str(r#"{"safety_factor": 3}"#).unwrap();
        assert_eq!(config.safety_factor, 3);
        assert_eq!(config.shared_cells, 64);
    }

    #[test]
    fn correlation_ids_are_unique_per_bridge() {
        let bridge = Bridge::detached(SharedMemory::new(1), BridgeConfig::default());
        let a = bridge.next_correlation_id();
        let b = bridge.clone().next_correlation_id();
        assert_ne!(a, b);
    }
}
