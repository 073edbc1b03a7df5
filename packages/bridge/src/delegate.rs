//! The delegate: performs operations asynchronously and completes the
//! waiting guest's flag cell.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::memory::SharedMemory;
use crate::message::{Operation, OperationPayload, OperationRequest, OperationResult};
use crate::transport::ResultSink;

/// Performs one operation. Errors become an error result for the waiter.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn perform(&self, operation: &Operation) -> Result<OperationPayload, String>;
}

/// Default handler: timers sleep on the tokio clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerHandler;

#[async_trait]
impl OperationHandler for TimerHandler {
    async fn perform(&self, operation: &Operation) -> Result<OperationPayload, String> {
        match operation {
            Operation::Timer { duration } => {
                let start = Instant::now();
                tokio::time::sleep(*duration).await;
                Ok(OperationPayload::Elapsed(start.elapsed()))
            }
        }
    }
}

/// Services operation requests on a tokio runtime.
#[derive(Clone)]
pub struct Delegate {
    memory: SharedMemory,
    handler: Arc<dyn OperationHandler>,
    results: Arc<dyn ResultSink>,
}

impl std::fmt::Debug for Delegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delegate")
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

impl Delegate {
    pub fn new(memory: SharedMemory, results: impl ResultSink + 'static) -> Self {
        Self {
            memory,
            handler: Arc::new(TimerHandler),
            results: Arc::new(results),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn OperationHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Start work on one request. Must be called within a tokio runtime.
    ///
    /// The result is delivered before the flag cell is completed, so a woken
    /// waiter always finds it. A failed or panicking operation still
    /// completes the cell. Results whose cell is no longer pending are
    /// discarded rather than delivered.
    pub fn on_request(&self, request: OperationRequest) -> JoinHandle<()> {
        let delegate = self.clone();
        tokio::spawn(async move { delegate.process(request).await })
    }

    /// Handle requests until every sender is gone.
    pub async fn serve(self, mut requests: mpsc::UnboundedReceiver<OperationRequest>) {
        while let Some(request) = requests.recv().await {
            self.on_request(request);
        }
        debug!("Request channel closed, delegate stopping");
    }

    async fn process(&self, request: OperationRequest) {
        let OperationRequest {
            correlation_id,
            operation,
            flag_cell,
        } = request;
        debug!(%correlation_id, cell = %flag_cell, kind = operation.kind(), "Delegate received request");

        let handler = Arc::clone(&self.handler);
        let work = tokio::spawn(async move { handler.perform(&operation).await });
        let outcome = match work.await {
            Ok(outcome) => outcome,
            Err(e) => Err(format!("operation failed: {}", e)),
        };
        if let Err(message) = &outcome {
            warn!(%correlation_id, error = %message, "Operation failed");
        }

        // The waiter timed out and released its cell, or the reference was
        // never valid. Nobody will take this result.
        if !self.memory.is_pending(flag_cell) {
            warn!(%correlation_id, cell = %flag_cell, "Flag cell no longer pending, discarding result");
            self.results.discard(correlation_id);
            return;
        }

        self.results.deliver(OperationResult {
            correlation_id,
            outcome,
        });

        if let Err(e) = self.memory.complete(flag_cell) {
            warn!(%correlation_id, error = %e, "Could not complete flag cell");
            self.results.discard(correlation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FlagCellRef;
    use crate::message::CorrelationId;
    use crate::transport::Mailbox;
    use std::time::Duration;

    fn timer(id: u64, flag_cell: FlagCellRef) -> OperationRequest {
        OperationRequest {
            correlation_id: CorrelationId::new(id),
            operation: Operation::Timer {
                duration: Duration::ZERO,
            },
            flag_cell,
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
    }

    #[test]
    fn result_is_stored_before_cell_completes() {
        let memory = SharedMemory::new(1);
        let mailbox = Mailbox::new();
        let delegate = Delegate::new(memory.clone(), mailbox.clone());
        let cell = memory.allocate().unwrap();

        runtime()
            .block_on(async { delegate.on_request(timer(1, cell.cell_ref())).await })
            .unwrap();

        assert!(cell.is_completed());
        assert!(mailbox.take(CorrelationId::new(1)).is_some());
    }

    #[test]
    fn results_for_released_cells_are_not_kept() {
        let memory = SharedMemory::new(1);
        let mailbox = Mailbox::new();
        let delegate = Delegate::new(memory.clone(), mailbox.clone());

        let cell = memory.allocate().unwrap();
        let stale = cell.cell_ref();
        drop(cell);

        let runtime = runtime();
        for id in 1..=100 {
            runtime
                .block_on(async { delegate.on_request(timer(id, stale)).await })
                .unwrap();
        }
        let garbage = FlagCellRef {
            index: 9,
            generation: 1,
        };
        runtime
            .block_on(async { delegate.on_request(timer(101, garbage)).await })
            .unwrap();

        assert!(mailbox.is_empty());
        assert_eq!(memory.available(), 1);
    }
}
