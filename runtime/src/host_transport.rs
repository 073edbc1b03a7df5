//! Transport for the host-delegate topology.
//!
//! Requests leave the guest thread on the orchestrator's event channel.
//! Results come back on the guest thread's inbox as `OperationComplete`
//! messages, which are drained into a mailbox when the guest wakes.

use std::sync::mpsc as std_mpsc;
use std::sync::{Mutex, PoisonError};

use p2shim_bridge::{
    CorrelationId, Mailbox, OperationRequest, OperationResult, ResultSink, Transport,
    TransportError,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::message::{HostMessage, WorkerEvent, WorkerMessage, WorkerRole};

pub(crate) struct HostTransport {
    events: mpsc::UnboundedSender<WorkerEvent>,
    inbox: Mutex<std_mpsc::Receiver<HostMessage>>,
    mailbox: Mailbox,
}

impl HostTransport {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<WorkerEvent>,
        inbox: std_mpsc::Receiver<HostMessage>,
    ) -> Self {
        Self {
            events,
            inbox: Mutex::new(inbox),
            mailbox: Mailbox::new(),
        }
    }

    fn drain(&self) {
        let inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        while let Ok(message) = inbox.try_recv() {
            match message {
                HostMessage::OperationComplete(result) => self.mailbox.put(result),
                other => debug!(?other, "Ignoring host message while guest runs"),
            }
        }
    }
}

impl Transport for HostTransport {
    fn send(&self, request: OperationRequest) -> Result<(), TransportError> {
        self.events
            .send(WorkerEvent {
                role: WorkerRole::Guest,
                message: WorkerMessage::OperationRequest(request),
            })
            .map_err(|_| TransportError::Disconnected)
    }

    fn take_result(&self, id: CorrelationId) -> Option<OperationResult> {
        self.drain();
        self.mailbox.take(id)
    }

    fn abandon(&self, id: CorrelationId) {
        self.drain();
        self.mailbox.abandon(id);
    }
}

/// Host-side result sink: posts each result to the guest thread's inbox.
pub(crate) struct GuestInboxSink {
    inbox: std_mpsc::Sender<HostMessage>,
}

impl GuestInboxSink {
    pub(crate) fn new(inbox: std_mpsc::Sender<HostMessage>) -> Self {
        Self { inbox }
    }
}

impl ResultSink for GuestInboxSink {
    fn deliver(&self, result: OperationResult) {
        let correlation_id = result.correlation_id;
        if self
            .inbox
            .send(HostMessage::OperationComplete(result))
            .is_err()
        {
            debug!(%correlation_id, "Guest thread gone, dropping result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2shim_bridge::{FlagCellRef, Operation, OperationPayload};
    use std::time::Duration;

    #[test]
    fn requests_become_worker_events_and_results_come_back() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = std_mpsc::channel();
        let transport = HostTransport::new(events_tx, inbox_rx);

        let request = OperationRequest {
            correlation_id: CorrelationId::new(5),
            operation: Operation::Timer {
                duration: Duration::from_millis(1),
            },
            flag_cell: FlagCellRef {
                index: 0,
                generation: 1,
            },
        };
        transport.send(request.clone()).unwrap();
        match events_rx.try_recv().unwrap() {
            WorkerEvent {
                role: WorkerRole::Guest,
                message: WorkerMessage::OperationRequest(sent),
            } => assert_eq!(sent, request),
            other => panic!("unexpected {:?}", other),
        }

        let result = OperationResult {
            correlation_id: CorrelationId::new(5),
            outcome: Ok(OperationPayload::Ready),
        };
        GuestInboxSink::new(inbox_tx).deliver(result.clone());
        assert_eq!(transport.take_result(CorrelationId::new(5)), Some(result));
    }

    #[test]
    fn send_fails_without_orchestrator() {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (_inbox_tx, inbox_rx) = std_mpsc::channel();
        let transport = HostTransport::new(events_tx, inbox_rx);
        drop(events_rx);

        let request = OperationRequest {
            correlation_id: CorrelationId::new(1),
            operation: Operation::Timer {
                duration: Duration::ZERO,
            },
            flag_cell: FlagCellRef {
                index: 0,
                generation: 1,
            },
        };
        assert_eq!(transport.send(request), Err(TransportError::Disconnected));
    }
}
