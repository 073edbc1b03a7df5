//! How requests reach the delegate and results come back.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::message::{CorrelationId, OperationRequest, OperationResult};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("delegate is no longer receiving requests")]
    Disconnected,
}

/// The guest side of a bridge's connection to a delegate.
pub trait Transport: Send + Sync {
    /// Hand a request to the delegate. Must not block.
    fn send(&self, request: OperationRequest) -> Result<(), TransportError>;

    /// Take the result for `id`, if it has arrived.
    fn take_result(&self, id: CorrelationId) -> Option<OperationResult>;

    /// The waiter gave up on `id`; a result arriving later may be dropped.
    fn abandon(&self, _id: CorrelationId) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, request: OperationRequest) -> Result<(), TransportError> {
        (**self).send(request)
    }

    fn take_result(&self, id: CorrelationId) -> Option<OperationResult> {
        (**self).take_result(id)
    }

    fn abandon(&self, id: CorrelationId) {
        (**self).abandon(id)
    }
}

/// Where a delegate delivers results.
pub trait ResultSink: Send + Sync {
    fn deliver(&self, result: OperationResult);

    /// Nobody is waiting for `id` any more; forget anything kept for it.
    fn discard(&self, _id: CorrelationId) {}
}

/// Abandoned ids remembered at most. Ids are issued in increasing order, so
/// the oldest are forgotten first.
const MAX_ABANDONED: usize = 1024;

#[derive(Default)]
struct MailboxState {
    results: HashMap<CorrelationId, OperationResult>,
    abandoned: BTreeSet<CorrelationId>,
}

/// Results keyed by correlation id, shared by both ends of a port pair.
#[derive(Clone, Default)]
pub struct Mailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a result. Results for abandoned ids are dropped.
    pub fn put(&self, result: OperationResult) {
        let mut state = self.lock();
        if state.abandoned.remove(&result.correlation_id) {
            debug!(
                correlation_id = %result.correlation_id,
                "Dropping result for abandoned request"
            );
            return;
        }
        state.results.insert(result.correlation_id, result);
    }

    pub fn take(&self, id: CorrelationId) -> Option<OperationResult> {
        self.lock().results.remove(&id)
    }

    pub fn abandon(&self, id: CorrelationId) {
        let mut state = self.lock();
        if state.results.remove(&id).is_some() {
            return;
        }
        state.abandoned.insert(id);
        while state.abandoned.len() > MAX_ABANDONED {
            state.abandoned.pop_first();
        }
    }

    /// Drop both a stored result and an abandonment record for `id`.
    pub fn forget(&self, id: CorrelationId) {
        let mut state = self.lock();
        state.results.remove(&id);
        state.abandoned.remove(&id);
    }

    /// Results delivered but not yet taken.
    pub fn len(&self) -> usize {
        self.lock().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResultSink for Mailbox {
    fn deliver(&self, result: OperationResult) {
        self.put(result);
    }

    fn discard(&self, id: CorrelationId) {
        self.forget(id);
    }
}

#[cfg(test)]
impl Mailbox {
    fn abandoned_len(&self) -> usize {
        self.lock().abandoned.len()
    }
}

/// Create a private point-to-point connection between a guest thread and a
/// dedicated delegate.
pub fn port_pair() -> (GuestPort, DelegatePort) {
    let (requests, incoming) = mpsc::unbounded_channel();
    let mailbox = Mailbox::new();
    (
        GuestPort {
            requests,
            mailbox: mailbox.clone(),
        },
        DelegatePort {
            requests: incoming,
            mailbox,
        },
    )
}

/// Guest end of a [`port_pair`].
pub struct GuestPort {
    requests: mpsc::UnboundedSender<OperationRequest>,
    mailbox: Mailbox,
}

impl Transport for GuestPort {
    fn send(&self, request: OperationRequest) -> Result<(), TransportError> {
        self.requests
            .send(request)
            .map_err(|_| TransportError::Disconnected)
    }

    fn take_result(&self, id: CorrelationId) -> Option<OperationResult> {
        self.mailbox.take(id)
    }

    fn abandon(&self, id: CorrelationId) {
        self.mailbox.abandon(id);
    }
}

/// Delegate end of a [`port_pair`].
pub struct DelegatePort {
    requests: mpsc::UnboundedReceiver<OperationRequest>,
    mailbox: Mailbox,
}

impl DelegatePort {
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<OperationRequest>, Mailbox) {
        (self.requests, self.mailbox)
    }
}

/// One end of a point-to-point channel, handed to a thread in its start
/// message.
pub enum ChannelEndpoint {
    Guest(GuestPort),
    Delegate(DelegatePort),
}

impl std::fmt::Debug for ChannelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelEndpoint::Guest(_) => f.write_str("ChannelEndpoint::Guest"),
            ChannelEndpoint::Delegate(_) => f.write_str("ChannelEndpoint::Delegate"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FlagCellRef;
    use crate::message::{Operation, OperationPayload};
    use std::time::Duration;

    fn result(id: u64) -> OperationResult {
        OperationResult {
            correlation_id: CorrelationId::new(id),
            outcome: Ok(OperationPayload::Ready),
        }
    }

    #[test]
    fn mailbox_drops_results_for_abandoned_ids() {
        let mailbox = Mailbox::new();
        mailbox.abandon(CorrelationId::new(1));
        mailbox.put(result(1));
        mailbox.put(result(2));

        assert!(mailbox.take(CorrelationId::new(1)).is_none());
        assert_eq!(mailbox.take(CorrelationId::new(2)), Some(result(2)));
        assert!(mailbox.is_empty());
    }

    #[test]
    fn abandoned_ids_are_bounded() {
        let mailbox = Mailbox::new();
        for id in 1..=10_000 {
            mailbox.abandon(CorrelationId::new(id));
        }
        assert_eq!(mailbox.abandoned_len(), MAX_ABANDONED);

        // The most recent abandonments are still honoured.
        mailbox.put(result(10_000));
        assert!(mailbox.is_empty());
        assert_eq!(mailbox.abandoned_len(), MAX_ABANDONED - 1);

        // The oldest have been forgotten, so their late results are kept
        // until taken.
        mailbox.put(result(1));
        assert_eq!(mailbox.take(CorrelationId::new(1)), Some(result(1)));
    }

    #[test]
    fn discard_forgets_results_and_abandonment() {
        let mailbox = Mailbox::new();
        mailbox.put(result(3));
        mailbox.abandon(CorrelationId::new(4));

        mailbox.discard(CorrelationId::new(3));
        mailbox.discard(CorrelationId::new(4));
        assert!(mailbox.is_empty());
        assert_eq!(mailbox.abandoned_len(), 0);
    }

    #[test]
    fn port_send_fails_once_delegate_is_gone() {
        let (guest, delegate) = port_pair();
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
        assert!(guest.send(request.clone()).is_ok());
        drop(delegate);
        assert_eq!(guest.send(request), Err(TransportError::Disconnected));
    }

    #[test]
    fn results_flow_from_delegate_to_guest() {
        let (guest, delegate) = port_pair();
        let (_requests, mailbox) = delegate.into_parts();
        mailbox.deliver(result(9));
        assert_eq!(guest.take_result(CorrelationId::new(9)), Some(result(9)));
    }
}
