//! Session orchestration: spawn threads, run the startup handshake, hand
//! back a running session.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use p2shim_bridge::{
    port_pair, ChannelEndpoint, Delegate, OperationHandler, SharedMemory, TimerHandler,
};
use p2shim_sys::{LogSink, TracingSink};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{SessionConfig, Topology};
use crate::error::{Result, RuntimeError};
use crate::host_transport::GuestInboxSink;
use crate::loader::{GuestFailure, GuestLoader, GuestOutcome, ModuleResolver};
use crate::message::{HostMessage, WorkerEvent, WorkerMessage, WorkerRole};
use crate::worker::{DelegateWorker, GuestWorker};

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initialized,
    Ready,
}

/// Builds and launches guest sessions.
///
/// # Example
///
/// ```ignore
/// let session = Orchestrator::new(SessionConfig::default())
///     .with_stdout(Arc::new(ConsoleSink))
///     .launch(loader, Arc::new(FileModuleResolver::new("dist")))
///     .await?;
///
/// // Startup succeeded; now wait for the guest to finish.
/// let outcome = session.wait().await;
/// ```
pub struct Orchestrator {
    config: SessionConfig,
    stdout: Arc<dyn LogSink>,
    stderr: Arc<dyn LogSink>,
    handler: Arc<dyn OperationHandler>,
}

impl Orchestrator {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            stdout: Arc::new(TracingSink),
            stderr: Arc::new(TracingSink),
            handler: Arc::new(TimerHandler),
        }
    }

    pub fn with_stdout(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.stdout = sink;
        self
    }

    pub fn with_stderr(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.stderr = sink;
        self
    }

    /// Replace the delegate's operation handler.
    pub fn with_handler(mut self, handler: Arc<dyn OperationHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Spawn the session's threads and run the startup handshake.
    ///
    /// Returns once every thread has reported ready and the guest is
    /// instantiated. Any error during startup is final: threads are told to
    /// shut down and the error is returned. Must be called from within a
    /// tokio runtime; in the host-delegate topology that runtime performs
    /// the guest's asynchronous operations.
    pub async fn launch(
        self,
        loader: Arc<dyn GuestLoader>,
        resolver: Arc<dyn ModuleResolver>,
    ) -> Result<Session> {
        let id = SessionId::new();
        let topology = self.config.topology;
        let timeout_ms = self.config.startup_timeout_ms;
        let memory = SharedMemory::new(self.config.bridge.shared_cells);
        info!(session = %id, %topology, "Launching session");

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (guest_tx, guest_rx) = std_mpsc::channel();

        let guest = GuestWorker {
            config: self.config,
            stdout: self.stdout,
            stderr: self.stderr,
            loader,
            resolver,
            events: events_tx.clone(),
            inbox: guest_rx,
        };
        spawn_worker(id, WorkerRole::Guest, move || guest.run())?;

        let mut delegate_tx = None;
        let mut host_delegate = None;
        match topology {
            Topology::TwoThread => {
                let (tx, rx) = mpsc::unbounded_channel();
                let worker = DelegateWorker {
                    handler: self.handler,
                    events: events_tx,
                    inbox: rx,
                };
                if let Err(e) = spawn_worker(id, WorkerRole::Delegate, move || worker.run()) {
                    let _ = guest_tx.send(HostMessage::Shutdown);
                    return Err(e);
                }
                delegate_tx = Some(tx);
            }
            Topology::HostDelegate => {
                drop(events_tx);
                host_delegate = Some(
                    Delegate::new(memory.clone(), GuestInboxSink::new(guest_tx.clone()))
                        .with_handler(self.handler),
                );
            }
        }

        let mut session = Session {
            id,
            topology,
            guest_tx,
            delegate_tx,
            outcome: None,
            pump: None,
        };

        let handshake = session.handshake(&mut events, memory, host_delegate.as_ref());
        let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), handshake).await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::StartupTimeout { timeout_ms }),
        };
        if let Err(e) = result {
            error!(session = %id, error = %e, "Session startup failed");
            session.shutdown();
            return Err(e);
        }

        info!(session = %id, "Session ready");
        let (outcome_tx, outcome_rx) = oneshot::channel();
        session.outcome = Some(outcome_rx);
        session.pump = Some(tokio::spawn(pump(id, events, host_delegate, outcome_tx)));
        Ok(session)
    }
}

fn spawn_worker(
    id: SessionId,
    role: WorkerRole,
    body: impl FnOnce() + Send + 'static,
) -> Result<()> {
    thread::Builder::new()
        .name(format!("p2shim-{}-{}", role, id.short()))
        .spawn(body)
        .map(|_| ())
        .map_err(|source| RuntimeError::ThreadSpawn { role, source })
}

/// Wait until every role has reported `phase`. An `Error` from any thread
/// ends startup.
async fn await_phase(
    events: &mut mpsc::UnboundedReceiver<WorkerEvent>,
    roles: &[WorkerRole],
    phase: Phase,
    host_delegate: Option<&Delegate>,
) -> Result<()> {
    let mut pending = roles.to_vec();
    while !pending.is_empty() {
        let WorkerEvent { role, message } = events.recv().await.ok_or(RuntimeError::ChannelClosed)?;
        match message {
            WorkerMessage::Initialized if phase == Phase::Initialized => {}
            WorkerMessage::Ready if phase == Phase::Ready => {}
            WorkerMessage::Error { message } => {
                return Err(RuntimeError::Startup { role, message });
            }
            WorkerMessage::OperationRequest(request) => {
                match host_delegate {
                    Some(delegate) => {
                        delegate.on_request(request);
                    }
                    None => warn!(%role, "Operation request without a host delegate"),
                }
                continue;
            }
            other => {
                return Err(RuntimeError::Protocol(format!(
                    "{} thread sent {:?} while waiting for {:?}",
                    role, other, phase
                )));
            }
        }
        debug!(%role, ?phase, "Thread reported");
        pending.retain(|r| *r != role);
    }
    Ok(())
}

/// Runs after startup: serves host-delegate requests and waits for the
/// guest's outcome.
async fn pump(
    id: SessionId,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    host_delegate: Option<Delegate>,
    outcome_tx: oneshot::Sender<GuestOutcome>,
) {
    let outcome = loop {
        let Some(WorkerEvent { role, message }) = events.recv().await else {
            break GuestOutcome::Failure(GuestFailure::Trap(
                "guest thread ended without reporting an outcome".to_string(),
            ));
        };
        match message {
            WorkerMessage::OperationRequest(request) => match &host_delegate {
                Some(delegate) => {
                    delegate.on_request(request);
                }
                None => warn!(session = %id, %role, "Operation request without a host delegate"),
            },
            WorkerMessage::Finished(outcome) => break outcome,
            WorkerMessage::Error { message } => {
                warn!(session = %id, %role, %message, "Thread reported an error after startup");
            }
            other => debug!(session = %id, %role, ?other, "Ignoring message after startup"),
        }
    };
    info!(session = %id, success = outcome.is_success(), "Session finished");
    let _ = outcome_tx.send(outcome);
}

/// A running guest session.
///
/// Dropping the session tears it down like [`terminate`](Session::terminate).
pub struct Session {
    id: SessionId,
    topology: Topology,
    guest_tx: std_mpsc::Sender<HostMessage>,
    delegate_tx: Option<mpsc::UnboundedSender<HostMessage>>,
    outcome: Option<oneshot::Receiver<GuestOutcome>>,
    pump: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    async fn handshake(
        &self,
        events: &mut mpsc::UnboundedReceiver<WorkerEvent>,
        memory: SharedMemory,
        host_delegate: Option<&Delegate>,
    ) -> Result<()> {
        let roles: &[WorkerRole] = match self.topology {
            Topology::TwoThread => &[WorkerRole::Guest, WorkerRole::Delegate],
            Topology::HostDelegate => &[WorkerRole::Guest],
        };

        await_phase(events, roles, Phase::Initialized, host_delegate).await?;

        match &self.delegate_tx {
            Some(delegate_tx) => {
                let (guest_port, delegate_port) = port_pair();
                delegate_tx
                    .send(HostMessage::Start {
                        memory: memory.clone(),
                        endpoint: Some(ChannelEndpoint::Delegate(delegate_port)),
                    })
                    .map_err(|_| RuntimeError::ChannelClosed)?;
                self.guest_tx
                    .send(HostMessage::Start {
                        memory,
                        endpoint: Some(ChannelEndpoint::Guest(guest_port)),
                    })
                    .map_err(|_| RuntimeError::ChannelClosed)?;
            }
            None => {
                self.guest_tx
                    .send(HostMessage::Start {
                        memory,
                        endpoint: None,
                    })
                    .map_err(|_| RuntimeError::ChannelClosed)?;
            }
        }
        debug!(session = %self.id, "Sent start");

        await_phase(events, roles, Phase::Ready, host_delegate).await
    }

    /// Wait for the guest to finish and return its outcome.
    pub async fn wait(mut self) -> GuestOutcome {
        let outcome = match self.outcome.take() {
            Some(outcome) => outcome.await.unwrap_or_else(|_| {
                GuestOutcome::Failure(GuestFailure::Trap("session stopped".to_string()))
            }),
            None => GuestOutcome::Failure(GuestFailure::Trap("session never started".to_string())),
        };
        self.shutdown();
        outcome
    }

    /// Tear the session down without waiting.
    ///
    /// The delegate stops serving and the guest thread is detached. A guest
    /// blocked in a wait falls through at its ceiling; later waits degrade.
    /// Nothing on the guest side is cleaned up.
    pub fn terminate(mut self) {
        info!(session = %self.id, "Terminating session");
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(delegate_tx) = self.delegate_tx.take() {
            let _ = delegate_tx.send(HostMessage::Shutdown);
        }
        let _ = self.guest_tx.send(HostMessage::Shutdown);
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 8);
    }

    #[tokio::test]
    async fn await_phase_surfaces_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(WorkerEvent {
            role: WorkerRole::Delegate,
            message: WorkerMessage::Error {
                message: "no timers".to_string(),
            },
        })
        .unwrap();

        let err = await_phase(
            &mut rx,
            &[WorkerRole::Guest, WorkerRole::Delegate],
            Phase::Initialized,
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "delegate thread failed during startup: no timers"
        );
    }

    #[tokio::test]
    async fn await_phase_rejects_out_of_order_messages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(WorkerEvent {
            role: WorkerRole::Guest,
            message: WorkerMessage::Ready,
        })
        .unwrap();

        let err = await_phase(&mut rx, &[WorkerRole::Guest], Phase::Initialized, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Protocol(_)));
    }

    #[tokio::test]
    async fn await_phase_waits_for_every_role() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for role in [WorkerRole::Delegate, WorkerRole::Guest] {
            tx.send(WorkerEvent {
                role,
                message: WorkerMessage::Initialized,
            })
            .unwrap();
        }
        await_phase(
            &mut rx,
            &[WorkerRole::Guest, WorkerRole::Delegate],
            Phase::Initialized,
            None,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn closed_event_channel_is_an_error() {
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerEvent>();
        drop(tx);
        let err = await_phase(&mut rx, &[WorkerRole::Guest], Phase::Ready, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ChannelClosed));
    }
}
