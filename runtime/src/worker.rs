//! Bodies of the guest and delegate threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use p2shim_bridge::{Bridge, ChannelEndpoint, Delegate, OperationHandler, Transport};
use p2shim_sys::{LogSink, MonotonicClock, RandomSource, Stdio, WallClock};
use p2shim_vfs::VirtualFileSystem;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{SessionConfig, Topology};
use crate::error::Result;
use crate::host_transport::HostTransport;
use crate::loader::{GuestFailure, GuestLoader, GuestOutcome, HostImports, ModuleResolver};
use crate::message::{HostMessage, WorkerEvent, WorkerMessage, WorkerRole};

/// Sends events tagged with one role. Send failures mean the orchestrator
/// is gone; there is nobody left to tell.
#[derive(Clone)]
struct Reporter {
    role: WorkerRole,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Reporter {
    fn report(&self, message: WorkerMessage) {
        let _ = self.events.send(WorkerEvent {
            role: self.role,
            message,
        });
    }

    fn error(&self, message: impl std::fmt::Display) {
        self.report(WorkerMessage::Error {
            message: message.to_string(),
        });
    }
}

pub(crate) struct GuestWorker {
    pub(crate) config: SessionConfig,
    pub(crate) stdout: Arc<dyn LogSink>,
    pub(crate) stderr: Arc<dyn LogSink>,
    pub(crate) loader: Arc<dyn GuestLoader>,
    pub(crate) resolver: Arc<dyn ModuleResolver>,
    pub(crate) events: mpsc::UnboundedSender<WorkerEvent>,
    pub(crate) inbox: std_mpsc::Receiver<HostMessage>,
}

impl GuestWorker {
    pub(crate) fn run(self) {
        let GuestWorker {
            config,
            stdout,
            stderr,
            loader,
            resolver,
            events,
            inbox,
        } = self;
        let reporter = Reporter {
            role: WorkerRole::Guest,
            events: events.clone(),
        };
        reporter.report(WorkerMessage::Initialized);

        // No guest code runs before the start message arrives.
        let (memory, endpoint) = match inbox.recv() {
            Ok(HostMessage::Start { memory, endpoint }) => (memory, endpoint),
            Ok(HostMessage::Shutdown) | Err(_) => {
                debug!("Guest thread stopped before start");
                return;
            }
            Ok(other) => {
                reporter.error(format!("expected start message, got {:?}", other));
                return;
            }
        };

        let transport: Box<dyn Transport> = match (config.topology, endpoint) {
            (Topology::TwoThread, Some(ChannelEndpoint::Guest(port))) => Box::new(port),
            (Topology::HostDelegate, None) => Box::new(HostTransport::new(events, inbox)),
            (topology, endpoint) => {
                reporter.error(format!(
                    "start message for {} topology carried endpoint {:?}",
                    topology, endpoint
                ));
                return;
            }
        };
        let bridge = Bridge::new(memory, transport, config.bridge.clone());

        let imports = match build_imports(&config, bridge, stdout, stderr) {
            Ok(imports) => imports,
            Err(e) => {
                reporter.error(e);
                return;
            }
        };
        let mut exports = match loader.instantiate(resolver.as_ref(), imports) {
            Ok(exports) => exports,
            Err(e) => {
                reporter.error(e);
                return;
            }
        };
        reporter.report(WorkerMessage::Ready);

        let result = panic::catch_unwind(AssertUnwindSafe(|| exports.run()))
            .unwrap_or_else(|_| Err(GuestFailure::Trap("guest panicked".to_string())));
        let outcome = GuestOutcome::from_run(result);
        info!(success = outcome.is_success(), "Guest finished");
        reporter.report(WorkerMessage::Finished(outcome));
    }
}

fn build_imports(
    config: &SessionConfig,
    bridge: Bridge,
    stdout: Arc<dyn LogSink>,
    stderr: Arc<dyn LogSink>,
) -> Result<HostImports> {
    Ok(HostImports {
        environment: config.environment(),
        filesystem: VirtualFileSystem::from_snapshot(&config.filesystem, &config.cwd)?,
        stdio: Stdio::new(stdout, stderr),
        monotonic_clock: MonotonicClock::new(),
        wall_clock: WallClock::new(),
        random: RandomSource::new(),
        bridge,
    })
}

pub(crate) struct DelegateWorker {
    pub(crate) handler: Arc<dyn OperationHandler>,
    pub(crate) events: mpsc::UnboundedSender<WorkerEvent>,
    pub(crate) inbox: mpsc::UnboundedReceiver<HostMessage>,
}

impl DelegateWorker {
    pub(crate) fn run(self) {
        let DelegateWorker {
            handler,
            events,
            mut inbox,
        } = self;
        let reporter = Reporter {
            role: WorkerRole::Delegate,
            events,
        };

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                reporter.error(format!("failed to start async runtime: {}", e));
                return;
            }
        };
        reporter.report(WorkerMessage::Initialized);

        runtime.block_on(async move {
            let (memory, endpoint) = match inbox.recv().await {
                Some(HostMessage::Start { memory, endpoint }) => (memory, endpoint),
                Some(HostMessage::Shutdown) | None => {
                    debug!("Delegate thread stopped before start");
                    return;
                }
                Some(other) => {
                    reporter.error(format!("expected start message, got {:?}", other));
                    return;
                }
            };
            let port = match endpoint {
                Some(ChannelEndpoint::Delegate(port)) => port,
                other => {
                    reporter.error(format!("delegate started with endpoint {:?}", other));
                    return;
                }
            };

            let (requests, mailbox) = port.into_parts();
            let delegate = Delegate::new(memory, mailbox).with_handler(handler);
            reporter.report(WorkerMessage::Ready);
            // The orchestrator learns the outcome from the guest thread.
            drop(reporter);

            tokio::select! {
                _ = delegate.serve(requests) => {}
                _ = until_shutdown(&mut inbox) => {
                    debug!("Delegate thread shutting down");
                }
            }
        });
    }
}

async fn until_shutdown(inbox: &mut mpsc::UnboundedReceiver<HostMessage>) {
    loop {
        match inbox.recv().await {
            Some(HostMessage::Shutdown) | None => return,
            Some(other) => warn!(?other, "Unexpected message for running delegate"),
        }
    }
}
