//! Runtime lifecycle: bind, peer mesh bootstrap, user entry points, and
//! coordinated shutdown.

mod bootstrap;
pub(crate) mod dispatch;
mod shutdown;

use crate::config::TesseraConfig;
use crate::context::ThreadContext;
use crate::error::{Result, TesseraError};
use crate::networker::{Inbound, Networker};
use crate::node::NodeData;
use crate::registry::FnRegistry;
use crate::transport::Listener;
use crate::types::{GlobalThreadId, PhysicalId};
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Semaphore};

/// The user program, invoked once per local logical thread.
pub type EntryPoint =
    Arc<dyn Fn(ThreadContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Where this process fits in the job.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// Hostname announced to peers (they connect back to it).
    pub host: String,
    /// Local listen port; 0 picks an ephemeral port.
    pub bind_port: u16,
    /// Address of node 0. Ignored by node 0 itself.
    pub coordinator: SocketAddr,
    pub is_coordinator: bool,
    /// Job-wide logical thread count; bootstrap completes when node 0 has
    /// seen this many.
    pub total_threads: u32,
    pub local_thread_ids: Vec<GlobalThreadId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitReason {
    Completed,
    Aborted,
}

/// Bootstrap progress shared between the accept path and the dispatcher.
pub(crate) struct BootState {
    /// Coordinator: next physical id to hand out.
    pub next_pid: AtomicU32,
    /// Coordinator: node table rows received so far (excluding node 0).
    pub hellos: Mutex<Vec<crate::node::NodeInfo>>,
    pub threads_seen: AtomicUsize,
    /// Coordinator: the node table went out. Guards double finalization
    /// when the last two Hellos race.
    pub hello_finished: AtomicBool,
    /// Coordinator: nodes whose mesh is complete.
    pub completed_nodes: AtomicUsize,

    /// Worker: HelloResponse processed.
    pub response_seen: AtomicBool,
    /// Worker: all higher-id connects established.
    pub outgoing_done: AtomicBool,
    /// Worker: identified incoming mesh connections.
    pub incoming_identified: AtomicUsize,
    pub hello_completed_sent: AtomicBool,
}

impl BootState {
    fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1),
            hellos: Mutex::new(Vec::new()),
            threads_seen: AtomicUsize::new(0),
            hello_finished: AtomicBool::new(false),
            completed_nodes: AtomicUsize::new(0),
            response_seen: AtomicBool::new(false),
            outgoing_done: AtomicBool::new(false),
            incoming_identified: AtomicUsize::new(0),
            hello_completed_sent: AtomicBool::new(false),
        }
    }
}

/// Shared hub of one process: node data, networker, worker pool and the
/// lifecycle signals. Handlers and thread contexts all hold an `Arc` of it.
pub struct RuntimeCore {
    pub config: Arc<TesseraConfig>,
    pub node: NodeData,
    pub networker: Arc<Networker>,
    pub(crate) workers: Arc<Semaphore>,
    pub(crate) spec: NodeSpec,
    pub(crate) entry: EntryPoint,
    pub(crate) boot: BootState,

    exit_tx: watch::Sender<Option<ExitReason>>,
    exit_rx: watch::Receiver<Option<ExitReason>>,
    pub(crate) shutting_down: AtomicBool,
    pub(crate) abort_error: Mutex<Option<TesseraError>>,
    pub(crate) user_error: Mutex<Option<TesseraError>>,
}

impl RuntimeCore {
    fn new(
        spec: NodeSpec,
        config: Arc<TesseraConfig>,
        registry: Arc<FnRegistry>,
        entry: EntryPoint,
        networker: Arc<Networker>,
    ) -> Self {
        let (exit_tx, exit_rx) = watch::channel(None);
        Self {
            node: NodeData::new(Arc::clone(&config), registry),
            workers: Arc::new(Semaphore::new(config.worker_count)),
            config,
            networker,
            spec,
            entry,
            boot: BootState::new(),
            exit_tx,
            exit_rx,
            shutting_down: AtomicBool::new(false),
            abort_error: Mutex::new(None),
            user_error: Mutex::new(None),
        }
    }

    pub(crate) fn signal_exit(&self, reason: ExitReason) {
        self.exit_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub(crate) async fn wait_exit(&self) -> ExitReason {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return ExitReason::Aborted;
            }
        }
    }

    pub(crate) fn exit_signaled(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    pub(crate) fn record_user_error(&self, e: TesseraError) {
        let mut slot = self.user_error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(e);
        }
    }
}

/// One process of the job, bound and ready to run.
pub struct Runtime {
    core: Arc<RuntimeCore>,
    listener: Listener,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    local_addr: SocketAddr,
}

impl Runtime {
    /// Bind the listen socket. The job does not start until [`Runtime::run`].
    pub async fn bind(
        spec: NodeSpec,
        config: TesseraConfig,
        registry: FnRegistry,
        entry: EntryPoint,
    ) -> Result<Self> {
        config.validate()?;
        if spec.local_thread_ids.is_empty() {
            return Err(TesseraError::Config(
                "a node must host at least one thread".into(),
            ));
        }
        let bind_addr: SocketAddr = format!("0.0.0.0:{}", spec.bind_port)
            .parse()
            .expect("hardcoded socket addr");
        let listener = Listener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;

        // Ephemeral binds resolve here so the announced port is real.
        let mut spec = spec;
        spec.bind_port = local_addr.port();

        let config = Arc::new(config);
        let (networker, inbound_rx) = Networker::new(Arc::clone(&config));
        let core = Arc::new(RuntimeCore::new(
            spec,
            config,
            Arc::new(registry),
            entry,
            networker,
        ));

        Ok(Self {
            core,
            listener,
            inbound_rx,
            local_addr,
        })
    }

    /// The bound listen address. With `bind_port = 0` this is how the
    /// launcher learns the ephemeral port to hand to other nodes.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the job on this node: establish the peer mesh, run every local
    /// thread's entry point, then drain the shutdown tree.
    ///
    /// Returns when the whole job terminated (or aborted).
    pub async fn run(self) -> Result<()> {
        let core = self.core;

        // Accept loop: identifies every incoming connection by its first
        // Hello frame, then hands the socket over to a standing read loop.
        {
            let core = Arc::clone(&core);
            let listener = self.listener;
            tokio::spawn(async move {
                let mut exit = core.exit_rx.clone();
                loop {
                    tokio::select! {
                        accepted = listener.accept() => match accepted {
                            Ok((stream, addr)) => {
                                let core = Arc::clone(&core);
                                tokio::spawn(async move {
                                    if let Err(e) =
                                        bootstrap::handle_incoming(&core, stream).await
                                    {
                                        tracing::warn!(%addr, error = %e, "incoming connection rejected");
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "accept failed");
                                shutdown::abort(&core, e);
                                return;
                            }
                        },
                        _ = exit.changed() => return,
                    }
                }
            });
        }

        // Dispatch loop: decodes inbound frames and runs the handlers.
        {
            let core = Arc::clone(&core);
            let mut inbound_rx = self.inbound_rx;
            tokio::spawn(async move {
                let mut exit = core.exit_rx.clone();
                loop {
                    tokio::select! {
                        inbound = inbound_rx.recv() => match inbound {
                            Some(inbound) => dispatch::process(&core, inbound),
                            None => return,
                        },
                        _ = exit.changed() => {
                            // Drain what is already queued so release
                            // messages still go out, then stop.
                            while let Ok(inbound) = inbound_rx.try_recv() {
                                dispatch::process(&core, inbound);
                            }
                            return;
                        }
                    }
                }
            });
        }

        if core.spec.is_coordinator {
            bootstrap::start_coordinator(&core)?;
        } else {
            bootstrap::start_worker(&core).await?;
        }

        match core.wait_exit().await {
            ExitReason::Completed => {
                let user_error = core.user_error.lock().unwrap().take();
                match user_error {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
            ExitReason::Aborted => {
                let e = core.abort_error.lock().unwrap().take();
                Err(e.unwrap_or(TesseraError::ConnectionLost {
                    node: core.networker.self_or_unknown(),
                }))
            }
        }
    }
}

/// Children of `pid` in the shutdown tree: the binary heap over the raw
/// physical ids 0..N-1.
pub(crate) fn bye_children(pid: PhysicalId, node_count: usize) -> Vec<PhysicalId> {
    let i = pid as usize;
    [2 * i + 1, 2 * i + 2]
        .into_iter()
        .filter(|&c| c < node_count)
        .map(|c| c as PhysicalId)
        .collect()
}

pub(crate) fn bye_parent(pid: PhysicalId) -> PhysicalId {
    (pid - 1) / 2
}
