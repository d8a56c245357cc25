//! Coordinated termination: the "bye" tree, the shutdown watchdog, and the
//! fail-fast abort path.

use crate::error::TesseraError;
use crate::protocol::Message;
use crate::runtime::{bye_children, bye_parent, ExitReason, RuntimeCore};
use crate::types::GlobalThreadId;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Join every local entry point, then feed the bye tree.
pub(crate) fn spawn_supervisor(
    core: &Arc<RuntimeCore>,
    handles: Vec<(GlobalThreadId, JoinHandle<crate::error::Result<()>>)>,
) {
    let core = Arc::clone(core);
    tokio::spawn(async move {
        for (tid, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(thread = tid, error = %e, "entry point failed");
                    core.record_user_error(e);
                }
                Err(join_error) => {
                    tracing::error!(thread = tid, error = %join_error, "entry point panicked");
                    core.record_user_error(TesseraError::UserException {
                        thread: tid,
                        detail: join_error.to_string(),
                    });
                }
            }
        }
        tracing::info!("local program finished");
        local_program_done(&core);

        // Watchdog: the bye tree must drain within the grace period.
        let timeout = core.config.shutdown_timeout;
        if timeout.is_zero() {
            return;
        }
        tokio::select! {
            _ = core.wait_exit() => {}
            _ = tokio::time::sleep(timeout) => {
                abort(
                    &core,
                    TesseraError::Timeout {
                        operation: "shutdown",
                        timeout_ms: timeout.as_millis() as u64,
                    },
                );
            }
        }
    });
}

fn local_program_done(core: &Arc<RuntimeCore>) {
    if core.node.bye.node_processed() {
        bye_subtree_done(core);
    }
}

/// A child's subtree said goodbye.
pub(crate) fn handle_bye(core: &Arc<RuntimeCore>) {
    if core.node.bye.node_processed() {
        bye_subtree_done(core);
    }
}

/// This node's whole subtree (local program + children) is done.
fn bye_subtree_done(core: &Arc<RuntimeCore>) {
    let pid = core.node.physical_id();
    if pid == 0 {
        // Root: release the job. Sent to itself first so the release takes
        // the same decode path as everywhere else.
        if let Err(e) = core.networker.send(0, &Message::ByeCompleted) {
            abort(core, e);
        }
    } else if let Err(e) = core.networker.send(bye_parent(pid), &Message::Bye) {
        abort(core, e);
    }
}

/// Release flowing down the shutdown tree: forward, then exit.
pub(crate) fn handle_bye_completed(core: &Arc<RuntimeCore>) {
    core.shutting_down.store(true, Ordering::SeqCst);
    let pid = core.node.physical_id();
    for child in bye_children(pid, core.node.node_count()) {
        if let Err(e) = core.networker.send(child, &Message::ByeCompleted) {
            tracing::warn!(child, error = %e, "bye release lost");
        }
    }
    tracing::info!("bye completed");
    core.signal_exit(ExitReason::Completed);
}

/// Fail-fast abort: drain every pending future (waiters resolve with
/// `ConnectionLost`) and terminate the run. Node 0 propagates the abort by
/// tearing down its sockets, which every peer observes as a lost
/// connection.
pub(crate) fn abort(core: &Arc<RuntimeCore>, e: impl Into<TesseraError>) {
    let e = e.into();
    if core.shutting_down.load(Ordering::SeqCst) || core.exit_signaled() {
        tracing::debug!(error = %e, "ignoring failure during shutdown");
        return;
    }
    tracing::error!(error = %e, "aborting job");

    {
        let mut slot = core.abort_error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(e);
        }
    }
    core.node.rma.drop_pending();
    for group in core.node.groups() {
        group.drop_pending();
    }
    core.signal_exit(ExitReason::Aborted);
}

/// Periodic peer liveness check (`alive_timeout` > 0).
pub(crate) fn spawn_liveness_check(core: &Arc<RuntimeCore>) {
    let core = Arc::clone(core);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(core.config.alive_timeout);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = core.wait_exit() => return,
                _ = interval.tick() => {}
            }
            if let Some(&node) = core.networker.dead_peers().first() {
                abort(&core, TesseraError::ConnectionLost { node });
                return;
            }
        }
    });
}
