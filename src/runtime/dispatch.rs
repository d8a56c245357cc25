//! Message handlers: the collective engine, the RMA servers, and the
//! hello/bye plumbing.
//!
//! Tree and control messages run inline on the dispatch loop, so messages
//! from one peer are handled in arrival order. The point-to-point request
//! handlers run on the bounded worker pool instead; they answer with reply
//! messages and may be slow (async-at runs user code).

use crate::error::{RemoteError, RemoteErrorKind, TesseraError};
use crate::group::CommonGroup;
use crate::networker::Inbound;
use crate::protocol::{decode_message, Message};
use crate::runtime::{bootstrap, shutdown, RuntimeCore};
use crate::types::{FnId, GlobalThreadId, GroupId, GroupThreadId, PhysicalId, RequestNum};
use bytes::Bytes;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Entry point of the dispatch loop.
pub(crate) fn process(core: &Arc<RuntimeCore>, inbound: Inbound) {
    match inbound {
        Inbound::Frame { source, body } => match decode_message(body) {
            Ok(msg) => {
                tracing::trace!(source, kind = ?msg.kind(), "dispatch");
                handle_message(core, source, msg);
            }
            // Malformed wire data is fatal: the stream offset is gone.
            Err(e) => shutdown::abort(core, e),
        },
        Inbound::PeerClosed { source } => {
            if core.shutting_down.load(Ordering::SeqCst) || core.exit_signaled() {
                tracing::debug!(source, "peer closed during shutdown");
            } else {
                shutdown::abort(core, TesseraError::ConnectionLost { node: source });
            }
        }
    }
}

fn handle_message(core: &Arc<RuntimeCore>, source: PhysicalId, msg: Message) {
    match msg {
        // Point-to-point requests go to the worker pool.
        Message::GetRequest { .. }
        | Message::PutRequest { .. }
        | Message::AccumulateRequest { .. }
        | Message::AsyncAtRequest { .. } => spawn_worker(core, source, msg),

        Message::Hello { .. } => {
            tracing::warn!(source, "unexpected Hello on an established link");
        }
        Message::HelloResponse {
            physical_id,
            nodes,
        } => bootstrap::apply_hello_response(core, physical_id, nodes),
        Message::HelloCompleted { physical_id } => {
            tracing::debug!(physical_id, "node mesh complete");
            bootstrap::node_mesh_completed(core);
        }
        Message::HelloGo => start_local_threads(core),

        Message::BarrierGo { group, round } => handle_barrier_go(core, group, round),
        Message::BarrierWaiting { group, round } => handle_barrier_waiting(core, group, round),

        Message::BroadcastRequest {
            group,
            req,
            requester,
            storage,
            name,
            value,
        }
        | Message::BroadcastBytes {
            group,
            req,
            requester,
            storage,
            name,
            value,
        } => handle_broadcast(core, group, req, requester, &storage, &name, value),
        Message::BroadcastInform {
            group,
            req,
            requester,
        } => {
            if let Ok(group) = lookup_group(core, group) {
                broadcast_unit_done(core, &group, (req, requester));
            }
        }

        Message::CollectRequest {
            group,
            req,
            requester,
            storage,
            name,
        } => handle_collect_request(core, group, req, requester, &storage, &name),
        Message::CollectValue {
            group,
            req,
            requester,
            result,
        } => handle_collect_value(core, source, group, req, requester, result),

        Message::ReduceRequest {
            group,
            req,
            requester,
            storage,
            name,
            fn_id,
        } => handle_reduce_request(core, group, req, requester, &storage, &name, fn_id),
        Message::ReduceValue {
            group,
            req,
            requester,
            fn_id,
            result,
        } => handle_reduce_value(core, source, group, req, requester, fn_id, result),

        Message::GroupJoinRequest { req, name, joiner } => {
            handle_group_join_request(core, req, &name, joiner)
        }
        Message::GroupJoinInform {
            group,
            name,
            req,
            joiner,
            threads,
        } => handle_group_join_inform(core, group, &name, req, joiner, threads),
        Message::GroupJoinConfirm { group, req, joiner } => {
            handle_group_join_confirm(core, group, req, joiner)
        }
        Message::GroupJoinResponse { req, result } => {
            core.node.rma.complete_join(req, result);
        }

        Message::GetReply { req, result } | Message::AsyncAtReply { req, result } => {
            core.node.rma.complete_bytes(req, result);
        }
        Message::PutReply { req, result } | Message::AccumulateReply { req, result } => {
            core.node.rma.complete_unit(req, result);
        }

        Message::Bye => shutdown::handle_bye(core),
        Message::ByeCompleted => shutdown::handle_bye_completed(core),
    }
}

fn lookup_group(
    core: &Arc<RuntimeCore>,
    group: GroupId,
) -> Result<Arc<CommonGroup>, TesseraError> {
    core.node.group_by_id(group).map_err(|e| {
        tracing::warn!(group, "message for unknown group");
        e
    })
}

fn send_or_abort(core: &Arc<RuntimeCore>, target: PhysicalId, msg: &Message) {
    if let Err(e) = core.networker.send(target, msg) {
        shutdown::abort(core, e);
    }
}

// ── Threads ─────────────────────────────────────────────────────────

/// HelloGo: arm the shutdown counter and run the entry point on every local
/// logical thread.
fn start_local_threads(core: &Arc<RuntimeCore>) {
    let pid = core.node.physical_id();
    let children = crate::runtime::bye_children(pid, core.node.node_count());
    core.node.bye.arm(children.len());

    tracing::info!(
        threads = core.spec.local_thread_ids.len(),
        "starting local threads"
    );

    let mut handles = Vec::new();
    for &tid in core.node.local_threads() {
        let storage = core
            .node
            .storage_of(tid)
            .expect("local storages created at bootstrap");
        let ctx = crate::context::ThreadContext::new(Arc::clone(core), tid, storage);
        let entry = Arc::clone(&core.entry);
        handles.push((tid, tokio::spawn(async move { (entry)(ctx).await })));
    }
    shutdown::spawn_supervisor(core, handles);

    if !core.config.alive_timeout.is_zero() {
        shutdown::spawn_liveness_check(core);
    }
}

// ── Barrier ─────────────────────────────────────────────────────────

fn expected_barrier(group: &CommonGroup) -> i64 {
    group.child_count() as i64 + group.local_count() as i64
}

/// A local thread entered the barrier. Called from the thread context.
pub(crate) fn local_barrier_enter(
    core: &Arc<RuntimeCore>,
    group: &Arc<CommonGroup>,
    round: u32,
) -> oneshot::Receiver<()> {
    let (rx, zero) = group.barrier.enter(round, expected_barrier(group));
    if zero {
        barrier_subtree_done(core, group, round);
    }
    rx
}

fn handle_barrier_go(core: &Arc<RuntimeCore>, group_id: GroupId, round: u32) {
    let Ok(group) = lookup_group(core, group_id) else {
        return;
    };
    if group.barrier.child_arrived(round, expected_barrier(&group)) {
        barrier_subtree_done(core, &group, round);
    }
}

/// Every child and every local thread arrived: escalate or release.
fn barrier_subtree_done(core: &Arc<RuntimeCore>, group: &Arc<CommonGroup>, round: u32) {
    match group.parent() {
        Some(parent) => send_or_abort(
            core,
            parent,
            &Message::BarrierGo {
                group: group.group_id(),
                round,
            },
        ),
        None => release_barrier(core, group, round),
    }
}

fn handle_barrier_waiting(core: &Arc<RuntimeCore>, group_id: GroupId, round: u32) {
    if let Ok(group) = lookup_group(core, group_id) {
        release_barrier(core, &group, round);
    }
}

fn release_barrier(core: &Arc<RuntimeCore>, group: &Arc<CommonGroup>, round: u32) {
    for child in group.children() {
        send_or_abort(
            core,
            child,
            &Message::BarrierWaiting {
                group: group.group_id(),
                round,
            },
        );
    }
    for waiter in group.barrier.release(round) {
        let _ = waiter.send(());
    }
}

// ── Broadcast ───────────────────────────────────────────────────────

/// Root and internal nodes alike: forward down, deliver to local threads,
/// then count the node's own unit of work.
fn handle_broadcast(
    core: &Arc<RuntimeCore>,
    group_id: GroupId,
    req: RequestNum,
    requester: GlobalThreadId,
    storage: &str,
    name: &str,
    value: Bytes,
) {
    let Ok(group) = lookup_group(core, group_id) else {
        return;
    };

    for child in group.children() {
        send_or_abort(
            core,
            child,
            &Message::BroadcastBytes {
                group: group_id,
                req,
                requester,
                storage: storage.to_string(),
                name: name.to_string(),
                value: value.clone(),
            },
        );
    }

    for gtid in group.local_ids() {
        let delivered = group
            .global_thread_id(gtid)
            .map_err(|_| RemoteError::new(RemoteErrorKind::UnknownThread, gtid.to_string()))
            .and_then(|global| {
                core.node
                    .storage_of(global)
                    .map_err(|_| {
                        RemoteError::new(RemoteErrorKind::UnknownThread, global.to_string())
                    })?
                    .put(storage, name, value.clone())
            });
        if let Err(e) = delivered {
            tracing::warn!(group = group_id, gtid, %storage, %name, error = %e.detail, "broadcast delivery failed");
        }
    }

    broadcast_unit_done(core, &group, (req, requester));
}

/// One unit of the subtree finished: this node's delivery or a child ack.
fn broadcast_unit_done(
    core: &Arc<RuntimeCore>,
    group: &Arc<CommonGroup>,
    key: (RequestNum, GlobalThreadId),
) {
    let expected = group.child_count() as i64 + 1;
    if !group.broadcast.complete_one(key, expected) {
        return;
    }
    if let Some(parent) = group.parent() {
        send_or_abort(
            core,
            parent,
            &Message::BroadcastInform {
                group: group.group_id(),
                req: key.0,
                requester: key.1,
            },
        );
    }
    if let Some(waiter) = group.broadcast.take_waiter(key) {
        let _ = waiter.send(());
    }
}

// ── Collect ─────────────────────────────────────────────────────────

type CollectEntries = Vec<(GroupThreadId, Bytes)>;

fn handle_collect_request(
    core: &Arc<RuntimeCore>,
    group_id: GroupId,
    req: RequestNum,
    requester: GlobalThreadId,
    storage: &str,
    name: &str,
) {
    let Ok(group) = lookup_group(core, group_id) else {
        return;
    };

    for child in group.children() {
        send_or_abort(
            core,
            child,
            &Message::CollectRequest {
                group: group_id,
                req,
                requester,
                storage: storage.to_string(),
                name: name.to_string(),
            },
        );
    }

    let local = local_values(core, &group, storage, name);
    let key = (req, requester);
    if let Some(total) = group.collect.init(key, group.child_count(), local) {
        send_collect_up(core, &group, key, total);
    }
}

fn handle_collect_value(
    core: &Arc<RuntimeCore>,
    source: PhysicalId,
    group_id: GroupId,
    req: RequestNum,
    requester: GlobalThreadId,
    result: Result<CollectEntries, RemoteError>,
) {
    let Ok(group) = lookup_group(core, group_id) else {
        return;
    };
    let key = (req, requester);

    // Partials flow child -> parent; the only CollectValue the master emits
    // is the final aggregate for the requester.
    if source == group.master() {
        if let Some(waiter) = group.collect.take_waiter(key) {
            let _ = waiter.send(result);
        }
        return;
    }

    if let Some(total) = group
        .collect
        .merge(key, result, |a, b| Ok(merge_entries(a, b)))
    {
        send_collect_up(core, &group, key, total);
    }
}

fn send_collect_up(
    core: &Arc<RuntimeCore>,
    group: &Arc<CommonGroup>,
    key: (RequestNum, GlobalThreadId),
    total: Result<CollectEntries, RemoteError>,
) {
    let msg = Message::CollectValue {
        group: group.group_id(),
        req: key.0,
        requester: key.1,
        result: total,
    };
    match group.parent() {
        Some(parent) => send_or_abort(core, parent, &msg),
        None => match core.node.owner_of(key.1) {
            Ok(home) => send_or_abort(core, home, &msg),
            Err(e) => tracing::warn!(requester = key.1, error = %e, "cannot route collect result"),
        },
    }
}

/// Concatenate two subtree partials, keeping group-thread-id order.
fn merge_entries(a: CollectEntries, b: CollectEntries) -> CollectEntries {
    let mut merged = a;
    merged.extend(b);
    merged.sort_by_key(|(gtid, _)| *gtid);
    merged
}

// ── Reduce ──────────────────────────────────────────────────────────

type ReducePartial = Option<Bytes>;

fn handle_reduce_request(
    core: &Arc<RuntimeCore>,
    group_id: GroupId,
    req: RequestNum,
    requester: GlobalThreadId,
    storage: &str,
    name: &str,
    fn_id: FnId,
) {
    let Ok(group) = lookup_group(core, group_id) else {
        return;
    };

    for child in group.children() {
        send_or_abort(
            core,
            child,
            &Message::ReduceRequest {
                group: group_id,
                req,
                requester,
                storage: storage.to_string(),
                name: name.to_string(),
                fn_id,
            },
        );
    }

    let local = fold_local_values(core, &group, storage, name, fn_id);
    let key = (req, requester);
    if let Some(total) = group.reduce.init(key, group.child_count(), local) {
        send_reduce_up(core, &group, key, fn_id, total);
    }
}

fn handle_reduce_value(
    core: &Arc<RuntimeCore>,
    source: PhysicalId,
    group_id: GroupId,
    req: RequestNum,
    requester: GlobalThreadId,
    fn_id: FnId,
    result: Result<Bytes, RemoteError>,
) {
    let Ok(group) = lookup_group(core, group_id) else {
        return;
    };
    let key = (req, requester);

    if source == group.master() {
        if let Some(waiter) = group.reduce.take_waiter(key) {
            let _ = waiter.send(result.map(Some));
        }
        return;
    }

    let incoming = result.map(Some);
    if let Some(total) = group.reduce.merge(key, incoming, |a, b| {
        combine_partials(core, fn_id, a, b)
    }) {
        send_reduce_up(core, &group, key, fn_id, total);
    }
}

fn send_reduce_up(
    core: &Arc<RuntimeCore>,
    group: &Arc<CommonGroup>,
    key: (RequestNum, GlobalThreadId),
    fn_id: FnId,
    total: Result<ReducePartial, RemoteError>,
) {
    let result = match total {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(RemoteError::new(
            RemoteErrorKind::UserException,
            "reduce over an empty subtree",
        )),
        Err(e) => Err(e),
    };
    let msg = Message::ReduceValue {
        group: group.group_id(),
        req: key.0,
        requester: key.1,
        fn_id,
        result,
    };
    match group.parent() {
        Some(parent) => send_or_abort(core, parent, &msg),
        None => match core.node.owner_of(key.1) {
            Ok(home) => send_or_abort(core, home, &msg),
            Err(e) => tracing::warn!(requester = key.1, error = %e, "cannot route reduce result"),
        },
    }
}

/// Fold the named variable of every local group thread, ascending
/// group-thread-id.
fn fold_local_values(
    core: &Arc<RuntimeCore>,
    group: &Arc<CommonGroup>,
    storage: &str,
    name: &str,
    fn_id: FnId,
) -> Result<ReducePartial, RemoteError> {
    let values = local_values(core, group, storage, name)?;
    let mut acc: ReducePartial = None;
    for (_, value) in values {
        acc = combine_partials(core, fn_id, acc, Some(value))?;
    }
    Ok(acc)
}

fn combine_partials(
    core: &Arc<RuntimeCore>,
    fn_id: FnId,
    a: ReducePartial,
    b: ReducePartial,
) -> Result<ReducePartial, RemoteError> {
    match (a, b) {
        (None, x) | (x, None) => Ok(x),
        (Some(a), Some(b)) => {
            let combiner = core.node.registry.combiner(fn_id)?;
            Ok(Some(Bytes::from(combiner(&a, &b)?)))
        }
    }
}

/// Read the named variable of every local group thread, ascending
/// group-thread-id. The first failure wins.
fn local_values(
    core: &Arc<RuntimeCore>,
    group: &Arc<CommonGroup>,
    storage: &str,
    name: &str,
) -> Result<Vec<(GroupThreadId, Bytes)>, RemoteError> {
    let mut values = Vec::new();
    for gtid in group.local_ids() {
        let global = group
            .global_thread_id(gtid)
            .map_err(|_| RemoteError::new(RemoteErrorKind::UnknownThread, gtid.to_string()))?;
        let value = core
            .node
            .storage_of(global)
            .map_err(|_| RemoteError::new(RemoteErrorKind::UnknownThread, global.to_string()))?
            .get(storage, name)?;
        values.push((gtid, value));
    }
    Ok(values)
}

// ── Group join ──────────────────────────────────────────────────────

fn handle_group_join_request(
    core: &Arc<RuntimeCore>,
    req: RequestNum,
    name: &str,
    joiner: GlobalThreadId,
) {
    let group = match core.node.group_by_name(name) {
        Some(group) => group,
        None => {
            let group = Arc::new(CommonGroup::new(core.node.next_group_id(), name, 0));
            core.node.add_group(Arc::clone(&group));
            tracing::debug!(group = group.group_id(), name, "group created");
            group
        }
    };

    group.add_thread(joiner);
    group.recompute(&core.node.thread_owner_map(), core.node.physical_id());

    let members = group.member_nodes();
    group.join.init((req, joiner), members.len());

    let snapshot = group.threads_snapshot();
    for member in members {
        send_or_abort(
            core,
            member,
            &Message::GroupJoinInform {
                group: group.group_id(),
                name: name.to_string(),
                req,
                joiner,
                threads: snapshot.clone(),
            },
        );
    }
}

fn handle_group_join_inform(
    core: &Arc<RuntimeCore>,
    group_id: GroupId,
    name: &str,
    req: RequestNum,
    joiner: GlobalThreadId,
    threads: Vec<(GroupThreadId, GlobalThreadId)>,
) {
    let group = match core.node.group_by_id(group_id) {
        Ok(group) => group,
        Err(_) => {
            let group = Arc::new(CommonGroup::new(group_id, name, 0));
            core.node.add_group(Arc::clone(&group));
            group
        }
    };
    group.apply_threads(threads, &core.node.thread_owner_map(), core.node.physical_id());

    send_or_abort(
        core,
        group.master(),
        &Message::GroupJoinConfirm {
            group: group_id,
            req,
            joiner,
        },
    );
}

fn handle_group_join_confirm(
    core: &Arc<RuntimeCore>,
    group_id: GroupId,
    req: RequestNum,
    joiner: GlobalThreadId,
) {
    let Ok(group) = lookup_group(core, group_id) else {
        return;
    };
    if !group.join.confirmed((req, joiner)) {
        return;
    }
    let result = group
        .group_thread_id(joiner)
        .map(|gtid| (group_id, gtid))
        .map_err(|_| RemoteError::new(RemoteErrorKind::UnknownThread, joiner.to_string()));
    match core.node.owner_of(joiner) {
        Ok(home) => send_or_abort(core, home, &Message::GroupJoinResponse { req, result }),
        Err(e) => tracing::warn!(joiner, error = %e, "cannot route join response"),
    }
}

// ── RMA workers ─────────────────────────────────────────────────────

fn spawn_worker(core: &Arc<RuntimeCore>, source: PhysicalId, msg: Message) {
    let core = Arc::clone(core);
    let workers = Arc::clone(&core.workers);
    tokio::spawn(async move {
        let Ok(_permit) = workers.acquire_owned().await else {
            return;
        };
        handle_rma(&core, source, msg);
    });
}

fn remote_unknown_thread(thread: GlobalThreadId) -> RemoteError {
    RemoteError::new(RemoteErrorKind::UnknownThread, thread.to_string())
}

fn handle_rma(core: &Arc<RuntimeCore>, source: PhysicalId, msg: Message) {
    let reply = match msg {
        Message::GetRequest {
            req,
            target,
            storage,
            name,
        } => {
            let result = core
                .node
                .storage_of(target)
                .map_err(|_| remote_unknown_thread(target))
                .and_then(|s| s.get(&storage, &name));
            Message::GetReply { req, result }
        }
        Message::PutRequest {
            req,
            target,
            storage,
            name,
            value,
        } => {
            let result = core
                .node
                .storage_of(target)
                .map_err(|_| remote_unknown_thread(target))
                .and_then(|s| s.put(&storage, &name, value));
            Message::PutReply { req, result }
        }
        Message::AccumulateRequest {
            req,
            target,
            storage,
            name,
            fn_id,
            value,
        } => {
            let result = core
                .node
                .storage_of(target)
                .map_err(|_| remote_unknown_thread(target))
                .and_then(|s| {
                    let combiner = core.node.registry.combiner(fn_id)?;
                    s.accumulate(&storage, &name, &value, |old, new| combiner(old, new))
                });
            Message::AccumulateReply { req, result }
        }
        Message::AsyncAtRequest {
            req,
            target,
            fn_id,
            args,
        } => {
            let result = if core.node.storage_of(target).is_err() {
                Err(remote_unknown_thread(target))
            } else {
                run_task(core, fn_id, &args)
            };
            Message::AsyncAtReply { req, result }
        }
        other => {
            tracing::warn!(kind = ?other.kind(), "non-RMA message on the worker pool");
            return;
        }
    };

    send_or_abort(core, source, &reply);
}

/// Run a registered task body, turning panics into `UserException` replies.
fn run_task(core: &Arc<RuntimeCore>, fn_id: FnId, args: &Bytes) -> Result<Bytes, RemoteError> {
    let task = core.node.registry.task(fn_id)?;
    match catch_unwind(AssertUnwindSafe(|| task(args))) {
        Ok(result) => result.map(Bytes::from),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task panicked".into());
            tracing::error!(fn_id, detail = %detail, "remote task panicked");
            Err(RemoteError::new(RemoteErrorKind::UserException, detail))
        }
    }
}
