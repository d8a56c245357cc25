//! Hello phase: node 0 assigns dense physical ids in arrival order, the
//! node table is distributed, every node opens direct connections to every
//! higher-id node, and node 0 releases user code with `HelloGo`.

use crate::error::{Result, TesseraError};
use crate::group::CommonGroup;
use crate::node::NodeInfo;
use crate::protocol::Message;
use crate::runtime::{shutdown, RuntimeCore};
use crate::transport::{read_frame, spawn_read_loop, PeerChannel};
use crate::types::{PhysicalId, GLOBAL_GROUP_ID, GLOBAL_GROUP_NAME, UNASSIGNED_PHYSICAL_ID};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Node 0: install its own row and, for single-node jobs, finish the hello
/// phase right away.
pub(crate) fn start_coordinator(core: &Arc<RuntimeCore>) -> Result<()> {
    core.node.set_physical_id(0);
    core.networker.set_self(0);
    core.boot
        .threads_seen
        .store(core.spec.local_thread_ids.len(), Ordering::SeqCst);

    tracing::info!(
        port = core.spec.bind_port,
        threads = core.spec.local_thread_ids.len(),
        "coordinator up, waiting for {} threads",
        core.spec.total_threads
    );

    maybe_finish_hello(core);
    Ok(())
}

/// Worker: connect to node 0 and announce itself. Everything after that is
/// driven by the dispatcher (HelloResponse, mesh, HelloGo).
pub(crate) async fn start_worker(core: &Arc<RuntimeCore>) -> Result<()> {
    let stream = TcpStream::connect(core.spec.coordinator)
        .await
        .map_err(|e| TesseraError::ConnectFailed {
            node: 0,
            addr: core.spec.coordinator.to_string(),
            reason: e.to_string(),
        })?;
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();

    core.networker.add_peer(
        0,
        PeerChannel::start_writer(0, write, core.networker.inbound_sender()),
    );
    spawn_read_loop(read, 0, core.networker.inbound_sender());

    core.networker.send(
        0,
        &Message::Hello {
            physical_id: UNASSIGNED_PHYSICAL_ID,
            host: core.spec.host.clone(),
            port: core.spec.bind_port,
            thread_ids: core.spec.local_thread_ids.clone(),
        },
    )?;
    tracing::info!(coordinator = %core.spec.coordinator, "joined, waiting for id assignment");
    Ok(())
}

/// First frame of every accepted connection is a `Hello`; it decides whether
/// this is a bootstrap join (node 0 only) or a mesh link from an already
/// numbered peer.
pub(crate) async fn handle_incoming(
    core: &Arc<RuntimeCore>,
    stream: TcpStream,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (mut read, write) = stream.into_split();
    let hello = read_frame(&mut read).await?;
    let msg = crate::protocol::decode_message(hello)?;

    let Message::Hello {
        physical_id,
        host,
        port,
        thread_ids,
    } = msg
    else {
        return Err(TesseraError::MalformedMessage(format!(
            "expected Hello as first frame, got {:?}",
            msg.kind()
        )));
    };

    if physical_id == UNASSIGNED_PHYSICAL_ID {
        if !core.spec.is_coordinator {
            return Err(TesseraError::MalformedMessage(
                "bootstrap Hello sent to a non-coordinator node".into(),
            ));
        }
        let pid = core.boot.next_pid.fetch_add(1, Ordering::SeqCst);
        core.networker.add_peer(
            pid,
            PeerChannel::start_writer(pid, write, core.networker.inbound_sender()),
        );
        spawn_read_loop(read, pid, core.networker.inbound_sender());

        tracing::info!(pid, %host, port, ?thread_ids, "node joined");
        core.boot.hellos.lock().unwrap().push(NodeInfo {
            physical_id: pid,
            host,
            port,
            thread_ids: thread_ids.clone(),
        });
        core.boot
            .threads_seen
            .fetch_add(thread_ids.len(), Ordering::SeqCst);
        maybe_finish_hello(core);
    } else {
        // Mesh link from a lower-id peer.
        core.networker.add_peer(
            physical_id,
            PeerChannel::start_writer(physical_id, write, core.networker.inbound_sender()),
        );
        spawn_read_loop(read, physical_id, core.networker.inbound_sender());
        core.boot.incoming_identified.fetch_add(1, Ordering::SeqCst);
        maybe_send_hello_completed(core);
    }
    Ok(())
}

/// Node 0: once the announced thread total is reached, distribute the node
/// table and count itself as mesh-complete.
fn maybe_finish_hello(core: &Arc<RuntimeCore>) {
    if core.boot.threads_seen.load(Ordering::SeqCst) < core.spec.total_threads as usize {
        return;
    }
    if core.boot.hello_finished.swap(true, Ordering::SeqCst) {
        return;
    }

    let mut nodes = vec![NodeInfo {
        physical_id: 0,
        host: core.spec.host.clone(),
        port: core.spec.bind_port,
        thread_ids: core.spec.local_thread_ids.clone(),
    }];
    nodes.append(&mut core.boot.hellos.lock().unwrap());
    nodes.sort_by_key(|n| n.physical_id);

    core.node.set_nodes(nodes.clone());
    install_global_group(core);

    for node in &nodes[1..] {
        if let Err(e) = core.networker.send(
            node.physical_id,
            &Message::HelloResponse {
                physical_id: node.physical_id,
                nodes: nodes.clone(),
            },
        ) {
            shutdown::abort(core, e);
            return;
        }
    }
    tracing::info!(nodes = nodes.len(), "node table distributed");

    // Node 0's own mesh is the bootstrap links it already holds.
    node_mesh_completed(core);
}

/// Worker: the dispatcher saw `HelloResponse`. Install the table, then
/// connect to every higher-id node.
pub(crate) fn apply_hello_response(
    core: &Arc<RuntimeCore>,
    physical_id: PhysicalId,
    nodes: Vec<NodeInfo>,
) {
    core.node.set_physical_id(physical_id);
    core.networker.set_self(physical_id);
    core.node.set_nodes(nodes.clone());
    install_global_group(core);
    core.boot.response_seen.store(true, Ordering::SeqCst);
    tracing::info!(physical_id, nodes = nodes.len(), "assigned physical id");

    let higher: Vec<NodeInfo> = nodes
        .into_iter()
        .filter(|n| n.physical_id > physical_id)
        .collect();

    let core = Arc::clone(core);
    tokio::spawn(async move {
        for target in higher {
            if let Err(e) = connect_mesh(&core, &target).await {
                shutdown::abort(&core, e);
                return;
            }
        }
        core.boot.outgoing_done.store(true, Ordering::SeqCst);
        maybe_send_hello_completed(&core);
    });
}

async fn connect_mesh(core: &Arc<RuntimeCore>, target: &NodeInfo) -> Result<()> {
    let addr = format!("{}:{}", target.host, target.port);
    let stream =
        TcpStream::connect(&addr)
            .await
            .map_err(|e| TesseraError::ConnectFailed {
                node: target.physical_id,
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();

    core.networker.add_peer(
        target.physical_id,
        PeerChannel::start_writer(
            target.physical_id,
            write,
            core.networker.inbound_sender(),
        ),
    );
    spawn_read_loop(read, target.physical_id, core.networker.inbound_sender());

    // Identify ourselves; the first frame on a mesh link is always Hello.
    core.networker.send(
        target.physical_id,
        &Message::Hello {
            physical_id: core.node.physical_id(),
            host: core.spec.host.clone(),
            port: 0,
            thread_ids: core.spec.local_thread_ids.clone(),
        },
    )?;
    tracing::debug!(peer = target.physical_id, %addr, "mesh link up");
    Ok(())
}

/// Worker: report mesh completion once the table is known, all outgoing
/// connects succeeded, and every lower-id peer has identified itself.
fn maybe_send_hello_completed(core: &Arc<RuntimeCore>) {
    if !core.boot.response_seen.load(Ordering::SeqCst)
        || !core.boot.outgoing_done.load(Ordering::SeqCst)
    {
        return;
    }
    let expected_incoming = core.node.physical_id() as usize - 1;
    if core.boot.incoming_identified.load(Ordering::SeqCst) < expected_incoming {
        return;
    }
    if core.boot.hello_completed_sent.swap(true, Ordering::SeqCst) {
        return;
    }
    let physical_id = core.node.physical_id();
    if let Err(e) = core
        .networker
        .send(0, &Message::HelloCompleted { physical_id })
    {
        shutdown::abort(core, e);
    }
}

/// Node 0: count mesh-complete nodes; release the job when all reported.
pub(crate) fn node_mesh_completed(core: &Arc<RuntimeCore>) {
    let done = core.boot.completed_nodes.fetch_add(1, Ordering::SeqCst) + 1;
    let total = core.node.node_count();
    tracing::debug!(done, total, "mesh progress");
    if done == total {
        for pid in 0..total as PhysicalId {
            if let Err(e) = core.networker.send(pid, &Message::HelloGo) {
                shutdown::abort(core, e);
                return;
            }
        }
        tracing::info!("mesh complete, releasing user code");
    }
}

/// Build the global group from the node table: every thread is a member,
/// with group-thread-ids dense in ascending global-id order.
fn install_global_group(core: &Arc<RuntimeCore>) {
    let group = CommonGroup::new(GLOBAL_GROUP_ID, GLOBAL_GROUP_NAME, 0);
    let mut all: Vec<_> = core
        .node
        .nodes()
        .iter()
        .flat_map(|n| n.thread_ids.clone())
        .collect();
    all.sort_unstable();
    for tid in all {
        group.add_thread(tid);
    }
    group.recompute(&core.node.thread_owner_map(), core.node.physical_id());
    core.node.add_group(Arc::new(group));
    core.node
        .set_local_threads(core.spec.local_thread_ids.clone());

    // Storages exist before any peer runs user code, so remote get/put can
    // never observe a thread without one.
    for &tid in &core.spec.local_thread_ids {
        core.node
            .add_storage(tid, Arc::new(crate::storage::Storage::new()));
    }
}
