//! Groups of threads and the binary-heap communication tree used to fan
//! collectives in and out in O(log N).

use crate::error::{Result, TesseraError};
use crate::state::barrier::BarrierStates;
use crate::state::broadcast::BroadcastStates;
use crate::state::gather::GatherStates;
use crate::state::join::JoinStates;
use crate::types::{GlobalThreadId, GroupId, GroupThreadId, PhysicalId, RequestNum};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

/// This node's view of a group's communication tree, plus the full heap
/// order (the coordinator walks `nodes` to fan group updates out).
///
/// The tree is data-derived from the member set on every change rather than
/// maintained incrementally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeView {
    /// Heap order: master node first, then the nodes of members in ascending
    /// group-thread-id order, deduplicated.
    pub nodes: Vec<PhysicalId>,
    /// Parent of this node, `None` for the master or a non-member.
    pub parent: Option<PhysicalId>,
    /// Children of this node, at most two.
    pub children: Vec<PhysicalId>,
}

impl TreeView {
    /// Build the heap view for `me` from the member node order.
    pub fn compute(nodes: Vec<PhysicalId>, me: PhysicalId) -> Self {
        let mut view = TreeView {
            parent: None,
            children: Vec::new(),
            nodes,
        };
        if let Some(i) = view.nodes.iter().position(|&p| p == me) {
            if i > 0 {
                view.parent = Some(view.nodes[(i - 1) / 2]);
            }
            for child in [2 * i + 1, 2 * i + 2] {
                if child < view.nodes.len() {
                    view.children.push(view.nodes[child]);
                }
            }
        }
        view
    }
}

/// A named subset of threads with its thread-id mapping, state tables and
/// communication tree. Shared by every local thread of the group.
pub struct CommonGroup {
    group_id: GroupId,
    name: String,
    master: PhysicalId,

    /// groupThreadId -> globalThreadId. Monotonic: threads only join.
    threads: RwLock<BTreeMap<GroupThreadId, GlobalThreadId>>,
    /// Fresh group-thread-ids, allocated on the master only.
    thread_counter: AtomicU32,
    /// Group-thread-ids homed on this node, ascending.
    local_ids: RwLock<BTreeSet<GroupThreadId>>,
    tree: RwLock<TreeView>,

    /// Request numbers for collectives originated by local threads.
    request_counter: AtomicU32,

    pub barrier: BarrierStates,
    pub broadcast: BroadcastStates,
    pub collect: GatherStates<Vec<(GroupThreadId, bytes::Bytes)>>,
    /// `None` is the contribution of a node hosting no group threads.
    pub reduce: GatherStates<Option<bytes::Bytes>>,
    pub join: JoinStates,
}

impl CommonGroup {
    pub fn new(group_id: GroupId, name: impl Into<String>, master: PhysicalId) -> Self {
        Self {
            group_id,
            name: name.into(),
            master,
            threads: RwLock::new(BTreeMap::new()),
            thread_counter: AtomicU32::new(0),
            local_ids: RwLock::new(BTreeSet::new()),
            tree: RwLock::new(TreeView::default()),
            request_counter: AtomicU32::new(0),
            barrier: BarrierStates::new(),
            broadcast: BroadcastStates::new(),
            collect: GatherStates::new(),
            reduce: GatherStates::new(),
            join: JoinStates::new(),
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn master(&self) -> PhysicalId {
        self.master
    }

    pub fn thread_count(&self) -> usize {
        self.threads.read().unwrap().len()
    }

    pub fn next_request_num(&self) -> RequestNum {
        self.request_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn global_thread_id(&self, group_thread: GroupThreadId) -> Result<GlobalThreadId> {
        self.threads
            .read()
            .unwrap()
            .get(&group_thread)
            .copied()
            .ok_or(TesseraError::UnknownThread {
                thread: group_thread,
            })
    }

    /// Inverse mapping. Each global id appears at most once per group, so
    /// the first match is the only match.
    pub fn group_thread_id(&self, global: GlobalThreadId) -> Result<GroupThreadId> {
        self.threads
            .read()
            .unwrap()
            .iter()
            .find(|(_, &g)| g == global)
            .map(|(&gtid, _)| gtid)
            .ok_or(TesseraError::UnknownThread { thread: global })
    }

    pub fn threads_snapshot(&self) -> Vec<(GroupThreadId, GlobalThreadId)> {
        self.threads
            .read()
            .unwrap()
            .iter()
            .map(|(&k, &v)| (k, v))
            .collect()
    }

    pub fn local_ids(&self) -> Vec<GroupThreadId> {
        self.local_ids.read().unwrap().iter().copied().collect()
    }

    pub fn local_count(&self) -> usize {
        self.local_ids.read().unwrap().len()
    }

    pub fn parent(&self) -> Option<PhysicalId> {
        self.tree.read().unwrap().parent
    }

    pub fn children(&self) -> Vec<PhysicalId> {
        self.tree.read().unwrap().children.clone()
    }

    pub fn child_count(&self) -> usize {
        self.tree.read().unwrap().children.len()
    }

    /// All nodes hosting members (heap order). Master first.
    pub fn member_nodes(&self) -> Vec<PhysicalId> {
        self.tree.read().unwrap().nodes.clone()
    }

    /// Master only: add a thread, allocating the next dense group-thread-id.
    /// Joining a group twice yields the already-assigned id.
    pub fn add_thread(&self, global: GlobalThreadId) -> GroupThreadId {
        let mut threads = self.threads.write().unwrap();
        if let Some((&gtid, _)) = threads.iter().find(|(_, &g)| g == global) {
            return gtid;
        }
        let gtid = self.thread_counter.fetch_add(1, Ordering::Relaxed);
        threads.insert(gtid, global);
        gtid
    }

    /// Replace the thread mapping with the master's snapshot and recompute
    /// local ids and the tree. Mappings only grow, so applying snapshots in
    /// the master's send order is monotonic.
    pub fn apply_threads(
        &self,
        snapshot: Vec<(GroupThreadId, GlobalThreadId)>,
        owner: &HashMap<GlobalThreadId, PhysicalId>,
        me: PhysicalId,
    ) {
        {
            let mut threads = self.threads.write().unwrap();
            for (gtid, global) in snapshot {
                threads.insert(gtid, global);
            }
            let next = threads.keys().next_back().map(|&k| k + 1).unwrap_or(0);
            self.thread_counter.fetch_max(next, Ordering::Relaxed);
        }
        self.recompute(owner, me);
    }

    /// Recompute the derived local-id set and communication tree.
    pub fn recompute(&self, owner: &HashMap<GlobalThreadId, PhysicalId>, me: PhysicalId) {
        let threads = self.threads.read().unwrap();

        let mut locals = BTreeSet::new();
        let mut nodes = vec![self.master];
        for (&gtid, global) in threads.iter() {
            match owner.get(global) {
                Some(&pid) => {
                    if pid == me {
                        locals.insert(gtid);
                    }
                    if !nodes.contains(&pid) {
                        nodes.push(pid);
                    }
                }
                None => {
                    tracing::warn!(group = self.group_id, thread = *global, "no home node");
                }
            }
        }
        drop(threads);

        *self.local_ids.write().unwrap() = locals;
        *self.tree.write().unwrap() = TreeView::compute(nodes, me);
    }

    /// Drop every pending waiter this group holds. Used on job abort; the
    /// dropped senders resolve outstanding futures with `ConnectionLost`.
    pub fn drop_pending(&self) {
        self.barrier.drop_pending();
        self.broadcast.drop_pending();
        self.collect.drop_pending();
        self.reduce.drop_pending();
        self.join.drop_pending();
    }
}
