//! Process-wide registry: who this node is, where every other node and
//! thread lives, and the per-node state tables.

use crate::config::TesseraConfig;
use crate::error::{Result, TesseraError};
use crate::group::CommonGroup;
use crate::registry::FnRegistry;
use crate::state::bye::ByeState;
use crate::state::rma::RmaStates;
use crate::storage::Storage;
use crate::types::{GlobalThreadId, GroupId, PhysicalId, GLOBAL_GROUP_ID};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

/// One row of the node table distributed by node 0 at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub physical_id: PhysicalId,
    pub host: String,
    pub port: u16,
    pub thread_ids: Vec<GlobalThreadId>,
}

/// Process-wide node data. One instance per process, shared by the
/// networker, the dispatcher and every local logical thread.
pub struct NodeData {
    pub config: Arc<TesseraConfig>,

    physical_id: OnceLock<PhysicalId>,
    nodes: RwLock<Vec<NodeInfo>>,
    thread_owner: RwLock<HashMap<GlobalThreadId, PhysicalId>>,
    local_threads: OnceLock<Vec<GlobalThreadId>>,
    storages: RwLock<HashMap<GlobalThreadId, Arc<Storage>>>,

    groups: RwLock<HashMap<GroupId, Arc<CommonGroup>>>,
    groups_by_name: RwLock<HashMap<String, GroupId>>,
    /// Fresh group ids, allocated on the coordinator only.
    group_counter: AtomicU32,

    pub registry: Arc<FnRegistry>,
    pub rma: RmaStates,
    pub bye: ByeState,
}

impl NodeData {
    pub fn new(config: Arc<TesseraConfig>, registry: Arc<FnRegistry>) -> Self {
        Self {
            config,
            physical_id: OnceLock::new(),
            nodes: RwLock::new(Vec::new()),
            thread_owner: RwLock::new(HashMap::new()),
            local_threads: OnceLock::new(),
            storages: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            groups_by_name: RwLock::new(HashMap::new()),
            group_counter: AtomicU32::new(GLOBAL_GROUP_ID + 1),
            registry,
            rma: RmaStates::new(),
            bye: ByeState::new(),
        }
    }

    pub fn set_physical_id(&self, id: PhysicalId) {
        self.physical_id
            .set(id)
            .expect("physical id assigned twice");
    }

    pub fn physical_id(&self) -> PhysicalId {
        *self.physical_id.get().expect("physical id not yet assigned")
    }

    /// Install the complete node table and derive the thread-owner map.
    pub fn set_nodes(&self, nodes: Vec<NodeInfo>) {
        let mut owner = self.thread_owner.write().unwrap();
        for node in &nodes {
            for &tid in &node.thread_ids {
                owner.insert(tid, node.physical_id);
            }
        }
        drop(owner);
        *self.nodes.write().unwrap() = nodes;
    }

    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.nodes.read().unwrap().clone()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    pub fn owner_of(&self, thread: GlobalThreadId) -> Result<PhysicalId> {
        self.thread_owner
            .read()
            .unwrap()
            .get(&thread)
            .copied()
            .ok_or(TesseraError::UnknownThread { thread })
    }

    /// Snapshot of the thread-owner map, for tree recomputation.
    pub fn thread_owner_map(&self) -> HashMap<GlobalThreadId, PhysicalId> {
        self.thread_owner.read().unwrap().clone()
    }

    pub fn set_local_threads(&self, threads: Vec<GlobalThreadId>) {
        self.local_threads
            .set(threads)
            .expect("local threads assigned twice");
    }

    pub fn local_threads(&self) -> &[GlobalThreadId] {
        self.local_threads
            .get()
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn total_thread_count(&self) -> usize {
        self.thread_owner.read().unwrap().len()
    }

    pub fn add_storage(&self, thread: GlobalThreadId, storage: Arc<Storage>) {
        self.storages.write().unwrap().insert(thread, storage);
    }

    /// Storage of a thread homed on this node.
    pub fn storage_of(&self, thread: GlobalThreadId) -> Result<Arc<Storage>> {
        self.storages
            .read()
            .unwrap()
            .get(&thread)
            .cloned()
            .ok_or(TesseraError::UnknownThread { thread })
    }

    pub fn add_group(&self, group: Arc<CommonGroup>) {
        self.groups_by_name
            .write()
            .unwrap()
            .insert(group.name().to_string(), group.group_id());
        self.groups
            .write()
            .unwrap()
            .insert(group.group_id(), group);
    }

    pub fn group_by_id(&self, group: GroupId) -> Result<Arc<CommonGroup>> {
        self.groups
            .read()
            .unwrap()
            .get(&group)
            .cloned()
            .ok_or(TesseraError::UnknownGroup { group })
    }

    pub fn group_by_name(&self, name: &str) -> Option<Arc<CommonGroup>> {
        let id = *self.groups_by_name.read().unwrap().get(name)?;
        self.groups.read().unwrap().get(&id).cloned()
    }

    pub fn global_group(&self) -> Arc<CommonGroup> {
        self.group_by_id(GLOBAL_GROUP_ID)
            .expect("global group exists after bootstrap")
    }

    /// Allocate a fresh group id. Coordinator only.
    pub fn next_group_id(&self) -> GroupId {
        self.group_counter.fetch_add(1, Ordering::Relaxed)
    }

    pub fn groups(&self) -> Vec<Arc<CommonGroup>> {
        self.groups.read().unwrap().values().cloned().collect()
    }
}
