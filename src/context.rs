//! The per-thread execution context handed to the user entry point, and
//! group handles for collectives.
//!
//! Each logical thread gets its own `ThreadContext` instead of sharing
//! global state; typed values are (de)serialized here, at the API edge, and
//! travel as opaque blobs below.

use crate::error::{Result, TesseraError};
use crate::group::CommonGroup;
use crate::protocol::Message;
use crate::runtime::{dispatch, RuntimeCore};
use crate::storage::Storage;
use crate::types::{FnId, GlobalThreadId, GroupId, GroupThreadId, PhysicalId};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One logical thread's window into the runtime.
pub struct ThreadContext {
    core: Arc<RuntimeCore>,
    global_id: GlobalThreadId,
    storage: Arc<Storage>,
    /// Barrier round counters, shared with every group handle of this
    /// thread so the n-th barrier on a group is round n regardless of how
    /// the handle was obtained.
    rounds: Arc<Mutex<HashMap<GroupId, u32>>>,
}

impl ThreadContext {
    pub(crate) fn new(
        core: Arc<RuntimeCore>,
        global_id: GlobalThreadId,
        storage: Arc<Storage>,
    ) -> Self {
        Self {
            core,
            global_id,
            storage,
            rounds: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// This thread's job-wide id.
    pub fn my_id(&self) -> GlobalThreadId {
        self.global_id
    }

    /// Total logical threads in the job.
    pub fn thread_count(&self) -> u32 {
        self.core.node.total_thread_count() as u32
    }

    /// Physical id of the hosting node.
    pub fn physical_id(&self) -> PhysicalId {
        self.core.node.physical_id()
    }

    // ── Local storage ───────────────────────────────────────────────

    /// Register a shared variable with its initial value.
    pub fn register<T: Serialize>(&self, storage: &str, name: &str, initial: &T) -> Result<()> {
        let blob = encode_value(storage, name, initial)?;
        self.storage.register(storage, name, blob);
        Ok(())
    }

    /// Put into this thread's own storage, no wire involved.
    pub fn put_local<T: Serialize>(&self, storage: &str, name: &str, value: &T) -> Result<()> {
        let blob = encode_value(storage, name, value)?;
        self.storage
            .put(storage, name, blob)
            .map_err(|e| e.into_error(self.global_id))
    }

    /// Read from this thread's own storage.
    pub fn get_local<T: DeserializeOwned>(&self, storage: &str, name: &str) -> Result<T> {
        let blob = self
            .storage
            .get(storage, name)
            .map_err(|e| e.into_error(self.global_id))?;
        decode_value(storage, name, &blob)
    }

    /// Suspend until the next put to the variable.
    pub async fn monitor(&self, storage: &str, name: &str) -> Result<()> {
        self.storage
            .monitor(storage, name)
            .await
            .map_err(|e| e.into_error(self.global_id))
    }

    /// Suspend until the variable has been put to at least `count` times
    /// since registration. Unlike [`monitor`](Self::monitor) this cannot
    /// miss puts that landed before the call.
    pub async fn wait_for(&self, storage: &str, name: &str, count: u64) -> Result<()> {
        self.storage
            .wait_seq(storage, name, count)
            .await
            .map_err(|e| e.into_error(self.global_id))
    }

    // ── Groups ──────────────────────────────────────────────────────

    /// Handle on the global group (every thread of the job).
    pub fn global(&self) -> GroupHandle {
        GroupHandle {
            core: Arc::clone(&self.core),
            group: self.core.node.global_group(),
            owner: self.global_id,
            rounds: Arc::clone(&self.rounds),
        }
    }

    /// Join (or create) the named group. Every member observes joins in the
    /// order fixed by the coordinator.
    pub async fn join_group(&self, name: &str) -> Result<GroupHandle> {
        let req = self.core.node.rma.next_request_num();
        let rx = self.core.node.rma.register_join(req);
        self.core.networker.send(
            0,
            &Message::GroupJoinRequest {
                req,
                name: name.to_string(),
                joiner: self.global_id,
            },
        )?;
        let (group_id, _) = rx
            .await
            .map_err(|_| TesseraError::ConnectionLost { node: 0 })?
            .map_err(|e| e.into_error(self.global_id))?;

        let group = self.core.node.group_by_id(group_id)?;
        Ok(GroupHandle {
            core: Arc::clone(&self.core),
            group,
            owner: self.global_id,
            rounds: Arc::clone(&self.rounds),
        })
    }

    // ── One-sided RMA ───────────────────────────────────────────────

    /// Read a variable of another thread (by global id).
    pub async fn get<T: DeserializeOwned>(
        &self,
        target: GlobalThreadId,
        storage: &str,
        name: &str,
    ) -> Result<T> {
        let home = self.core.node.owner_of(target)?;
        let req = self.core.node.rma.next_request_num();
        let rx = self.core.node.rma.register_bytes(req);
        self.core.networker.send(
            home,
            &Message::GetRequest {
                req,
                target,
                storage: storage.to_string(),
                name: name.to_string(),
            },
        )?;
        let blob = rx
            .await
            .map_err(|_| TesseraError::ConnectionLost { node: home })?
            .map_err(|e| e.into_error(target))?;
        decode_value(storage, name, &blob)
    }

    /// Write a variable of another thread. Last writer wins.
    pub async fn put<T: Serialize>(
        &self,
        target: GlobalThreadId,
        storage: &str,
        name: &str,
        value: &T,
    ) -> Result<()> {
        let blob = encode_value(storage, name, value)?;
        let home = self.core.node.owner_of(target)?;
        let req = self.core.node.rma.next_request_num();
        let rx = self.core.node.rma.register_unit(req);
        self.core.networker.send(
            home,
            &Message::PutRequest {
                req,
                target,
                storage: storage.to_string(),
                name: name.to_string(),
                value: blob,
            },
        )?;
        rx.await
            .map_err(|_| TesseraError::ConnectionLost { node: home })?
            .map_err(|e| e.into_error(target))
    }

    /// Compose a remote variable with `value` through the registered
    /// combiner. Serialized per variable on the target node.
    pub async fn accumulate<T: Serialize>(
        &self,
        target: GlobalThreadId,
        storage: &str,
        name: &str,
        fn_id: FnId,
        value: &T,
    ) -> Result<()> {
        let blob = encode_value(storage, name, value)?;
        let home = self.core.node.owner_of(target)?;
        let req = self.core.node.rma.next_request_num();
        let rx = self.core.node.rma.register_unit(req);
        self.core.networker.send(
            home,
            &Message::AccumulateRequest {
                req,
                target,
                storage: storage.to_string(),
                name: name.to_string(),
                fn_id,
                value: blob,
            },
        )?;
        rx.await
            .map_err(|_| TesseraError::ConnectionLost { node: home })?
            .map_err(|e| e.into_error(target))
    }

    /// Run a registered task on the target thread's node and await its
    /// result.
    pub async fn async_at<A: Serialize, R: DeserializeOwned>(
        &self,
        target: GlobalThreadId,
        fn_id: FnId,
        args: &A,
    ) -> Result<R> {
        let args = encode_value("task", "args", args)?;
        let home = self.core.node.owner_of(target)?;
        let req = self.core.node.rma.next_request_num();
        let rx = self.core.node.rma.register_bytes(req);
        self.core.networker.send(
            home,
            &Message::AsyncAtRequest {
                req,
                target,
                fn_id,
                args,
            },
        )?;
        let blob = rx
            .await
            .map_err(|_| TesseraError::ConnectionLost { node: home })?
            .map_err(|e| e.into_error(target))?;
        decode_value("task", "result", &blob)
    }
}

/// A thread's membership in one group; all collectives run through it.
pub struct GroupHandle {
    core: Arc<RuntimeCore>,
    group: Arc<CommonGroup>,
    owner: GlobalThreadId,
    rounds: Arc<Mutex<HashMap<GroupId, u32>>>,
}

impl GroupHandle {
    pub fn id(&self) -> GroupId {
        self.group.group_id()
    }

    pub fn name(&self) -> String {
        self.group.name().to_string()
    }

    /// Number of member threads.
    pub fn size(&self) -> u32 {
        self.group.thread_count() as u32
    }

    /// This thread's id within the group.
    pub fn my_group_id(&self) -> Result<GroupThreadId> {
        self.group.group_thread_id(self.owner)
    }

    pub fn global_id(&self, group_thread: GroupThreadId) -> Result<GlobalThreadId> {
        self.group.global_thread_id(group_thread)
    }

    pub fn group_id_of(&self, global: GlobalThreadId) -> Result<GroupThreadId> {
        self.group.group_thread_id(global)
    }

    /// Suspend until every member thread reached the same barrier.
    pub async fn barrier(&self) -> Result<()> {
        let round = {
            let mut rounds = self.rounds.lock().unwrap();
            let round = rounds.entry(self.group.group_id()).or_insert(0);
            let current = *round;
            *round += 1;
            current
        };
        let rx = dispatch::local_barrier_enter(&self.core, &self.group, round);
        rx.await.map_err(|_| TesseraError::ConnectionLost {
            node: self.core.node.physical_id(),
        })
    }

    /// Put `value` into the named variable of every member thread. The
    /// returned future completes when this node's subtree finished
    /// delivering.
    pub async fn broadcast<T: Serialize>(
        &self,
        storage: &str,
        name: &str,
        value: &T,
    ) -> Result<()> {
        let blob = encode_value(storage, name, value)?;
        let req = self.group.next_request_num();
        let key = (req, self.owner);
        let rx = self.group.broadcast.register(key);
        self.core.networker.send(
            self.group.master(),
            &Message::BroadcastRequest {
                group: self.group.group_id(),
                req,
                requester: self.owner,
                storage: storage.to_string(),
                name: name.to_string(),
                value: blob,
            },
        )?;
        rx.await.map_err(|_| TesseraError::ConnectionLost {
            node: self.group.master(),
        })
    }

    /// Fold the named variable of every member thread with the registered
    /// combiner.
    pub async fn reduce<T: Serialize + DeserializeOwned>(
        &self,
        fn_id: FnId,
        storage: &str,
        name: &str,
    ) -> Result<T> {
        let req = self.group.next_request_num();
        let key = (req, self.owner);
        let rx = self.group.reduce.register(key);
        self.core.networker.send(
            self.group.master(),
            &Message::ReduceRequest {
                group: self.group.group_id(),
                req,
                requester: self.owner,
                storage: storage.to_string(),
                name: name.to_string(),
                fn_id,
            },
        )?;
        let partial = rx
            .await
            .map_err(|_| TesseraError::ConnectionLost {
                node: self.group.master(),
            })?
            .map_err(|e| e.into_error(self.owner))?;
        let blob = partial.ok_or_else(|| TesseraError::UserException {
            thread: self.owner,
            detail: "reduce over an empty group".into(),
        })?;
        decode_value(storage, name, &blob)
    }

    /// Gather the named variable of every member thread, ordered by
    /// ascending group-thread-id.
    pub async fn collect<T: DeserializeOwned>(&self, storage: &str, name: &str) -> Result<Vec<T>> {
        let req = self.group.next_request_num();
        let key = (req, self.owner);
        let rx = self.group.collect.register(key);
        self.core.networker.send(
            self.group.master(),
            &Message::CollectRequest {
                group: self.group.group_id(),
                req,
                requester: self.owner,
                storage: storage.to_string(),
                name: name.to_string(),
            },
        )?;
        let entries = rx
            .await
            .map_err(|_| TesseraError::ConnectionLost {
                node: self.group.master(),
            })?
            .map_err(|e| e.into_error(self.owner))?;
        entries
            .into_iter()
            .map(|(_, blob)| decode_value(storage, name, &blob))
            .collect()
    }
}

fn encode_value<T: Serialize>(storage: &str, name: &str, value: &T) -> Result<Bytes> {
    bincode::serialize(value)
        .map(Bytes::from)
        .map_err(|e| TesseraError::TypeMismatch {
            storage: storage.to_string(),
            name: name.to_string(),
            detail: e.to_string(),
        })
}

fn decode_value<T: DeserializeOwned>(storage: &str, name: &str, blob: &[u8]) -> Result<T> {
    bincode::deserialize(blob).map_err(|e| TesseraError::TypeMismatch {
        storage: storage.to_string(),
        name: name.to_string(),
        detail: e.to_string(),
    })
}
