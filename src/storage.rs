//! Per-thread named storages holding shared variables.
//!
//! Values are opaque serialized blobs; the typed encode/decode happens at
//! the `ThreadContext` API edge. Puts are last-writer-wins per variable;
//! accumulate runs under the variable's lock so composition is serialized.

use crate::error::{RemoteError, RemoteErrorKind};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::Notify;

type StorageResult<T> = Result<T, RemoteError>;

/// One thread's storage area: storageName -> (variableName -> slot).
pub struct Storage {
    spaces: RwLock<HashMap<String, Space>>,
}

struct Space {
    vars: HashMap<String, Arc<VarSlot>>,
}

struct VarSlot {
    value: Mutex<Bytes>,
    /// Bumped on every put; monitors watch it to detect modification.
    seq: AtomicU64,
    notify: Notify,
}

impl Storage {
    pub fn new() -> Self {
        Self {
            spaces: RwLock::new(HashMap::new()),
        }
    }

    /// Register a variable with its initial value, creating the storage
    /// space on first use. Re-registering resets the value.
    pub fn register(&self, storage: &str, name: &str, initial: Bytes) {
        let mut spaces = self.spaces.write().unwrap();
        let space = spaces.entry(storage.to_string()).or_insert_with(|| Space {
            vars: HashMap::new(),
        });
        match space.vars.get(name) {
            Some(slot) => {
                *slot.value.lock().unwrap() = initial;
            }
            None => {
                space.vars.insert(
                    name.to_string(),
                    Arc::new(VarSlot {
                        value: Mutex::new(initial),
                        seq: AtomicU64::new(0),
                        notify: Notify::new(),
                    }),
                );
            }
        }
    }

    fn slot(&self, storage: &str, name: &str) -> StorageResult<Arc<VarSlot>> {
        let spaces = self.spaces.read().unwrap();
        let space = spaces
            .get(storage)
            .ok_or_else(|| RemoteError::new(RemoteErrorKind::NoSuchStorage, storage))?;
        space.vars.get(name).cloned().ok_or_else(|| {
            RemoteError::new(RemoteErrorKind::NoSuchVariable, format!("{storage}.{name}"))
        })
    }

    pub fn get(&self, storage: &str, name: &str) -> StorageResult<Bytes> {
        let slot = self.slot(storage, name)?;
        let value = slot.value.lock().unwrap().clone();
        Ok(value)
    }

    /// Last-writer-wins put. Wakes every monitor of the variable.
    pub fn put(&self, storage: &str, name: &str, value: Bytes) -> StorageResult<()> {
        let slot = self.slot(storage, name)?;
        *slot.value.lock().unwrap() = value;
        slot.seq.fetch_add(1, Ordering::SeqCst);
        slot.notify.notify_waiters();
        Ok(())
    }

    /// Compose the stored value with `value` under the variable's lock.
    /// Concurrent accumulates to one variable are serialized.
    pub fn accumulate(
        &self,
        storage: &str,
        name: &str,
        value: &[u8],
        combine: impl FnOnce(&[u8], &[u8]) -> StorageResult<Vec<u8>>,
    ) -> StorageResult<()> {
        let slot = self.slot(storage, name)?;
        let mut stored = slot.value.lock().unwrap();
        *stored = Bytes::from(combine(&stored, value)?);
        drop(stored);
        slot.seq.fetch_add(1, Ordering::SeqCst);
        slot.notify.notify_waiters();
        Ok(())
    }

    /// Wait until the variable is put to again.
    pub async fn monitor(&self, storage: &str, name: &str) -> StorageResult<()> {
        let start = self.put_count(storage, name)?;
        self.wait_seq(storage, name, start + 1).await
    }

    /// How many times the variable has been put to since registration.
    pub fn put_count(&self, storage: &str, name: &str) -> StorageResult<u64> {
        Ok(self.slot(storage, name)?.seq.load(Ordering::SeqCst))
    }

    /// Wait until the variable's put count reaches `target`. Returns
    /// immediately if it already has; no wakeup can be missed.
    pub async fn wait_seq(&self, storage: &str, name: &str, target: u64) -> StorageResult<()> {
        let slot = self.slot(storage, name)?;
        loop {
            let notified = slot.notify.notified();
            if slot.seq.load(Ordering::SeqCst) >= target {
                return Ok(());
            }
            notified.await;
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_returns_the_put_value() {
        let storage = Storage::new();
        storage.register("shm", "x", Bytes::new());
        storage.put("shm", "x", Bytes::from_static(&[1, 2])).unwrap();
        assert_eq!(storage.get("shm", "x").unwrap(), Bytes::from_static(&[1, 2]));
    }

    #[test]
    fn unregistered_storage_and_variable_fail() {
        let storage = Storage::new();
        let err = storage.get("shm", "x").unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::NoSuchStorage);

        storage.register("shm", "x", Bytes::new());
        let err = storage.get("shm", "y").unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::NoSuchVariable);
        assert_eq!(err.detail, "shm.y");
    }

    #[test]
    fn accumulate_composes_with_stored_value() {
        let storage = Storage::new();
        storage.register("shm", "sum", Bytes::from_static(&[10]));
        storage
            .accumulate("shm", "sum", &[5], |old, new| Ok(vec![old[0] + new[0]]))
            .unwrap();
        assert_eq!(storage.get("shm", "sum").unwrap(), Bytes::from_static(&[15]));
    }

    #[tokio::test]
    async fn monitor_wakes_on_put() {
        let storage = Arc::new(Storage::new());
        storage.register("shm", "flag", Bytes::new());

        let watcher = {
            let storage = Arc::clone(&storage);
            tokio::spawn(async move { storage.monitor("shm", "flag").await })
        };
        // Give the monitor a chance to register.
        tokio::task::yield_now().await;
        storage.put("shm", "flag", Bytes::from_static(&[1])).unwrap();
        watcher.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn monitor_waits_for_the_next_put() {
        let storage = Storage::new();
        storage.register("shm", "flag", Bytes::new());
        storage.put("shm", "flag", Bytes::from_static(&[1])).unwrap();
        // Seq changed before monitor started: waits for the NEXT put.
        let wait = storage.monitor("shm", "flag");
        tokio::pin!(wait);
        assert!(futures::poll!(&mut wait).is_pending());
        storage.put("shm", "flag", Bytes::from_static(&[2])).unwrap();
        wait.await.unwrap();
    }
}
