//! Registered functions: reduce/accumulate combiners and remote task
//! bodies.
//!
//! Closures cannot cross the wire, so the runtime ships a `u16` fn id and
//! every process resolves it against its own registry. SPMD makes the
//! registries identical as long as registration happens before the entry
//! point runs. Handlers operate on serialized bytes; typed wrappers do the
//! bincode work.

use crate::error::{RemoteError, RemoteErrorKind};
use crate::types::FnId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Associative combiner over serialized values: `(accumulated, incoming)`.
pub type Combiner =
    Arc<dyn Fn(&[u8], &[u8]) -> Result<Vec<u8>, RemoteError> + Send + Sync>;

/// Remote task body: serialized arguments in, serialized result out.
pub type TaskHandler =
    Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, RemoteError> + Send + Sync>;

/// Registry mapping fn ids to combiners and task handlers.
pub struct FnRegistry {
    combiners: HashMap<FnId, Combiner>,
    tasks: HashMap<FnId, TaskHandler>,
}

impl FnRegistry {
    pub fn new() -> Self {
        Self {
            combiners: HashMap::new(),
            tasks: HashMap::new(),
        }
    }

    pub fn register_combiner(&mut self, fn_id: FnId, combiner: Combiner) {
        self.combiners.insert(fn_id, combiner);
    }

    /// Register a typed associative combiner for reduce and accumulate.
    pub fn register_combiner_typed<T, F>(&mut self, fn_id: FnId, f: F)
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        self.register_combiner(
            fn_id,
            Arc::new(move |acc, value| {
                let acc: T = decode(acc)?;
                let value: T = decode(value)?;
                encode(&f(acc, value))
            }),
        );
    }

    pub fn register_task(&mut self, fn_id: FnId, task: TaskHandler) {
        self.tasks.insert(fn_id, task);
    }

    /// Register a typed remote task body.
    pub fn register_task_typed<A, R, F>(&mut self, fn_id: FnId, f: F)
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        self.register_task(
            fn_id,
            Arc::new(move |args| {
                let args: A = decode(args)?;
                encode(&f(args))
            }),
        );
    }

    pub fn combiner(&self, fn_id: FnId) -> Result<Combiner, RemoteError> {
        self.combiners.get(&fn_id).cloned().ok_or_else(|| {
            RemoteError::new(RemoteErrorKind::UnknownFunction, fn_id.to_string())
        })
    }

    pub fn task(&self, fn_id: FnId) -> Result<TaskHandler, RemoteError> {
        self.tasks.get(&fn_id).cloned().ok_or_else(|| {
            RemoteError::new(RemoteErrorKind::UnknownFunction, fn_id.to_string())
        })
    }
}

impl Default for FnRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RemoteError> {
    bincode::deserialize(bytes)
        .map_err(|e| RemoteError::new(RemoteErrorKind::TypeMismatch, e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RemoteError> {
    bincode::serialize(value)
        .map_err(|e| RemoteError::new(RemoteErrorKind::TypeMismatch, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_combiner_roundtrips() {
        let mut registry = FnRegistry::new();
        registry.register_combiner_typed::<u64, _>(1, |a, b| a + b);

        let combiner = registry.combiner(1).unwrap();
        let a = bincode::serialize(&3u64).unwrap();
        let b = bincode::serialize(&4u64).unwrap();
        let out = combiner(&a, &b).unwrap();
        assert_eq!(bincode::deserialize::<u64>(&out).unwrap(), 7);
    }

    #[test]
    fn typed_task_roundtrips() {
        let mut registry = FnRegistry::new();
        registry.register_task_typed::<Vec<i32>, i32, _>(2, |v| v.iter().sum());

        let task = registry.task(2).unwrap();
        let args = bincode::serialize(&vec![1, 2, 3]).unwrap();
        let out = task(&args).unwrap();
        assert_eq!(bincode::deserialize::<i32>(&out).unwrap(), 6);
    }

    #[test]
    fn unknown_fn_id_fails() {
        let registry = FnRegistry::new();
        let err = match registry.combiner(9) {
            Ok(_) => panic!("expected unknown fn id to fail"),
            Err(e) => e,
        };
        assert_eq!(err.kind, RemoteErrorKind::UnknownFunction);
        assert_eq!(err.detail, "9");
    }

    #[test]
    fn combiner_type_mismatch_is_reported() {
        let mut registry = FnRegistry::new();
        registry.register_combiner_typed::<String, _>(1, |a, b| a + &b);
        let combiner = registry.combiner(1).unwrap();
        // A bare truncated buffer is not a valid bincode String.
        let err = combiner(&[0xFF], &[0xFF]).unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::TypeMismatch);
    }
}
