use crate::error::RemoteError;
use crate::types::{GlobalThreadId, RequestNum};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

pub type GatherKey = (RequestNum, GlobalThreadId);

type GatherResult<T> = Result<T, RemoteError>;

/// Shared state table for the value-gathering collectives (reduce and
/// collect). A node's phase holds the partial aggregate of its subtree and
/// a countdown of children still owing values.
///
/// Errors short-circuit: once a subtree reports a failure, the first error
/// is what travels upward.
pub struct GatherStates<T> {
    states: Mutex<HashMap<GatherKey, GatherPhase<T>>>,
    pending: Mutex<HashMap<GatherKey, oneshot::Sender<GatherResult<T>>>>,
}

struct GatherPhase<T> {
    remaining: i64,
    partial: GatherResult<T>,
}

impl<T> GatherStates<T> {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register the requester's completion slot.
    pub fn register(&self, key: GatherKey) -> oneshot::Receiver<GatherResult<T>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(key, tx);
        rx
    }

    /// Start a phase with this node's own contribution. When no children owe
    /// values the phase is already complete and the final aggregate is
    /// returned.
    pub fn init(
        &self,
        key: GatherKey,
        children: usize,
        local: GatherResult<T>,
    ) -> Option<GatherResult<T>> {
        if children == 0 {
            return Some(local);
        }
        self.states.lock().unwrap().insert(
            key,
            GatherPhase {
                remaining: children as i64,
                partial: local,
            },
        );
        None
    }

    /// Merge a child's subtree value. Returns the final aggregate once every
    /// child reported; the state is removed.
    pub fn merge(
        &self,
        key: GatherKey,
        incoming: GatherResult<T>,
        combine: impl FnOnce(T, T) -> GatherResult<T>,
    ) -> Option<GatherResult<T>> {
        let mut states = self.states.lock().unwrap();
        let Some(phase) = states.get_mut(&key) else {
            tracing::warn!(?key, "gather value for unknown request");
            return None;
        };
        phase.remaining -= 1;

        let partial = std::mem::replace(&mut phase.partial, Err(poisoned()));
        phase.partial = match (partial, incoming) {
            (Ok(acc), Ok(value)) => combine(acc, value),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };

        if phase.remaining == 0 {
            let phase = states.remove(&key).expect("phase present");
            Some(phase.partial)
        } else {
            None
        }
    }

    pub fn take_waiter(&self, key: GatherKey) -> Option<oneshot::Sender<GatherResult<T>>> {
        self.pending.lock().unwrap().remove(&key)
    }

    pub fn drop_pending(&self) {
        self.states.lock().unwrap().clear();
        self.pending.lock().unwrap().clear();
    }
}

impl<T> Default for GatherStates<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> RemoteError {
    RemoteError::new(
        crate::error::RemoteErrorKind::UserException,
        "partial aggregate poisoned",
    )
}
