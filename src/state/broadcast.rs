use crate::types::{GlobalThreadId, RequestNum};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Key of an in-flight broadcast: request number plus originating thread.
pub type BroadcastKey = (RequestNum, GlobalThreadId);

/// Per-group broadcast subtrees.
///
/// A node's countdown starts at (#children + 1): one slot per child
/// acknowledgement and one for the node's own local delivery. The requester
/// registers a completion slot that fires when its own node's subtree is
/// done.
pub struct BroadcastStates {
    remaining: Mutex<HashMap<BroadcastKey, i64>>,
    pending: Mutex<HashMap<BroadcastKey, oneshot::Sender<()>>>,
}

impl BroadcastStates {
    pub fn new() -> Self {
        Self {
            remaining: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register the requester's completion slot.
    pub fn register(&self, key: BroadcastKey) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(key, tx);
        rx
    }

    /// One unit of the subtree finished (local delivery or a child ack).
    /// Returns true when the countdown reached zero; the state is removed.
    pub fn complete_one(&self, key: BroadcastKey, expected: i64) -> bool {
        let mut remaining = self.remaining.lock().unwrap();
        let left = remaining.entry(key).or_insert(expected);
        *left -= 1;
        if *left == 0 {
            remaining.remove(&key);
            true
        } else {
            false
        }
    }

    /// Take the requester's completion slot, if this node hosts it.
    pub fn take_waiter(&self, key: BroadcastKey) -> Option<oneshot::Sender<()>> {
        self.pending.lock().unwrap().remove(&key)
    }

    pub fn drop_pending(&self) {
        self.remaining.lock().unwrap().clear();
        self.pending.lock().unwrap().clear();
    }
}

impl Default for BroadcastStates {
    fn default() -> Self {
        Self::new()
    }
}
