use crate::types::{GlobalThreadId, RequestNum};
use std::collections::HashMap;
use std::sync::Mutex;

pub type JoinKey = (RequestNum, GlobalThreadId);

/// Master-side bookkeeping for group joins: how many member nodes still owe
/// a `GroupJoinConfirm` before the joiner may be answered.
pub struct JoinStates {
    confirms: Mutex<HashMap<JoinKey, i64>>,
}

impl JoinStates {
    pub fn new() -> Self {
        Self {
            confirms: Mutex::new(HashMap::new()),
        }
    }

    pub fn init(&self, key: JoinKey, expected: usize) {
        self.confirms.lock().unwrap().insert(key, expected as i64);
    }

    /// A member node confirmed. Returns true when all confirms arrived; the
    /// state is removed.
    pub fn confirmed(&self, key: JoinKey) -> bool {
        let mut confirms = self.confirms.lock().unwrap();
        let Some(left) = confirms.get_mut(&key) else {
            tracing::warn!(?key, "confirm for unknown join request");
            return false;
        };
        *left -= 1;
        if *left == 0 {
            confirms.remove(&key);
            true
        } else {
            false
        }
    }

    pub fn drop_pending(&self) {
        self.confirms.lock().unwrap().clear();
    }
}

impl Default for JoinStates {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completes_after_all_confirms() {
        let states = JoinStates::new();
        states.init((1, 5), 3);
        assert!(!states.confirmed((1, 5)));
        assert!(!states.confirmed((1, 5)));
        assert!(states.confirmed((1, 5)));
        // Removed.
        assert!(!states.confirmed((1, 5)));
    }
}
