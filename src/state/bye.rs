use std::sync::atomic::{AtomicI64, Ordering};

/// Shutdown countdown: #children in the global tree, plus one for the local
/// user program. Armed once at bootstrap, decremented by local completion
/// and by each child `Bye`.
pub struct ByeState {
    remaining: AtomicI64,
}

impl ByeState {
    pub fn new() -> Self {
        Self {
            remaining: AtomicI64::new(i64::MAX),
        }
    }

    pub fn arm(&self, children: usize) {
        self.remaining.store(children as i64 + 1, Ordering::SeqCst);
    }

    /// Returns true when the countdown reached zero.
    pub fn node_processed(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::SeqCst) == 1
    }
}

impl Default for ByeState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_children_plus_local() {
        let state = ByeState::new();
        state.arm(2);
        assert!(!state.node_processed());
        assert!(!state.node_processed());
        assert!(state.node_processed());
    }

    #[test]
    fn leaf_completes_on_local_done() {
        let state = ByeState::new();
        state.arm(0);
        assert!(state.node_processed());
    }
}
