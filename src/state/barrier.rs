use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Per-group barrier rounds.
///
/// A round's countdown starts at (#children + #local group threads) and is
/// decremented once per local entry and once per child `BarrierGo`. SPMD
/// program order makes the n-th barrier call on a group share round n on
/// every thread.
pub struct BarrierStates {
    rounds: Mutex<HashMap<u32, BarrierRound>>,
}

struct BarrierRound {
    remaining: i64,
    waiters: Vec<oneshot::Sender<()>>,
}

impl BarrierStates {
    pub fn new() -> Self {
        Self {
            rounds: Mutex::new(HashMap::new()),
        }
    }

    /// A local thread entered the barrier. Returns its completion slot and
    /// whether the round's countdown reached zero.
    pub fn enter(&self, round: u32, expected: i64) -> (oneshot::Receiver<()>, bool) {
        let (tx, rx) = oneshot::channel();
        let mut rounds = self.rounds.lock().unwrap();
        let state = rounds.entry(round).or_insert_with(|| BarrierRound {
            remaining: expected,
            waiters: Vec::new(),
        });
        state.waiters.push(tx);
        state.remaining -= 1;
        let zero = state.remaining == 0;
        (rx, zero)
    }

    /// A child subtree finished the round. Returns whether the countdown
    /// reached zero.
    pub fn child_arrived(&self, round: u32, expected: i64) -> bool {
        let mut rounds = self.rounds.lock().unwrap();
        let state = rounds.entry(round).or_insert_with(|| BarrierRound {
            remaining: expected,
            waiters: Vec::new(),
        });
        state.remaining -= 1;
        state.remaining == 0
    }

    /// Remove the round and return the waiters to signal.
    pub fn release(&self, round: u32) -> Vec<oneshot::Sender<()>> {
        self.rounds
            .lock()
            .unwrap()
            .remove(&round)
            .map(|s| s.waiters)
            .unwrap_or_default()
    }

    pub fn drop_pending(&self) {
        self.rounds.lock().unwrap().clear();
    }
}

impl Default for BarrierStates {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_reaches_zero_once() {
        let states = BarrierStates::new();
        // 2 local threads + 1 child.
        let (_rx1, zero) = states.enter(0, 3);
        assert!(!zero);
        assert!(!states.child_arrived(0, 3));
        let (_rx2, zero) = states.enter(0, 3);
        assert!(zero);
        assert_eq!(states.release(0).len(), 2);
        // Removed: releasing again yields nothing.
        assert!(states.release(0).is_empty());
    }

    #[test]
    fn rounds_are_independent() {
        let states = BarrierStates::new();
        let (_a, zero_a) = states.enter(0, 1);
        let (_b, zero_b) = states.enter(1, 1);
        assert!(zero_a && zero_b);
    }

    #[tokio::test]
    async fn dropped_waiter_resolves_with_error() {
        let states = BarrierStates::new();
        let (rx, _) = states.enter(0, 2);
        states.drop_pending();
        assert!(rx.await.is_err());
    }
}
