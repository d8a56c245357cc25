use crate::error::RemoteError;
use crate::types::{GroupId, GroupThreadId, RequestNum};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

type Reply<T> = oneshot::Sender<Result<T, RemoteError>>;

/// Requester-side tables for the point-to-point request/reply operations:
/// get and async-at (byte replies), put and accumulate (unit replies), and
/// group join (id-pair replies).
///
/// One counter serves all kinds, so a request number is unique per node
/// regardless of the reply table it lives in.
pub struct RmaStates {
    counter: AtomicU32,
    bytes: Mutex<HashMap<RequestNum, Reply<Bytes>>>,
    unit: Mutex<HashMap<RequestNum, Reply<()>>>,
    join: Mutex<HashMap<RequestNum, Reply<(GroupId, GroupThreadId)>>>,
}

impl RmaStates {
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
            bytes: Mutex::new(HashMap::new()),
            unit: Mutex::new(HashMap::new()),
            join: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_request_num(&self) -> RequestNum {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn register_bytes(&self, req: RequestNum) -> oneshot::Receiver<Result<Bytes, RemoteError>> {
        let (tx, rx) = oneshot::channel();
        self.bytes.lock().unwrap().insert(req, tx);
        rx
    }

    pub fn complete_bytes(&self, req: RequestNum, result: Result<Bytes, RemoteError>) {
        if let Some(tx) = self.bytes.lock().unwrap().remove(&req) {
            let _ = tx.send(result);
        } else {
            tracing::warn!(req, "byte reply for unknown request");
        }
    }

    pub fn register_unit(&self, req: RequestNum) -> oneshot::Receiver<Result<(), RemoteError>> {
        let (tx, rx) = oneshot::channel();
        self.unit.lock().unwrap().insert(req, tx);
        rx
    }

    pub fn complete_unit(&self, req: RequestNum, result: Result<(), RemoteError>) {
        if let Some(tx) = self.unit.lock().unwrap().remove(&req) {
            let _ = tx.send(result);
        } else {
            tracing::warn!(req, "unit reply for unknown request");
        }
    }

    pub fn register_join(
        &self,
        req: RequestNum,
    ) -> oneshot::Receiver<Result<(GroupId, GroupThreadId), RemoteError>> {
        let (tx, rx) = oneshot::channel();
        self.join.lock().unwrap().insert(req, tx);
        rx
    }

    pub fn complete_join(
        &self,
        req: RequestNum,
        result: Result<(GroupId, GroupThreadId), RemoteError>,
    ) {
        if let Some(tx) = self.join.lock().unwrap().remove(&req) {
            let _ = tx.send(result);
        } else {
            tracing::warn!(req, "join reply for unknown request");
        }
    }

    /// Drain every pending reply slot. Dropping the senders resolves the
    /// matching futures with `ConnectionLost` at the waiters.
    pub fn drop_pending(&self) {
        self.bytes.lock().unwrap().clear();
        self.unit.lock().unwrap().clear();
        self.join.lock().unwrap().clear();
    }
}

impl Default for RmaStates {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_numbers_are_strictly_increasing() {
        let states = RmaStates::new();
        let mut last = 0;
        for _ in 0..100 {
            let req = states.next_request_num();
            assert!(req > last);
            last = req;
        }
    }

    #[tokio::test]
    async fn reply_completes_the_future() {
        let states = RmaStates::new();
        let req = states.next_request_num();
        let rx = states.register_bytes(req);
        states.complete_bytes(req, Ok(Bytes::from_static(b"v")));
        assert_eq!(rx.await.unwrap().unwrap(), Bytes::from_static(b"v"));
    }

    #[tokio::test]
    async fn dropped_pending_resolves_with_error() {
        let states = RmaStates::new();
        let req = states.next_request_num();
        let rx = states.register_unit(req);
        states.drop_pending();
        assert!(rx.await.is_err());
    }
}
