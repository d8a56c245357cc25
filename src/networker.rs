//! Outbound routing and the inbound queue.
//!
//! `send` serializes once and routes: self-sends short-circuit through the
//! loopback path straight onto the inbound queue (skipping the socket but
//! still exercising the decode path), everything else goes to the peer's
//! writer task. Inbound frames are consumed by the runtime's dispatch loop.

use crate::config::TesseraConfig;
use crate::error::{Result, TesseraError};
use crate::protocol::{encode_message, Message, LENGTH_PREFIX_SIZE};
use crate::transport::PeerChannel;
use crate::types::PhysicalId;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tokio::sync::mpsc;

/// What the read loops and writer tasks report to the dispatch loop.
#[derive(Debug)]
pub enum Inbound {
    /// A complete frame body (`[u8 kind][payload]`) from `source`.
    Frame { source: PhysicalId, body: Bytes },
    /// The link to `source` is gone.
    PeerClosed { source: PhysicalId },
}

pub struct Networker {
    config: Arc<TesseraConfig>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    peers: RwLock<HashMap<PhysicalId, PeerChannel>>,
    self_id: OnceLock<PhysicalId>,
}

impl Networker {
    pub fn new(config: Arc<TesseraConfig>) -> (Arc<Self>, mpsc::UnboundedReceiver<Inbound>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                config,
                inbound_tx,
                peers: RwLock::new(HashMap::new()),
                self_id: OnceLock::new(),
            }),
            inbound_rx,
        )
    }

    pub fn set_self(&self, id: PhysicalId) {
        self.self_id.set(id).expect("self id assigned twice");
    }

    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<Inbound> {
        self.inbound_tx.clone()
    }

    pub fn add_peer(&self, peer: PhysicalId, channel: PeerChannel) {
        let previous = self.peers.write().unwrap().insert(peer, channel);
        debug_assert!(previous.is_none(), "duplicate channel for node {peer}");
    }

    pub fn has_peer(&self, peer: PhysicalId) -> bool {
        self.peers.read().unwrap().contains_key(&peer)
    }

    /// Serialize and deliver a message to `target`.
    pub fn send(&self, target: PhysicalId, msg: &Message) -> Result<()> {
        let frame = encode_message(msg, self.config.chunk_size);

        if Some(&target) == self.self_id.get() {
            tracing::trace!(kind = ?msg.kind(), "loopback");
            self.inbound_tx
                .send(Inbound::Frame {
                    source: target,
                    body: frame.slice(LENGTH_PREFIX_SIZE..),
                })
                .map_err(|_| TesseraError::ConnectionLost { node: target })?;
            return Ok(());
        }

        let peers = self.peers.read().unwrap();
        let channel = peers
            .get(&target)
            .ok_or(TesseraError::ConnectionLost { node: target })?;
        tracing::trace!(kind = ?msg.kind(), target, "send");
        channel.send_frame(frame)
    }

    pub fn self_or_unknown(&self) -> PhysicalId {
        self.self_id.get().copied().unwrap_or(0)
    }

    /// Physical ids of peers whose writer task has died.
    pub fn dead_peers(&self) -> Vec<PhysicalId> {
        self.peers
            .read()
            .unwrap()
            .iter()
            .filter(|(_, ch)| ch.is_closed())
            .map(|(&pid, _)| pid)
            .collect()
    }
}
