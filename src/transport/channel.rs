use crate::error::{Result, TesseraError};
use crate::networker::Inbound;
use crate::protocol::LENGTH_PREFIX_SIZE;
use crate::types::PhysicalId;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

/// Send side of one peer link.
///
/// Frames pushed here are written to the socket by a dedicated writer task
/// in push order, which is what gives the per-socket FIFO delivery
/// guarantee. The queue is unbounded; the request/reply discipline of the
/// collectives bounds it in practice.
pub struct PeerChannel {
    peer: PhysicalId,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl PeerChannel {
    /// Spawn the writer task for an established connection.
    pub fn start_writer(
        peer: PhysicalId,
        mut write: OwnedWriteHalf,
        inbound: mpsc::UnboundedSender<Inbound>,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = write.write_all(&frame).await {
                    tracing::warn!(peer, error = %e, "write failed, closing channel");
                    let _ = inbound.send(Inbound::PeerClosed { source: peer });
                    return;
                }
            }
        });
        Self { peer, tx }
    }

    /// Enqueue a complete frame (length prefix included).
    pub fn send_frame(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| TesseraError::ConnectionLost { node: self.peer })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Largest frame accepted from a peer (1 GiB). A length prefix beyond this
/// is treated as a corrupted stream rather than an allocation request.
const MAX_FRAME_SIZE: usize = 1 << 30;

/// Read one frame body (`[u8 kind][payload]`, prefix stripped).
///
/// Used directly during connection identification; the standing per-peer
/// loop is [`spawn_read_loop`].
pub async fn read_frame(read: &mut OwnedReadHalf) -> Result<Bytes> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    read.read_exact(&mut prefix).await?;
    let len = u32::from_be_bytes(prefix) as usize;
    if len == 0 {
        return Err(TesseraError::MalformedMessage("zero-length frame".into()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(TesseraError::MalformedMessage(format!(
            "frame length {len} exceeds the {MAX_FRAME_SIZE}-byte limit"
        )));
    }
    let mut body = vec![0u8; len];
    read.read_exact(&mut body).await?;
    Ok(Bytes::from(body))
}

/// Spawn the standing read loop for an identified peer. Every frame goes to
/// the networker's inbound queue; any I/O error or EOF reports the peer as
/// closed and ends the loop.
pub fn spawn_read_loop(
    mut read: OwnedReadHalf,
    source: PhysicalId,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    tokio::spawn(async move {
        loop {
            match read_frame(&mut read).await {
                Ok(body) => {
                    if inbound.send(Inbound::Frame { source, body }).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(source, error = %e, "read loop ended");
                    let _ = inbound.send(Inbound::PeerClosed { source });
                    return;
                }
            }
        }
    });
}
