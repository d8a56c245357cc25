//! TCP transport: listener, per-peer framed channels with FIFO writer
//! tasks, and the standing read loops feeding the networker.

mod channel;
mod listener;

pub use channel::{read_frame, spawn_read_loop, PeerChannel};
pub use listener::Listener;
