//! Message types and the framed codec: `[u32 length][u8 kind][payload]`,
//! all integers big-endian.

pub mod codec;
pub mod message;

pub use codec::{decode_message, encode_message, LENGTH_PREFIX_SIZE};
pub use message::{Message, MessageKind};
