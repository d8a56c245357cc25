//! Binary wire codec: big-endian typed primitives, length-prefixed strings
//! and blobs, and chunked streams for large payloads.
//!
//! Contract: a writer that writes fields F1..Fn produces a byte stream from
//! which a reader that reads F1..Fn in the same order yields bit-identical
//! values. Truncated streams and unknown tags fail with `MalformedMessage`.

mod reader;
mod writer;

pub use reader::WireReader;
pub use writer::WireWriter;

/// Format tag for opaque objects: bincode-serialized blob.
///
/// Part of the wire format; new formats get new tags, existing tags never
/// change meaning.
pub const OBJECT_FORMAT_BINCODE: u8 = 1;
