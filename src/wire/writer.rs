use crate::wire::OBJECT_FORMAT_BINCODE;
use bytes::{BufMut, Bytes, BytesMut};

/// Typed big-endian writer backing the message codec.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    /// UTF-8, u32 length prefix.
    pub fn write_string(&mut self, s: &str) {
        self.buf.put_u32(s.len() as u32);
        self.buf.put_slice(s.as_bytes());
    }

    /// Opaque blob, u32 length prefix.
    pub fn write_bytes(&mut self, b: &[u8]) {
        self.buf.put_u32(b.len() as u32);
        self.buf.put_slice(b);
    }

    /// Opaque object: 1-byte format tag, then the serialized blob as a
    /// chunked stream. Large values never need a contiguous write.
    pub fn write_object(&mut self, serialized: &[u8], chunk_size: usize) {
        self.buf.put_u8(OBJECT_FORMAT_BINCODE);
        self.write_chunked(serialized, chunk_size);
    }

    /// Chunked stream: `(u32 chunk-length, chunk-bytes)*` ending with a
    /// zero-length terminator.
    pub fn write_chunked(&mut self, payload: &[u8], chunk_size: usize) {
        debug_assert!(chunk_size > 0);
        for chunk in payload.chunks(chunk_size) {
            self.buf.put_u32(chunk.len() as u32);
            self.buf.put_slice(chunk);
        }
        self.buf.put_u32(0);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}
