use crate::error::{Result, TesseraError};
use crate::wire::OBJECT_FORMAT_BINCODE;
use bytes::{Buf, Bytes, BytesMut};

/// Typed big-endian reader, symmetric to [`WireWriter`](crate::wire::WireWriter).
///
/// Every read checks the remaining length first; a short stream fails with
/// `MalformedMessage` instead of panicking.
#[derive(Debug)]
pub struct WireReader {
    buf: Bytes,
}

impl WireReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, what: &'static str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(TesseraError::MalformedMessage(format!(
                "truncated stream: need {n} bytes for {what}, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.need(2, "u16")?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.need(8, "i64")?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.need(8, "f64")?;
        Ok(self.buf.get_f64())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| TesseraError::MalformedMessage(format!("invalid UTF-8 string: {e}")))
    }

    pub fn read_bytes(&mut self) -> Result<Bytes> {
        let len = self.read_u32()? as usize;
        self.need(len, "length-prefixed blob")?;
        Ok(self.buf.split_to(len))
    }

    /// Opaque object written by `write_object`. Fails on unknown format tags.
    pub fn read_object(&mut self) -> Result<Bytes> {
        let tag = self.read_u8()?;
        if tag != OBJECT_FORMAT_BINCODE {
            return Err(TesseraError::MalformedMessage(format!(
                "unknown object format tag: {tag:#04x}"
            )));
        }
        self.read_chunked()
    }

    /// Concatenate a chunked stream back into one contiguous payload.
    pub fn read_chunked(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        loop {
            let len = self.read_u32()? as usize;
            if len == 0 {
                return Ok(out.freeze());
            }
            self.need(len, "chunk body")?;
            out.extend_from_slice(&self.buf.split_to(len));
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }
}
