//! MessagePack value codec and the bounded decoder pool.
//!
//! Frames are decoded field by field out of a [`FrameDecoder`] bound to one
//! frame's bytes. Decoders are pooled and reused: parsing a message touches
//! the decoder once per field, and recycling the backing buffer keeps the
//! hot path free of per-frame allocation.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rmpv::Value;

use crate::error::FrameError;

/// Default number of pooled frame decoders.
pub const DECODER_POOL_SIZE: usize = 10;

/// Encode a value as one wire frame: the MessagePack encoding of the body
/// length followed by the body itself.
pub fn encode_frame(value: &Value) -> Result<Bytes, FrameError> {
    let mut body = Vec::new();
    rmpv::encode::write_value(&mut body, value)
        .map_err(|e| FrameError::Encode(e.to_string()))?;

    let mut frame = Vec::with_capacity(body.len() + 5);
    rmp::encode::write_uint(&mut frame, body.len() as u64)
        .map_err(|e| FrameError::Encode(e.to_string()))?;
    frame.extend_from_slice(&body);
    Ok(Bytes::from(frame))
}

/// A sequential decoder bound to the bytes of a single frame.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    pos: usize,
}

impl FrameDecoder {
    fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Reset for a fresh frame of `len` bytes and expose the buffer for the
    /// packetizer to fill.
    pub(crate) fn begin_frame(&mut self, len: usize) -> &mut [u8] {
        self.buf.clear();
        self.buf.resize(len, 0);
        self.pos = 0;
        &mut self.buf
    }

    /// Skip `n` bytes of the frame (the array header, already inspected).
    pub(crate) fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.buf.len());
    }

    pub(crate) fn first_byte(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    /// Decode the next field as a dynamic MessagePack value.
    pub fn decode_value(&mut self) -> Result<Value, FrameError> {
        let mut slice = &self.buf[self.pos..];
        let before = slice.len();
        let value =
            rmpv::decode::read_value(&mut slice).map_err(|e| FrameError::Decode(e.to_string()))?;
        self.pos += before - slice.len();
        Ok(value)
    }

    /// Decode the next field as a signed integer.
    pub fn decode_int(&mut self) -> Result<i64, FrameError> {
        match self.decode_value()? {
            Value::Integer(n) => n
                .as_i64()
                .ok_or_else(|| FrameError::Decode("integer out of range".to_string())),
            other => Err(FrameError::Decode(format!(
                "expected integer, got {other}"
            ))),
        }
    }

    /// Decode the next field as a UTF-8 string.
    pub fn decode_str(&mut self) -> Result<String, FrameError> {
        match self.decode_value()? {
            Value::String(s) => s
                .into_str()
                .ok_or_else(|| FrameError::Decode("string is not valid UTF-8".to_string())),
            other => Err(FrameError::Decode(format!("expected string, got {other}"))),
        }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// A bounded pool of reusable frame decoders.
///
/// Acquisition pops a decoder (or allocates if the pool has been drained)
/// and resets it; releasing returns it unless the pool is already full, so
/// retained buffers stay bounded no matter how large a burst was.
#[derive(Debug)]
pub struct DecoderPool {
    pool: Mutex<Vec<FrameDecoder>>,
    capacity: usize,
}

impl DecoderPool {
    pub fn new(capacity: usize) -> Self {
        let mut pool = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            pool.push(FrameDecoder::new());
        }
        Self {
            pool: Mutex::new(pool),
            capacity,
        }
    }

    pub(crate) fn acquire(self: &Arc<Self>) -> PooledDecoder {
        let dec = self.pool.lock().pop().unwrap_or_else(FrameDecoder::new);
        PooledDecoder {
            dec: Some(dec),
            pool: Arc::clone(self),
        }
    }

    fn release(&self, dec: FrameDecoder) {
        let mut pool = self.pool.lock();
        if pool.len() < self.capacity {
            pool.push(dec);
        }
    }

    #[cfg(test)]
    fn available(&self) -> usize {
        self.pool.lock().len()
    }
}

impl Default for DecoderPool {
    fn default() -> Self {
        Self::new(DECODER_POOL_SIZE)
    }
}

/// A pooled [`FrameDecoder`], returned to its pool on drop.
#[derive(Debug)]
pub struct PooledDecoder {
    dec: Option<FrameDecoder>,
    pool: Arc<DecoderPool>,
}

impl std::ops::Deref for PooledDecoder {
    type Target = FrameDecoder;

    fn deref(&self) -> &FrameDecoder {
        self.dec.as_ref().expect("decoder present until drop")
    }
}

impl std::ops::DerefMut for PooledDecoder {
    fn deref_mut(&mut self) -> &mut FrameDecoder {
        self.dec.as_mut().expect("decoder present until drop")
    }
}

impl Drop for PooledDecoder {
    fn drop(&mut self) {
        if let Some(dec) = self.dec.take() {
            self.pool.release(dec);
        }
    }
}
