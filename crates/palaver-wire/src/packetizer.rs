//! Frame reader: pulls one length-prefixed frame at a time off the stream.
//!
//! A frame is `<mp-int length> <mp-fixarray body>`. The packetizer reads the
//! length marker-first (so it never consumes bytes past the current frame),
//! reads exactly that many body bytes into a pooled decoder, and validates
//! the fixarray header. Framing violations consume the offending frame and
//! surface as recoverable [`FrameError::Packetizer`] errors; I/O failures
//! and mid-frame EOF are terminal.

use std::sync::Arc;

use rmp::Marker;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{DecoderPool, PooledDecoder};
use crate::error::FrameError;

pub struct Packetizer<R> {
    reader: R,
    decoders: Arc<DecoderPool>,
    max_frame_length: usize,
}

impl<R> Packetizer<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, decoders: Arc<DecoderPool>, max_frame_length: usize) -> Self {
        Self {
            reader,
            decoders,
            max_frame_length,
        }
    }

    /// Read the next frame and hand back its field count together with a
    /// decoder positioned at the first field.
    pub async fn next_frame(&mut self) -> Result<(usize, PooledDecoder), FrameError> {
        let len = self.read_length().await?;
        if len == 0 {
            return Err(FrameError::Packetizer(format!("invalid frame size: {len}")));
        }
        if len > self.max_frame_length {
            // Stay in sync: the oversized frame is consumed before erroring.
            self.discard(len).await?;
            return Err(FrameError::Packetizer(format!(
                "frame of {len} bytes exceeds limit of {}",
                self.max_frame_length
            )));
        }

        let mut dec = self.decoders.acquire();
        self.reader.read_exact(dec.begin_frame(len)).await?;

        // The body must open with a fixarray header, giving the field count
        // directly so fields can be decoded in place without copying.
        let first = dec
            .first_byte()
            .ok_or_else(|| FrameError::Packetizer("empty frame".to_string()))?;
        if !(0x91..=0x9f).contains(&first) {
            return Err(FrameError::Packetizer(format!(
                "wrong message structure prefix ({first})"
            )));
        }
        dec.skip(1);
        Ok(((first - 0x90) as usize, dec))
    }

    /// Read the frame length: one marker byte, then the payload bytes that
    /// marker calls for. Never reads past the integer.
    async fn read_length(&mut self) -> Result<usize, FrameError> {
        let marker_byte = self.reader.read_u8().await?;
        let len: i64 = match Marker::from_u8(marker_byte) {
            Marker::FixPos(n) => i64::from(n),
            Marker::U8 => i64::from(self.reader.read_u8().await?),
            Marker::U16 => i64::from(self.reader.read_u16().await?),
            Marker::U32 => i64::from(self.reader.read_u32().await?),
            Marker::U64 => {
                let v = self.reader.read_u64().await?;
                i64::try_from(v).map_err(|_| {
                    FrameError::Packetizer(format!("frame length {v} out of range"))
                })?
            }
            Marker::I8 => i64::from(self.reader.read_i8().await?),
            Marker::I16 => i64::from(self.reader.read_i16().await?),
            Marker::I32 => i64::from(self.reader.read_i32().await?),
            Marker::I64 => self.reader.read_i64().await?,
            _ => {
                return Err(FrameError::Packetizer(format!(
                    "invalid frame length marker (0x{marker_byte:02x})"
                )))
            }
        };
        usize::try_from(len)
            .map_err(|_| FrameError::Packetizer(format!("invalid frame size: {len}")))
    }

    async fn discard(&mut self, mut remaining: usize) -> Result<(), FrameError> {
        let mut scratch = [0u8; 4096];
        while remaining > 0 {
            let take = remaining.min(scratch.len());
            self.reader.read_exact(&mut scratch[..take]).await?;
            remaining -= take;
        }
        Ok(())
    }
}
