//! Framed encoder: every outbound frame funnels through one writer task.
//!
//! Concurrent callers never touch the socket directly. `encode` serializes
//! the frame, enqueues it with a reply channel, and waits for the writer
//! task to report the write result. Queue order is wire order.

use bytes::Bytes;
use parking_lot::Mutex;
use rmpv::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::codec::encode_frame;
use crate::error::FrameError;

type WriteReply = oneshot::Sender<Result<(), FrameError>>;

/// Serializes values as length-prefixed MessagePack frames and writes them
/// through a dedicated writer task.
///
/// Must be created inside a tokio runtime (the writer task is spawned on
/// construction). Closing the encoder terminates the task; writes still
/// queued get [`FrameError::Closed`] through their reply channel.
pub struct FramedEncoder {
    tx: mpsc::Sender<(Bytes, WriteReply)>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl FramedEncoder {
    pub fn new<W>(writer: W, queue_depth: usize) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(write_loop(writer, rx, shutdown_rx));
        Self {
            tx,
            shutdown: Mutex::new(Some(shutdown_tx)),
        }
    }

    /// Encode `value` as one frame and wait until it has been written and
    /// flushed (or the write failed, or the encoder closed).
    pub async fn encode(&self, value: &Value) -> Result<(), FrameError> {
        let frame = encode_frame(value)?;
        self.send_bytes(frame).await
    }

    /// Enqueue already-framed bytes for writing.
    pub async fn send_bytes(&self, frame: Bytes) -> Result<(), FrameError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send((frame, reply_tx)).await.is_err() {
            return Err(FrameError::Closed);
        }
        match reply_rx.await {
            Ok(result) => result,
            // Writer task dropped the reply: it shut down before this write.
            Err(_) => Err(FrameError::Closed),
        }
    }

    /// Terminate the writer task. Idempotent.
    pub fn close(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.lock().is_none()
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<(Bytes, WriteReply)>,
    mut shutdown: oneshot::Receiver<()>,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            next = rx.recv() => {
                let Some((frame, reply)) = next else { break };
                let result = write_frame(&mut writer, &frame).await;
                let failed = result.is_err();
                let _ = reply.send(result.map_err(FrameError::Io));
                if failed {
                    break;
                }
            }
        }
    }
    // Drain the queue so every pending sender learns the encoder is gone
    // (dropping the reply channel surfaces as Closed on their end).
    rx.close();
    while rx.try_recv().is_ok() {}
    let _ = writer.shutdown().await;
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
