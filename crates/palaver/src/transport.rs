//! The transport orchestrator: one of these per connection.
//!
//! Owns every component wired around the stream - framed encoder (with its
//! writer task), packetizer, protocol registry, call container, dispatcher
//! and receiver - and is the only closer of any of them. `run` drives the
//! read loop; recoverable per-message errors are logged and absorbed,
//! anything else tears the connection down in a fixed order.

use std::sync::Arc;

use palaver_wire::{DecoderPool, FramedEncoder, Packetizer};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::call::CallContainer;
use crate::cancel::CancelToken;
use crate::dispatch::Dispatcher;
use crate::error::RpcError;
use crate::log::{LogFactory, LogInterface, TracingLog};
use crate::message::Message;
use crate::protocol::{Protocol, ProtocolRegistry, WrapErrorFn};
use crate::receiver::Receiver;

/// Tunables for one transport. The frame-length cap bounds memory per
/// malformed peer; the rest trades allocation churn for retained buffers.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Reusable frame decoders retained between messages.
    pub decoder_pool_size: usize,
    /// Depth of the writer task's frame queue.
    pub write_queue_depth: usize,
    /// Frames above this many bytes are discarded as packetizer errors.
    pub max_frame_length: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            decoder_pool_size: palaver_wire::DECODER_POOL_SIZE,
            write_queue_depth: 64,
            max_frame_length: 16 * 1024 * 1024,
        }
    }
}

type FrameReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

pub struct Transport {
    dispatcher: Arc<Dispatcher>,
    receiver: Arc<Receiver>,
    protocols: Arc<ProtocolRegistry>,
    calls: Arc<CallContainer>,
    writer: Arc<FramedEncoder>,
    reader: Mutex<Option<Packetizer<FrameReader>>>,
    stop: CancelToken,
    listeners: Mutex<Vec<mpsc::UnboundedSender<RpcError>>>,
    log: Arc<dyn LogInterface>,
}

impl Transport {
    /// Wrap a connection. Must be called inside a tokio runtime: the writer
    /// task and the receiver's task loop are spawned here.
    pub fn new<S>(
        stream: S,
        log_factory: Option<&dyn LogFactory>,
        wrap_error: Option<WrapErrorFn>,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_options(stream, log_factory, wrap_error, TransportOptions::default())
    }

    pub fn with_options<S>(
        stream: S,
        log_factory: Option<&dyn LogFactory>,
        wrap_error: Option<WrapErrorFn>,
        options: TransportOptions,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let log: Arc<dyn LogInterface> = match log_factory {
            Some(factory) => factory.new_log(),
            None => Arc::new(TracingLog),
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let writer = Arc::new(FramedEncoder::new(write_half, options.write_queue_depth));

        let reader: FrameReader = BufReader::new(Box::new(read_half));
        let packetizer = Packetizer::new(
            reader,
            Arc::new(DecoderPool::new(options.decoder_pool_size)),
            options.max_frame_length,
        );

        let calls = Arc::new(CallContainer::new());
        let protocols = Arc::new(ProtocolRegistry::new(wrap_error));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&writer),
            Arc::clone(&calls),
            Arc::clone(&log),
        ));
        let receiver = Arc::new(Receiver::new(
            Arc::clone(&writer),
            Arc::clone(&protocols),
            Arc::clone(&log),
        ));

        Arc::new(Self {
            dispatcher,
            receiver,
            protocols,
            calls,
            writer,
            reader: Mutex::new(Some(packetizer)),
            stop: CancelToken::new(),
            listeners: Mutex::new(Vec::new()),
            log,
        })
    }

    /// Drive the read loop until the connection dies. Returns `Ok(())` on a
    /// clean EOF. Calling `run` again after the loop was claimed is a no-op.
    pub async fn run(&self) -> Result<(), RpcError> {
        let Some(mut packetizer) = self.reader.lock().take() else {
            return Ok(());
        };
        if self.stop.is_cancelled() {
            return Err(RpcError::Eof);
        }

        self.log.transport_start();
        let err = self.read_loop(&mut packetizer).await;
        self.shutdown(&err);
        match err {
            RpcError::Eof => Ok(()),
            err => Err(err),
        }
    }

    /// Spawn `run` on the runtime.
    pub fn run_async(self: &Arc<Self>) -> JoinHandle<Result<(), RpcError>> {
        let transport = Arc::clone(self);
        tokio::spawn(async move { transport.run().await })
    }

    async fn read_loop(&self, packetizer: &mut Packetizer<FrameReader>) -> RpcError {
        loop {
            let frame = tokio::select! {
                frame = packetizer.next_frame() => frame,
                _ = self.stop.cancelled() => return RpcError::Eof,
            };

            let err = match frame {
                Ok((nfields, mut dec)) => {
                    match Message::decode(nfields, &mut dec, &self.calls) {
                        Ok(msg) => match self.receiver.receive(msg).await {
                            Ok(()) => continue,
                            Err(e) => e,
                        },
                        Err(e) => e,
                    }
                }
                Err(e) => RpcError::from(e),
            };

            if !err.can_recover() {
                return err;
            }
            match &err {
                RpcError::CallNotFound { seqid } => self.log.unexpected_reply(*seqid),
                _ => self.log.warning(&format!("recoverable error: {err}")),
            }
        }
    }

    fn shutdown(&self, err: &RpcError) {
        self.stop.cancel();
        // Closing order matters: unblock callers, fail what they were
        // waiting on, stop serving, then tear down the writer.
        self.dispatcher.close();
        self.calls.cleanup_all();
        self.receiver.close();
        self.writer.close();
        self.log.transport_error(err);

        let listeners = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners {
            let _ = listener.send(err.clone());
        }
    }

    /// Ask the read loop to stop; the regular shutdown path follows.
    pub fn close(&self) {
        self.stop.cancel();
    }

    pub fn is_connected(&self) -> bool {
        !self.stop.is_cancelled()
    }

    /// Register a protocol to serve on this connection.
    pub fn register_protocol(&self, protocol: Protocol) -> Result<(), RpcError> {
        self.protocols.register(protocol)
    }

    /// The terminating error is sent here (non-blocking) when the transport
    /// shuts down. Listeners registered after shutdown hear nothing.
    pub fn add_close_listener(&self, listener: mpsc::UnboundedSender<RpcError>) {
        self.listeners.lock().push(listener);
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn receiver(&self) -> &Arc<Receiver> {
        &self.receiver
    }
}
