//! Outbound dispatch: the client half of the engine.
//!
//! `call` allocates a seqid, registers the call, and only then releases the
//! request frame to the writer - so a reply can never race past its own
//! registration. The waiter then resolves to whichever fires first: the
//! response, the caller's cancellation, or dispatcher shutdown. The call's
//! single-shot finish arbitrates; the losing path backs off.

use std::sync::Arc;

use palaver_wire::{FramedEncoder, SeqId};
use rmpv::Value;

use crate::call::CallContainer;
use crate::cancel::CancelToken;
use crate::error::RpcError;
use crate::log::LogInterface;
use crate::message::{call_frame, cancel_frame, notify_frame};
use crate::protocol::ErrorUnwrapper;

pub struct Dispatcher {
    writer: Arc<FramedEncoder>,
    calls: Arc<CallContainer>,
    stop: CancelToken,
    log: Arc<dyn LogInterface>,
}

impl Dispatcher {
    pub(crate) fn new(
        writer: Arc<FramedEncoder>,
        calls: Arc<CallContainer>,
        log: Arc<dyn LogInterface>,
    ) -> Self {
        Self {
            writer,
            calls,
            stop: CancelToken::new(),
            log,
        }
    }

    /// Make a call and wait for the first of {response, cancellation, EOF}.
    pub async fn call(
        &self,
        ctx: CancelToken,
        method: &str,
        arg: Value,
        unwrapper: Option<Arc<dyn ErrorUnwrapper>>,
    ) -> Result<Value, RpcError> {
        if self.stop.is_cancelled() {
            return Err(RpcError::Eof);
        }

        let profiler = self.log.start_profiler(&format!("call {method}"));
        let (call, mut result_rx) = self.calls.new_call(ctx, method, unwrapper, Some(profiler));
        self.calls.add_call(&call);

        let frame = call_frame(call.seqid, method, arg);
        if let Err(e) = self.writer.encode(&frame).await {
            let err = RpcError::from(e);
            self.calls.retrieve_call(call.seqid);
            let _ = call.finish(Err(err.clone()));
            call.stop_profiler();
            return Err(err);
        }
        self.log.client_call(call.seqid, method);

        tokio::select! {
            res = &mut result_rx => {
                match res {
                    Ok(result) => result,
                    Err(_) => Err(RpcError::Eof),
                }
            }

            _ = call.ctx.cancelled() => {
                let canceled = RpcError::Canceled {
                    method: method.to_string(),
                    seqid: call.seqid,
                };
                if call.finish(Err(canceled.clone())) {
                    call.stop_profiler();
                    self.calls.retrieve_call(call.seqid);
                    self.log.client_cancel(call.seqid, method);
                    // Best effort: the remote may or may not honor it, and
                    // the frame itself may fail. Our seat is already free.
                    let _ = self.writer.encode(&cancel_frame(call.seqid, method)).await;
                    Err(canceled)
                } else {
                    // A response or EOF claimed the call first.
                    match result_rx.await {
                        Ok(result) => result,
                        Err(_) => Err(RpcError::Eof),
                    }
                }
            }

            _ = self.stop.cancelled() => Err(RpcError::Eof),
        }
    }

    /// Fire-and-forget: returns as soon as the frame is written.
    pub async fn notify(
        &self,
        ctx: &CancelToken,
        method: &str,
        arg: Value,
    ) -> Result<(), RpcError> {
        if self.stop.is_cancelled() {
            return Err(RpcError::Eof);
        }

        let frame = notify_frame(method, arg);
        tokio::select! {
            res = self.writer.encode(&frame) => {
                res.map_err(RpcError::from)?;
                self.log.client_notify(method);
                Ok(())
            }

            _ = ctx.cancelled() => Err(RpcError::Canceled {
                method: method.to_string(),
                seqid: SeqId::NONE,
            }),

            _ = self.stop.cancelled() => Err(RpcError::Eof),
        }
    }

    /// Stop the dispatcher: every pending and future call or notify returns
    /// EOF.
    pub fn close(&self) {
        self.stop.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_cancelled()
    }
}
