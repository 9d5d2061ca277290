//! Inbound demultiplexing: the server half of the engine.
//!
//! Each served call runs in its own task with a cancellation token derived
//! from the receiver's root. The task table (seqid -> token) is owned by a
//! single task loop; begin/cancel/end mutations arrive over a channel, so a
//! remote cancel can never race a handler starting or finishing.

use std::collections::HashMap;
use std::sync::Arc;

use palaver_wire::{FramedEncoder, MethodType, SeqId};
use rmpv::Value;
use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::error::RpcError;
use crate::log::LogInterface;
use crate::message::{
    response_frame, CallMessage, CancelMessage, Message, NotifyMessage, ResponseMessage,
};
use crate::protocol::{ProtocolRegistry, WrapErrorFn};

enum TaskMsg {
    Begin { seqid: SeqId, cancel: CancelToken },
    Cancel { seqid: SeqId },
    End { seqid: SeqId },
    Shutdown,
}

pub struct Receiver {
    writer: Arc<FramedEncoder>,
    protocols: Arc<ProtocolRegistry>,
    task_tx: mpsc::UnboundedSender<TaskMsg>,
    root: CancelToken,
    log: Arc<dyn LogInterface>,
}

impl Receiver {
    pub(crate) fn new(
        writer: Arc<FramedEncoder>,
        protocols: Arc<ProtocolRegistry>,
        log: Arc<dyn LogInterface>,
    ) -> Self {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        tokio::spawn(task_loop(task_rx));
        Self {
            writer,
            protocols,
            task_tx,
            root: CancelToken::new(),
            log,
        }
    }

    /// Route one decoded message.
    pub(crate) async fn receive(&self, msg: Message) -> Result<(), RpcError> {
        match msg {
            Message::Call(call) => self.receive_call(call).await,
            Message::Notify(notify) => self.receive_notify(notify),
            Message::Response(response) => self.receive_response(response),
            Message::Cancel(cancel) => self.receive_cancel(cancel),
        }
    }

    async fn receive_call(&self, msg: CallMessage) -> Result<(), RpcError> {
        let CallMessage { seqno, method, arg } = msg;

        let found = match self.protocols.find_handler(&method) {
            Ok(found) => found,
            Err(err) => {
                self.log.server_call(seqno, &method, Some(&err));
                return self
                    .reply_error(seqno, &err, &self.protocols.default_wrap())
                    .await;
            }
        };

        if found.method_type == MethodType::Notify {
            // A call expects a response; a notify-only method can never
            // produce one.
            let err = RpcError::NilResult { seqid: seqno };
            self.log.server_call(seqno, &method, Some(&err));
            return self.reply_error(seqno, &err, &found.wrap_error).await;
        }

        self.log.server_call(seqno, &method, None);
        let ctx = self.root.child();
        let _ = self.task_tx.send(TaskMsg::Begin {
            seqid: seqno,
            cancel: ctx.clone(),
        });

        let writer = Arc::clone(&self.writer);
        let log = Arc::clone(&self.log);
        let task_tx = self.task_tx.clone();
        let wrap = found.wrap_error;
        let handler = found.handler;
        tokio::spawn(async move {
            let profiler = log.start_profiler(&format!("serve {method}"));
            let result = handler(ctx.clone(), arg).await;
            profiler.stop();

            if ctx.is_cancelled() {
                // The remote canceled this call; it has already discarded
                // the seqid, so a reply would only be noise.
                log.warning(&format!("call canceled for seqno {seqno}"));
            } else {
                let (err_value, res_value) = match &result {
                    Ok(res) => {
                        log.server_reply(seqno, &method, None);
                        (Value::Nil, res.clone())
                    }
                    Err(e) => {
                        log.server_reply(seqno, &method, Some(e));
                        (wrap(e), Value::Nil)
                    }
                };
                let frame = response_frame(seqno, err_value, res_value);
                if let Err(e) = writer.encode(&frame).await {
                    log.warning(&format!("reply error for {seqno}: {e}"));
                }
            }
            let _ = task_tx.send(TaskMsg::End { seqid: seqno });
        });
        Ok(())
    }

    fn receive_notify(&self, msg: NotifyMessage) -> Result<(), RpcError> {
        let NotifyMessage { method, arg } = msg;

        let found = match self.protocols.find_handler(&method) {
            Ok(found) => found,
            Err(err) => {
                // Nobody to answer; log and drop.
                self.log.server_notify_call(&method, Some(&err));
                return Ok(());
            }
        };

        self.log.server_notify_call(&method, None);
        let ctx = self.root.child();
        let _ = self.task_tx.send(TaskMsg::Begin {
            seqid: SeqId::NONE,
            cancel: ctx.clone(),
        });

        let log = Arc::clone(&self.log);
        let task_tx = self.task_tx.clone();
        let handler = found.handler;
        tokio::spawn(async move {
            let profiler = log.start_profiler(&format!("serve-notify {method}"));
            let result = handler(ctx, arg).await;
            profiler.stop();
            log.server_notify_complete(&method, result.err().as_ref());
            let _ = task_tx.send(TaskMsg::End { seqid: SeqId::NONE });
        });
        Ok(())
    }

    fn receive_response(&self, msg: ResponseMessage) -> Result<(), RpcError> {
        let ResponseMessage { call, result } = msg;
        call.stop_profiler();

        let err_for_log = result.as_ref().err().cloned();
        // A false return means local cancellation already claimed the call;
        // the late response is dropped on the floor.
        let _ = call.finish(result);
        self.log
            .client_reply(call.seqid, &call.method, err_for_log.as_ref());
        Ok(())
    }

    fn receive_cancel(&self, msg: CancelMessage) -> Result<(), RpcError> {
        self.log.server_cancel_call(msg.seqno, &msg.method);
        // Unknown seqids are ignored: the handler may simply have finished
        // first.
        let _ = self.task_tx.send(TaskMsg::Cancel { seqid: msg.seqno });
        Ok(())
    }

    async fn reply_error(
        &self,
        seqno: SeqId,
        err: &RpcError,
        wrap: &WrapErrorFn,
    ) -> Result<(), RpcError> {
        let frame = response_frame(seqno, wrap(err), Value::Nil);
        self.writer.encode(&frame).await.map_err(RpcError::from)
    }

    /// Cancel every serving handler and stop the task loop.
    pub(crate) fn close(&self) {
        self.root.cancel();
        let _ = self.task_tx.send(TaskMsg::Shutdown);
    }
}

async fn task_loop(mut rx: mpsc::UnboundedReceiver<TaskMsg>) {
    let mut tasks: HashMap<SeqId, CancelToken> = HashMap::new();
    while let Some(msg) = rx.recv().await {
        match msg {
            TaskMsg::Begin { seqid, cancel } => {
                tasks.insert(seqid, cancel);
            }
            TaskMsg::Cancel { seqid } => {
                if let Some(token) = tasks.remove(&seqid) {
                    token.cancel();
                }
            }
            TaskMsg::End { seqid } => {
                tasks.remove(&seqid);
            }
            TaskMsg::Shutdown => break,
        }
    }
}
