//! The four wire message kinds and their decode contract.
//!
//! Frame bodies are `[type, ...fields]`. Decoding is tolerant at the edges:
//! extra trailing fields are drained to keep old peers compatible with newer
//! ones, and every early exit drains what it did not consume so the pooled
//! decoder is left in a consistent state.

use palaver_wire::{FrameDecoder, MethodType, SeqId};
use rmpv::Value;

use std::sync::Arc;

use crate::call::{Call, CallContainer, CallResult};
use crate::error::RpcError;

/// An inbound request expecting a response.
#[derive(Debug)]
pub(crate) struct CallMessage {
    pub seqno: SeqId,
    pub method: String,
    pub arg: Value,
}

/// A response, already bound to the outstanding call it answers.
pub(crate) struct ResponseMessage {
    pub call: Arc<Call>,
    pub result: CallResult,
}

impl std::fmt::Debug for ResponseMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseMessage")
            .field("seqid", &self.call.seqid)
            .field("method", &self.call.method)
            .field("result", &self.result)
            .finish()
    }
}

/// An inbound fire-and-forget notification.
#[derive(Debug)]
pub(crate) struct NotifyMessage {
    pub method: String,
    pub arg: Value,
}

/// A request to abort an in-flight served call.
#[derive(Debug)]
pub(crate) struct CancelMessage {
    pub seqno: SeqId,
    pub method: String,
}

pub(crate) enum Message {
    Call(CallMessage),
    Response(ResponseMessage),
    Notify(NotifyMessage),
    Cancel(CancelMessage),
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::Call(m) => f.debug_tuple("Call").field(m).finish(),
            Message::Response(m) => f.debug_tuple("Response").field(m).finish(),
            Message::Notify(m) => f.debug_tuple("Notify").field(m).finish(),
            Message::Cancel(m) => f.debug_tuple("Cancel").field(m).finish(),
        }
    }
}

impl Message {
    /// Decode one message from a frame of `nfields` fields.
    ///
    /// `Response` decoding retrieves (and removes) the matching call from
    /// the container; the remaining fields are decoded against that call's
    /// error unwrapper.
    pub(crate) fn decode(
        nfields: usize,
        dec: &mut FrameDecoder,
        calls: &CallContainer,
    ) -> Result<Message, RpcError> {
        let mut cur = FieldCursor {
            dec,
            remaining: nfields,
            consumed: 0,
        };

        let type_field = match cur.decode_int() {
            Ok(v) => v,
            Err(e) => {
                cur.drain();
                return Err(e);
            }
        };
        let Some(method_type) = MethodType::from_i64(type_field) else {
            cur.drain();
            return Err(RpcError::Dispatcher("invalid RPC type".to_string()));
        };

        let min_fields = match method_type {
            MethodType::Call | MethodType::Response => 3,
            MethodType::Notify | MethodType::Cancel => 2,
        };
        if cur.remaining < min_fields {
            cur.drain();
            return Err(RpcError::Dispatcher(format!(
                "wrong number of fields for message (got n={}, expected n={})",
                nfields,
                min_fields + 1
            )));
        }

        let result = match method_type {
            MethodType::Call => Self::decode_call(&mut cur),
            MethodType::Response => Self::decode_response(&mut cur, calls),
            MethodType::Notify => Self::decode_notify(&mut cur),
            MethodType::Cancel => Self::decode_cancel(&mut cur),
        };
        // Tolerate extra trailing fields on success; leave the decoder
        // consistent on failure.
        cur.drain();
        result
    }

    fn decode_call(cur: &mut FieldCursor<'_>) -> Result<Message, RpcError> {
        let seqno = SeqId::new(cur.decode_int()?);
        let method = cur.decode_str()?;
        let arg = cur.decode_value()?;
        Ok(Message::Call(CallMessage { seqno, method, arg }))
    }

    fn decode_response(
        cur: &mut FieldCursor<'_>,
        calls: &CallContainer,
    ) -> Result<Message, RpcError> {
        let seqno = SeqId::new(cur.decode_int()?);
        let Some(call) = calls.retrieve_call(seqno) else {
            return Err(RpcError::CallNotFound { seqid: seqno });
        };

        match Self::decode_response_payload(cur, &call) {
            Ok(result) => Ok(Message::Response(ResponseMessage { call, result })),
            Err(e) => {
                // The call was already removed from the container; resolve
                // it here or the waiter would hang until EOF.
                let _ = call.finish(Err(e.clone()));
                Err(e)
            }
        }
    }

    fn decode_response_payload(
        cur: &mut FieldCursor<'_>,
        call: &Call,
    ) -> Result<CallResult, RpcError> {
        let app_err = if let Some(unwrapper) = &call.unwrapper {
            let payload = cur.decode_value()?;
            unwrapper.unwrap_error(payload)?
        } else {
            match cur.decode_value()? {
                Value::Nil => None,
                Value::String(s) => {
                    let text = s.into_str().ok_or_else(|| {
                        RpcError::Decode("error string is not valid UTF-8".to_string())
                    })?;
                    Some(RpcError::Remote(text))
                }
                _ => {
                    return Err(RpcError::Decode(
                        "unable to convert error to string".to_string(),
                    ))
                }
            }
        };

        let res = cur.decode_value()?;
        Ok(match app_err {
            Some(err) => Err(err),
            None => Ok(res),
        })
    }

    fn decode_notify(cur: &mut FieldCursor<'_>) -> Result<Message, RpcError> {
        let method = cur.decode_str()?;
        let arg = cur.decode_value()?;
        Ok(Message::Notify(NotifyMessage { method, arg }))
    }

    fn decode_cancel(cur: &mut FieldCursor<'_>) -> Result<Message, RpcError> {
        let seqno = SeqId::new(cur.decode_int()?);
        let method = cur.decode_str()?;
        Ok(Message::Cancel(CancelMessage { seqno, method }))
    }
}

/// Tracks how many of the frame's fields are left and stamps decode errors
/// with the failing field's position.
struct FieldCursor<'a> {
    dec: &'a mut FrameDecoder,
    remaining: usize,
    consumed: usize,
}

impl FieldCursor<'_> {
    fn decode_value(&mut self) -> Result<Value, RpcError> {
        let v = self.dec.decode_value().map_err(|e| self.field_error(e))?;
        self.advance();
        Ok(v)
    }

    fn decode_int(&mut self) -> Result<i64, RpcError> {
        let v = self.dec.decode_int().map_err(|e| self.field_error(e))?;
        self.advance();
        Ok(v)
    }

    fn decode_str(&mut self) -> Result<String, RpcError> {
        let v = self.dec.decode_str().map_err(|e| self.field_error(e))?;
        self.advance();
        Ok(v)
    }

    fn advance(&mut self) {
        self.remaining -= 1;
        self.consumed += 1;
    }

    fn field_error(&self, e: palaver_wire::FrameError) -> RpcError {
        RpcError::Decode(format!(
            "error decoding message field at position {}: {e}",
            self.consumed
        ))
    }

    /// Decode whatever is left into discarded values.
    fn drain(&mut self) {
        while self.remaining > 0 {
            if self.dec.decode_value().is_err() {
                break;
            }
            self.remaining -= 1;
        }
    }
}

/// `[0, seqid, method, arg]`
pub(crate) fn call_frame(seqid: SeqId, method: &str, arg: Value) -> Value {
    Value::Array(vec![
        Value::from(MethodType::Call.raw()),
        Value::from(seqid.raw()),
        Value::from(method),
        arg,
    ])
}

/// `[1, seqid, err, res]`
pub(crate) fn response_frame(seqid: SeqId, err: Value, res: Value) -> Value {
    Value::Array(vec![
        Value::from(MethodType::Response.raw()),
        Value::from(seqid.raw()),
        err,
        res,
    ])
}

/// `[2, method, arg]`
pub(crate) fn notify_frame(method: &str, arg: Value) -> Value {
    Value::Array(vec![
        Value::from(MethodType::Notify.raw()),
        Value::from(method),
        arg,
    ])
}

/// `[3, seqid, method]`
pub(crate) fn cancel_frame(seqid: SeqId, method: &str) -> Value {
    Value::Array(vec![
        Value::from(MethodType::Cancel.raw()),
        Value::from(seqid.raw()),
        Value::from(method),
    ])
}
