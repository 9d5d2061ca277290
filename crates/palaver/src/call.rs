//! Outbound call tracking: one [`Call`] per in-flight request, owned by the
//! [`CallContainer`] until the first of {response, cancellation, EOF} claims
//! it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use palaver_wire::SeqId;
use parking_lot::Mutex;
use rmpv::Value;
use tokio::sync::oneshot;

use crate::cancel::CancelToken;
use crate::error::RpcError;
use crate::log::Profiler;
use crate::protocol::ErrorUnwrapper;

/// What an outbound call resolves to: the decoded response value, or the
/// error that ended it (application error, cancellation, EOF).
pub type CallResult = Result<Value, RpcError>;

/// The state of one outstanding outbound request.
///
/// The result is single-shot: `finish` atomically claims the right to
/// resolve the call, and exactly one party ever wins. A late response after
/// cancellation, or a late cancellation after a response, observes `false`
/// and backs off.
pub struct Call {
    pub(crate) ctx: CancelToken,
    pub(crate) method: String,
    pub(crate) seqid: SeqId,
    pub(crate) unwrapper: Option<Arc<dyn ErrorUnwrapper>>,
    profiler: Mutex<Option<Box<dyn Profiler>>>,
    result: Mutex<Option<oneshot::Sender<CallResult>>>,
}

impl Call {
    fn new(
        ctx: CancelToken,
        method: String,
        seqid: SeqId,
        unwrapper: Option<Arc<dyn ErrorUnwrapper>>,
        profiler: Option<Box<dyn Profiler>>,
    ) -> (Arc<Self>, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        let call = Arc::new(Self {
            ctx,
            method,
            seqid,
            unwrapper,
            profiler: Mutex::new(profiler),
            result: Mutex::new(Some(tx)),
        });
        (call, rx)
    }

    /// Try to resolve this call with `result`. Returns whether this attempt
    /// won; all attempts after the first return `false`.
    pub fn finish(&self, result: CallResult) -> bool {
        match self.result.lock().take() {
            Some(tx) => {
                // The waiting side may already be gone (e.g. the caller's
                // future was dropped); the outcome is still claimed.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub(crate) fn stop_profiler(&self) {
        if let Some(p) = self.profiler.lock().take() {
            p.stop();
        }
    }
}

/// Registry of outstanding calls keyed by seqid, plus the seqid allocator.
///
/// `retrieve_call` removes atomically, so the response path and the
/// cancellation path can never both observe the same call.
pub struct CallContainer {
    next_seqid: AtomicI64,
    calls: Mutex<HashMap<SeqId, Arc<Call>>>,
}

impl CallContainer {
    pub fn new() -> Self {
        Self {
            next_seqid: AtomicI64::new(0),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Create a call with the next seqid. The call is not yet registered;
    /// pair with `add_call` before the request frame is released to the
    /// writer.
    pub(crate) fn new_call(
        &self,
        ctx: CancelToken,
        method: &str,
        unwrapper: Option<Arc<dyn ErrorUnwrapper>>,
        profiler: Option<Box<dyn Profiler>>,
    ) -> (Arc<Call>, oneshot::Receiver<CallResult>) {
        let seqid = SeqId::new(self.next_seqid.fetch_add(1, Ordering::Relaxed));
        Call::new(ctx, method.to_string(), seqid, unwrapper, profiler)
    }

    pub(crate) fn add_call(&self, call: &Arc<Call>) {
        self.calls.lock().insert(call.seqid, Arc::clone(call));
    }

    /// Remove and return the call for `seqid`, if still outstanding.
    pub fn retrieve_call(&self, seqid: SeqId) -> Option<Arc<Call>> {
        self.calls.lock().remove(&seqid)
    }

    /// Fail every outstanding call with EOF. Called when the transport
    /// terminates; finished calls ignore the second resolution.
    pub fn cleanup_all(&self) {
        let drained: Vec<_> = self.calls.lock().drain().collect();
        for (_, call) in drained {
            let _ = call.finish(Err(RpcError::Eof));
        }
    }

    pub fn outstanding(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Default for CallContainer {
    fn default() -> Self {
        Self::new()
    }
}
