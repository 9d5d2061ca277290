//! The narrow logging interface the engine calls into.
//!
//! Embedders inject a [`LogFactory`]; the engine only ever talks to the
//! returned [`LogInterface`]. The default implementation forwards to
//! `tracing`, so a plain subscriber gets structured connection logs without
//! any wiring.

use std::sync::Arc;
use std::time::Instant;

use palaver_wire::SeqId;
use tracing::{debug, info, warn};

use crate::error::RpcError;

/// Handle returned by [`LogInterface::start_profiler`]; `stop` marks the end
/// of the profiled section.
pub trait Profiler: Send {
    fn stop(self: Box<Self>);
}

/// Lifecycle, per-call, per-reply and anomaly hooks.
pub trait LogInterface: Send + Sync {
    fn transport_start(&self);
    fn transport_error(&self, err: &RpcError);

    fn client_call(&self, seqid: SeqId, method: &str);
    fn client_reply(&self, seqid: SeqId, method: &str, err: Option<&RpcError>);
    fn client_notify(&self, method: &str);
    fn client_cancel(&self, seqid: SeqId, method: &str);

    fn server_call(&self, seqid: SeqId, method: &str, err: Option<&RpcError>);
    fn server_reply(&self, seqid: SeqId, method: &str, err: Option<&RpcError>);
    fn server_notify_call(&self, method: &str, err: Option<&RpcError>);
    fn server_notify_complete(&self, method: &str, err: Option<&RpcError>);
    fn server_cancel_call(&self, seqid: SeqId, method: &str);

    fn unexpected_reply(&self, seqid: SeqId);
    fn warning(&self, msg: &str);

    fn start_profiler(&self, name: &str) -> Box<dyn Profiler>;
}

/// Produces one log per connection.
pub trait LogFactory: Send + Sync {
    fn new_log(&self) -> Arc<dyn LogInterface>;
}

/// Default log implementation emitting through `tracing`.
pub struct TracingLog;

impl LogInterface for TracingLog {
    fn transport_start(&self) {
        info!("transport started");
    }

    fn transport_error(&self, err: &RpcError) {
        if matches!(err, RpcError::Eof) {
            info!("transport EOF");
        } else {
            warn!(%err, "transport error");
        }
    }

    fn client_call(&self, seqid: SeqId, method: &str) {
        debug!(seqid = seqid.raw(), method, "client call");
    }

    fn client_reply(&self, seqid: SeqId, method: &str, err: Option<&RpcError>) {
        match err {
            Some(err) => debug!(seqid = seqid.raw(), method, %err, "client reply"),
            None => debug!(seqid = seqid.raw(), method, "client reply"),
        }
    }

    fn client_notify(&self, method: &str) {
        debug!(method, "client notify");
    }

    fn client_cancel(&self, seqid: SeqId, method: &str) {
        debug!(seqid = seqid.raw(), method, "client cancel");
    }

    fn server_call(&self, seqid: SeqId, method: &str, err: Option<&RpcError>) {
        match err {
            Some(err) => debug!(seqid = seqid.raw(), method, %err, "server call"),
            None => debug!(seqid = seqid.raw(), method, "server call"),
        }
    }

    fn server_reply(&self, seqid: SeqId, method: &str, err: Option<&RpcError>) {
        match err {
            Some(err) => debug!(seqid = seqid.raw(), method, %err, "server reply"),
            None => debug!(seqid = seqid.raw(), method, "server reply"),
        }
    }

    fn server_notify_call(&self, method: &str, err: Option<&RpcError>) {
        match err {
            Some(err) => debug!(method, %err, "server notify"),
            None => debug!(method, "server notify"),
        }
    }

    fn server_notify_complete(&self, method: &str, err: Option<&RpcError>) {
        match err {
            Some(err) => debug!(method, %err, "server notify complete"),
            None => debug!(method, "server notify complete"),
        }
    }

    fn server_cancel_call(&self, seqid: SeqId, method: &str) {
        debug!(seqid = seqid.raw(), method, "server cancel");
    }

    fn unexpected_reply(&self, seqid: SeqId) {
        warn!(seqid = seqid.raw(), "unexpected reply");
    }

    fn warning(&self, msg: &str) {
        warn!("{msg}");
    }

    fn start_profiler(&self, name: &str) -> Box<dyn Profiler> {
        Box::new(TracingProfiler {
            name: name.to_string(),
            started: Instant::now(),
        })
    }
}

/// Factory for [`TracingLog`].
pub struct TracingLogFactory;

impl LogFactory for TracingLogFactory {
    fn new_log(&self) -> Arc<dyn LogInterface> {
        Arc::new(TracingLog)
    }
}

struct TracingProfiler {
    name: String,
    started: Instant,
}

impl Profiler for TracingProfiler {
    fn stop(self: Box<Self>) {
        debug!(name = %self.name, elapsed = ?self.started.elapsed(), "profile");
    }
}
