//! Serving facade over a transport's protocol registry.

use std::sync::Arc;

use crate::error::RpcError;
use crate::protocol::{Protocol, WrapErrorFn};
use crate::transport::Transport;

/// Registers protocols and drives the connection. A server-level
/// `wrap_error` is stamped onto every registered protocol that does not
/// carry its own.
pub struct Server {
    transport: Arc<Transport>,
    wrap_error: Option<WrapErrorFn>,
}

impl Server {
    pub fn new(transport: Arc<Transport>, wrap_error: Option<WrapErrorFn>) -> Self {
        Self {
            transport,
            wrap_error,
        }
    }

    pub fn register(&self, mut protocol: Protocol) -> Result<(), RpcError> {
        if protocol.wrap_error.is_none() {
            protocol.wrap_error = self.wrap_error.clone();
        }
        self.transport.register_protocol(protocol)
    }

    /// Serve until the connection dies.
    pub async fn run(&self) -> Result<(), RpcError> {
        self.transport.run().await
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}
