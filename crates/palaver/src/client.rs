//! Typed client facade over a transport's dispatcher.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::error::RpcError;
use crate::protocol::ErrorUnwrapper;
use crate::transport::Transport;

/// Makes calls and notifies on a transport. All calls through one client
/// share its [`ErrorUnwrapper`], which materializes application error types
/// from the opaque on-wire error payload.
#[derive(Clone)]
pub struct Client {
    transport: Arc<Transport>,
    unwrapper: Option<Arc<dyn ErrorUnwrapper>>,
}

impl Client {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self {
            transport,
            unwrapper: None,
        }
    }

    pub fn with_unwrapper(transport: Arc<Transport>, unwrapper: Arc<dyn ErrorUnwrapper>) -> Self {
        Self {
            transport,
            unwrapper: Some(unwrapper),
        }
    }

    /// Call `method` and decode the response into `R`.
    pub async fn call<A, R>(&self, method: &str, arg: &A) -> Result<R, RpcError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.call_with_token(CancelToken::new(), method, arg).await
    }

    /// Like [`Client::call`], with a caller-controlled cancellation token.
    /// Cancelling the token makes the call return `Canceled` and emits a
    /// best-effort cancel frame to the server.
    pub async fn call_with_token<A, R>(
        &self,
        ctx: CancelToken,
        method: &str,
        arg: &A,
    ) -> Result<R, RpcError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let arg = rmpv::ext::to_value(arg).map_err(|e| RpcError::Encode(e.to_string()))?;
        let res = self
            .transport
            .dispatcher()
            .call(ctx, method, arg, self.unwrapper.clone())
            .await?;
        rmpv::ext::from_value(res).map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// Fire-and-forget notification; returns once the frame is written.
    pub async fn notify<A>(&self, method: &str, arg: &A) -> Result<(), RpcError>
    where
        A: Serialize,
    {
        self.notify_with_token(&CancelToken::new(), method, arg)
            .await
    }

    pub async fn notify_with_token<A>(
        &self,
        ctx: &CancelToken,
        method: &str,
        arg: &A,
    ) -> Result<(), RpcError>
    where
        A: Serialize,
    {
        let arg = rmpv::ext::to_value(arg).map_err(|e| RpcError::Encode(e.to_string()))?;
        self.transport.dispatcher().notify(ctx, method, arg).await
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}
