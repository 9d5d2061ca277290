//! Protocol registration and handler lookup.
//!
//! A [`Protocol`] maps method names to handler descriptors. Handlers operate
//! on dynamic MessagePack values at the registry seam; the typed adapters
//! ([`MethodDef::call`], [`MethodDef::notify`]) capture serde conversion
//! inside the handler closure, so each method decodes straight into its own
//! argument type.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use palaver_wire::MethodType;
use parking_lot::Mutex;
use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::error::RpcError;

/// Future returned by a handler invocation.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>;

/// A registered handler: takes the per-call cancellation token and the
/// decoded argument, produces the result value.
pub type HandlerFn = Arc<dyn Fn(CancelToken, Value) -> HandlerFuture + Send + Sync>;

/// Converts an error into the value placed in a response frame's error
/// field.
pub type WrapErrorFn = Arc<dyn Fn(&RpcError) -> Value + Send + Sync>;

/// Materializes a concrete application error from the opaque on-wire error
/// payload of a response.
///
/// `Ok(None)` means the payload encodes success; `Ok(Some(err))` is the
/// application error; `Err` reports a dispatch-level failure interpreting
/// the payload.
pub trait ErrorUnwrapper: Send + Sync {
    fn unwrap_error(&self, payload: Value) -> Result<Option<RpcError>, RpcError>;
}

/// The default error wrapping: the error's display string, or nil for
/// success.
pub fn default_wrap_error(err: &RpcError) -> Value {
    Value::from(err.to_string())
}

/// Handler descriptor for one method.
pub struct MethodDef {
    handler: HandlerFn,
    method_type: MethodType,
}

impl MethodDef {
    /// A call method: typed argument in, typed result out, exactly one
    /// response per invocation.
    pub fn call<A, R, F, Fut>(f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(CancelToken, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |ctx: CancelToken, arg: Value| -> HandlerFuture {
            match rmpv::ext::from_value::<A>(arg) {
                Ok(arg) => {
                    let fut = f(ctx, arg);
                    Box::pin(async move {
                        let res = fut.await?;
                        rmpv::ext::to_value(&res).map_err(|e| RpcError::Encode(e.to_string()))
                    })
                }
                Err(e) => {
                    let err = RpcError::TypeError(e.to_string());
                    Box::pin(async move { Err(err) })
                }
            }
        });
        Self {
            handler,
            method_type: MethodType::Call,
        }
    }

    /// A notify method: typed argument in, no response ever.
    pub fn notify<A, F, Fut>(f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(CancelToken, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        let handler: HandlerFn = Arc::new(move |ctx: CancelToken, arg: Value| -> HandlerFuture {
            match rmpv::ext::from_value::<A>(arg) {
                Ok(arg) => {
                    let fut = f(ctx, arg);
                    Box::pin(async move {
                        fut.await?;
                        Ok(Value::Nil)
                    })
                }
                Err(e) => {
                    let err = RpcError::TypeError(e.to_string());
                    Box::pin(async move { Err(err) })
                }
            }
        });
        Self {
            handler,
            method_type: MethodType::Notify,
        }
    }

    /// Register a pre-built dynamic handler.
    pub fn raw(method_type: MethodType, handler: HandlerFn) -> Self {
        Self {
            handler,
            method_type,
        }
    }

    pub fn method_type(&self) -> MethodType {
        self.method_type
    }
}

/// A named set of methods, with an optional protocol-level error wrapper.
pub struct Protocol {
    pub name: String,
    pub methods: HashMap<String, MethodDef>,
    pub wrap_error: Option<WrapErrorFn>,
}

impl Protocol {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
            wrap_error: None,
        }
    }

    pub fn method(mut self, name: impl Into<String>, def: MethodDef) -> Self {
        self.methods.insert(name.into(), def);
        self
    }

    pub fn wrap_error(mut self, f: WrapErrorFn) -> Self {
        self.wrap_error = Some(f);
        self
    }
}

/// The handler resolved for an incoming call, with the error wrapper that
/// applies to it.
pub(crate) struct FoundHandler {
    pub(crate) handler: HandlerFn,
    pub(crate) method_type: MethodType,
    pub(crate) wrap_error: WrapErrorFn,
}

impl std::fmt::Debug for FoundHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FoundHandler")
            .field("method_type", &self.method_type)
            .finish()
    }
}

/// Thread-safe registry of protocols for one transport.
pub struct ProtocolRegistry {
    protocols: Mutex<HashMap<String, Protocol>>,
    default_wrap: WrapErrorFn,
}

impl ProtocolRegistry {
    pub fn new(default_wrap: Option<WrapErrorFn>) -> Self {
        Self {
            protocols: Mutex::new(HashMap::new()),
            default_wrap: default_wrap.unwrap_or_else(|| Arc::new(default_wrap_error)),
        }
    }

    /// Register a protocol. Fails if the name is already taken.
    pub fn register(&self, protocol: Protocol) -> Result<(), RpcError> {
        let mut protocols = self.protocols.lock();
        if protocols.contains_key(&protocol.name) {
            return Err(RpcError::AlreadyRegistered {
                protocol: protocol.name,
            });
        }
        protocols.insert(protocol.name.clone(), protocol);
        Ok(())
    }

    /// Resolve `protocol.method` to its handler. The registry lock is
    /// released before the handler runs.
    pub(crate) fn find_handler(&self, full_name: &str) -> Result<FoundHandler, RpcError> {
        let (protocol_name, method_name) = split_method_name(full_name);
        let protocols = self.protocols.lock();
        let protocol = protocols
            .get(protocol_name)
            .ok_or_else(|| RpcError::ProtocolNotFound {
                protocol: protocol_name.to_string(),
            })?;
        let def = protocol
            .methods
            .get(method_name)
            .ok_or_else(|| RpcError::MethodNotFound {
                protocol: protocol_name.to_string(),
                method: method_name.to_string(),
            })?;
        let wrap_error = protocol
            .wrap_error
            .clone()
            .unwrap_or_else(|| self.default_wrap.clone());
        Ok(FoundHandler {
            handler: Arc::clone(&def.handler),
            method_type: def.method_type,
            wrap_error,
        })
    }

    pub(crate) fn default_wrap(&self) -> WrapErrorFn {
        self.default_wrap.clone()
    }
}

/// Join a protocol and method name into the on-wire method string.
pub fn make_method_name(protocol: &str, method: &str) -> String {
    if protocol.is_empty() {
        method.to_string()
    } else {
        format!("{protocol}.{method}")
    }
}

/// Split an on-wire method string at the last `.` into (protocol, method).
/// A dotless name is all method, empty protocol.
pub fn split_method_name(full: &str) -> (&str, &str) {
    match full.rfind('.') {
        Some(i) => (&full[..i], &full[i + 1..]),
        None => ("", full),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_method_name_uses_last_dot() {
        assert_eq!(split_method_name("test.1.arith.add"), ("test.1.arith", "add"));
        assert_eq!(split_method_name("a.b"), ("a", "b"));
        assert_eq!(split_method_name("bare"), ("", "bare"));
        assert_eq!(split_method_name("trailing."), ("trailing", ""));
    }

    #[test]
    fn make_method_name_round_trips() {
        assert_eq!(make_method_name("test.1.arith", "add"), "test.1.arith.add");
        assert_eq!(make_method_name("", "add"), "add");
    }

    fn echo_protocol(name: &str) -> Protocol {
        Protocol::new(name).method(
            "echo",
            MethodDef::call(|_ctx, v: String| async move { Ok(v) }),
        )
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = ProtocolRegistry::new(None);
        registry.register(echo_protocol("p")).unwrap();
        let err = registry.register(echo_protocol("p")).unwrap_err();
        assert_eq!(
            err,
            RpcError::AlreadyRegistered {
                protocol: "p".into()
            }
        );
    }

    #[test]
    fn find_handler_reports_missing_protocol_and_method() {
        let registry = ProtocolRegistry::new(None);
        registry.register(echo_protocol("p")).unwrap();

        let found = registry.find_handler("p.echo").unwrap();
        assert_eq!(found.method_type, MethodType::Call);

        let err = registry.find_handler("p.missing").unwrap_err();
        assert_eq!(
            err.to_string(),
            "method 'missing' not found in protocol 'p'"
        );

        let err = registry.find_handler("q.echo").unwrap_err();
        assert_eq!(err.to_string(), "protocol not found: q");
    }

    #[tokio::test]
    async fn typed_adapter_decodes_and_encodes() {
        let def = MethodDef::call(|_ctx, (a, b): (i64, i64)| async move { Ok(a + b) });
        let result = (def.handler)(CancelToken::new(), Value::Array(vec![
            Value::from(2),
            Value::from(3),
        ]))
        .await
        .unwrap();
        assert_eq!(result, Value::from(5));
    }

    #[tokio::test]
    async fn typed_adapter_rejects_wrong_argument_type() {
        let def = MethodDef::call(|_ctx, n: i64| async move { Ok(n) });
        let err = (def.handler)(CancelToken::new(), Value::from("not a number"))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::TypeError(_)));
    }

    #[test]
    fn protocol_wrap_error_takes_precedence_over_default() {
        let registry = ProtocolRegistry::new(None);
        registry
            .register(
                echo_protocol("wrapped")
                    .wrap_error(Arc::new(|_e| Value::from("custom"))),
            )
            .unwrap();

        let found = registry.find_handler("wrapped.echo").unwrap();
        assert_eq!((found.wrap_error)(&RpcError::Eof), Value::from("custom"));

        let wrap = registry.default_wrap();
        assert_eq!(wrap(&RpcError::Eof), Value::from("EOF"));
    }
}
