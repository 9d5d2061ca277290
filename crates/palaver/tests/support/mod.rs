//! Shared fixtures: the arithmetic test protocol and transport pairs over
//! an in-memory duplex stream.
#![allow(dead_code)] // each test binary uses a different slice of this module

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use palaver::{
    CancelToken, Client, LogFactory, LogInterface, MethodDef, Profiler, Protocol, RpcError, SeqId,
    Transport,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AddArgs {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DivModArgs {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivModRes {
    pub q: i64,
    pub r: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constants {
    pub pi: i64,
}

/// Server-side state shared with the test body.
#[derive(Default)]
pub struct ArithState {
    pub constants: Mutex<Constants>,
    pub long_call_canceled: AtomicBool,
}

pub const PROTOCOL: &str = "test.1.arith";

/// Arithmetic service: add, divMod, constants via notify, and a cancellable
/// long call.
pub fn arith_protocol(state: Arc<ArithState>) -> Protocol {
    let constants_state = Arc::clone(&state);
    let update_state = Arc::clone(&state);
    let long_call_state = Arc::clone(&state);

    Protocol::new(PROTOCOL)
        .method(
            "add",
            MethodDef::call(|_ctx, args: AddArgs| async move { Ok(args.a + args.b) }),
        )
        .method(
            "divMod",
            MethodDef::call(|_ctx, args: DivModArgs| async move {
                if args.b == 0 {
                    return Err(RpcError::Remote("cannot divide by 0".to_string()));
                }
                Ok(DivModRes {
                    q: args.a / args.b,
                    r: args.a % args.b,
                })
            }),
        )
        .method(
            "getConstants",
            MethodDef::call(move |_ctx, (): ()| {
                let state = Arc::clone(&constants_state);
                async move { Ok(*state.constants.lock().unwrap()) }
            }),
        )
        .method(
            "updateConstants",
            MethodDef::notify(move |_ctx, constants: Constants| {
                let state = Arc::clone(&update_state);
                async move {
                    *state.constants.lock().unwrap() = constants;
                    Ok(())
                }
            }),
        )
        .method(
            "longCall",
            MethodDef::call(move |ctx: CancelToken, (): ()| {
                let state = Arc::clone(&long_call_state);
                async move {
                    for _ in 0..100 {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(1)) => {}
                            _ = ctx.cancelled() => {
                                state.long_call_canceled.store(true, Ordering::SeqCst);
                                return Ok(999i64);
                            }
                        }
                    }
                    Ok(1i64)
                }
            }),
        )
}

pub struct Endpoints {
    pub client: Client,
    pub client_transport: Arc<Transport>,
    pub server_transport: Arc<Transport>,
    pub state: Arc<ArithState>,
}

/// Two transports over an in-memory stream, the server side registered with
/// the arith protocol, both read loops running.
pub fn arith_pair() -> Endpoints {
    let (client_stream, server_stream) = tokio::io::duplex(256 * 1024);
    let client_transport = Transport::new(client_stream, None, None);
    let server_transport = Transport::new(server_stream, None, None);

    let state = Arc::new(ArithState::default());
    server_transport
        .register_protocol(arith_protocol(Arc::clone(&state)))
        .unwrap();

    client_transport.run_async();
    server_transport.run_async();

    Endpoints {
        client: Client::new(Arc::clone(&client_transport)),
        client_transport,
        server_transport,
        state,
    }
}

/// Log implementation capturing warnings and unexpected-reply seqids so
/// tests can observe recoverable errors the read loop absorbs.
#[derive(Default)]
pub struct CapturingLog {
    pub warnings: Mutex<Vec<String>>,
    pub unexpected_replies: Mutex<Vec<SeqId>>,
}

impl CapturingLog {
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn unexpected_replies(&self) -> Vec<SeqId> {
        self.unexpected_replies.lock().unwrap().clone()
    }
}

struct NopProfiler;

impl Profiler for NopProfiler {
    fn stop(self: Box<Self>) {}
}

impl LogInterface for CapturingLog {
    fn transport_start(&self) {}
    fn transport_error(&self, _err: &RpcError) {}
    fn client_call(&self, _seqid: SeqId, _method: &str) {}
    fn client_reply(&self, _seqid: SeqId, _method: &str, _err: Option<&RpcError>) {}
    fn client_notify(&self, _method: &str) {}
    fn client_cancel(&self, _seqid: SeqId, _method: &str) {}
    fn server_call(&self, _seqid: SeqId, _method: &str, _err: Option<&RpcError>) {}
    fn server_reply(&self, _seqid: SeqId, _method: &str, _err: Option<&RpcError>) {}
    fn server_notify_call(&self, _method: &str, _err: Option<&RpcError>) {}
    fn server_notify_complete(&self, _method: &str, _err: Option<&RpcError>) {}
    fn server_cancel_call(&self, _seqid: SeqId, _method: &str) {}

    fn unexpected_reply(&self, seqid: SeqId) {
        self.unexpected_replies.lock().unwrap().push(seqid);
    }

    fn warning(&self, msg: &str) {
        self.warnings.lock().unwrap().push(msg.to_string());
    }

    fn start_profiler(&self, _name: &str) -> Box<dyn Profiler> {
        Box::new(NopProfiler)
    }
}

pub struct CapturingLogFactory {
    pub log: Arc<CapturingLog>,
}

impl LogFactory for CapturingLogFactory {
    fn new_log(&self) -> Arc<dyn LogInterface> {
        Arc::clone(&self.log) as Arc<dyn LogInterface>
    }
}

/// Poll until `cond` holds or the deadline passes.
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
