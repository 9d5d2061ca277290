#![deny(unsafe_code)]

//! Bidirectional framed-MessagePack RPC over a single byte stream.
//!
//! Each endpoint is simultaneously client and server: it may initiate calls
//! and notifications while serving protocols registered by the embedder.
//! Frames are self-delimited MessagePack arrays prefixed with a
//! MessagePack-encoded length; see `palaver-wire` for the framing layer.
//!
//! The moving parts around one connection:
//!
//! - [`Transport`] owns the connection and every component wired to it, and
//!   drives the read loop.
//! - [`Dispatcher`] is the outbound half: `call` tracks an in-flight request
//!   until the first of {response, cancellation, EOF} resolves it.
//! - The receiver is the inbound half: it demultiplexes frames, spawns one
//!   task per served call with its own [`CancelToken`], and routes responses
//!   back to their waiting calls.
//! - [`Client`] and [`Server`] are thin typed facades over the two halves.

mod call;
mod cancel;
mod client;
mod dispatch;
mod error;
mod log;
mod message;
mod protocol;
mod receiver;
mod server;
mod transport;

pub use call::{Call, CallContainer, CallResult};
pub use cancel::CancelToken;
pub use client::Client;
pub use dispatch::Dispatcher;
pub use error::RpcError;
pub use log::{LogFactory, LogInterface, Profiler, TracingLog, TracingLogFactory};
pub use protocol::{
    default_wrap_error, make_method_name, split_method_name, ErrorUnwrapper, HandlerFn,
    HandlerFuture, MethodDef, Protocol, ProtocolRegistry, WrapErrorFn,
};
pub use receiver::Receiver;
pub use server::Server;
pub use transport::{Transport, TransportOptions};

pub use palaver_wire::{MethodType, SeqId};
pub use rmpv::Value;
