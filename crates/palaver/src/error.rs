//! The engine's error taxonomy.
//!
//! Errors are split along one axis that matters operationally: whether the
//! read loop can keep going after seeing them. Recoverable errors describe a
//! single bad message on an otherwise healthy connection; everything else
//! terminates the transport.

use palaver_wire::{FrameError, SeqId};

/// Error type for every fallible operation in the RPC engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Malformed framing. The frame was consumed; the stream is in sync.
    Packetizer(String),
    /// Structurally valid frame with an invalid message shape (unknown
    /// message type, wrong field count).
    Dispatcher(String),
    /// The receiver could not process an otherwise valid message.
    Receiver(String),
    /// A field inside a well-delimited frame failed to decode.
    Decode(String),
    /// Outbound serialization failed.
    Encode(String),
    /// The handler's argument did not have the type the method expects.
    TypeError(String),
    /// The named protocol is not registered.
    ProtocolNotFound { protocol: String },
    /// The protocol exists but has no such method.
    MethodNotFound { protocol: String, method: String },
    /// A response arrived for a seqid with no outstanding call.
    CallNotFound { seqid: SeqId },
    /// A call was made to a method that cannot produce a result.
    NilResult { seqid: SeqId },
    /// The protocol name is already taken.
    AlreadyRegistered { protocol: String },
    /// The caller canceled the call before a response arrived.
    Canceled { method: String, seqid: SeqId },
    /// Error string reported by the remote in a response frame, or produced
    /// by an error unwrapper. Displays verbatim.
    Remote(String),
    /// The connection is gone; in-flight and future operations fail with
    /// this.
    Eof,
    /// Transport-level I/O failure other than connection close.
    Io(String),
}

impl RpcError {
    /// Whether the read loop may absorb this error and continue.
    pub fn can_recover(&self) -> bool {
        match self {
            RpcError::Packetizer(_)
            | RpcError::Dispatcher(_)
            | RpcError::Receiver(_)
            | RpcError::Decode(_)
            | RpcError::TypeError(_)
            | RpcError::ProtocolNotFound { .. }
            | RpcError::MethodNotFound { .. }
            | RpcError::CallNotFound { .. }
            | RpcError::NilResult { .. }
            | RpcError::Canceled { .. }
            | RpcError::Remote(_) => true,
            RpcError::Encode(_)
            | RpcError::AlreadyRegistered { .. }
            | RpcError::Eof
            | RpcError::Io(_) => false,
        }
    }
}

impl From<FrameError> for RpcError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Packetizer(m) => RpcError::Packetizer(m),
            FrameError::Decode(m) => RpcError::Decode(m),
            FrameError::Encode(m) => RpcError::Encode(m),
            FrameError::Closed => RpcError::Eof,
            FrameError::Io(_) if e.is_eof() => RpcError::Eof,
            FrameError::Io(io_err) => RpcError::Io(io_err.to_string()),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Packetizer(m) => write!(f, "packetizer error: {m}"),
            RpcError::Dispatcher(m) => write!(f, "dispatcher error: {m}"),
            RpcError::Receiver(m) => write!(f, "receiver error: {m}"),
            RpcError::Decode(m) => write!(f, "decode error: {m}"),
            RpcError::Encode(m) => write!(f, "encode error: {m}"),
            RpcError::TypeError(m) => write!(f, "invalid type for arguments: {m}"),
            RpcError::ProtocolNotFound { protocol } => {
                write!(f, "protocol not found: {protocol}")
            }
            RpcError::MethodNotFound { protocol, method } => {
                write!(f, "method '{method}' not found in protocol '{protocol}'")
            }
            RpcError::CallNotFound { seqid } => {
                write!(f, "call not found for sequence number {seqid}")
            }
            RpcError::NilResult { seqid } => {
                write!(f, "nil result supplied for sequence number {seqid}")
            }
            RpcError::AlreadyRegistered { protocol } => {
                write!(f, "{protocol}: protocol already registered")
            }
            RpcError::Canceled { method, seqid } => {
                write!(f, "call canceled: method {method}, seqid {seqid}")
            }
            RpcError::Remote(m) => f.write_str(m),
            RpcError::Eof => f.write_str("EOF"),
            RpcError::Io(m) => write!(f, "I/O error: {m}"),
        }
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_matches_error_kind() {
        assert!(RpcError::Packetizer("x".into()).can_recover());
        assert!(RpcError::Dispatcher("x".into()).can_recover());
        assert!(RpcError::CallNotFound { seqid: SeqId::new(3) }.can_recover());
        assert!(RpcError::MethodNotFound {
            protocol: "p".into(),
            method: "m".into()
        }
        .can_recover());

        assert!(!RpcError::Eof.can_recover());
        assert!(!RpcError::Io("reset".into()).can_recover());
        assert!(!RpcError::AlreadyRegistered { protocol: "p".into() }.can_recover());
    }

    #[test]
    fn display_texts_are_stable() {
        let e = RpcError::MethodNotFound {
            protocol: "test.1.arith".into(),
            method: "broken".into(),
        };
        assert_eq!(
            e.to_string(),
            "method 'broken' not found in protocol 'test.1.arith'"
        );

        let e = RpcError::ProtocolNotFound {
            protocol: "nonexistent".into(),
        };
        assert_eq!(e.to_string(), "protocol not found: nonexistent");

        assert_eq!(RpcError::Remote("boom".into()).to_string(), "boom");
        assert_eq!(RpcError::Eof.to_string(), "EOF");
    }

    #[test]
    fn eof_kind_io_errors_collapse_to_eof() {
        let e = FrameError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "early eof",
        ));
        assert_eq!(RpcError::from(e), RpcError::Eof);

        let e = FrameError::Io(std::io::Error::other("weird"));
        assert!(matches!(RpcError::from(e), RpcError::Io(_)));
    }
}
