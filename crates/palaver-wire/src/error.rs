use std::io;

/// Error produced by the framing layer.
#[derive(Debug)]
pub enum FrameError {
    /// Transport-level I/O failure, including connection close.
    Io(io::Error),
    /// Malformed framing: bad length prefix or array header. The offending
    /// frame has been consumed, so the stream is still in sync.
    Packetizer(String),
    /// MessagePack serialization failed.
    Encode(String),
    /// MessagePack deserialization failed inside a well-delimited frame.
    Decode(String),
    /// The encoder was closed before the write completed.
    Closed,
}

impl FrameError {
    /// Whether this error means the peer is gone rather than misbehaving.
    pub fn is_eof(&self) -> bool {
        match self {
            FrameError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            FrameError::Closed => true,
            _ => false,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        FrameError::Io(e)
    }
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Io(e) => write!(f, "I/O error: {e}"),
            FrameError::Packetizer(m) => write!(f, "packetizer error: {m}"),
            FrameError::Encode(m) => write!(f, "encode error: {m}"),
            FrameError::Decode(m) => write!(f, "decode error: {m}"),
            FrameError::Closed => write!(f, "encoder closed"),
        }
    }
}

impl std::error::Error for FrameError {}
