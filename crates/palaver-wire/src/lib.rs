#![deny(unsafe_code)]

//! Wire-level framing for palaver.
//!
//! Every logical message on the wire is a frame: the MessagePack encoding of
//! the body's byte length, immediately followed by the body, which is a
//! MessagePack fixarray of message fields. This crate owns that layer and
//! nothing above it: the framed encoder (a single writer task serializing
//! all outbound frames), the packetizer (reading one frame at a time and
//! validating the array header), and a bounded pool of reusable frame
//! decoders.

mod codec;
mod encoder;
mod error;
mod packetizer;
mod types;

pub use codec::{encode_frame, DecoderPool, FrameDecoder, PooledDecoder, DECODER_POOL_SIZE};
pub use encoder::FramedEncoder;
pub use error::FrameError;
pub use packetizer::Packetizer;
pub use types::{MethodType, SeqId};
