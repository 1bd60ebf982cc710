//! rxlink-protocol: the receiver's control-frame codec.
//!
//! - [`codec`] -- command set, deterministic frame encoding, and
//!   acknowledgement classification through the [`MessageCodec`] trait.
//! - [`decoder`] -- [`FrameDecoder`], reassembling frames from a byte stream.

pub mod codec;
pub mod decoder;

pub use codec::{AckMatch, Command, FrameCodec, MessageCodec};
pub use decoder::FrameDecoder;
