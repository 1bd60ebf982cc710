//! Channel traits consumed by the session.
//!
//! A receiver is reached over two independent channels:
//!
//! - a reliable, ordered [`ControlChannel`] carrying command frames out and
//!   acknowledgement frames back, and
//! - a best-effort [`DataChannel`] whose receive loop delivers samples to a
//!   consumer the session never sees.
//!
//! Concrete implementations live in `rxlink-transport` (TCP and UDP) and
//! `rxlink-test-harness` (mocks). The session only ever talks to these
//! traits, so protocol logic can be tested without sockets.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Receiver of inbound control frames.
///
/// A control channel invokes the installed sink once per complete frame,
/// in arrival order. Calls may come from any task or thread (typically the
/// channel's own read loop), so implementations must not block.
pub trait FrameSink: Send + Sync + 'static {
    /// A complete frame arrived on the control channel.
    fn on_frame(&self, frame: Bytes);

    /// The channel stopped delivering frames (peer closed, read error, or
    /// local disconnect).
    fn on_closed(&self);
}

/// No-op sink installed before a session attaches its own.
pub struct NullSink;

impl FrameSink for NullSink {
    fn on_frame(&self, _frame: Bytes) {}
    fn on_closed(&self) {}
}

/// Reliable, ordered command channel to the device.
///
/// `send` is fire-and-forget from the protocol's point of view: it completes
/// once the bytes are handed to the medium and carries no acknowledgement.
/// Acknowledgements arrive through the [`FrameSink`].
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Establish the medium.
    ///
    /// Calling this while already connected re-establishes the channel.
    /// Fails with [`Error::Connection`](crate::error::Error::Connection)
    /// if the medium cannot be established.
    async fn connect(&self) -> Result<()>;

    /// Hand one encoded frame to the medium.
    async fn send(&self, frame: &[u8]) -> Result<()>;

    /// Tear down the medium.
    ///
    /// Must never fail and is a no-op when not connected.
    fn disconnect(&self);

    /// Whether the medium is currently up.
    fn is_connected(&self) -> bool;

    /// Install the receiver of inbound frames, replacing any previous one.
    fn set_sink(&self, sink: Arc<dyn FrameSink>);
}

/// Best-effort sample channel.
///
/// The session only starts and stops the receive loop; samples flow to a
/// consumer wired up when the channel is constructed.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Start the sample receive loop.
    async fn start_listening(&self) -> Result<()>;

    /// Stop the sample receive loop. Never fails.
    fn stop_listening(&self);
}
