//! Asynchronous session event types.
//!
//! Events are emitted by a session through a `tokio::sync::broadcast`
//! channel after each confirmed state change. Displays and loggers
//! subscribe to these instead of polling the session.

use crate::types::TunerChannel;

/// An event emitted when session state changes.
///
/// Events are delivered on a best-effort basis through a bounded broadcast
/// channel; slow consumers may miss events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The control channel is up and the bootstrap sequence was acknowledged.
    Connected,

    /// The session was torn down locally.
    Disconnected,

    /// The device acknowledged a stream start and the sample listener runs.
    StreamingStarted,

    /// The device acknowledged a stream stop and the sample listener stopped.
    StreamingStopped,

    /// The device acknowledged a new tuning target.
    FrequencyChanged {
        /// Which tuner channel was retuned.
        channel: TunerChannel,
        /// New frequency in hertz.
        frequency_hz: u64,
    },

    /// The control channel stopped delivering frames.
    ControlChannelClosed,
}
