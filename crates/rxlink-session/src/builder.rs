//! SessionBuilder -- fluent builder for constructing [`Session`] instances.
//!
//! Separates configuration from construction so that callers can choose a
//! codec, an acknowledgement timeout and the event buffer size before the
//! session takes ownership of its channels.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rxlink_session::SessionBuilder;
//! use rxlink_test_harness::{MockControlChannel, MockDataChannel};
//!
//! # async fn example() -> rxlink_core::Result<()> {
//! let session = SessionBuilder::new(
//!     Arc::new(MockControlChannel::new()),
//!     Arc::new(MockDataChannel::new()),
//! )
//! .command_timeout(Duration::from_secs(2))
//! .build()?;
//! session.connect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use rxlink_core::error::{Error, Result};
use rxlink_core::transport::{ControlChannel, DataChannel};
use rxlink_protocol::codec::{FrameCodec, MessageCodec};

use crate::session::Session;

/// Default capacity of the session event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Tunables for a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// How long to wait for each acknowledgement. `None` waits until the
    /// acknowledgement arrives or the control channel closes.
    pub command_timeout: Option<Duration>,
    /// Capacity of the event broadcast channel. Slow subscribers lag.
    pub event_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_timeout: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Fluent builder for [`Session`].
pub struct SessionBuilder {
    control: Arc<dyn ControlChannel>,
    data: Arc<dyn DataChannel>,
    codec: Arc<dyn MessageCodec>,
    options: SessionOptions,
}

impl SessionBuilder {
    /// Start a builder over the given channels, using [`FrameCodec`] and
    /// default options.
    pub fn new(control: Arc<dyn ControlChannel>, data: Arc<dyn DataChannel>) -> Self {
        SessionBuilder {
            control,
            data,
            codec: Arc::new(FrameCodec),
            options: SessionOptions::default(),
        }
    }

    /// Use a different message codec.
    pub fn codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Fail exchanges that are not acknowledged within `timeout`.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_timeout = Some(timeout);
        self
    }

    /// Set the event channel capacity (default: 64).
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.options.event_capacity = capacity;
        self
    }

    /// Replace all options at once.
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate the configuration and build the session.
    ///
    /// The session installs itself as the control channel's frame sink.
    pub fn build(self) -> Result<Session> {
        if self.options.event_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event capacity must be greater than zero".into(),
            ));
        }
        if self.options.command_timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidConfig(
                "command timeout must be non-zero".into(),
            ));
        }

        Ok(Session::new(
            self.control,
            self.data,
            self.codec,
            self.options.command_timeout,
            self.options.event_capacity,
        ))
    }
}
