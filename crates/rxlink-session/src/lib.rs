//! Control session for rxlink receivers.
//!
//! This crate sequences the command exchanges with one receiver over a
//! [`ControlChannel`](rxlink_core::ControlChannel) and drives the local
//! sample listener behind a [`DataChannel`](rxlink_core::DataChannel). It
//! provides:
//!
//! - **Session** ([`session`]) -- the connect/bootstrap ritual, stream
//!   start/stop and retuning, with local state committed only on
//!   acknowledgement.
//! - **ResponseCorrelator** ([`correlator`]) -- one outstanding command at a
//!   time, resolved by the next matching acknowledgement frame.
//! - **LinkState** ([`state`]) -- connected/streaming as a single value.
//! - **SessionBuilder** ([`builder`]) -- codec, timeout and event buffer
//!   configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rxlink_core::TunerChannel;
//! use rxlink_session::SessionBuilder;
//! use rxlink_test_harness::{MockControlChannel, MockDataChannel};
//!
//! # async fn example() -> rxlink_core::Result<()> {
//! let session = SessionBuilder::new(
//!     Arc::new(MockControlChannel::new()),
//!     Arc::new(MockDataChannel::new()),
//! )
//! .build()?;
//!
//! session.connect().await?;
//! session.change_frequency(1_420_405_752, TunerChannel(0)).await?;
//! session.start_streaming().await?;
//! // ... consume samples from the data channel ...
//! session.disconnect();
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod correlator;
pub mod session;
pub mod state;

pub use builder::{SessionBuilder, SessionOptions};
pub use correlator::ResponseCorrelator;
pub use session::Session;
pub use state::LinkState;
