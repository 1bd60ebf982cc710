//! # rxlink -- Control-Plane Client for Networked Receivers
//!
//! `rxlink` is an asynchronous Rust library for driving a networked
//! software-defined receiver: establishing its control session, starting
//! and stopping the IQ sample stream, and retuning its channels. Commands
//! travel over a reliable control channel and are confirmed one at a time;
//! samples arrive on a separate best-effort data channel.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rxlink::{SessionBuilder, TcpControlChannel, TunerChannel, UdpDataChannel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let control = Arc::new(TcpControlChannel::new("192.168.1.50:50000"));
//!     let (data, mut samples) = UdpDataChannel::new();
//!
//!     let session = SessionBuilder::new(control, Arc::new(data)).build()?;
//!     session.connect().await?;
//!     session.change_frequency(1_420_405_752, TunerChannel(0)).await?;
//!     session.start_streaming().await?;
//!
//!     if let Some(datagram) = samples.recv().await {
//!         println!("{} bytes of IQ", datagram.len());
//!     }
//!
//!     session.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                 | Purpose                                              |
//! |-----------------------|------------------------------------------------------|
//! | `rxlink-core`         | Channel traits, [`SessionEvent`], value types, errors |
//! | `rxlink-protocol`     | Command set and frame codec ([`MessageCodec`])       |
//! | `rxlink-session`      | [`Session`] state machine and [`ResponseCorrelator`] |
//! | `rxlink-transport`    | TCP control and UDP data channel implementations     |
//! | **`rxlink`**          | This facade crate -- re-exports everything           |
//!
//! ## Semantics worth knowing
//!
//! - Operations other than `connect` are silent no-ops while disconnected.
//! - While connected, every call sends its command, even when it changes
//!   nothing locally. The sample listener itself is only started or stopped
//!   on a real streaming transition.
//! - Local state changes only after the device acknowledged the command.
//! - Only one operation may be in flight; an overlapping call fails with
//!   [`Error::RequestInFlight`].
//!
//! ## Event Subscription
//!
//! ```no_run
//! use rxlink::{Session, SessionEvent};
//! # async fn example(session: &Session) {
//! let mut events = session.subscribe();
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         SessionEvent::FrequencyChanged { channel, frequency_hz } => {
//!             println!("{}: {}", channel, rxlink::format_freq_mhz(frequency_hz));
//!         }
//!         other => println!("{:?}", other),
//!     }
//! }
//! # }
//! ```

pub use rxlink_core::*;

pub use rxlink_protocol::{AckMatch, Command, FrameCodec, FrameDecoder, MessageCodec};
pub use rxlink_session::{
    LinkState, ResponseCorrelator, Session, SessionBuilder, SessionOptions,
};
pub use rxlink_transport::{TcpControlChannel, TcpControlOptions, UdpDataChannel, UdpDataOptions};

/// Wire codec internals: frame constants and encode/decode helpers.
pub mod protocol {
    pub use rxlink_protocol::codec::*;
}
