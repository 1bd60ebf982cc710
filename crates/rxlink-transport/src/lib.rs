//! Channel implementations for rxlink.
//!
//! This crate provides concrete implementations of the channel traits from
//! `rxlink-core`:
//!
//! - [`TcpControlChannel`]: the reliable command/acknowledgement channel
//!   over TCP, with background read and write tasks
//! - [`UdpDataChannel`]: the best-effort IQ sample channel over UDP,
//!   forwarding datagrams into a bounded queue
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rxlink_session::SessionBuilder;
//! use rxlink_transport::{TcpControlChannel, UdpDataChannel};
//!
//! # async fn example() -> rxlink_core::Result<()> {
//! let control = Arc::new(TcpControlChannel::new("192.168.1.50:50000"));
//! let (data, mut samples) = UdpDataChannel::new();
//!
//! let session = SessionBuilder::new(control, Arc::new(data)).build()?;
//! session.connect().await?;
//! session.start_streaming().await?;
//! let first = samples.recv().await;
//! # Ok(())
//! # }
//! ```

pub mod tcp;
pub mod udp;

pub use tcp::{TcpControlChannel, TcpControlOptions};
pub use udp::{UdpDataChannel, UdpDataOptions};
