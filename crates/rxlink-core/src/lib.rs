//! rxlink-core: Core traits, types, and error definitions for rxlink.
//!
//! This crate defines the device-agnostic abstractions the session and the
//! concrete channels share. Applications that only drive a session depend
//! on these types without pulling in any socket code.
//!
//! # Key types
//!
//! - [`ControlChannel`] / [`DataChannel`] -- the two channels to a receiver
//! - [`FrameSink`] -- receiver of inbound control frames
//! - [`SessionEvent`] -- asynchronous state change notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::SessionEvent;
pub use transport::{ControlChannel, DataChannel, FrameSink, NullSink};
pub use types::{FrequencyTarget, TunerChannel, format_freq_mhz};
