//! rxlink-test-harness: Mock channels and a mock device for rxlink tests.
//!
//! This crate provides [`MockControlChannel`] and [`MockDataChannel`] for
//! deterministic session testing without sockets, and [`MockDeviceServer`]
//! for testing the TCP control channel against a scripted receiver.

pub mod mock_channel;
pub mod mock_tcp;

pub use mock_channel::{AckMode, MockControlChannel, MockDataChannel};
pub use mock_tcp::MockDeviceServer;
