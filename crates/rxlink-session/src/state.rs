//! Session link state.
//!
//! Connectivity and streaming are carried in one tagged value so that
//! "streaming while disconnected" cannot be represented.

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No bootstrapped device session.
    #[default]
    Disconnected,
    /// The bootstrap sequence was acknowledged.
    Connected {
        /// Whether the device acknowledged a stream start and the local
        /// sample listener is running.
        streaming: bool,
    },
}

impl LinkState {
    pub fn is_connected(self) -> bool {
        matches!(self, LinkState::Connected { .. })
    }

    pub fn is_streaming(self) -> bool {
        matches!(self, LinkState::Connected { streaming: true })
    }
}
