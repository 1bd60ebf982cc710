//! Error types for rxlink.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Channel-level, protocol-level, and
//! concurrency errors are all captured here.

/// The error type for all rxlink operations.
///
/// Variants follow the failure modes of a control session: the channel
/// could not be established or written to, the device answered with
/// something that is not a valid acknowledgement, or the caller tried to
/// overlap two command exchanges.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The control or data channel could not be established, or a send
    /// could not be handed to the medium.
    #[error("connection error: {0}")]
    Connection(String),

    /// A protocol-level failure: the control channel dropped while a
    /// request was outstanding, a received frame could not be decoded, or
    /// the device rejected a command.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A correlated exchange was attempted while another one is still
    /// awaiting its acknowledgement.
    ///
    /// Exchanges are never queued or interleaved; callers must serialize.
    #[error("concurrency error: a command is already awaiting acknowledgement")]
    RequestInFlight,

    /// Timed out waiting for an acknowledgement.
    ///
    /// Only produced when a command timeout has been configured.
    #[error("timeout waiting for acknowledgement")]
    Timeout,

    /// A channel primitive was used while the medium is down.
    #[error("not connected")]
    NotConnected,

    /// The outstanding exchange was abandoned by a local disconnect.
    #[error("exchange cancelled by disconnect")]
    Cancelled,

    /// A builder or options struct failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this is a channel-level failure (connect, send, or I/O).
    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::NotConnected | Error::Io(_))
    }

    /// Whether this is a protocol-level failure.
    ///
    /// Includes [`Error::Cancelled`]: the control channel went away while a
    /// request was awaiting its acknowledgement, just torn down locally.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Cancelled)
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
