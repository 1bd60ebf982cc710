//! Mock control and data channels for deterministic session testing.
//!
//! [`MockControlChannel`] implements [`ControlChannel`] without sockets. It
//! records every call and every frame, and answers command frames according
//! to an [`AckMode`]. Acknowledgements are delivered from a freshly spawned
//! task, the way a real read loop would deliver them, so the session's
//! cross-task resumption is exercised on every exchange.
//!
//! [`MockDataChannel`] implements [`DataChannel`] and only counts calls.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rxlink_core::ControlChannel;
//! use rxlink_test_harness::{AckMode, MockControlChannel};
//!
//! # async fn example() -> rxlink_core::Result<()> {
//! let control = Arc::new(MockControlChannel::new());
//! control.set_ack_mode(AckMode::Reject(0x05));
//! control.connect().await?;
//! assert_eq!(control.connect_calls(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use rxlink_core::error::{Error, Result};
use rxlink_core::transport::{ControlChannel, DataChannel, FrameSink, NullSink};
use rxlink_protocol::codec::{self, Command, STATUS_OK};

/// How [`MockControlChannel`] answers each command frame it is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Acknowledge every command with status `0x00`.
    AutoAck,
    /// Acknowledge every command with the given non-zero status.
    Reject(u8),
    /// Never answer; the test drives replies through
    /// [`MockControlChannel::deliver`] or [`MockControlChannel::close`].
    Silent,
}

/// A scriptable [`ControlChannel`] that records everything it is asked to do.
pub struct MockControlChannel {
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    connected_reads: AtomicUsize,
    fail_connect: AtomicBool,
    fail_send: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    ack_mode: Mutex<AckMode>,
    sent: Mutex<Vec<Bytes>>,
    sink: Mutex<Arc<dyn FrameSink>>,
}

impl MockControlChannel {
    /// Create a disconnected mock that auto-acknowledges every command.
    pub fn new() -> Self {
        MockControlChannel {
            connected: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            connected_reads: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            connect_delay: Mutex::new(None),
            ack_mode: Mutex::new(AckMode::AutoAck),
            sent: Mutex::new(Vec::new()),
            sink: Mutex::new(Arc::new(NullSink)),
        }
    }

    /// Change how subsequent command frames are answered.
    pub fn set_ack_mode(&self, mode: AckMode) {
        *self.ack_mode.lock() = mode;
    }

    /// Make subsequent `connect()` calls fail with a connection error.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `send()` calls fail with a connection error.
    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `connect()` calls take `delay` before completing.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }

    /// Force the connectivity flag without counting a connect call.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Deliver a frame to the installed sink on the caller's task.
    pub fn deliver(&self, frame: Bytes) {
        let sink = Arc::clone(&*self.sink.lock());
        sink.on_frame(frame);
    }

    /// Simulate the peer closing the channel.
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let sink = Arc::clone(&*self.sink.lock());
        sink.on_closed();
    }

    /// Number of `connect()` calls, successful or not.
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of `disconnect()` calls.
    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Number of times the connectivity flag was read.
    pub fn connected_reads(&self) -> usize {
        self.connected_reads.load(Ordering::SeqCst)
    }

    /// Every frame handed to `send()`, in order.
    pub fn sent_frames(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Number of frames handed to `send()`.
    pub fn frames_sent(&self) -> usize {
        self.sent.lock().len()
    }

    /// Every sent frame decoded back into a [`Command`].
    ///
    /// Frames that do not decode are skipped.
    pub fn sent_commands(&self) -> Vec<Command> {
        self.sent
            .lock()
            .iter()
            .filter_map(|f| codec::decode_command(f).ok())
            .collect()
    }
}

impl Default for MockControlChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlChannel for MockControlChannel {
    async fn connect(&self) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Connection("mock connect refused".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Error::Connection("mock send failed".into()));
        }

        self.sent.lock().push(Bytes::copy_from_slice(frame));

        let status = match *self.ack_mode.lock() {
            AckMode::AutoAck => STATUS_OK,
            AckMode::Reject(status) => status,
            AckMode::Silent => return Ok(()),
        };

        let ack = codec::encode_ack(frame, status)?;
        let sink = Arc::clone(&*self.sink.lock());
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            sink.on_frame(ack);
        });
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            let sink = Arc::clone(&*self.sink.lock());
            sink.on_closed();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected_reads.fetch_add(1, Ordering::SeqCst);
        self.connected.load(Ordering::SeqCst)
    }

    fn set_sink(&self, sink: Arc<dyn FrameSink>) {
        *self.sink.lock() = sink;
    }
}

/// A [`DataChannel`] that counts start/stop calls.
#[derive(Debug, Default)]
pub struct MockDataChannel {
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    listening: AtomicBool,
    fail_start: AtomicBool,
}

impl MockDataChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `start_listening()` calls fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Whether the listener is running from this mock's point of view.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    async fn start_listening(&self) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::Connection("mock listener failed to start".into()));
        }
        self.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop_listening(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.listening.store(false, Ordering::SeqCst);
    }
}
