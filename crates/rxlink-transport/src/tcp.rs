//! TCP control channel.
//!
//! [`TcpControlChannel`] implements [`ControlChannel`] over a TCP stream to
//! the receiver's control port. Each connection runs two background tasks:
//!
//! - a read task that reassembles frames with [`FrameDecoder`] and hands
//!   them to the installed [`FrameSink`] in arrival order, and
//! - a write task that owns the write half and completes each `send` once
//!   the frame is flushed.
//!
//! Both tasks stop on the connection's [`CancellationToken`]. The sink's
//! `on_closed` fires exactly once per connection, whether the device hung
//! up, the stream broke, or [`disconnect`](ControlChannel::disconnect) was
//! called.
//!
//! # Example
//!
//! ```no_run
//! use rxlink_core::ControlChannel;
//! use rxlink_transport::TcpControlChannel;
//!
//! # async fn example() -> rxlink_core::Result<()> {
//! let channel = TcpControlChannel::new("192.168.1.50:50000");
//! channel.connect().await?;
//! assert!(channel.is_connected());
//! channel.disconnect();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use rxlink_core::error::{Error, Result};
use rxlink_core::transport::{ControlChannel, FrameSink, NullSink};
use rxlink_protocol::FrameDecoder;

/// Default connection timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_READ_BUFFER_SIZE: usize = 4096;
const DEFAULT_WRITE_QUEUE_DEPTH: usize = 32;

/// Tunables for [`TcpControlChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpControlOptions {
    /// Maximum time to wait for the TCP handshake.
    pub connect_timeout: Duration,
    /// Initial capacity of the read buffer.
    pub read_buffer_size: usize,
    /// Frames that may queue for the write task before `send` waits.
    pub write_queue_depth: usize,
}

impl Default for TcpControlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            write_queue_depth: DEFAULT_WRITE_QUEUE_DEPTH,
        }
    }
}

type SharedSink = Arc<Mutex<Arc<dyn FrameSink>>>;

/// A frame queued for the write task.
struct WriteRequest {
    frame: Bytes,
    done: oneshot::Sender<Result<()>>,
}

/// One established connection.
struct Link {
    /// Cleared by whoever closes the link first; that party notifies the sink.
    open: Arc<AtomicBool>,
    write_tx: mpsc::Sender<WriteRequest>,
    cancel: CancellationToken,
}

impl Link {
    /// Stop both tasks. Returns true if this call closed an open link.
    fn close(&self) -> bool {
        self.cancel.cancel();
        self.open.swap(false, Ordering::SeqCst)
    }
}

/// Control channel over TCP.
pub struct TcpControlChannel {
    addr: String,
    options: TcpControlOptions,
    sink: SharedSink,
    link: Mutex<Option<Link>>,
}

impl TcpControlChannel {
    /// Create a channel to `addr` (`host:port`) with default options.
    ///
    /// Nothing is connected until [`connect`](ControlChannel::connect).
    pub fn new(addr: &str) -> Self {
        Self::build(addr, TcpControlOptions::default())
    }

    /// Create a channel to `addr` with custom options.
    pub fn with_options(addr: &str, options: TcpControlOptions) -> Result<Self> {
        if options.read_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "read buffer size must be greater than zero".into(),
            ));
        }
        if options.write_queue_depth == 0 {
            return Err(Error::InvalidConfig(
                "write queue depth must be greater than zero".into(),
            ));
        }
        Ok(Self::build(addr, options))
    }

    fn build(addr: &str, options: TcpControlOptions) -> Self {
        TcpControlChannel {
            addr: addr.to_string(),
            options,
            sink: Arc::new(Mutex::new(Arc::new(NullSink))),
            link: Mutex::new(None),
        }
    }

    /// The address this channel connects to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// The options this channel was created with.
    pub fn options(&self) -> &TcpControlOptions {
        &self.options
    }

    fn notify_closed(&self) {
        let sink = self.sink.lock().clone();
        sink.on_closed();
    }
}

#[async_trait]
impl ControlChannel for TcpControlChannel {
    async fn connect(&self) -> Result<()> {
        self.disconnect();

        tracing::debug!(
            addr = %self.addr,
            timeout_ms = self.options.connect_timeout.as_millis(),
            "Connecting control channel"
        );

        let stream = tokio::time::timeout(
            self.options.connect_timeout,
            TcpStream::connect(&self.addr),
        )
        .await
        .map_err(|_| {
            tracing::error!(addr = %self.addr, "Control channel connect timed out");
            Error::Connection(format!(
                "connect to {} timed out after {} ms",
                self.addr,
                self.options.connect_timeout.as_millis()
            ))
        })?
        .map_err(|e| {
            tracing::error!(addr = %self.addr, error = %e, "Control channel connect failed");
            map_connect_error(e, &self.addr)
        })?;

        // Commands are tiny and latency-sensitive.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(
                addr = %self.addr,
                error = %e,
                "Failed to set TCP_NODELAY (continuing anyway)"
            );
        }

        let (read_half, write_half) = stream.into_split();
        let open = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let (write_tx, write_rx) = mpsc::channel(self.options.write_queue_depth);

        tokio::spawn(read_loop(
            read_half,
            Arc::clone(&self.sink),
            Arc::clone(&open),
            cancel.clone(),
            self.options.read_buffer_size,
            self.addr.clone(),
        ));
        tokio::spawn(write_loop(
            write_half,
            write_rx,
            cancel.clone(),
            self.addr.clone(),
        ));

        let previous = self.link.lock().replace(Link {
            open,
            write_tx,
            cancel,
        });
        // A concurrent connect finished first; its link is superseded.
        if let Some(previous) = previous {
            if previous.close() {
                self.notify_closed();
            }
        }

        tracing::info!(addr = %self.addr, "Control channel connected");
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<()> {
        let write_tx = {
            let link = self.link.lock();
            match link.as_ref() {
                Some(link) if link.open.load(Ordering::SeqCst) => link.write_tx.clone(),
                _ => return Err(Error::NotConnected),
            }
        };

        let (done_tx, done_rx) = oneshot::channel();
        write_tx
            .send(WriteRequest {
                frame: Bytes::copy_from_slice(frame),
                done: done_tx,
            })
            .await
            .map_err(|_| Error::Connection("control channel writer stopped".into()))?;

        done_rx.await.map_err(|_| {
            Error::Connection("control channel closed before the frame was written".into())
        })?
    }

    fn disconnect(&self) {
        let Some(link) = self.link.lock().take() else {
            tracing::trace!(addr = %self.addr, "Control channel already down");
            return;
        };
        if link.close() {
            self.notify_closed();
        }
        tracing::debug!(addr = %self.addr, "Control channel disconnected");
    }

    fn is_connected(&self) -> bool {
        self.link
            .lock()
            .as_ref()
            .is_some_and(|link| link.open.load(Ordering::SeqCst))
    }

    fn set_sink(&self, sink: Arc<dyn FrameSink>) {
        *self.sink.lock() = sink;
    }
}

impl Drop for TcpControlChannel {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            tracing::debug!(addr = %self.addr, "TcpControlChannel dropped, closing connection");
            link.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Reads the stream and delivers complete frames to the sink.
async fn read_loop(
    mut reader: OwnedReadHalf,
    sink: SharedSink,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
    buffer_size: usize,
    addr: String,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = BytesMut::with_capacity(buffer_size);

    loop {
        buf.reserve(buffer_size);
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::trace!(addr = %addr, "Control read task cancelled");
                return;
            }
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(addr = %addr, "Control channel closed by device");
                    break;
                }
                Ok(n) => {
                    tracing::trace!(addr = %addr, bytes = n, "Received data");
                    if !dispatch_frames(&mut decoder, &mut buf, &sink, &addr) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(addr = %addr, error = %e, "Control channel read failed");
                    break;
                }
            },
        }
    }

    cancel.cancel();
    if open.swap(false, Ordering::SeqCst) {
        let sink = sink.lock().clone();
        sink.on_closed();
    }
}

/// Deliver every complete frame in `buf`. Returns false if the stream can
/// no longer be framed.
fn dispatch_frames(
    decoder: &mut FrameDecoder,
    buf: &mut BytesMut,
    sink: &SharedSink,
    addr: &str,
) -> bool {
    loop {
        match decoder.decode(buf) {
            Ok(Some(frame)) => {
                let sink = sink.lock().clone();
                sink.on_frame(frame);
            }
            Ok(None) => return true,
            Err(e) => {
                tracing::warn!(addr = %addr, error = %e, "Unframeable control data; closing channel");
                return false;
            }
        }
    }
}

/// Owns the write half and writes queued frames in order.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<WriteRequest>,
    cancel: CancellationToken,
    addr: String,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            request = rx.recv() => {
                let Some(WriteRequest { frame, done }) = request else {
                    break;
                };
                tracing::trace!(addr = %addr, bytes = frame.len(), "Writing frame");
                let result = write_frame(&mut writer, &frame).await;
                if let Err(e) = &result {
                    tracing::warn!(addr = %addr, error = %e, "Failed to write frame");
                }
                let _ = done.send(result);
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        tracing::trace!(addr = %addr, error = %e, "Write half shutdown failed");
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &[u8]) -> Result<()> {
    writer.write_all(frame).await.map_err(map_io_error)?;
    writer.flush().await.map_err(map_io_error)
}

/// Map a connection-time I/O error to a connection error.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Connection(format!("connection refused: {}", addr))
        }
        _ => Error::Connection(format!("failed to connect to {}: {}", addr, e)),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => {
            Error::Connection(format!("connection lost: {}", e))
        }
        _ => Error::Io(e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use rxlink_protocol::codec::{self, Command};
    use rxlink_test_harness::MockDeviceServer;
    use tokio::net::TcpListener;

    /// Forwards frames to a channel and counts closures.
    struct ChannelSink {
        frames: mpsc::UnboundedSender<Bytes>,
        closed: AtomicUsize,
    }

    impl FrameSink for ChannelSink {
        fn on_frame(&self, frame: Bytes) {
            let _ = self.frames.send(frame);
        }

        fn on_closed(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sink() -> (Arc<ChannelSink>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(ChannelSink {
            frames: tx,
            closed: AtomicUsize::new(0),
        });
        (sink, rx)
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Bytes {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("sink channel closed")
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn send_receives_ack() {
        let mut server = MockDeviceServer::new().await.unwrap();
        server.start();

        let channel = TcpControlChannel::new(server.addr());
        let (sink, mut rx) = sink();
        channel.set_sink(sink.clone());

        channel.connect().await.unwrap();
        assert!(channel.is_connected());

        let hello = codec::encode_command(&Command::Hello);
        channel.send(&hello).await.unwrap();

        let ack = next_frame(&mut rx).await;
        assert_eq!(ack, codec::encode_ack(&hello, codec::STATUS_OK).unwrap());

        channel.disconnect();
        assert!(!channel.is_connected());
        assert_eq!(sink.closed.load(Ordering::SeqCst), 1);

        let commands = server.wait().await.unwrap();
        assert_eq!(commands, vec![Command::Hello]);
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let channel = TcpControlChannel::new(&addr);
        let err = channel.connect().await.unwrap_err();
        match &err {
            Error::Connection(msg) => assert!(
                msg.contains("connection refused"),
                "expected 'connection refused' in message, got: {}",
                msg
            ),
            other => panic!("expected Connection error, got: {:?}", other),
        }
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn send_when_not_connected() {
        let channel = TcpControlChannel::new("127.0.0.1:1");
        let result = channel.send(&codec::encode_command(&Command::Hello)).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mut server = MockDeviceServer::new().await.unwrap();
        server.start();

        let channel = TcpControlChannel::new(server.addr());
        let (sink, _rx) = sink();
        channel.set_sink(sink.clone());

        // Never connected: nothing to notify.
        channel.disconnect();
        assert_eq!(sink.closed.load(Ordering::SeqCst), 0);

        channel.connect().await.unwrap();
        channel.disconnect();
        channel.disconnect();
        assert_eq!(sink.closed.load(Ordering::SeqCst), 1);

        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn device_hang_up_notifies_sink() {
        let mut server = MockDeviceServer::new().await.unwrap();
        server.hang_up_on(1);
        server.start();

        let channel = TcpControlChannel::new(server.addr());
        let (sink, _rx) = sink();
        channel.set_sink(sink.clone());
        channel.connect().await.unwrap();

        channel
            .send(&codec::encode_command(&Command::StreamStart))
            .await
            .unwrap();

        wait_until(|| sink.closed.load(Ordering::SeqCst) == 1).await;
        assert!(!channel.is_connected());

        // The read task already reported the closure.
        channel.disconnect();
        assert_eq!(sink.closed.load(Ordering::SeqCst), 1);
        server.wait().await.unwrap();
    }

    #[tokio::test]
    async fn frames_split_across_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let status = codec::encode_status(b"tuner locked");
        let expected = status.clone();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (head, tail) = status.split_at(3);
            stream.write_all(head).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            stream.write_all(tail).await.unwrap();
            // Two frames in one write.
            stream.write_all(&[&status[..], &status[..]].concat()).await.unwrap();
            stream.flush().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf).await;
        });

        let channel = TcpControlChannel::new(&addr);
        let (sink, mut rx) = sink();
        channel.set_sink(sink);
        channel.connect().await.unwrap();

        for _ in 0..3 {
            assert_eq!(next_frame(&mut rx).await, expected);
        }

        channel.disconnect();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn oversize_header_closes_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[0xFF, 0xFF, 0x41]).await.unwrap();
            stream.flush().await.unwrap();
            let mut buf = [0u8; 16];
            let _ = stream.read(&mut buf).await;
        });

        let channel = TcpControlChannel::new(&addr);
        let (sink, _rx) = sink();
        channel.set_sink(sink.clone());
        channel.connect().await.unwrap();

        wait_until(|| sink.closed.load(Ordering::SeqCst) == 1).await;
        assert!(!channel.is_connected());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_replaces_previous_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Accept two clients; report whether the first saw EOF.
        let server = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            let (_second, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            first.read(&mut buf).await.unwrap()
        });

        let channel = TcpControlChannel::new(&addr);
        let (sink, _rx) = sink();
        channel.set_sink(sink.clone());

        channel.connect().await.unwrap();
        channel.connect().await.unwrap();
        assert!(channel.is_connected());
        assert_eq!(sink.closed.load(Ordering::SeqCst), 1);

        assert_eq!(server.await.unwrap(), 0);
        channel.disconnect();
    }

    #[test]
    fn options_defaults() {
        let opts = TcpControlOptions::default();
        assert_eq!(opts.connect_timeout, Duration::from_secs(5));
        assert_eq!(opts.read_buffer_size, 4096);
        assert_eq!(opts.write_queue_depth, 32);
    }

    #[test]
    fn zero_queue_depth_rejected() {
        let opts = TcpControlOptions {
            write_queue_depth: 0,
            ..TcpControlOptions::default()
        };
        let result = TcpControlChannel::with_options("127.0.0.1:1", opts);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn addr_accessor() {
        let channel = TcpControlChannel::new("10.0.0.7:50000");
        assert_eq!(channel.addr(), "10.0.0.7:50000");
        assert!(!channel.is_connected());
    }
}
