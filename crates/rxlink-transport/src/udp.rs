//! UDP sample channel.
//!
//! [`UdpDataChannel`] implements [`DataChannel`] for receivers that push IQ
//! samples as UDP datagrams. Starting the channel binds a socket and spawns
//! a receive loop; every datagram is forwarded, unparsed, into a bounded
//! queue whose receiving end was handed out at construction. If the
//! consumer falls behind, datagrams are dropped rather than stalling the
//! socket.
//!
//! # Example
//!
//! ```no_run
//! use rxlink_core::DataChannel;
//! use rxlink_transport::{UdpDataChannel, UdpDataOptions};
//!
//! # async fn example() -> rxlink_core::Result<()> {
//! let (channel, mut samples) = UdpDataChannel::with_options(UdpDataOptions {
//!     bind_addr: "0.0.0.0:50001".to_string(),
//!     ..UdpDataOptions::default()
//! })?;
//! channel.start_listening().await?;
//! while let Some(datagram) = samples.recv().await {
//!     println!("{} bytes of IQ", datagram.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rxlink_core::error::{Error, Result};
use rxlink_core::transport::DataChannel;

/// Tunables for [`UdpDataChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpDataOptions {
    /// Local address to bind when listening starts.
    pub bind_addr: String,
    /// Receive buffer size; longer datagrams are truncated by the OS.
    pub max_datagram_size: usize,
    /// Datagrams buffered for the consumer before new ones are dropped.
    pub sample_queue_depth: usize,
}

impl Default for UdpDataOptions {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:0".to_string(),
            max_datagram_size: 65_536,
            sample_queue_depth: 256,
        }
    }
}

/// A running receive loop.
struct Listener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

/// Sample channel over UDP.
pub struct UdpDataChannel {
    options: UdpDataOptions,
    samples: mpsc::Sender<Bytes>,
    listener: Mutex<Option<Listener>>,
}

impl UdpDataChannel {
    /// Create a channel with default options, returning it together with
    /// the receiving end of the sample queue.
    pub fn new() -> (Self, mpsc::Receiver<Bytes>) {
        Self::build(UdpDataOptions::default())
    }

    /// Create a channel with custom options.
    pub fn with_options(options: UdpDataOptions) -> Result<(Self, mpsc::Receiver<Bytes>)> {
        if options.max_datagram_size == 0 {
            return Err(Error::InvalidConfig(
                "max datagram size must be greater than zero".into(),
            ));
        }
        if options.sample_queue_depth == 0 {
            return Err(Error::InvalidConfig(
                "sample queue depth must be greater than zero".into(),
            ));
        }
        Ok(Self::build(options))
    }

    fn build(options: UdpDataOptions) -> (Self, mpsc::Receiver<Bytes>) {
        let (samples, rx) = mpsc::channel(options.sample_queue_depth);
        let channel = UdpDataChannel {
            options,
            samples,
            listener: Mutex::new(None),
        };
        (channel, rx)
    }

    /// The bound address while listening.
    ///
    /// Useful when binding to port 0 to discover the assigned port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().as_ref().map(|l| l.local_addr)
    }

    /// Whether the receive loop is running.
    pub fn is_listening(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// The options this channel was created with.
    pub fn options(&self) -> &UdpDataOptions {
        &self.options
    }
}

#[async_trait]
impl DataChannel for UdpDataChannel {
    async fn start_listening(&self) -> Result<()> {
        if self.is_listening() {
            tracing::debug!("Sample listener already running");
            return Ok(());
        }

        let bind_addr = &self.options.bind_addr;
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| {
            tracing::error!(addr = %bind_addr, error = %e, "Failed to bind sample socket");
            Error::Io(e)
        })?;
        let local_addr = socket.local_addr()?;

        let cancel = CancellationToken::new();
        {
            let mut listener = self.listener.lock();
            if listener.is_some() {
                // Lost a race with a concurrent start; drop our socket.
                return Ok(());
            }
            *listener = Some(Listener {
                local_addr,
                cancel: cancel.clone(),
            });
        }

        tokio::spawn(receive_loop(
            socket,
            self.samples.clone(),
            cancel,
            self.options.max_datagram_size,
        ));

        tracing::debug!(local_addr = %local_addr, "Sample listener started");
        Ok(())
    }

    fn stop_listening(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.cancel.cancel();
            tracing::debug!(local_addr = %listener.local_addr, "Sample listener stopped");
        }
    }
}

impl Drop for UdpDataChannel {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.cancel.cancel();
        }
    }
}

/// Receives datagrams until cancelled or the consumer goes away.
async fn receive_loop(
    socket: UdpSocket,
    samples: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    max_datagram_size: usize,
) {
    let mut buf = vec![0u8; max_datagram_size];

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, src)) => {
                    let datagram = Bytes::copy_from_slice(&buf[..n]);
                    match samples.try_send(datagram) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::trace!(src = %src, bytes = n, "Sample datagram dropped (consumer too slow)");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            tracing::debug!("Sample consumer gone; stopping receive loop");
                            break;
                        }
                    }
                }
                Err(e) => {
                    // Non-fatal for UDP (e.g. ICMP port unreachable on some platforms).
                    tracing::trace!(error = %e, "UDP recv error");
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback() -> UdpDataOptions {
        UdpDataOptions {
            bind_addr: "127.0.0.1:0".to_string(),
            ..UdpDataOptions::default()
        }
    }

    async fn sender() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    #[tokio::test]
    async fn forwards_datagrams() {
        let (channel, mut rx) = UdpDataChannel::with_options(loopback()).unwrap();
        channel.start_listening().await.unwrap();
        let target = channel.local_addr().unwrap();

        let tx = sender().await;
        tx.send_to(&[1, 2, 3, 4], target).await.unwrap();
        tx.send_to(&[5, 6], target).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&first[..], &[1, 2, 3, 4]);
        assert_eq!(&second[..], &[5, 6]);

        channel.stop_listening();
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (channel, _rx) = UdpDataChannel::with_options(loopback()).unwrap();
        channel.start_listening().await.unwrap();
        let addr = channel.local_addr();

        channel.start_listening().await.unwrap();
        assert_eq!(channel.local_addr(), addr);
        assert!(channel.is_listening());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (channel, _rx) = UdpDataChannel::with_options(loopback()).unwrap();
        channel.stop_listening();

        channel.start_listening().await.unwrap();
        channel.stop_listening();
        channel.stop_listening();
        assert!(!channel.is_listening());
        assert_eq!(channel.local_addr(), None);
    }

    #[tokio::test]
    async fn stop_halts_delivery() {
        let (channel, mut rx) = UdpDataChannel::with_options(loopback()).unwrap();
        channel.start_listening().await.unwrap();
        let target = channel.local_addr().unwrap();
        channel.stop_listening();

        // Let the receive loop observe cancellation.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let tx = sender().await;
        let _ = tx.send_to(&[9, 9, 9], target).await;

        let got = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(got.is_err() || got.unwrap().is_none());
    }

    #[tokio::test]
    async fn slow_consumer_drops_datagrams() {
        let (channel, mut rx) = UdpDataChannel::with_options(UdpDataOptions {
            sample_queue_depth: 2,
            ..loopback()
        })
        .unwrap();
        channel.start_listening().await.unwrap();
        let target = channel.local_addr().unwrap();

        let tx = sender().await;
        for i in 0..10u8 {
            tx.send_to(&[i], target).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert!(received <= 2, "queue should hold at most 2, got {}", received);
        channel.stop_listening();
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let (channel, _rx) = UdpDataChannel::with_options(UdpDataOptions {
            bind_addr: "not-an-address".to_string(),
            ..UdpDataOptions::default()
        })
        .unwrap();
        let err = channel.start_listening().await.unwrap_err();
        assert!(err.is_connection());
        assert!(!channel.is_listening());
    }

    #[test]
    fn options_defaults() {
        let opts = UdpDataOptions::default();
        assert_eq!(opts.bind_addr, "0.0.0.0:0");
        assert_eq!(opts.max_datagram_size, 65_536);
        assert_eq!(opts.sample_queue_depth, 256);
    }

    #[test]
    fn zero_sizes_rejected() {
        let result = UdpDataChannel::with_options(UdpDataOptions {
            sample_queue_depth: 0,
            ..UdpDataOptions::default()
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        let result = UdpDataChannel::with_options(UdpDataOptions {
            max_datagram_size: 0,
            ..UdpDataOptions::default()
        });
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
