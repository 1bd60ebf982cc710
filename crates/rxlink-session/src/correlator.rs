//! Command/acknowledgement correlation over a control channel.
//!
//! A [`ControlChannel`] only offers a fire-and-forget `send` plus a
//! [`FrameSink`] callback for inbound frames. [`ResponseCorrelator`] turns
//! that pair into a single awaitable exchange, [`send_and_await`], with at
//! most one exchange outstanding at a time.
//!
//! The outstanding request lives in a slot owned by the correlator. The
//! slot is the channel's sink: each inbound frame is classified by the
//! [`MessageCodec`] against the pending command frame, and a matching
//! acknowledgement completes the request's `oneshot` from whichever task
//! delivered it. Every request carries a generation id, and a request
//! only ever clears the slot if the slot still holds its own id, so a late
//! frame or a late cleanup can never touch a newer request.
//!
//! [`send_and_await`]: ResponseCorrelator::send_and_await

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use rxlink_core::error::{Error, Result};
use rxlink_core::events::SessionEvent;
use rxlink_core::transport::{ControlChannel, FrameSink};
use rxlink_protocol::codec::{AckMatch, MessageCodec};

/// An in-flight command awaiting its acknowledgement.
struct PendingRequest {
    id: u64,
    frame: Bytes,
    reply: oneshot::Sender<Result<Bytes>>,
}

/// The single pending-request slot, installed as the channel's sink.
struct PendingSlot {
    codec: Arc<dyn MessageCodec>,
    current: Mutex<Option<PendingRequest>>,
    next_id: AtomicU64,
    event_tx: Option<broadcast::Sender<SessionEvent>>,
}

impl PendingSlot {
    /// Occupy the slot, or fail fast if another request holds it.
    fn register(&self, frame: Bytes, reply: oneshot::Sender<Result<Bytes>>) -> Result<u64> {
        let mut current = self.current.lock();
        if current.is_some() {
            return Err(Error::RequestInFlight);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *current = Some(PendingRequest { id, frame, reply });
        Ok(id)
    }

    /// Drop the request with `id` if it still occupies the slot.
    fn release(&self, id: u64) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|req| req.id == id) {
            *current = None;
        }
    }

    /// Fail whatever request occupies the slot with `err`.
    fn fail_current(&self, err: Error) -> bool {
        let taken = self.current.lock().take();
        match taken {
            Some(req) => {
                tracing::debug!(id = req.id, error = %err, "Failing pending request");
                let _ = req.reply.send(Err(err));
                true
            }
            None => false,
        }
    }

    fn is_occupied(&self) -> bool {
        self.current.lock().is_some()
    }
}

impl FrameSink for PendingSlot {
    fn on_frame(&self, frame: Bytes) {
        let mut current = self.current.lock();
        let Some(req) = current.as_ref() else {
            tracing::trace!(bytes = frame.len(), "Frame with no pending request; ignored");
            return;
        };

        let outcome = match self.codec.classify(&req.frame, &frame) {
            AckMatch::Accepted => Ok(frame),
            AckMatch::Rejected { status } => Err(Error::Protocol(format!(
                "device rejected command (status 0x{status:02X})"
            ))),
            AckMatch::Malformed(reason) => Err(Error::Protocol(format!(
                "undecodable frame while awaiting acknowledgement: {reason}"
            ))),
            AckMatch::Unrelated => {
                tracing::trace!(
                    id = req.id,
                    bytes = frame.len(),
                    "Frame does not acknowledge the pending command; ignored"
                );
                return;
            }
        };

        if let Some(req) = current.take() {
            tracing::trace!(id = req.id, ok = outcome.is_ok(), "Pending request resolved");
            // The waiter may already be gone (cancelled); nothing to do then.
            let _ = req.reply.send(outcome);
        }
    }

    fn on_closed(&self) {
        tracing::debug!("Control channel closed");
        self.fail_current(Error::Protocol(
            "control channel closed while awaiting acknowledgement".into(),
        ));
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(SessionEvent::ControlChannelClosed);
        }
    }
}

/// Releases a request's slot when its exchange ends, however it ends.
struct SlotGuard<'a> {
    slot: &'a PendingSlot,
    id: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.release(self.id);
    }
}

/// Serialized send-and-wait exchange over a [`ControlChannel`].
pub struct ResponseCorrelator {
    channel: Arc<dyn ControlChannel>,
    slot: Arc<PendingSlot>,
    command_timeout: Option<Duration>,
}

impl ResponseCorrelator {
    /// Create a correlator and install it as `channel`'s frame sink.
    ///
    /// With `command_timeout` set, an exchange that is not acknowledged in
    /// time fails with [`Error::Timeout`]; with `None` it waits until the
    /// acknowledgement arrives or the channel closes.
    pub fn new(
        channel: Arc<dyn ControlChannel>,
        codec: Arc<dyn MessageCodec>,
        command_timeout: Option<Duration>,
    ) -> Self {
        Self::with_events(channel, codec, command_timeout, None)
    }

    pub(crate) fn with_events(
        channel: Arc<dyn ControlChannel>,
        codec: Arc<dyn MessageCodec>,
        command_timeout: Option<Duration>,
        event_tx: Option<broadcast::Sender<SessionEvent>>,
    ) -> Self {
        let slot = Arc::new(PendingSlot {
            codec,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
            event_tx,
        });
        channel.set_sink(slot.clone());
        ResponseCorrelator {
            channel,
            slot,
            command_timeout,
        }
    }

    /// Send `frame` and wait for its acknowledgement.
    ///
    /// Resolves with the acknowledgement frame. Fails with
    /// [`Error::RequestInFlight`] if another exchange is outstanding, with
    /// [`Error::Protocol`] if the channel closes first or the device answers
    /// with a rejection or garbage, and with the channel's own error if the
    /// send fails. Dropping the returned future abandons the request and
    /// frees the slot.
    pub async fn send_and_await(&self, frame: Bytes) -> Result<Bytes> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let id = self.slot.register(frame.clone(), reply_tx)?;
        let _guard = SlotGuard {
            slot: &self.slot,
            id,
        };

        tracing::trace!(id = id, bytes = frame.len(), "Sending frame");
        self.channel.send(&frame).await?;

        let reply = match self.command_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    tracing::debug!(
                        id = id,
                        timeout_ms = limit.as_millis(),
                        "Acknowledgement timed out"
                    );
                    return Err(Error::Timeout);
                }
            },
            None => reply_rx.await,
        };

        match reply {
            Ok(result) => result,
            // Sender dropped without a verdict.
            Err(_) => Err(Error::Cancelled),
        }
    }

    /// Fail the outstanding exchange, if any, with [`Error::Cancelled`].
    ///
    /// Returns whether an exchange was pending.
    pub fn abort(&self) -> bool {
        self.slot.fail_current(Error::Cancelled)
    }

    /// Whether an exchange is currently awaiting its acknowledgement.
    pub fn is_pending(&self) -> bool {
        self.slot.is_occupied()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rxlink_protocol::codec::{Command, FrameCodec, STATUS_OK, encode_ack, encode_status};
    use rxlink_test_harness::{AckMode, MockControlChannel};

    async fn connected_mock(mode: AckMode) -> Arc<MockControlChannel> {
        let mock = Arc::new(MockControlChannel::new());
        mock.set_ack_mode(mode);
        mock.connect().await.unwrap();
        mock
    }

    fn correlator(mock: &Arc<MockControlChannel>, timeout: Option<Duration>) -> Arc<ResponseCorrelator> {
        Arc::new(ResponseCorrelator::new(
            mock.clone(),
            Arc::new(FrameCodec),
            timeout,
        ))
    }

    fn frame(cmd: Command) -> Bytes {
        FrameCodec.encode(&cmd)
    }

    async fn wait_pending(corr: &ResponseCorrelator) {
        for _ in 0..100 {
            if corr.is_pending() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("request never became pending");
    }

    #[tokio::test]
    async fn test_resolves_with_ack() {
        let mock = connected_mock(AckMode::AutoAck).await;
        let corr = correlator(&mock, None);

        let cmd = frame(Command::StreamStart);
        let ack = corr.send_and_await(cmd.clone()).await.unwrap();
        assert_eq!(ack, encode_ack(&cmd, STATUS_OK).unwrap());
        assert!(!corr.is_pending());
        assert_eq!(mock.frames_sent(), 1);
    }

    #[tokio::test]
    async fn test_second_request_fails_fast() {
        let mock = connected_mock(AckMode::Silent).await;
        let corr = correlator(&mock, None);

        let first = {
            let corr = corr.clone();
            tokio::spawn(async move { corr.send_and_await(frame(Command::Hello)).await })
        };
        wait_pending(&corr).await;

        let second = corr.send_and_await(frame(Command::Identify)).await;
        assert!(matches!(second, Err(Error::RequestInFlight)));
        // The rejected call never reached the channel.
        assert_eq!(mock.frames_sent(), 1);

        mock.deliver(encode_ack(&frame(Command::Hello), STATUS_OK).unwrap());
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_channel_close_fails_pending() {
        let mock = connected_mock(AckMode::Silent).await;
        let corr = correlator(&mock, None);

        let pending = {
            let corr = corr.clone();
            tokio::spawn(async move { corr.send_and_await(frame(Command::StreamStop)).await })
        };
        wait_pending(&corr).await;
        mock.close();

        let result = pending.await.unwrap();
        match result {
            Err(Error::Protocol(msg)) => assert!(msg.contains("closed"), "msg = {}", msg),
            other => panic!("expected Protocol error, got: {:?}", other),
        }
        assert!(!corr.is_pending());
    }

    #[tokio::test]
    async fn test_rejection_is_protocol_error() {
        let mock = connected_mock(AckMode::Reject(0x21)).await;
        let corr = correlator(&mock, None);

        let result = corr.send_and_await(frame(Command::Configure)).await;
        match result {
            Err(Error::Protocol(msg)) => assert!(msg.contains("0x21"), "msg = {}", msg),
            other => panic!("expected Protocol error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_garbled_frame_is_protocol_error() {
        let mock = connected_mock(AckMode::Silent).await;
        let corr = correlator(&mock, None);

        let pending = {
            let corr = corr.clone();
            tokio::spawn(async move { corr.send_and_await(frame(Command::Hello)).await })
        };
        wait_pending(&corr).await;
        mock.deliver(Bytes::from_static(&[0x00, 0x07, 0x41]));

        assert!(matches!(pending.await.unwrap(), Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_unrelated_frames_are_ignored() {
        let mock = connected_mock(AckMode::Silent).await;
        let corr = correlator(&mock, None);

        let cmd = frame(Command::StreamStart);
        let pending = {
            let corr = corr.clone();
            let cmd = cmd.clone();
            tokio::spawn(async move { corr.send_and_await(cmd).await })
        };
        wait_pending(&corr).await;

        mock.deliver(encode_status(b"adc overload"));
        mock.deliver(encode_ack(&frame(Command::StreamStop), STATUS_OK).unwrap());
        assert!(corr.is_pending());

        mock.deliver(encode_ack(&cmd, STATUS_OK).unwrap());
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_stale_ack_does_not_resolve_newer_request() {
        let mock = connected_mock(AckMode::Silent).await;
        let corr = correlator(&mock, Some(Duration::from_millis(50)));

        let start = frame(Command::StreamStart);
        let timed_out = corr.send_and_await(start.clone()).await;
        assert!(matches!(timed_out, Err(Error::Timeout)));
        assert!(!corr.is_pending());

        // The device answers the abandoned request with nobody waiting.
        mock.deliver(encode_ack(&start, STATUS_OK).unwrap());

        let stop = frame(Command::StreamStop);
        let pending = {
            let corr = corr.clone();
            let stop = stop.clone();
            tokio::spawn(async move { corr.send_and_await(stop).await })
        };
        wait_pending(&corr).await;

        // A second late ack for the old command must not complete the new one.
        mock.deliver(encode_ack(&start, STATUS_OK).unwrap());
        assert!(corr.is_pending());

        mock.deliver(encode_ack(&stop, STATUS_OK).unwrap());
        let ack = pending.await.unwrap().unwrap();
        assert_eq!(ack, encode_ack(&stop, STATUS_OK).unwrap());
    }

    #[tokio::test]
    async fn test_dropped_future_frees_slot() {
        let mock = connected_mock(AckMode::Silent).await;
        let corr = correlator(&mock, None);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), corr.send_and_await(frame(Command::Hello)))
                .await;
        assert!(abandoned.is_err());
        assert!(!corr.is_pending());

        mock.set_ack_mode(AckMode::AutoAck);
        assert!(corr.send_and_await(frame(Command::Hello)).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_failure_frees_slot() {
        let mock = connected_mock(AckMode::AutoAck).await;
        let corr = correlator(&mock, None);

        mock.set_fail_send(true);
        let err = corr.send_and_await(frame(Command::Hello)).await.unwrap_err();
        assert!(err.is_connection());
        assert!(!corr.is_pending());

        mock.set_fail_send(false);
        assert!(corr.send_and_await(frame(Command::Hello)).await.is_ok());
    }

    #[tokio::test]
    async fn test_abort_cancels_pending() {
        let mock = connected_mock(AckMode::Silent).await;
        let corr = correlator(&mock, None);
        assert!(!corr.abort());

        let pending = {
            let corr = corr.clone();
            tokio::spawn(async move { corr.send_and_await(frame(Command::Identify)).await })
        };
        wait_pending(&corr).await;

        assert!(corr.abort());
        assert!(matches!(pending.await.unwrap(), Err(Error::Cancelled)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_ack_delivered_from_another_thread() {
        let mock = connected_mock(AckMode::Silent).await;
        let corr = correlator(&mock, None);

        let cmd = frame(Command::SetFrequency {
            channel: rxlink_core::TunerChannel(0),
            frequency_hz: 100_100_000,
        });
        let pending = {
            let corr = corr.clone();
            let cmd = cmd.clone();
            tokio::spawn(async move { corr.send_and_await(cmd).await })
        };
        while !corr.is_pending() {
            tokio::task::yield_now().await;
        }

        let ack = encode_ack(&cmd, STATUS_OK).unwrap();
        let deliverer = {
            let mock = mock.clone();
            std::thread::spawn(move || mock.deliver(ack))
        };
        deliverer.join().unwrap();

        assert!(pending.await.unwrap().is_ok());
    }
}
