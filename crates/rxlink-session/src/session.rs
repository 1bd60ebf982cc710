//! The control session state machine.
//!
//! [`Session`] owns the link state of one receiver and sequences every
//! command exchange with it:
//!
//! - `connect` always re-runs the whole ritual: channel connect, then the
//!   three bootstrap commands one acknowledgement at a time.
//! - `start_streaming`, `stop_streaming` and `change_frequency` are no-ops
//!   while the control channel is down. While it is up they always send
//!   their command, even when nothing changes locally; the device is told
//!   the intent every time.
//! - The local sample listener is only started on a not-streaming to
//!   streaming transition and only stopped on the reverse one.
//! - `disconnect` is synchronous, sends nothing, and never fails.
//!
//! Local state is only committed after the device acknowledged the command
//! that justifies it. A failed exchange leaves the state exactly as it was.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{MutexGuard, broadcast};

use rxlink_core::error::{Error, Result};
use rxlink_core::events::SessionEvent;
use rxlink_core::transport::{ControlChannel, DataChannel};
use rxlink_core::types::{FrequencyTarget, TunerChannel};
use rxlink_protocol::codec::{Command, MessageCodec};

use crate::correlator::ResponseCorrelator;
use crate::state::LinkState;

/// Control session for one receiver.
///
/// All methods take `&self`; share the session across tasks with an `Arc`.
/// High-level operations never overlap: a call made while another
/// operation is still exchanging commands fails with
/// [`Error::RequestInFlight`] instead of queuing.
pub struct Session {
    control: Arc<dyn ControlChannel>,
    data: Arc<dyn DataChannel>,
    codec: Arc<dyn MessageCodec>,
    correlator: ResponseCorrelator,
    state: Mutex<LinkState>,
    targets: Mutex<BTreeMap<TunerChannel, FrequencyTarget>>,
    /// Bumped by every `disconnect`; an operation that started under an
    /// older epoch must not commit.
    epoch: AtomicU64,
    /// Held for the duration of one high-level operation.
    op_gate: tokio::sync::Mutex<()>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Session {
    pub(crate) fn new(
        control: Arc<dyn ControlChannel>,
        data: Arc<dyn DataChannel>,
        codec: Arc<dyn MessageCodec>,
        command_timeout: Option<std::time::Duration>,
        event_capacity: usize,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(event_capacity);
        let correlator = ResponseCorrelator::with_events(
            Arc::clone(&control),
            Arc::clone(&codec),
            command_timeout,
            Some(event_tx.clone()),
        );

        Session {
            control,
            data,
            codec,
            correlator,
            state: Mutex::new(LinkState::Disconnected),
            targets: Mutex::new(BTreeMap::new()),
            epoch: AtomicU64::new(0),
            op_gate: tokio::sync::Mutex::new(()),
            event_tx,
        }
    }

    // -----------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------

    /// Establish the control channel and run the bootstrap sequence.
    ///
    /// Not guarded against an existing connection: calling this while
    /// connected re-establishes the channel and re-runs the bootstrap.
    /// On success the session is connected and not streaming; a listener
    /// left running by an earlier stream is stopped.
    ///
    /// A `disconnect` issued while this is in progress wins: the channel is
    /// torn down again, no further bootstrap command is sent, and the call
    /// fails with [`Error::Cancelled`].
    pub async fn connect(&self) -> Result<()> {
        let _op = self.begin()?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        tracing::debug!("Connecting control channel");
        self.control.connect().await?;

        for command in &Command::BOOTSTRAP {
            self.ensure_current(epoch)?;
            self.exchange(command).await?;
        }

        let mut was_streaming = false;
        self.commit(epoch, |state| {
            was_streaming = state.is_streaming();
            *state = LinkState::Connected { streaming: false };
        })?;

        if was_streaming {
            tracing::debug!("Stopping sample listener from previous session");
            self.data.stop_listening();
            let _ = self.event_tx.send(SessionEvent::StreamingStopped);
        }
        let _ = self.event_tx.send(SessionEvent::Connected);
        tracing::debug!("Session bootstrapped");
        Ok(())
    }

    /// Tear the session down.
    ///
    /// Stops the sample listener first if streaming, then disconnects the
    /// control channel. Sends no command and never fails; calling it when
    /// never connected only invokes the channel's own disconnect.
    pub fn disconnect(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let previous = *self.state.lock();

        if previous.is_streaming() {
            tracing::debug!("Stopping sample listener before disconnect");
            self.data.stop_listening();
        }
        if self.correlator.abort() {
            tracing::debug!("Abandoned in-flight exchange on disconnect");
        }
        self.control.disconnect();

        *self.state.lock() = LinkState::Disconnected;
        if previous.is_connected() {
            let _ = self.event_tx.send(SessionEvent::Disconnected);
        }
        tracing::debug!("Session disconnected");
    }

    /// Tell the device to start streaming and start the local listener.
    ///
    /// No-op while disconnected. While connected the start command is sent
    /// even if already streaming; the listener is only started when the
    /// session was not streaming yet.
    pub async fn start_streaming(&self) -> Result<()> {
        if !self.control_ready("start_streaming") {
            return Ok(());
        }
        let _op = self.begin()?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        self.exchange(&Command::StreamStart).await?;

        let was_streaming = self.state.lock().is_streaming();
        if !was_streaming {
            tracing::debug!("Starting sample listener");
            self.data.start_listening().await?;
        }

        let committed = self.commit(epoch, |state| {
            *state = LinkState::Connected { streaming: true };
        });
        if committed.is_err() && !was_streaming {
            // Disconnected while the listener was starting up.
            self.data.stop_listening();
        }
        committed?;

        if !was_streaming {
            let _ = self.event_tx.send(SessionEvent::StreamingStarted);
        }
        Ok(())
    }

    /// Tell the device to stop streaming and stop the local listener.
    ///
    /// No-op while disconnected. While connected the stop command is sent
    /// even if already stopped; the listener is only stopped when the
    /// session was streaming.
    pub async fn stop_streaming(&self) -> Result<()> {
        if !self.control_ready("stop_streaming") {
            return Ok(());
        }
        let _op = self.begin()?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        self.exchange(&Command::StreamStop).await?;

        let mut was_streaming = false;
        self.commit(epoch, |state| {
            was_streaming = state.is_streaming();
            *state = LinkState::Connected { streaming: false };
        })?;

        if was_streaming {
            tracing::debug!("Stopping sample listener");
            self.data.stop_listening();
            let _ = self.event_tx.send(SessionEvent::StreamingStopped);
        }
        Ok(())
    }

    /// Retune `channel` to `frequency_hz`.
    ///
    /// No-op while disconnected. While connected the command is always sent,
    /// whatever the streaming state and even if the target is unchanged.
    pub async fn change_frequency(&self, frequency_hz: u64, channel: TunerChannel) -> Result<()> {
        if !self.control_ready("change_frequency") {
            return Ok(());
        }
        let _op = self.begin()?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        self.exchange(&Command::SetFrequency {
            channel,
            frequency_hz,
        })
        .await?;

        self.commit(epoch, |_| {})?;
        self.targets.lock().insert(
            channel,
            FrequencyTarget {
                frequency_hz,
                channel,
            },
        );
        let _ = self.event_tx.send(SessionEvent::FrequencyChanged {
            channel,
            frequency_hz,
        });
        tracing::debug!(channel = channel.index(), frequency_hz = frequency_hz, "Frequency set");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    /// Whether the device acknowledged a stream start that has not been
    /// stopped since.
    pub fn is_streaming(&self) -> bool {
        self.state.lock().is_streaming()
    }

    /// Whether the last connect completed its bootstrap and no disconnect
    /// followed.
    pub fn is_connected(&self) -> bool {
        self.state.lock().is_connected()
    }

    /// Snapshot of the link state.
    pub fn link_state(&self) -> LinkState {
        *self.state.lock()
    }

    /// The last acknowledged tuning target for `channel`.
    pub fn frequency_target(&self, channel: TunerChannel) -> Option<FrequencyTarget> {
        self.targets.lock().get(&channel).copied()
    }

    /// All acknowledged tuning targets, ordered by channel.
    pub fn frequency_targets(&self) -> Vec<FrequencyTarget> {
        self.targets.lock().values().copied().collect()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    /// Claim the operation gate, failing fast if another operation holds it.
    fn begin(&self) -> Result<MutexGuard<'_, ()>> {
        self.op_gate.try_lock().map_err(|_| Error::RequestInFlight)
    }

    /// Connectivity guard shared by the streaming and tuning operations.
    fn control_ready(&self, operation: &'static str) -> bool {
        if !self.control.is_connected() {
            tracing::trace!(operation = operation, "Control channel down; skipping");
            return false;
        }
        if !self.state.lock().is_connected() {
            tracing::trace!(operation = operation, "Bootstrap not completed; skipping");
            return false;
        }
        true
    }

    /// Encode `command`, send it, and wait for its acknowledgement.
    async fn exchange(&self, command: &Command) -> Result<()> {
        let frame = self.codec.encode(command);
        tracing::debug!(command = command.name(), "Sending command");
        self.correlator.send_and_await(frame).await.inspect_err(|e| {
            tracing::debug!(command = command.name(), error = %e, "Command failed");
        })?;
        tracing::trace!(command = command.name(), "Command acknowledged");
        Ok(())
    }

    /// Fail with [`Error::Cancelled`] if a disconnect happened since the
    /// operation captured `epoch`, closing whatever the operation opened.
    fn ensure_current(&self, epoch: u64) -> Result<()> {
        if self.epoch.load(Ordering::SeqCst) == epoch {
            return Ok(());
        }
        tracing::debug!("Disconnected during connect; closing control channel");
        self.control.disconnect();
        Err(Error::Cancelled)
    }

    /// Apply `update` to the link state unless a disconnect happened since
    /// the operation captured `epoch`.
    fn commit(&self, epoch: u64, update: impl FnOnce(&mut LinkState)) -> Result<()> {
        let mut state = self.state.lock();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(Error::Cancelled);
        }
        update(&mut state);
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state.get_mut().is_streaming() {
            self.data.stop_listening();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
