//! Streaming session state machine
//!
//! A [`StreamingSession`] owns the camera, the channel to the analysis
//! service and the tick that moves frames from one to the other. Starting a
//! session acquires all of them together; stopping it, or the service closing
//! the channel, releases all of them together in a fixed order:
//!
//! 1. the in-flight tick and the tick timer are dropped,
//! 2. the camera is released,
//! 3. the channel is closed,
//! 4. the live result is reset.
//!
//! While running, a single supervisor task drives the session. It selects
//! over the stop signal, inbound messages, loss of the camera stream, the
//! completion of the current tick and the tick timer. Ticks never overlap; a timer tick that fires while the
//! previous one is still encoding or sending is skipped.

use crate::config::SessionConfig;
use crate::event::SessionEvent;
use crate::result::{project, LiveResult};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Fuse, FusedFuture, FutureExt};
use livecoach_core::{
    ChannelEvent, ChannelEvents, ChannelHandle, ChannelManager, Connector, DetectionMode,
    ErrorKind, LiveCoachError, SendOutcome,
};
use livecoach_media::{
    default_backend, CaptureBackend, CaptureConstraints, CaptureHandle, CaptureManager,
    FrameEncoder, RenderSurface, VideoFrame,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SessionState {
    /// Nothing held
    #[default]
    Idle,
    /// Acquiring the camera and opening the channel
    Starting,
    /// Streaming frames and receiving results
    Running,
    /// The last attempt or run failed; everything has been released
    Error,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Starting, Idle)
                | (Running, Idle)
                | (Running, Error)
                | (Error, Idle)
        )
    }

    /// State name
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Starting => "Starting",
            SessionState::Running => "Running",
            SessionState::Error => "Error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run counters, reset on every start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// When the current or last run was started
    pub started_at: Option<DateTime<Utc>>,
    /// Ticks that ran
    pub ticks: u64,
    /// Timer ticks skipped because the previous tick was still in flight
    pub ticks_skipped: u64,
    /// Ticks that found the render surface empty
    pub empty_snapshots: u64,
    /// Ticks whose frame could not be compressed
    pub encode_failures: u64,
    /// Frames written to the channel
    pub frames_sent: u64,
    /// Frames dropped because the channel was not ready
    pub frames_dropped: u64,
    /// Compressed bytes written to the channel
    pub bytes_sent: u64,
    /// Inbound messages received
    pub messages_received: u64,
    /// Inbound messages dropped as malformed
    pub messages_discarded: u64,
}

/// State shared between the session and its supervisor task
#[derive(Debug)]
struct Shared {
    state_tx: watch::Sender<SessionState>,
    result_tx: watch::Sender<LiveResult>,
    event_tx: broadcast::Sender<SessionEvent>,
    stats: RwLock<SessionStats>,
    last_error: RwLock<Option<String>>,
}

impl Shared {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (result_tx, _) = watch::channel(LiveResult::default());
        let (event_tx, _) = broadcast::channel(256);

        Self {
            state_tx,
            result_tx,
            event_tx,
            stats: RwLock::new(SessionStats::default()),
            last_error: RwLock::new(None),
        }
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Move to `to` if the edge is legal. Returns whether the state changed.
    fn transition(&self, to: SessionState) -> bool {
        let mut from = to;
        let changed = self.state_tx.send_if_modified(|state| {
            from = *state;
            if state.can_transition_to(to) {
                *state = to;
                true
            } else {
                false
            }
        });

        if changed {
            info!("Session {} -> {}", from, to);
            let _ = self.event_tx.send(SessionEvent::StateChanged { from, to });
        } else if from != to {
            debug!("Ignoring transition {} -> {}", from, to);
        }
        changed
    }

    /// Record `error` and move to `Error`. Resources must already be released.
    fn fail(&self, error: &LiveCoachError) {
        warn!("Session failed: {}", error);
        *self.last_error.write() = Some(error.to_string());
        let _ = self.event_tx.send(SessionEvent::Error {
            error: error.to_string(),
            code: error.error_code(),
        });
        self.transition(SessionState::Error);
    }

    fn publish_result(&self, result: LiveResult) {
        self.result_tx.send_replace(result.clone());
        let _ = self.event_tx.send(SessionEvent::ResultUpdated { result });
    }

    fn reset_result(&self) {
        self.result_tx.send_if_modified(|current| {
            if current.is_empty() {
                false
            } else {
                *current = LiveResult::default();
                true
            }
        });
    }

    fn begin_run(&self) {
        *self.last_error.write() = None;
        *self.stats.write() = SessionStats {
            started_at: Some(Utc::now()),
            ..SessionStats::default()
        };
    }
}

/// Running supervisor and the means to stop it
struct Supervisor {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Builder for [`StreamingSession`]
pub struct SessionBuilder {
    config: SessionConfig,
    capture_backend: Option<Arc<dyn CaptureBackend>>,
    connector: Option<Arc<dyn Connector>>,
}

impl SessionBuilder {
    fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            capture_backend: None,
            connector: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the analysis service endpoint
    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.config.endpoint = endpoint.to_string();
        self
    }

    /// Set the tick interval
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Set the JPEG quality factor (1-100)
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    /// Set the channel connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the camera constraints
    pub fn constraints(mut self, constraints: CaptureConstraints) -> Self {
        self.config.constraints = constraints;
        self
    }

    /// Capture from a specific camera
    pub fn device(mut self, device_id: &str) -> Self {
        self.config.constraints.device_id = Some(device_id.to_string());
        self
    }

    /// Use a specific camera backend instead of the build default
    pub fn capture_backend(mut self, backend: Arc<dyn CaptureBackend>) -> Self {
        self.capture_backend = Some(backend);
        self
    }

    /// Use a specific transport instead of WebSocket
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Validate the configuration and create the session
    pub fn build(self) -> Result<StreamingSession, LiveCoachError> {
        self.config.validate()?;

        let backend = self.capture_backend.unwrap_or_else(default_backend);
        let channels = match self.connector {
            Some(connector) => ChannelManager::with_connector(self.config.channel_config(), connector),
            None => ChannelManager::new(self.config.channel_config()),
        };
        let encoder = FrameEncoder::new(self.config.jpeg_quality)?;

        Ok(StreamingSession {
            capture: Arc::new(CaptureManager::with_backend(backend)),
            channels: Arc::new(channels),
            encoder,
            shared: Arc::new(Shared::new()),
            control: tokio::sync::Mutex::new(None),
            pending_start: Mutex::new(None),
            config: self.config,
        })
    }
}

/// Live streaming session
pub struct StreamingSession {
    config: SessionConfig,
    capture: Arc<CaptureManager>,
    channels: Arc<ChannelManager>,
    encoder: FrameEncoder,
    shared: Arc<Shared>,
    control: tokio::sync::Mutex<Option<Supervisor>>,
    pending_start: Mutex<Option<oneshot::Sender<()>>>,
}

impl fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingSession")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl StreamingSession {
    /// Create a session builder
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Create a session with `config` and the default camera and transport
    pub fn new(config: SessionConfig) -> Result<Self, LiveCoachError> {
        Self::builder().config(config).build()
    }

    /// Current configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Current live result
    pub fn live_result(&self) -> LiveResult {
        self.shared.result_tx.borrow().clone()
    }

    /// Watch live result changes
    pub fn subscribe_results(&self) -> watch::Receiver<LiveResult> {
        self.shared.result_tx.subscribe()
    }

    /// Live pixel feed from the camera
    pub fn preview(&self) -> watch::Receiver<Arc<VideoFrame>> {
        self.capture.surface().subscribe()
    }

    /// Subscribe to session events
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Counters for the current or last run
    pub fn stats(&self) -> SessionStats {
        self.shared.stats.read().clone()
    }

    /// Message of the error that ended the last attempt, until the next start
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.read().clone()
    }

    /// Camera owner
    pub fn capture_manager(&self) -> &CaptureManager {
        &self.capture
    }

    /// Channel owner
    pub fn channel_manager(&self) -> &ChannelManager {
        &self.channels
    }

    /// Start streaming in `mode`.
    ///
    /// Allowed from `Idle` and `Error`. Resolves once the session is
    /// `Running`, or with the error that moved it to `Error`. A concurrent
    /// [`stop`](Self::stop) cancels the attempt with
    /// [`LiveCoachError::Cancelled`] and leaves the session `Idle`.
    pub async fn start(&self, mode: DetectionMode) -> Result<(), LiveCoachError> {
        self.ensure_startable()?;

        let mut control = self.control.lock().await;

        // A supervisor that ended on its own has already released everything
        if let Some(supervisor) = control.take() {
            if self.state() == SessionState::Running {
                *control = Some(supervisor);
                return Err(LiveCoachError::InvalidState {
                    expected: "Idle or Error".to_string(),
                    actual: SessionState::Running.to_string(),
                });
            }
            if let Err(e) = supervisor.task.await {
                warn!("Previous session supervisor ended abnormally: {}", e);
            }
        }

        self.ensure_startable()?;
        if self.state() == SessionState::Error {
            self.shared.transition(SessionState::Idle);
        }

        let (abort_tx, mut abort_rx) = oneshot::channel();
        *self.pending_start.lock() = Some(abort_tx);

        self.shared.begin_run();
        self.shared.transition(SessionState::Starting);
        info!("Starting session in {} mode", mode);

        let mut guard = StartGuard {
            shared: &self.shared,
            pending_start: &self.pending_start,
            armed: true,
        };

        let outcome = self.setup(&mode, &mut abort_rx).await;
        self.pending_start.lock().take();

        let (capture, channel, inbound) = match outcome {
            Ok(resources) => resources,
            // Cancellation and rejected requests are not failures of the session
            Err(e) if matches!(e.kind(), ErrorKind::State | ErrorKind::Configuration) => {
                guard.armed = false;
                match e {
                    LiveCoachError::Cancelled => info!("Session start cancelled"),
                    ref other => warn!("Session start rejected: {}", other),
                }
                self.shared.transition(SessionState::Idle);
                return Err(e);
            }
            Err(e) => {
                guard.armed = false;
                self.shared.fail(&e);
                return Err(e);
            }
        };

        guard.armed = false;
        self.shared.transition(SessionState::Running);

        let (stop_tx, stop_rx) = oneshot::channel();
        let context = TickContext {
            shared: self.shared.clone(),
            surface: self.capture.surface().clone(),
            encoder: self.encoder,
        };
        let task = tokio::spawn(supervise(
            context,
            self.config.tick_interval,
            capture,
            channel,
            inbound,
            stop_rx,
        ));
        *control = Some(Supervisor { stop_tx, task });

        Ok(())
    }

    /// Stop the session.
    ///
    /// Never fails and may be called in any state any number of times. On
    /// return the session is `Idle`, every resource is released and the live
    /// result is empty.
    pub async fn stop(&self) {
        if let Some(abort) = self.pending_start.lock().take() {
            let _ = abort.send(());
        }

        let mut control = self.control.lock().await;
        if let Some(supervisor) = control.take() {
            let _ = supervisor.stop_tx.send(());
            if let Err(e) = supervisor.task.await {
                warn!("Session supervisor ended abnormally: {}", e);
            }
        }

        self.shared.transition(SessionState::Idle);
        self.shared.reset_result();
    }

    fn ensure_startable(&self) -> Result<(), LiveCoachError> {
        match self.state() {
            SessionState::Idle | SessionState::Error => Ok(()),
            other => Err(LiveCoachError::InvalidState {
                expected: "Idle or Error".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    /// Acquire the camera, then open the channel.
    ///
    /// Anything acquired is released again before an error is returned.
    async fn setup(
        &self,
        mode: &DetectionMode,
        abort_rx: &mut oneshot::Receiver<()>,
    ) -> Result<(CaptureHandle, ChannelHandle, ChannelEvents), LiveCoachError> {
        // Acquisition is not raced against abort so the device is never left
        // opening in the background.
        let mut capture = self.capture.acquire(&self.config.constraints).await?;

        if abort_rx.try_recv().is_ok() {
            capture.release().await;
            return Err(LiveCoachError::Cancelled);
        }

        let opened = tokio::select! {
            biased;
            _ = &mut *abort_rx => Err(LiveCoachError::Cancelled),
            opened = self.channels.open(mode) => opened,
        };

        match opened {
            Ok((channel, inbound)) => {
                if abort_rx.try_recv().is_ok() {
                    channel.close().await;
                    capture.release().await;
                    return Err(LiveCoachError::Cancelled);
                }
                Ok((capture, channel, inbound))
            }
            Err(e) => {
                capture.release().await;
                Err(e)
            }
        }
    }
}

/// Returns the session to `Idle` if a start future is dropped mid-setup.
///
/// Resources acquired so far are released by their own guards; a camera
/// stream still closing is waited for by the next acquire.
struct StartGuard<'a> {
    shared: &'a Shared,
    pending_start: &'a Mutex<Option<oneshot::Sender<()>>>,
    armed: bool,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending_start.lock().take();
            self.shared.transition(SessionState::Idle);
        }
    }
}

#[derive(Clone)]
struct TickContext {
    shared: Arc<Shared>,
    surface: RenderSurface,
    encoder: FrameEncoder,
}

#[derive(Debug)]
enum TickOutcome {
    NotReady,
    EncodeFailed(LiveCoachError),
    Sent { bytes: usize },
    Dropped,
    ChannelFailed(LiveCoachError),
}

enum Exit {
    Stopped,
    Closed(String),
    Failed(LiveCoachError),
}

async fn run_tick(
    surface: RenderSurface,
    encoder: FrameEncoder,
    channel: Arc<ChannelHandle>,
) -> TickOutcome {
    let encoded = match encoder.encode(surface.snapshot()).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return TickOutcome::NotReady,
        Err(e) => return TickOutcome::EncodeFailed(e.into()),
    };

    match channel.send(&encoded.data).await {
        Ok(SendOutcome::Sent) => TickOutcome::Sent {
            bytes: encoded.len(),
        },
        Ok(SendOutcome::Dropped) => TickOutcome::Dropped,
        Err(e) if e.kind() == ErrorKind::Encode => TickOutcome::EncodeFailed(e),
        Err(e) => TickOutcome::ChannelFailed(e),
    }
}

impl TickContext {
    fn handle_message(&self, payload: &[u8]) {
        self.shared.stats.write().messages_received += 1;

        match project(payload) {
            Ok(result) => self.shared.publish_result(result),
            Err(e) => {
                self.shared.stats.write().messages_discarded += 1;
                debug!("Discarding inbound message: {}", e);
                let _ = self.shared.event_tx.send(SessionEvent::MessageDiscarded {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Fold a finished tick into the stats; returns the error that ends the run
    fn record(&self, outcome: TickOutcome) -> Option<LiveCoachError> {
        let mut stats = self.shared.stats.write();
        match outcome {
            TickOutcome::NotReady => stats.empty_snapshots += 1,
            TickOutcome::EncodeFailed(e) => {
                stats.encode_failures += 1;
                debug!("Skipping frame: {}", e);
            }
            TickOutcome::Sent { bytes } => {
                stats.frames_sent += 1;
                stats.bytes_sent += bytes as u64;
            }
            TickOutcome::Dropped => stats.frames_dropped += 1,
            TickOutcome::ChannelFailed(e) => return Some(e),
        }
        None
    }
}

async fn supervise(
    context: TickContext,
    tick_interval: Duration,
    mut capture: CaptureHandle,
    channel: ChannelHandle,
    mut inbound: ChannelEvents,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let channel = Arc::new(channel);
    let mut timer = tokio::time::interval(tick_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: Fuse<BoxFuture<'static, TickOutcome>> = Fuse::terminated();

    debug!("Supervisor running on channel {}", channel.id());

    let exit = loop {
        tokio::select! {
            biased;

            // A dropped sender means the session itself is gone
            _ = &mut stop_rx => break Exit::Stopped,

            event = inbound.next() => match event {
                Some(ChannelEvent::Message(payload)) => context.handle_message(&payload),
                Some(ChannelEvent::Closed { reason }) => break Exit::Closed(reason),
                Some(ChannelEvent::Failed { error }) => break Exit::Failed(error),
                None => break Exit::Closed("inbound stream ended".to_string()),
            },

            error = capture.lost() => {
                break Exit::Failed(LiveCoachError::DeviceUnavailable {
                    reason: format!("camera stream ended: {}", error),
                });
            }

            outcome = &mut tick, if !tick.is_terminated() => {
                if let Some(error) = context.record(outcome) {
                    if error.is_closed() {
                        break Exit::Closed(error.to_string());
                    }
                    break Exit::Failed(error);
                }
            }

            _ = timer.tick() => {
                if tick.is_terminated() {
                    context.shared.stats.write().ticks += 1;
                    tick = run_tick(
                        context.surface.clone(),
                        context.encoder,
                        channel.clone(),
                    )
                    .boxed()
                    .fuse();
                } else {
                    context.shared.stats.write().ticks_skipped += 1;
                }
            }
        }
    };

    drop(tick);
    drop(timer);
    capture.release().await;
    channel.close().await;
    inbound.close();
    context.shared.reset_result();

    match exit {
        Exit::Stopped => {
            context.shared.transition(SessionState::Idle);
        }
        Exit::Closed(reason) => {
            info!("Channel closed by service: {}", reason);
            let _ = context
                .shared
                .event_tx
                .send(SessionEvent::ChannelClosed { reason });
            context.shared.transition(SessionState::Idle);
        }
        Exit::Failed(error) => context.shared.fail(&error),
    }
}
