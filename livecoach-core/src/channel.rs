//! Channel management for the live analysis connection
//!
//! A [`ChannelManager`] opens at most one [`ChannelHandle`] at a time. The
//! handle pushes frames with a latest-effort policy: anything that cannot go
//! out immediately is dropped rather than queued. Inbound payloads are read by
//! a background task and handed, in arrival order, to the single
//! [`ChannelEvents`] consumer returned from [`ChannelManager::open`].

use crate::error::LiveCoachError;
use crate::protocol::{endpoint_url, DetectionMode, FrameMessage, DEFAULT_ENDPOINT};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{future, SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound half of a connected transport
#[async_trait]
pub trait MessageSink: Send {
    /// Write one text message
    async fn send_text(&mut self, text: String) -> Result<(), LiveCoachError>;

    /// Start a graceful shutdown of the outbound half
    async fn close(&mut self) -> Result<(), LiveCoachError>;
}

/// Boxed outbound half
pub type OutboundSink = Box<dyn MessageSink>;

/// Inbound half of a connected transport.
///
/// Yields one item per text or binary message. A peer close is reported as
/// [`LiveCoachError::ChannelClosed`] or by the stream ending.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<Bytes, LiveCoachError>> + Send>>;

/// Transport capable of establishing a bidirectional message connection
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url` and split the connection into its two halves
    async fn connect(&self, url: &str) -> Result<(OutboundSink, InboundStream), LiveCoachError>;
}

/// WebSocket transport backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of a WebSocket connection
struct WebSocketSink {
    endpoint: String,
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl MessageSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), LiveCoachError> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| map_send_error(&self.endpoint, e))
    }

    async fn close(&mut self) -> Result<(), LiveCoachError> {
        self.inner
            .close()
            .await
            .map_err(|e| LiveCoachError::channel(&self.endpoint, format!("WebSocket close failed: {}", e)))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<(OutboundSink, InboundStream), LiveCoachError> {
        let (ws_stream, response) = connect_async(url).await.map_err(|e| {
            LiveCoachError::channel(url, format!("WebSocket connection failed: {}", e))
        })?;

        debug!(
            "WebSocket connection established to {} (status {})",
            url,
            response.status()
        );

        let (write, read) = ws_stream.split();
        let endpoint = url.to_string();
        let inbound = read.filter_map(move |item| future::ready(map_ws_item(&endpoint, item)));

        Ok((
            Box::new(WebSocketSink {
                endpoint: url.to_string(),
                inner: write,
            }),
            Box::pin(inbound),
        ))
    }
}

fn map_send_error(endpoint: &str, error: tungstenite::Error) -> LiveCoachError {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            LiveCoachError::ChannelClosed {
                reason: "connection closed".to_string(),
            }
        }
        other => LiveCoachError::channel(endpoint, format!("WebSocket send failed: {}", other)),
    }
}

fn map_ws_item(
    endpoint: &str,
    item: Result<Message, tungstenite::Error>,
) -> Option<Result<Bytes, LiveCoachError>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(Bytes::from(text))),
        Ok(Message::Binary(data)) => Some(Ok(Bytes::from(data))),
        Ok(Message::Close(frame)) => {
            let reason = frame
                .map(|f| f.reason.to_string())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "closed by peer".to_string());
            Some(Err(LiveCoachError::ChannelClosed { reason }))
        }
        // Ping, pong and raw frames are transport housekeeping
        Ok(_) => None,
        Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
            Some(Err(LiveCoachError::ChannelClosed {
                reason: "connection closed".to_string(),
            }))
        }
        Err(e) => Some(Err(LiveCoachError::channel(
            endpoint,
            format!("WebSocket receive failed: {}", e),
        ))),
    }
}

/// Channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Handshake in progress
    Connecting,
    /// Ready to carry frames
    Open,
    /// Closed locally or by the peer
    Closed,
}

/// Result of a latest-effort send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Payload was written to the transport
    Sent,
    /// Payload was discarded because the channel was not ready
    Dropped,
}

/// Inbound notifications delivered to the channel's consumer
#[derive(Debug)]
pub enum ChannelEvent {
    /// Raw message payload, in arrival order
    Message(Bytes),
    /// Peer closed the connection or the stream ended
    Closed {
        /// Close reason
        reason: String,
    },
    /// Transport failed while reading
    Failed {
        /// Underlying failure
        error: LiveCoachError,
    },
}

/// Single-consumer stream of inbound channel events
#[derive(Debug)]
pub struct ChannelEvents {
    receiver: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl ChannelEvents {
    fn new(receiver: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
        Self { receiver }
    }

    /// Get the next event; `None` once the reader has gone away
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.receiver.recv().await
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<ChannelEvent>, mpsc::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(mpsc::error::TryRecvError::Disconnected)
            }
        }
    }

    /// Stop accepting further events
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Per-channel traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Frames written to the transport
    pub frames_sent: u64,
    /// Frames discarded by the latest-effort policy
    pub frames_dropped: u64,
    /// Payload bytes written (before JSON framing)
    pub bytes_sent: u64,
    /// Inbound messages read
    pub messages_received: u64,
}

#[derive(Debug, Default)]
struct ChannelCounters {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl ChannelCounters {
    fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
        }
    }
}

/// Channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Base endpoint; the detection mode is appended as a query parameter
    pub endpoint: String,
    /// Upper bound on connection establishment
    pub connect_timeout: Duration,
    /// Upper bound on the close handshake
    pub close_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(1),
        }
    }
}

impl ChannelConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), LiveCoachError> {
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(LiveCoachError::InvalidConfiguration {
                field: "endpoint".to_string(),
                reason: format!("'{}' is not a ws:// or wss:// URL", self.endpoint),
            });
        }

        if self.connect_timeout.is_zero() {
            return Err(LiveCoachError::InvalidConfiguration {
                field: "connect_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.close_timeout.is_zero() {
            return Err(LiveCoachError::InvalidConfiguration {
                field: "close_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Reservation of the manager's single channel slot.
///
/// Released on drop unless ownership passes to a [`ChannelHandle`].
struct OpenSlot(Option<Arc<AtomicUsize>>);

impl OpenSlot {
    fn claim(counter: &Arc<AtomicUsize>) -> Option<Self> {
        counter
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(Some(counter.clone())))
    }

    fn into_inner(mut self) -> Arc<AtomicUsize> {
        // claim() always stores Some; take() leaves Drop a no-op
        self.0.take().unwrap_or_default()
    }
}

impl Drop for OpenSlot {
    fn drop(&mut self) {
        if let Some(counter) = self.0.take() {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Owns the connection to the analysis service
pub struct ChannelManager {
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    open_channels: Arc<AtomicUsize>,
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("config", &self.config)
            .field("open_channels", &self.open_channels())
            .finish()
    }
}

impl ChannelManager {
    /// Create a manager using the WebSocket transport
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Create a manager with a custom transport
    pub fn with_connector(config: ChannelConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            config,
            open_channels: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Current configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Number of channels currently held (0 or 1)
    pub fn open_channels(&self) -> usize {
        self.open_channels.load(Ordering::SeqCst)
    }

    /// Open a channel for the given detection mode.
    ///
    /// Returns once the connection is `Open`, together with the single
    /// consumer of its inbound messages.
    pub async fn open(
        &self,
        mode: &DetectionMode,
    ) -> Result<(ChannelHandle, ChannelEvents), LiveCoachError> {
        let url = endpoint_url(&self.config.endpoint, mode);

        let slot = OpenSlot::claim(&self.open_channels).ok_or_else(|| {
            LiveCoachError::InvalidState {
                expected: "no open channel".to_string(),
                actual: "channel already open".to_string(),
            }
        })?;

        let id = Uuid::new_v4();
        let state = Arc::new(RwLock::new(ChannelState::Connecting));
        debug!("Channel {} connecting to {}", id, url);

        let (sink, inbound) =
            match tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&url))
                .await
            {
                Ok(Ok(halves)) => halves,
                Ok(Err(e)) => {
                    warn!("Channel {} failed to open: {}", id, e);
                    return Err(e);
                }
                Err(_) => {
                    warn!("Channel {} timed out connecting to {}", id, url);
                    return Err(LiveCoachError::channel(
                        &url,
                        format!(
                            "connection timed out after {:?}",
                            self.config.connect_timeout
                        ),
                    ));
                }
            };

        *state.write() = ChannelState::Open;

        let counters = Arc::new(ChannelCounters::default());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(
            id,
            inbound,
            event_tx,
            state.clone(),
            counters.clone(),
        ));

        info!("Channel {} open to {}", id, url);

        let handle = ChannelHandle {
            id,
            endpoint: url,
            state,
            sink: tokio::sync::Mutex::new(Some(sink)),
            reader: Mutex::new(Some(reader)),
            counters,
            open_channels: slot.into_inner(),
            released: AtomicBool::new(false),
            close_timeout: self.config.close_timeout,
        };

        Ok((handle, ChannelEvents::new(event_rx)))
    }

    /// Send a frame on `handle` (see [`ChannelHandle::send`])
    pub async fn send(
        &self,
        handle: &ChannelHandle,
        payload: &[u8],
    ) -> Result<SendOutcome, LiveCoachError> {
        handle.send(payload).await
    }

    /// Close `handle` (see [`ChannelHandle::close`])
    pub async fn close(&self, handle: &ChannelHandle) {
        handle.close().await
    }
}

async fn read_loop(
    id: Uuid,
    mut inbound: InboundStream,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: Arc<RwLock<ChannelState>>,
    counters: Arc<ChannelCounters>,
) {
    let terminal = loop {
        match inbound.next().await {
            Some(Ok(payload)) => {
                counters.messages_received.fetch_add(1, Ordering::Relaxed);
                if events.send(ChannelEvent::Message(payload)).is_err() {
                    debug!("Channel {} consumer dropped, stopping reader", id);
                    *state.write() = ChannelState::Closed;
                    return;
                }
            }
            Some(Err(LiveCoachError::ChannelClosed { reason })) => {
                break ChannelEvent::Closed { reason };
            }
            Some(Err(error)) => break ChannelEvent::Failed { error },
            None => {
                break ChannelEvent::Closed {
                    reason: "stream ended".to_string(),
                }
            }
        }
    };

    *state.write() = ChannelState::Closed;
    match &terminal {
        ChannelEvent::Failed { error } => warn!("Channel {} failed: {}", id, error),
        ChannelEvent::Closed { reason } => info!("Channel {} closed: {}", id, reason),
        ChannelEvent::Message(_) => {}
    }
    let _ = events.send(terminal);
}

/// Exclusive owner of one open connection
pub struct ChannelHandle {
    id: Uuid,
    endpoint: String,
    state: Arc<RwLock<ChannelState>>,
    sink: tokio::sync::Mutex<Option<OutboundSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<ChannelCounters>,
    open_channels: Arc<AtomicUsize>,
    released: AtomicBool,
    close_timeout: Duration,
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl ChannelHandle {
    /// Channel identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Full URL the channel was opened with
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    /// Whether frames can currently be sent
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Traffic counters
    pub fn stats(&self) -> ChannelStats {
        self.counters.snapshot()
    }

    /// Send one encoded frame, latest-effort.
    ///
    /// If the channel is not `Open`, or another send is still writing, the
    /// payload is dropped and `Ok(SendOutcome::Dropped)` is returned. A
    /// transport failure closes the channel and is returned as an error.
    pub async fn send(&self, payload: &[u8]) -> Result<SendOutcome, LiveCoachError> {
        if !self.is_open() {
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(SendOutcome::Dropped);
        }

        let mut guard = match self.sink.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(SendOutcome::Dropped);
            }
        };

        let sink = match guard.as_mut() {
            Some(sink) => sink,
            None => {
                self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(SendOutcome::Dropped);
            }
        };

        let text = FrameMessage::new(payload).to_json()?;
        match sink.send_text(text).await {
            Ok(()) => {
                self.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_sent
                    .fetch_add(payload.len() as u64, Ordering::Relaxed);
                Ok(SendOutcome::Sent)
            }
            Err(e) => {
                *self.state.write() = ChannelState::Closed;
                warn!("Channel {} send failed: {}", self.id, e);
                Err(e)
            }
        }
    }

    /// Gracefully close the channel. Safe to call any number of times.
    pub async fn close(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.state.write() = ChannelState::Closed;

        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            match tokio::time::timeout(self.close_timeout, sink.close()).await {
                Ok(Ok(())) => debug!("Channel {} close handshake sent", self.id),
                Ok(Err(e)) => debug!("Channel {} close handshake failed: {}", self.id, e),
                Err(_) => debug!("Channel {} close handshake timed out", self.id),
            }
        }

        self.open_channels.fetch_sub(1, Ordering::SeqCst);
        info!("Channel {} released", self.id);
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        *self.state.write() = ChannelState::Closed;
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.open_channels.fetch_sub(1, Ordering::SeqCst);
        debug!("Channel {} dropped without close", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_validation() {
        assert!(ChannelConfig::default().validate().is_ok());

        let bad_scheme = ChannelConfig {
            endpoint: "http://localhost:8000/ws/live".to_string(),
            ..Default::default()
        };
        assert!(bad_scheme.validate().is_err());

        let zero_timeout = ChannelConfig {
            connect_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn test_open_slot_is_exclusive() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = OpenSlot::claim(&counter).unwrap();
        assert!(OpenSlot::claim(&counter).is_none());
        drop(first);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        let kept = OpenSlot::claim(&counter).unwrap().into_inner();
        assert_eq!(kept.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ws_item_mapping() {
        let endpoint = "ws://localhost:8000/ws/live";
        let text = map_ws_item(endpoint, Ok(Message::Text("{}".to_string())));
        assert_eq!(text.unwrap().unwrap(), Bytes::from_static(b"{}"));

        assert!(map_ws_item(endpoint, Ok(Message::Ping(vec![1]))).is_none());

        let closed = map_ws_item(endpoint, Err(tungstenite::Error::ConnectionClosed));
        assert!(closed.unwrap().unwrap_err().is_closed());

        let failed = map_ws_item(endpoint, Err(tungstenite::Error::Utf8));
        assert!(!failed.unwrap().unwrap_err().is_closed());
    }
}
