//! Camera acquisition and the render surface
//!
//! [`CaptureManager::acquire`] opens a device stream on a dedicated capture
//! thread and starts feeding frames into a [`RenderSurface`]. The returned
//! [`CaptureHandle`] is the only owner of that stream; releasing it stops the
//! device, joins the thread and detaches the surface.

use crate::capture::{default_backend, CaptureBackend};
use crate::error::{ErrorCategory, MediaError};
use crate::tracks::VideoFrame;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

/// Supported raw pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoPixelFormat {
    /// Packed 8-bit RGB
    RGB24,
    /// Packed 8-bit RGBA
    RGBA32,
}

impl VideoPixelFormat {
    /// Bytes used by one pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            VideoPixelFormat::RGB24 => 3,
            VideoPixelFormat::RGBA32 => 4,
        }
    }
}

/// Video resolution information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VideoResolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl VideoResolution {
    /// Create a resolution
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 320x240
    pub const QVGA: Self = Self::new(320, 240);
    /// 640x480
    pub const VGA: Self = Self::new(640, 480);
    /// 1280x720
    pub const HD: Self = Self::new(1280, 720);

    /// Total pixel count
    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }
}

/// What to ask the camera for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Specific device, or the first available camera
    pub device_id: Option<String>,
    /// Requested resolution; backends may pick the closest match
    pub resolution: VideoResolution,
    /// Requested frames per second
    pub framerate: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            device_id: None,
            resolution: VideoResolution::VGA,
            framerate: 30,
        }
    }
}

impl CaptureConstraints {
    /// Validate constraints
    pub fn validate(&self) -> Result<(), MediaError> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "Invalid resolution".to_string(),
            });
        }

        if self.framerate == 0 || self.framerate > 120 {
            return Err(MediaError::InvalidConfiguration {
                message: "Invalid framerate".to_string(),
            });
        }

        if matches!(&self.device_id, Some(id) if id.trim().is_empty()) {
            return Err(MediaError::InvalidConfiguration {
                message: "Device id must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// Camera information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDevice {
    /// Identifier accepted by [`CaptureConstraints::device_id`]
    pub id: String,
    /// Human readable name
    pub name: String,
    /// Backend-specific description
    pub description: String,
    /// Known resolutions, empty when the backend cannot tell
    pub supported_resolutions: Vec<VideoResolution>,
    /// Highest frame rate, 0 when unknown
    pub max_framerate: u32,
}

/// Capture lifecycle events
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// A device stream was opened
    CaptureStarted {
        /// Device identifier
        device_id: String,
    },
    /// A device stream was stopped
    CaptureStopped {
        /// Device identifier
        device_id: String,
    },
    /// Reading a frame failed
    CaptureError {
        /// Device identifier
        device_id: String,
        /// Error description
        error: String,
        /// Error classification
        category: ErrorCategory,
    },
}

/// Capture statistics
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    /// Streams acquired over the manager's lifetime
    pub acquisitions: u64,
    /// Frames presented on the render surface
    pub frames_captured: u64,
    /// Frame reads that failed
    pub capture_errors: u64,
    /// Raw bytes presented
    pub total_bytes: u64,
    /// Frames per second since the current stream started
    pub average_framerate: f64,
    /// Time since the current stream started
    pub duration: Duration,
}

/// Latest-frame surface fed by the capture thread.
///
/// Holds a 0×0 frame until the first capture and after detach. Readers never
/// block the capture thread.
#[derive(Debug, Clone)]
pub struct RenderSurface {
    frames: Arc<watch::Sender<Arc<VideoFrame>>>,
}

impl RenderSurface {
    /// Create a detached surface
    pub fn new() -> Self {
        let (frames, _) = watch::channel(Arc::new(VideoFrame::empty()));
        Self {
            frames: Arc::new(frames),
        }
    }

    /// Replace the current frame
    pub fn present(&self, frame: VideoFrame) {
        self.frames.send_replace(Arc::new(frame));
    }

    /// Current frame
    pub fn snapshot(&self) -> Arc<VideoFrame> {
        self.frames.borrow().clone()
    }

    /// Whether a non-empty frame is available
    pub fn is_ready(&self) -> bool {
        !self.frames.borrow().is_empty()
    }

    /// Subscribe to the live pixel feed
    pub fn subscribe(&self) -> watch::Receiver<Arc<VideoFrame>> {
        self.frames.subscribe()
    }

    /// Clear the surface back to the empty frame
    pub fn detach(&self) {
        self.frames.send_replace(Arc::new(VideoFrame::empty()));
    }
}

impl Default for RenderSurface {
    fn default() -> Self {
        Self::new()
    }
}

/// How long [`CaptureManager::acquire`] waits for a dropped stream to close
const RETIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Consecutive recoverable read errors after which the stream is given up
const MAX_CONSECUTIVE_ERRORS: u32 = 30;

/// Ownership of the manager's single device stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    /// A handle owns stream `generation`
    Held(u64),
    /// The handle was dropped and its capture thread is still closing the device
    Retiring(u64),
}

#[derive(Debug)]
struct StreamSlot {
    state: watch::Sender<Slot>,
    generation: AtomicU64,
}

impl StreamSlot {
    fn new() -> Self {
        let (state, _) = watch::channel(Slot::Free);
        Self {
            state,
            generation: AtomicU64::new(0),
        }
    }

    fn is_free(&self) -> bool {
        *self.state.borrow() == Slot::Free
    }

    /// Claim the slot, waiting for a retiring stream to finish closing
    async fn claim(self: &Arc<Self>) -> Result<SlotLease, MediaError> {
        let mut changes = self.state.subscribe();
        let wait = async {
            loop {
                let current = *changes.borrow_and_update();
                match current {
                    Slot::Free => {
                        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                        let claimed = self.state.send_if_modified(|slot| {
                            if *slot == Slot::Free {
                                *slot = Slot::Held(generation);
                                true
                            } else {
                                false
                            }
                        });
                        if claimed {
                            return Ok(SlotLease {
                                slot: self.clone(),
                                generation,
                            });
                        }
                    }
                    Slot::Held(_) => return Err(MediaError::CaptureAlreadyActive),
                    Slot::Retiring(generation) => {
                        debug!("Waiting for capture stream {} to close", generation);
                    }
                }
                if changes.changed().await.is_err() {
                    return Err(MediaError::CaptureAlreadyActive);
                }
            }
        };

        match tokio::time::timeout(RETIRE_TIMEOUT, wait).await {
            Ok(claimed) => claimed,
            Err(_) => Err(MediaError::ResourceNotAvailable {
                resource: "camera (previous stream is still closing)".to_string(),
            }),
        }
    }

    /// Mark stream `generation` as closing without an owner
    fn retire(&self, generation: u64) {
        self.state.send_if_modified(|slot| {
            if *slot == Slot::Held(generation) {
                *slot = Slot::Retiring(generation);
                true
            } else {
                false
            }
        });
    }

    fn free(&self, generation: u64) {
        self.state.send_if_modified(|slot| match *slot {
            Slot::Held(g) | Slot::Retiring(g) if g == generation => {
                *slot = Slot::Free;
                true
            }
            _ => false,
        });
    }
}

/// Frees the slot when the capture thread is done with the device, including
/// on panic
struct SlotLease {
    slot: Arc<StreamSlot>,
    generation: u64,
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.slot.free(self.generation);
    }
}

/// Stops an acquisition whose caller went away before it completed
struct PendingAcquire {
    slot: Arc<StreamSlot>,
    generation: u64,
    stop: Arc<AtomicBool>,
    armed: bool,
}

impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if self.armed {
            self.stop.store(true, Ordering::SeqCst);
            self.slot.retire(self.generation);
        }
    }
}

/// Owns the camera and the render surface it feeds
pub struct CaptureManager {
    backend: Arc<dyn CaptureBackend>,
    surface: RenderSurface,
    slot: Arc<StreamSlot>,
    event_tx: broadcast::Sender<CaptureEvent>,
    stats: Arc<RwLock<CaptureStats>>,
}

impl std::fmt::Debug for CaptureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureManager")
            .field("backend", &self.backend.name())
            .field("active", &self.is_active())
            .finish()
    }
}

impl CaptureManager {
    /// Create a manager using the build's default camera backend
    pub fn new() -> Self {
        Self::with_backend(default_backend())
    }

    /// Create a manager using `backend`
    pub fn with_backend(backend: Arc<dyn CaptureBackend>) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            backend,
            surface: RenderSurface::new(),
            slot: Arc::new(StreamSlot::new()),
            event_tx,
            stats: Arc::new(RwLock::new(CaptureStats::default())),
        }
    }

    /// Enumerate available devices
    pub fn enumerate_devices(&self) -> Result<Vec<VideoDevice>, MediaError> {
        self.backend.enumerate_devices()
    }

    /// Surface fed by the active stream
    pub fn surface(&self) -> &RenderSurface {
        &self.surface
    }

    /// Whether a device stream is open, including one still closing after its
    /// handle was dropped
    pub fn is_active(&self) -> bool {
        !self.slot.is_free()
    }

    /// Acquire the camera and start feeding the render surface.
    ///
    /// Resolves once the device stream is open. Fails with
    /// `CaptureAlreadyActive` while another handle holds the camera; a stream
    /// whose handle was dropped is waited for instead. If this future is
    /// dropped before it resolves, the capture thread closes the device on
    /// its own.
    pub async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<CaptureHandle, MediaError> {
        constraints.validate()?;

        let lease = self.slot.claim().await?;
        let generation = lease.generation;

        let (ready_tx, ready_rx) = oneshot::channel();
        let (lost_tx, lost_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let mut pending = PendingAcquire {
            slot: self.slot.clone(),
            generation,
            stop: stop.clone(),
            armed: true,
        };

        let worker = CaptureWorker {
            backend: self.backend.clone(),
            constraints: constraints.clone(),
            surface: self.surface.clone(),
            stop: stop.clone(),
            lease,
            lost_tx,
            event_tx: self.event_tx.clone(),
            stats: self.stats.clone(),
        };

        // A failed spawn drops the worker, and with it the lease
        let thread = std::thread::Builder::new()
            .name("livecoach-capture".to_string())
            .spawn(move || worker.run(ready_tx))
            .map_err(|e| MediaError::Io { source: e })?;

        match ready_rx.await {
            Ok(Ok(device_id)) => {
                pending.armed = false;
                info!(
                    "Capture started on {} via {} backend",
                    device_id,
                    self.backend.name()
                );
                Ok(CaptureHandle {
                    device_id,
                    generation,
                    stop,
                    thread: Some(thread),
                    surface: self.surface.clone(),
                    slot: self.slot.clone(),
                    lost: Some(lost_rx),
                    released: false,
                })
            }
            Ok(Err(e)) => {
                warn!("Capture acquisition failed: {}", e);
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                Err(e)
            }
            Err(_) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                Err(MediaError::ResourceNotAvailable {
                    resource: "capture thread exited before the device opened".to_string(),
                })
            }
        }
    }

    /// Release `handle` (see [`CaptureHandle::release`])
    pub async fn release(&self, handle: &mut CaptureHandle) {
        handle.release().await
    }

    /// Get current statistics
    pub fn get_stats(&self) -> CaptureStats {
        self.stats.read().clone()
    }

    /// Subscribe to capture events
    pub fn subscribe_events(&self) -> broadcast::Receiver<CaptureEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for CaptureManager {
    fn default() -> Self {
        Self::new()
    }
}

/// State moved onto the capture thread
struct CaptureWorker {
    backend: Arc<dyn CaptureBackend>,
    constraints: CaptureConstraints,
    surface: RenderSurface,
    stop: Arc<AtomicBool>,
    lease: SlotLease,
    lost_tx: oneshot::Sender<MediaError>,
    event_tx: broadcast::Sender<CaptureEvent>,
    stats: Arc<RwLock<CaptureStats>>,
}

impl CaptureWorker {
    fn run(self, ready_tx: oneshot::Sender<Result<String, MediaError>>) {
        let lease = self.lease;
        let device_id = self
            .constraints
            .device_id
            .clone()
            .unwrap_or_else(|| "default".to_string());

        let mut source = match self.backend.open_stream(&self.constraints) {
            Ok(source) => source,
            Err(e) => {
                drop(lease);
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        if ready_tx.send(Ok(device_id.clone())).is_err() || self.stop.load(Ordering::SeqCst) {
            debug!("Capture acquisition abandoned, closing {}", device_id);
            if let Err(e) = source.stop() {
                warn!("Failed to stop {}: {}", device_id, e);
            }
            return;
        }

        let started = Instant::now();
        {
            let mut stats = self.stats.write();
            stats.acquisitions += 1;
            stats.average_framerate = 0.0;
            stats.duration = Duration::ZERO;
        }
        let _ = self.event_tx.send(CaptureEvent::CaptureStarted {
            device_id: device_id.clone(),
        });

        let mut frames = 0u64;
        let mut consecutive_errors = 0u32;
        let mut failure = None;
        while !self.stop.load(Ordering::SeqCst) {
            match source.read_frame() {
                Ok(frame) => {
                    frames += 1;
                    consecutive_errors = 0;
                    let elapsed = started.elapsed();
                    {
                        let mut stats = self.stats.write();
                        stats.frames_captured += 1;
                        stats.total_bytes += frame.data.len() as u64;
                        stats.duration = elapsed;
                        if elapsed > Duration::ZERO {
                            stats.average_framerate = frames as f64 / elapsed.as_secs_f64();
                        }
                    }
                    // A stop requested mid-read must not repaint a detached surface
                    if !self.stop.load(Ordering::SeqCst) {
                        self.surface.present(frame);
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    self.stats.write().capture_errors += 1;
                    let _ = self.event_tx.send(CaptureEvent::CaptureError {
                        device_id: device_id.clone(),
                        error: e.to_string(),
                        category: e.category(),
                    });

                    if !e.is_recoverable() {
                        warn!("Capture on {} failed: {}", device_id, e);
                        failure = Some(e);
                        break;
                    }
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        warn!("Giving up on {} after {} bad frames", device_id, consecutive_errors);
                        failure = Some(MediaError::CaptureFailed {
                            device_id: device_id.clone(),
                            reason: format!(
                                "{} consecutive frame errors, last: {}",
                                consecutive_errors, e
                            ),
                        });
                        break;
                    }
                    debug!("Skipping bad frame on {}: {}", device_id, e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }

        if let Err(e) = source.stop() {
            warn!("Failed to stop {}: {}", device_id, e);
        }
        drop(source);
        self.surface.detach();
        drop(lease);

        let _ = self.event_tx.send(CaptureEvent::CaptureStopped {
            device_id: device_id.clone(),
        });
        info!("Capture stopped on {} after {} frames", device_id, frames);

        if let Some(error) = failure {
            let _ = self.lost_tx.send(error);
        }
    }
}

/// Exclusive owner of one device stream
#[derive(Debug)]
pub struct CaptureHandle {
    device_id: String,
    generation: u64,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    surface: RenderSurface,
    slot: Arc<StreamSlot>,
    lost: Option<oneshot::Receiver<MediaError>>,
    released: bool,
}

impl CaptureHandle {
    /// Device the stream was opened on
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Whether the handle has been released
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Wait until the device stream fails on its own.
    ///
    /// Resolves with the error that ended the stream. Never resolves for a
    /// stream that keeps running or is released normally. Cancel safe.
    pub async fn lost(&mut self) -> MediaError {
        if let Some(receiver) = self.lost.as_mut() {
            let outcome = receiver.await;
            self.lost = None;
            if let Ok(error) = outcome {
                return error;
            }
        }
        std::future::pending().await
    }

    /// Stop the device stream and detach the render surface.
    ///
    /// Waits for the capture thread to exit. Calling it again is a no-op.
    pub async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.lost = None;
        self.stop.store(true, Ordering::SeqCst);
        self.slot.retire(self.generation);

        if let Some(thread) = self.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => warn!("Capture thread for {} panicked", self.device_id),
                Err(e) => warn!("Failed to join capture thread for {}: {}", self.device_id, e),
            }
        }

        self.surface.detach();
        debug!("Capture handle for {} released", self.device_id);
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if !self.released {
            // The thread notices the flag after its current read and frees the slot
            self.stop.store(true, Ordering::SeqCst);
            self.slot.retire(self.generation);
            self.surface.detach();
            debug!("Capture handle for {} dropped without release", self.device_id);
        }
    }
}
