//! Camera capture backends
//!
//! A [`CaptureBackend`] knows how to enumerate cameras and open a stream on
//! one of them. The resulting [`FrameSource`] is driven from the dedicated
//! capture thread, so it does not need to be `Send`.

#[cfg(feature = "native-camera")]
pub mod native;

#[cfg(feature = "native-camera")]
pub use native::NativeCameraBackend;

use crate::error::MediaError;
use crate::tracks::VideoFrame;
use crate::video_capture::{CaptureConstraints, VideoDevice, VideoPixelFormat, VideoResolution};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// An open device stream
pub trait FrameSource {
    /// Block until the next frame is available
    fn read_frame(&mut self) -> Result<VideoFrame, MediaError>;

    /// Stop the underlying media track
    fn stop(&mut self) -> Result<(), MediaError>;
}

/// Platform camera capability
pub trait CaptureBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// List the cameras this backend can open
    fn enumerate_devices(&self) -> Result<Vec<VideoDevice>, MediaError>;

    /// Open a stream matching `constraints`.
    ///
    /// Called on the capture thread. Fails with `PermissionDenied` when access
    /// is refused and `DeviceNotFound` when no camera matches.
    fn open_stream(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn FrameSource>, MediaError>;
}

/// Backend used when no camera support is compiled in
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableBackend;

impl CaptureBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn enumerate_devices(&self) -> Result<Vec<VideoDevice>, MediaError> {
        Ok(Vec::new())
    }

    fn open_stream(
        &self,
        _constraints: &CaptureConstraints,
    ) -> Result<Box<dyn FrameSource>, MediaError> {
        Err(MediaError::ResourceNotAvailable {
            resource: "camera backend (build with the native-camera feature)".to_string(),
        })
    }
}

/// Get the camera backend for this build
pub fn default_backend() -> Arc<dyn CaptureBackend> {
    #[cfg(feature = "native-camera")]
    {
        Arc::new(NativeCameraBackend::new())
    }
    #[cfg(not(feature = "native-camera"))]
    {
        Arc::new(UnavailableBackend)
    }
}

/// Test pattern camera.
///
/// Produces a moving RGB gradient at the requested resolution and frame rate.
/// Clones share their stream counters, so a test can keep one clone and hand
/// the other to a session.
#[derive(Debug, Clone)]
pub struct SyntheticCaptureBackend {
    devices: Vec<VideoDevice>,
    deny_access: bool,
    counters: Arc<StreamCounters>,
}

#[derive(Debug, Default)]
struct StreamCounters {
    open: AtomicUsize,
    total: AtomicUsize,
    peak: AtomicUsize,
}

impl SyntheticCaptureBackend {
    /// Backend exposing a single synthetic camera
    pub fn new() -> Self {
        let device = VideoDevice {
            id: "synthetic_camera_0".to_string(),
            name: "Synthetic Camera".to_string(),
            description: "Moving gradient test pattern".to_string(),
            supported_resolutions: vec![
                VideoResolution::QVGA,
                VideoResolution::VGA,
                VideoResolution::HD,
            ],
            max_framerate: 60,
        };

        Self {
            devices: vec![device],
            deny_access: false,
            counters: Arc::new(StreamCounters::default()),
        }
    }

    /// Backend whose camera refuses access
    pub fn denied() -> Self {
        Self {
            deny_access: true,
            ..Self::new()
        }
    }

    /// Backend with no cameras attached
    pub fn without_devices() -> Self {
        Self {
            devices: Vec::new(),
            ..Self::new()
        }
    }

    /// Streams currently open
    pub fn open_streams(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Streams opened over the backend's lifetime
    pub fn total_opens(&self) -> usize {
        self.counters.total.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open streams observed
    pub fn peak_open_streams(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}

impl Default for SyntheticCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for SyntheticCaptureBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn enumerate_devices(&self) -> Result<Vec<VideoDevice>, MediaError> {
        Ok(self.devices.clone())
    }

    fn open_stream(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn FrameSource>, MediaError> {
        if self.deny_access {
            return Err(MediaError::PermissionDenied {
                operation: "open synthetic camera".to_string(),
            });
        }

        let device = match &constraints.device_id {
            Some(id) => self.devices.iter().find(|d| &d.id == id),
            None => self.devices.first(),
        }
        .ok_or_else(|| MediaError::DeviceNotFound {
            device_id: constraints
                .device_id
                .clone()
                .unwrap_or_else(|| "default".to_string()),
        })?;

        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.total.fetch_add(1, Ordering::SeqCst);
        self.counters.peak.fetch_max(open, Ordering::SeqCst);

        debug!(
            "Opened {} at {}x{} @ {} fps",
            device.name, constraints.resolution.width, constraints.resolution.height,
            constraints.framerate
        );

        let interval = Duration::from_secs(1) / constraints.framerate.max(1);
        Ok(Box::new(SyntheticSource {
            resolution: constraints.resolution,
            interval,
            next_frame_at: Instant::now(),
            sequence: 0,
            counters: self.counters.clone(),
            stopped: false,
        }))
    }
}

struct SyntheticSource {
    resolution: VideoResolution,
    interval: Duration,
    next_frame_at: Instant,
    sequence: u64,
    counters: Arc<StreamCounters>,
    stopped: bool,
}

impl SyntheticSource {
    fn render(&self) -> Vec<u8> {
        let VideoResolution { width, height } = self.resolution;
        let shift = self.sequence as usize;
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height as usize {
            for x in 0..width as usize {
                data.push(((x + shift) % 256) as u8);
                data.push((y % 256) as u8);
                data.push(((shift * 4) % 256) as u8);
            }
        }
        data
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<VideoFrame, MediaError> {
        if self.stopped {
            return Err(MediaError::CaptureNotActive);
        }

        let now = Instant::now();
        if self.next_frame_at > now {
            std::thread::sleep(self.next_frame_at - now);
        }
        self.next_frame_at = Instant::now() + self.interval;
        self.sequence += 1;

        Ok(VideoFrame {
            width: self.resolution.width,
            height: self.resolution.height,
            format: VideoPixelFormat::RGB24,
            data: self.render(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            sequence: self.sequence,
        })
    }

    fn stop(&mut self) -> Result<(), MediaError> {
        if !self.stopped {
            self.stopped = true;
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
