//! Capture lifecycle tests
//!
//! Drives the capture manager with the synthetic camera: acquisition,
//! surface feeding, release and failure paths.

use livecoach_media::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::assert_ok;

// ============================================================================
// HELPERS
// ============================================================================

fn small_constraints() -> CaptureConstraints {
    CaptureConstraints {
        device_id: None,
        resolution: VideoResolution::new(64, 48),
        framerate: 60,
    }
}

async fn wait_for_frame(surface: &RenderSurface) -> Arc<VideoFrame> {
    let mut preview = surface.subscribe();
    timeout(Duration::from_secs(2), async {
        loop {
            if !preview.borrow_and_update().is_empty() {
                return preview.borrow().clone();
            }
            preview.changed().await.unwrap();
        }
    })
    .await
    .expect("no frame presented")
}

/// Camera that misbehaves on a fixed schedule
#[derive(Clone, Copy)]
enum Fault {
    /// Every other frame arrives undecodable
    CorruptEveryOther,
    /// The device disappears after this many frames
    UnplugAfter(u64),
}

struct FaultyBackend {
    fault: Fault,
    open: Arc<AtomicUsize>,
}

impl FaultyBackend {
    fn new(fault: Fault) -> Self {
        Self {
            fault,
            open: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl CaptureBackend for FaultyBackend {
    fn name(&self) -> &str {
        "faulty"
    }

    fn enumerate_devices(&self) -> Result<Vec<VideoDevice>, MediaError> {
        Ok(Vec::new())
    }

    fn open_stream(
        &self,
        _constraints: &CaptureConstraints,
    ) -> Result<Box<dyn FrameSource>, MediaError> {
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FaultySource {
            fault: self.fault,
            reads: 0,
            open: Some(self.open.clone()),
        }))
    }
}

struct FaultySource {
    fault: Fault,
    reads: u64,
    open: Option<Arc<AtomicUsize>>,
}

impl FrameSource for FaultySource {
    fn read_frame(&mut self) -> Result<VideoFrame, MediaError> {
        std::thread::sleep(Duration::from_millis(5));
        self.reads += 1;

        match self.fault {
            Fault::CorruptEveryOther if self.reads % 2 == 0 => {
                return Err(MediaError::UnsupportedFormat {
                    format: "truncated MJPEG".to_string(),
                })
            }
            Fault::UnplugAfter(good) if self.reads > good => {
                return Err(MediaError::CaptureFailed {
                    device_id: "faulty".to_string(),
                    reason: "device unplugged".to_string(),
                })
            }
            _ => {}
        }

        Ok(VideoFrame {
            width: 8,
            height: 4,
            format: VideoPixelFormat::RGB24,
            data: vec![0; 8 * 4 * 3],
            timestamp: 0,
            sequence: self.reads,
        })
    }

    fn stop(&mut self) -> Result<(), MediaError> {
        if let Some(open) = self.open.take() {
            open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for FaultySource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ============================================================================
// CAPTURE LIFECYCLE TESTS
// ============================================================================

#[tokio::test]
async fn test_acquire_feeds_surface() {
    let backend = SyntheticCaptureBackend::new();
    let manager = CaptureManager::with_backend(Arc::new(backend.clone()));
    let mut events = manager.subscribe_events();

    let mut handle = assert_ok!(manager.acquire(&small_constraints()).await);
    assert!(manager.is_active());
    assert_eq!(backend.open_streams(), 1);

    let frame = wait_for_frame(manager.surface()).await;
    assert_eq!(frame.width, 64);
    assert_eq!(frame.height, 48);
    assert_eq!(frame.data.len(), frame.expected_len());

    assert!(matches!(
        events.recv().await.unwrap(),
        CaptureEvent::CaptureStarted { .. }
    ));

    manager.release(&mut handle).await;
    assert!(handle.is_released());
    assert!(!manager.is_active());
    assert_eq!(backend.open_streams(), 0);
    assert!(!manager.surface().is_ready());

    let stats = manager.get_stats();
    assert_eq!(stats.acquisitions, 1);
    assert!(stats.frames_captured >= 1);
}

#[tokio::test]
async fn test_release_twice_is_noop() {
    let backend = SyntheticCaptureBackend::new();
    let manager = CaptureManager::with_backend(Arc::new(backend.clone()));

    let mut handle = manager.acquire(&small_constraints()).await.unwrap();
    handle.release().await;
    handle.release().await;
    manager.release(&mut handle).await;

    assert!(!manager.is_active());
    assert_eq!(backend.total_opens(), 1);
}

#[tokio::test]
async fn test_only_one_active_capture() {
    let backend = SyntheticCaptureBackend::new();
    let manager = CaptureManager::with_backend(Arc::new(backend.clone()));

    let mut first = manager.acquire(&small_constraints()).await.unwrap();
    let second = manager.acquire(&small_constraints()).await;
    assert!(matches!(second, Err(MediaError::CaptureAlreadyActive)));

    first.release().await;

    let mut third = manager.acquire(&small_constraints()).await.unwrap();
    third.release().await;
    assert_eq!(backend.peak_open_streams(), 1);
    assert_eq!(backend.total_opens(), 2);
}

#[tokio::test]
async fn test_denied_camera() {
    let manager = CaptureManager::with_backend(Arc::new(SyntheticCaptureBackend::denied()));

    let result = manager.acquire(&small_constraints()).await;
    assert!(matches!(result, Err(MediaError::PermissionDenied { .. })));
    assert!(!manager.is_active());
}

#[tokio::test]
async fn test_no_matching_device() {
    let manager =
        CaptureManager::with_backend(Arc::new(SyntheticCaptureBackend::without_devices()));

    let result = manager.acquire(&small_constraints()).await;
    assert!(matches!(result, Err(MediaError::DeviceNotFound { .. })));
    assert!(!manager.is_active());
}

#[tokio::test]
async fn test_invalid_constraints_rejected_before_opening() {
    let backend = SyntheticCaptureBackend::new();
    let manager = CaptureManager::with_backend(Arc::new(backend.clone()));

    let result = manager
        .acquire(&CaptureConstraints {
            framerate: 0,
            ..small_constraints()
        })
        .await;
    assert!(matches!(result, Err(MediaError::InvalidConfiguration { .. })));
    assert_eq!(backend.total_opens(), 0);
}

#[tokio::test]
async fn test_dropped_handle_stops_capture() {
    let backend = SyntheticCaptureBackend::new();
    let manager = CaptureManager::with_backend(Arc::new(backend.clone()));

    let handle = manager.acquire(&small_constraints()).await.unwrap();
    drop(handle);

    timeout(Duration::from_secs(2), async {
        while manager.is_active() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("capture thread did not stop");
    assert_eq!(backend.open_streams(), 0);
}

#[tokio::test]
async fn test_encode_live_snapshot() {
    let manager = CaptureManager::with_backend(Arc::new(SyntheticCaptureBackend::new()));
    let encoder = FrameEncoder::default();

    // Nothing captured yet
    assert!(encoder
        .encode(manager.surface().snapshot())
        .await
        .unwrap()
        .is_none());

    let mut handle = manager.acquire(&small_constraints()).await.unwrap();
    let frame = wait_for_frame(manager.surface()).await;
    let encoded = encoder.encode(frame).await.unwrap().unwrap();
    assert_eq!(&encoded.data[..2], &[0xFF, 0xD8]);

    handle.release().await;
}

#[tokio::test]
async fn test_reacquire_right_after_drop() {
    let backend = SyntheticCaptureBackend::new();
    let manager = CaptureManager::with_backend(Arc::new(backend.clone()));

    let handle = manager.acquire(&small_constraints()).await.unwrap();
    drop(handle);

    // The dropped stream is still closing; the next acquire waits for it
    let mut handle = assert_ok!(manager.acquire(&small_constraints()).await);
    assert_eq!(backend.peak_open_streams(), 1);
    assert_eq!(backend.open_streams(), 1);

    handle.release().await;
    assert!(!manager.is_active());
    assert_eq!(backend.open_streams(), 0);
}

#[tokio::test]
async fn test_abandoned_acquire_frees_camera() {
    let backend = SyntheticCaptureBackend::new();
    let manager = CaptureManager::with_backend(Arc::new(backend.clone()));

    // Polled once so the capture thread is spawned, then given up on
    let abandoned = timeout(Duration::ZERO, manager.acquire(&small_constraints())).await;
    drop(abandoned);

    let mut handle = assert_ok!(manager.acquire(&small_constraints()).await);
    assert_eq!(backend.peak_open_streams(), 1);
    handle.release().await;
    assert_eq!(backend.open_streams(), 0);
}

#[tokio::test]
async fn test_lost_reports_device_failure() {
    let backend = FaultyBackend::new(Fault::UnplugAfter(2));
    let open = backend.open.clone();
    let manager = CaptureManager::with_backend(Arc::new(backend));
    let mut events = manager.subscribe_events();

    let mut handle = manager.acquire(&small_constraints()).await.unwrap();
    let error = timeout(Duration::from_secs(2), handle.lost())
        .await
        .expect("loss was not reported");

    assert!(matches!(error, MediaError::CaptureFailed { .. }));
    assert!(error.to_string().contains("device unplugged"));
    assert_eq!(open.load(Ordering::SeqCst), 0);

    let mut saw_device_error = false;
    while let Ok(event) = events.try_recv() {
        if let CaptureEvent::CaptureError { category, .. } = event {
            saw_device_error |= category == ErrorCategory::Device;
        }
    }
    assert!(saw_device_error);

    handle.release().await;
    assert!(!manager.is_active());
}

#[tokio::test]
async fn test_corrupt_frames_do_not_end_capture() {
    let backend = FaultyBackend::new(Fault::CorruptEveryOther);
    let manager = CaptureManager::with_backend(Arc::new(backend));
    let mut events = manager.subscribe_events();

    let mut handle = manager.acquire(&small_constraints()).await.unwrap();

    // Plenty of bad frames go by without the stream being declared lost
    let lost = timeout(Duration::from_millis(300), handle.lost()).await;
    assert!(lost.is_err());
    assert!(manager.is_active());
    assert!(!manager.surface().snapshot().is_empty());

    let mut formats = 0;
    while let Ok(event) = events.try_recv() {
        if let CaptureEvent::CaptureError { category, .. } = event {
            assert_eq!(category, ErrorCategory::Format);
            formats += 1;
        }
    }
    assert!(formats > 0);

    handle.release().await;
}

#[test]
fn test_default_backend_without_native_camera() {
    let backend = default_backend();
    if cfg!(not(feature = "native-camera")) {
        assert_eq!(backend.name(), "unavailable");
        assert!(backend.enumerate_devices().unwrap().is_empty());
    }
}
