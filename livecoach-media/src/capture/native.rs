//! Native camera backend built on nokhwa

use super::{CaptureBackend, FrameSource};
use crate::error::MediaError;
use crate::tracks::VideoFrame;
use crate::video_capture::{CaptureConstraints, VideoDevice, VideoPixelFormat, VideoResolution};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::{Camera, NokhwaError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Camera backend using the platform's native capture API
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCameraBackend;

impl NativeCameraBackend {
    /// Create the backend
    pub fn new() -> Self {
        Self
    }
}

fn camera_index(device_id: Option<&str>) -> CameraIndex {
    match device_id {
        Some(id) => id
            .parse::<u32>()
            .map(CameraIndex::Index)
            .unwrap_or_else(|_| CameraIndex::String(id.to_string())),
        None => CameraIndex::Index(0),
    }
}

fn open_error(device_id: &str, error: NokhwaError) -> MediaError {
    let message = error.to_string();
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("permission") || lowered.contains("denied") || lowered.contains("authoriz")
    {
        MediaError::PermissionDenied {
            operation: format!("open camera {}: {}", device_id, message),
        }
    } else {
        MediaError::DeviceNotFound {
            device_id: format!("{} ({})", device_id, message),
        }
    }
}

impl CaptureBackend for NativeCameraBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn enumerate_devices(&self) -> Result<Vec<VideoDevice>, MediaError> {
        let cameras =
            nokhwa::query(ApiBackend::Auto).map_err(|e| MediaError::DeviceEnumerationFailed {
                reason: e.to_string(),
            })?;

        Ok(cameras
            .into_iter()
            .map(|info| VideoDevice {
                id: info.index().to_string(),
                name: info.human_name(),
                description: info.description().to_string(),
                supported_resolutions: Vec::new(),
                max_framerate: 0,
            })
            .collect())
    }

    fn open_stream(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn FrameSource>, MediaError> {
        let index = camera_index(constraints.device_id.as_deref());
        let device_id = index.to_string();

        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(
                Resolution::new(constraints.resolution.width, constraints.resolution.height),
                FrameFormat::MJPEG,
                constraints.framerate,
            ),
        ));

        let mut camera = Camera::new(index, requested).map_err(|e| open_error(&device_id, e))?;
        camera
            .open_stream()
            .map_err(|e| open_error(&device_id, e))?;

        let format = camera.camera_format();
        info!(
            "Opened camera {} at {}x{} @ {} fps",
            device_id,
            format.width(),
            format.height(),
            format.frame_rate()
        );

        Ok(Box::new(NativeSource {
            camera,
            device_id,
            sequence: 0,
            stopped: false,
        }))
    }
}

struct NativeSource {
    camera: Camera,
    device_id: String,
    sequence: u64,
    stopped: bool,
}

impl FrameSource for NativeSource {
    fn read_frame(&mut self) -> Result<VideoFrame, MediaError> {
        if self.stopped {
            return Err(MediaError::CaptureNotActive);
        }

        let buffer = self.camera.frame().map_err(|e| MediaError::CaptureFailed {
            device_id: self.device_id.clone(),
            reason: e.to_string(),
        })?;
        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| MediaError::UnsupportedFormat {
                format: format!("{} ({})", buffer.source_frame_format(), e),
            })?;

        self.sequence += 1;
        let resolution = VideoResolution::new(image.width(), image.height());
        Ok(VideoFrame {
            width: resolution.width,
            height: resolution.height,
            format: VideoPixelFormat::RGB24,
            data: image.into_raw(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            sequence: self.sequence,
        })
    }

    fn stop(&mut self) -> Result<(), MediaError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        debug!("Stopping camera {}", self.device_id);
        self.camera
            .stop_stream()
            .map_err(|e| MediaError::CaptureFailed {
                device_id: self.device_id.clone(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_index_parsing() {
        assert_eq!(camera_index(None), CameraIndex::Index(0));
        assert_eq!(camera_index(Some("2")), CameraIndex::Index(2));
        assert_eq!(
            camera_index(Some("/dev/video4")),
            CameraIndex::String("/dev/video4".to_string())
        );
    }
}
