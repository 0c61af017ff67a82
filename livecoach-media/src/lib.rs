//! # LiveCoach Media
//!
//! Camera acquisition, the render surface the camera feeds, and JPEG
//! compression of surface snapshots for the live analysis channel.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod encoder;
pub mod error;
pub mod tracks;
pub mod video_capture;

// Re-export main types
#[cfg(feature = "native-camera")]
pub use capture::NativeCameraBackend;
pub use capture::{
    default_backend, CaptureBackend, FrameSource, SyntheticCaptureBackend, UnavailableBackend,
};
pub use encoder::{EncodedFrame, FrameEncoder, DEFAULT_JPEG_QUALITY};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use tracks::VideoFrame;
pub use video_capture::{
    CaptureConstraints, CaptureEvent, CaptureHandle, CaptureManager, CaptureStats,
    RenderSurface, VideoDevice, VideoPixelFormat, VideoResolution,
};
