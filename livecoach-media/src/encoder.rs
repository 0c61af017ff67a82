//! JPEG frame encoder
//!
//! Compresses render surface snapshots into still images for the channel.
//! Compression runs on tokio's blocking pool.

use crate::error::MediaError;
use crate::tracks::VideoFrame;
use crate::video_capture::VideoPixelFormat;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::sync::Arc;
use tracing::trace;

/// Default JPEG quality
pub const DEFAULT_JPEG_QUALITY: u8 = 70;

const CODEC_NAME: &str = "jpeg";

/// A compressed still image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// JPEG bytes
    pub data: Bytes,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Capture sequence of the source frame
    pub sequence: u64,
}

impl EncodedFrame {
    /// Compressed size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Lossy still-image encoder with a fixed quality factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    /// Create an encoder; `quality` must be in `1..=100`
    pub fn new(quality: u8) -> Result<Self, MediaError> {
        if !(1..=100).contains(&quality) {
            return Err(MediaError::InvalidConfiguration {
                message: format!("JPEG quality {} is outside 1..=100", quality),
            });
        }
        Ok(Self { quality })
    }

    /// Configured quality factor
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode a snapshot on the blocking pool.
    ///
    /// Returns `Ok(None)` for an empty (0×0) snapshot.
    pub async fn encode(&self, frame: Arc<VideoFrame>) -> Result<Option<EncodedFrame>, MediaError> {
        if frame.is_empty() {
            return Ok(None);
        }

        let encoder = *self;
        tokio::task::spawn_blocking(move || encoder.encode_blocking(&frame))
            .await
            .map_err(|e| MediaError::EncodingFailed {
                codec: CODEC_NAME.to_string(),
                reason: format!("encoder task failed: {}", e),
            })?
    }

    /// Encode a snapshot on the current thread
    pub fn encode_blocking(&self, frame: &VideoFrame) -> Result<Option<EncodedFrame>, MediaError> {
        if frame.is_empty() {
            return Ok(None);
        }

        let expected = frame.expected_len();
        if frame.data.len() != expected {
            return Err(MediaError::InvalidFrameData {
                expected,
                actual: frame.data.len(),
            });
        }

        let rgb: std::borrow::Cow<'_, [u8]> = match frame.format {
            VideoPixelFormat::RGB24 => std::borrow::Cow::Borrowed(&frame.data[..]),
            VideoPixelFormat::RGBA32 => std::borrow::Cow::Owned(strip_alpha(&frame.data)),
        };

        let mut output = Vec::with_capacity(expected / 8);
        JpegEncoder::new_with_quality(&mut output, self.quality)
            .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
            .map_err(|e| MediaError::EncodingFailed {
                codec: CODEC_NAME.to_string(),
                reason: e.to_string(),
            })?;

        trace!(
            "Encoded frame {} ({}x{}) to {} bytes",
            frame.sequence,
            frame.width,
            frame.height,
            output.len()
        );

        Ok(Some(EncodedFrame {
            data: Bytes::from(output),
            width: frame.width,
            height: frame.height,
            sequence: frame.sequence,
        }))
    }
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

fn strip_alpha(rgba: &[u8]) -> Vec<u8> {
    rgba.chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, format: VideoPixelFormat) -> VideoFrame {
        let len = (width * height) as usize * format.bytes_per_pixel();
        VideoFrame {
            width,
            height,
            format,
            data: (0..len).map(|i| (i % 251) as u8).collect(),
            timestamp: 0,
            sequence: 7,
        }
    }

    #[test]
    fn test_quality_bounds() {
        assert!(FrameEncoder::new(0).is_err());
        assert!(FrameEncoder::new(101).is_err());
        assert_eq!(FrameEncoder::new(1).unwrap().quality(), 1);
        assert_eq!(FrameEncoder::default().quality(), DEFAULT_JPEG_QUALITY);
    }

    #[test]
    fn test_encode_rgb_produces_jpeg() {
        let encoded = FrameEncoder::default()
            .encode_blocking(&frame(16, 8, VideoPixelFormat::RGB24))
            .unwrap()
            .unwrap();
        assert_eq!(&encoded.data[..2], &[0xFF, 0xD8]);
        assert_eq!(&encoded.data[encoded.len() - 2..], &[0xFF, 0xD9]);
        assert_eq!(encoded.sequence, 7);
    }

    #[test]
    fn test_encode_rgba_drops_alpha() {
        let encoded = FrameEncoder::default()
            .encode_blocking(&frame(8, 8, VideoPixelFormat::RGBA32))
            .unwrap()
            .unwrap();
        assert_eq!(&encoded.data[..2], &[0xFF, 0xD8]);
        assert_eq!(strip_alpha(&[1, 2, 3, 255, 4, 5, 6, 0]), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_empty_snapshot_has_no_payload() {
        let result = FrameEncoder::default().encode_blocking(&VideoFrame::empty());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let mut bad = frame(4, 4, VideoPixelFormat::RGB24);
        bad.data.truncate(10);
        let result = FrameEncoder::default().encode_blocking(&bad);
        assert!(matches!(
            result,
            Err(MediaError::InvalidFrameData {
                expected: 48,
                actual: 10
            })
        ));
    }

    #[tokio::test]
    async fn test_async_encode() {
        let encoder = FrameEncoder::new(50).unwrap();
        let encoded = encoder
            .encode(Arc::new(frame(32, 24, VideoPixelFormat::RGB24)))
            .await
            .unwrap();
        assert!(encoded.is_some());
        assert!(encoder.encode(Arc::new(VideoFrame::empty())).await.unwrap().is_none());
    }
}
