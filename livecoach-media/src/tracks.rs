//! Media frame types

use crate::video_capture::VideoPixelFormat;

/// Raw video frame as produced by a capture backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel layout of `data`
    pub format: VideoPixelFormat,
    /// Packed pixel data, row-major
    pub data: Vec<u8>,
    /// Timestamp in milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Position in the capture stream, starting at 1
    pub sequence: u64,
}

impl VideoFrame {
    /// A 0×0 frame, shown by the render surface before the first capture
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            format: VideoPixelFormat::RGB24,
            data: Vec::new(),
            timestamp: 0,
            sequence: 0,
        }
    }

    /// Whether the frame has no pixels
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Byte length implied by the dimensions and pixel format
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

impl Default for VideoFrame {
    fn default() -> Self {
        Self::empty()
    }
}
