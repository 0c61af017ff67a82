//! Media error types and handling
//!
//! Errors raised while acquiring the camera, feeding the render surface and
//! compressing frames. They convert into [`LiveCoachError`] at the session
//! boundary so the session can classify them.

use livecoach_core::LiveCoachError;
use thiserror::Error;

/// Main error type for media operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// I/O operation failed
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Encoding operation failed
    #[error("Encoding failed: {codec} - {reason}")]
    EncodingFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// Unsupported format error
    #[error("Unsupported format: {format}")]
    UnsupportedFormat {
        /// Format description
        format: String,
    },

    /// Invalid frame data error
    #[error("Invalid frame data: expected {expected} bytes, got {actual}")]
    InvalidFrameData {
        /// Expected data size
        expected: usize,
        /// Actual data size
        actual: usize,
    },

    /// Device enumeration failed
    #[error("Device enumeration failed: {reason}")]
    DeviceEnumerationFailed {
        /// Failure reason
        reason: String,
    },

    /// Device not found error
    #[error("Device not found: {device_id}")]
    DeviceNotFound {
        /// Device identifier
        device_id: String,
    },

    /// Permission denied error
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// Device stream failed after it was opened
    #[error("Capture failed on {device_id}: {reason}")]
    CaptureFailed {
        /// Device identifier
        device_id: String,
        /// Failure reason
        reason: String,
    },

    /// Capture not active error
    #[error("Capture not active")]
    CaptureNotActive,

    /// A device stream is already held
    #[error("Capture already active")]
    CaptureAlreadyActive,

    /// Resource not available
    #[error("Resource not available: {resource}")]
    ResourceNotAvailable {
        /// Resource name
        resource: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Check if error is recoverable
    ///
    /// A recoverable error spoils one frame; the stream it came from stays
    /// usable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            MediaError::Io { .. } => true,
            MediaError::ResourceNotAvailable { .. } => true,
            MediaError::InvalidFrameData { .. } => true,
            MediaError::EncodingFailed { .. } => true,
            MediaError::UnsupportedFormat { .. } => true,
            MediaError::CaptureFailed { .. } => false,
            MediaError::PermissionDenied { .. } => false,
            MediaError::DeviceNotFound { .. } => false,
            _ => false,
        }
    }

    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::Io { .. } => ErrorCategory::System,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::EncodingFailed { .. } => ErrorCategory::Codec,
            MediaError::UnsupportedFormat { .. } => ErrorCategory::Format,
            MediaError::InvalidFrameData { .. } => ErrorCategory::Data,
            MediaError::DeviceEnumerationFailed { .. } => ErrorCategory::Device,
            MediaError::DeviceNotFound { .. } => ErrorCategory::Device,
            MediaError::PermissionDenied { .. } => ErrorCategory::Device,
            MediaError::CaptureFailed { .. } => ErrorCategory::Device,
            MediaError::CaptureNotActive => ErrorCategory::State,
            MediaError::CaptureAlreadyActive => ErrorCategory::State,
            MediaError::ResourceNotAvailable { .. } => ErrorCategory::System,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// System-level errors (I/O, resources)
    System,
    /// Configuration and parameter errors
    Configuration,
    /// Codec-related errors
    Codec,
    /// Format and data structure errors
    Format,
    /// Data validation errors
    Data,
    /// Camera and hardware errors
    Device,
    /// State management errors
    State,
}

impl From<MediaError> for LiveCoachError {
    fn from(error: MediaError) -> Self {
        match error {
            MediaError::PermissionDenied { operation } => {
                LiveCoachError::PermissionDenied { reason: operation }
            }
            MediaError::InvalidConfiguration { message } => LiveCoachError::InvalidConfiguration {
                field: "capture".to_string(),
                reason: message,
            },
            MediaError::CaptureAlreadyActive => LiveCoachError::InvalidState {
                expected: "no active capture".to_string(),
                actual: "capture already active".to_string(),
            },
            error @ (MediaError::EncodingFailed { .. }
            | MediaError::InvalidFrameData { .. }
            | MediaError::UnsupportedFormat { .. }) => LiveCoachError::Encode {
                reason: error.to_string(),
            },
            other => LiveCoachError::DeviceUnavailable {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecoach_core::ErrorKind;

    #[test]
    fn test_error_categories() {
        let io_error = MediaError::Io {
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"),
        };
        assert_eq!(io_error.category(), ErrorCategory::System);
        assert!(io_error.is_recoverable());

        let denied = MediaError::PermissionDenied {
            operation: "open camera".to_string(),
        };
        assert_eq!(denied.category(), ErrorCategory::Device);
        assert!(!denied.is_recoverable());
    }

    #[test]
    fn test_corrupt_frame_is_recoverable() {
        let corrupt = MediaError::UnsupportedFormat {
            format: "MJPEG (truncated scan)".to_string(),
        };
        assert!(corrupt.is_recoverable());
        assert_eq!(corrupt.category(), ErrorCategory::Format);

        let lost = MediaError::CaptureFailed {
            device_id: "0".to_string(),
            reason: "device unplugged".to_string(),
        };
        assert!(!lost.is_recoverable());
        assert_eq!(lost.category(), ErrorCategory::Device);
    }

    #[test]
    fn test_error_display() {
        let error = MediaError::InvalidFrameData {
            expected: 1024,
            actual: 512,
        };
        assert_eq!(
            error.to_string(),
            "Invalid frame data: expected 1024 bytes, got 512"
        );
    }

    #[test]
    fn test_conversion_to_session_error() {
        let denied: LiveCoachError = MediaError::PermissionDenied {
            operation: "open camera".to_string(),
        }
        .into();
        assert_eq!(denied.kind(), ErrorKind::Device);

        let missing: LiveCoachError = MediaError::DeviceNotFound {
            device_id: "cam-9".to_string(),
        }
        .into();
        assert!(matches!(missing, LiveCoachError::DeviceUnavailable { .. }));

        let encode: LiveCoachError = MediaError::InvalidFrameData {
            expected: 12,
            actual: 3,
        }
        .into();
        assert_eq!(encode.kind(), ErrorKind::Encode);
        assert!(!encode.is_fatal());
    }
}
