//! Error types for LiveCoach

use thiserror::Error;

/// Main error type for LiveCoach streaming operations
#[derive(Error, Debug)]
pub enum LiveCoachError {
    /// Initialization error
    #[error("Initialization failed: {reason}")]
    Initialization {
        /// Reason for initialization failure
        reason: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration {
        /// Configuration field that was rejected
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Camera could not be opened or no device matched the constraints
    #[error("Camera unavailable: {reason}")]
    DeviceUnavailable {
        /// Reason reported by the capture backend
        reason: String,
    },

    /// Camera access was refused
    #[error("Camera permission denied: {reason}")]
    PermissionDenied {
        /// Reason reported by the capture backend
        reason: String,
    },

    /// Channel could not be opened or failed while in use
    #[error("Channel to {endpoint} failed: {reason}")]
    Channel {
        /// Endpoint the channel was connected to
        endpoint: String,
        /// Reason for the failure
        reason: String,
    },

    /// Channel was closed by the peer or the transport ended
    #[error("Channel closed: {reason}")]
    ChannelClosed {
        /// Close reason, if the peer supplied one
        reason: String,
    },

    /// Inbound message did not match the expected schema
    #[error("Invalid inbound message: {source}")]
    Decode {
        /// Parsing error
        #[source]
        source: serde_json::Error,
    },

    /// Frame compression failed
    #[error("Frame encoding failed: {reason}")]
    Encode {
        /// Reason for failure
        reason: String,
    },

    /// Operation not allowed in the current state
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Session start was cancelled by a stop request
    #[error("Session start cancelled")]
    Cancelled,
}

/// Result type alias for LiveCoach operations
pub type LiveCoachResult<T> = Result<T, LiveCoachError>;

/// Coarse error taxonomy used to decide how a failure propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Camera unavailable or denied; fatal to a start attempt
    Device,
    /// Connection failed to open or failed mid-session; fatal
    Channel,
    /// Malformed inbound message; recovered locally
    Decode,
    /// Frame compression failure; recovered locally
    Encode,
    /// Invalid configuration
    Configuration,
    /// Operation rejected in the current state
    State,
}

impl LiveCoachError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            LiveCoachError::Initialization { .. } => "INITIALIZATION_FAILED".to_string(),
            LiveCoachError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION".to_string(),
            LiveCoachError::DeviceUnavailable { .. } => "DEVICE_UNAVAILABLE".to_string(),
            LiveCoachError::PermissionDenied { .. } => "PERMISSION_DENIED".to_string(),
            LiveCoachError::Channel { .. } => "CHANNEL_FAILED".to_string(),
            LiveCoachError::ChannelClosed { .. } => "CHANNEL_CLOSED".to_string(),
            LiveCoachError::Decode { .. } => "DECODE_FAILED".to_string(),
            LiveCoachError::Encode { .. } => "ENCODE_FAILED".to_string(),
            LiveCoachError::InvalidState { .. } => "INVALID_STATE".to_string(),
            LiveCoachError::Cancelled => "CANCELLED".to_string(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LiveCoachError::DeviceUnavailable { .. } | LiveCoachError::PermissionDenied { .. } => {
                ErrorKind::Device
            }
            LiveCoachError::Channel { .. } | LiveCoachError::ChannelClosed { .. } => {
                ErrorKind::Channel
            }
            LiveCoachError::Decode { .. } => ErrorKind::Decode,
            LiveCoachError::Encode { .. } => ErrorKind::Encode,
            LiveCoachError::Initialization { .. } | LiveCoachError::InvalidConfiguration { .. } => {
                ErrorKind::Configuration
            }
            LiveCoachError::InvalidState { .. } | LiveCoachError::Cancelled => ErrorKind::State,
        }
    }

    /// Whether this error ends a session in the `Error` state.
    ///
    /// Only device and channel failures escalate; decode and encode failures
    /// are absorbed where they occur.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Device | ErrorKind::Channel)
    }

    /// Whether the transport ended normally rather than failing
    pub fn is_closed(&self) -> bool {
        matches!(self, LiveCoachError::ChannelClosed { .. })
    }

    pub(crate) fn channel(endpoint: &str, reason: impl Into<String>) -> Self {
        LiveCoachError::Channel {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for LiveCoachError {
    fn from(source: serde_json::Error) -> Self {
        LiveCoachError::Decode { source }
    }
}
