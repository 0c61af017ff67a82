//! Configuration types and defaults

use livecoach_core::{ChannelConfig, LiveCoachError, DEFAULT_ENDPOINT};
use livecoach_media::{CaptureConstraints, DEFAULT_JPEG_QUALITY};
use std::time::Duration;

/// Default interval between capture ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(150);

/// Streaming session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Analysis service endpoint, without the detection mode query
    pub endpoint: String,
    /// Fixed interval between capture ticks
    pub tick_interval: Duration,
    /// JPEG quality factor (1-100)
    pub jpeg_quality: u8,
    /// Upper bound on opening the channel
    pub connect_timeout: Duration,
    /// Upper bound on the channel close handshake
    pub close_timeout: Duration,
    /// Camera constraints
    pub constraints: CaptureConstraints,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            connect_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(1),
            constraints: CaptureConstraints::default(),
        }
    }
}

impl SessionConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), LiveCoachError> {
        self.channel_config().validate()?;

        if self.tick_interval < Duration::from_millis(1) {
            return Err(LiveCoachError::InvalidConfiguration {
                field: "tick_interval".to_string(),
                reason: "must be at least 1ms".to_string(),
            });
        }

        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(LiveCoachError::InvalidConfiguration {
                field: "jpeg_quality".to_string(),
                reason: format!("{} is outside 1..=100", self.jpeg_quality),
            });
        }

        self.constraints
            .validate()
            .map_err(|e| LiveCoachError::InvalidConfiguration {
                field: "constraints".to_string(),
                reason: e.to_string(),
            })
    }

    /// Channel settings derived from this configuration
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            endpoint: self.endpoint.clone(),
            connect_timeout: self.connect_timeout,
            close_timeout: self.close_timeout,
        }
    }
}
