//! Wire protocol between the streaming client and the analysis service
//!
//! Outbound traffic is one JSON text message per tick carrying a compressed
//! still image; inbound traffic is a loosely typed result record pushed by the
//! service whenever it has something new to say.

use crate::error::LiveCoachError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default live analysis endpoint
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8000/ws/live";

/// Query parameter selecting the detection mode
const MODE_QUERY_FIELD: &str = "exercise";

/// Query value requesting automatic activity detection
const AUTO_QUERY_VALUE: &str = "auto";

/// Activities understood by the analysis service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exercise {
    /// Squat
    Squat,
    /// Push-up
    Pushup,
    /// Bicep curl
    BicepCurl,
    /// Deadlift
    Deadlift,
    /// Lunge
    Lunge,
    /// Bench press
    BenchPress,
    /// Lat pulldown
    LatPulldown,
    /// Plank (held, not counted)
    Plank,
}

impl Exercise {
    /// Every activity in catalogue order
    pub const ALL: [Exercise; 8] = [
        Exercise::Squat,
        Exercise::Pushup,
        Exercise::BicepCurl,
        Exercise::Deadlift,
        Exercise::Lunge,
        Exercise::BenchPress,
        Exercise::LatPulldown,
        Exercise::Plank,
    ];

    /// Identifier sent to the service
    pub fn id(&self) -> &'static str {
        match self {
            Exercise::Squat => "squat",
            Exercise::Pushup => "pushup",
            Exercise::BicepCurl => "bicep_curl",
            Exercise::Deadlift => "deadlift",
            Exercise::Lunge => "lunge",
            Exercise::BenchPress => "bench_press",
            Exercise::LatPulldown => "lat_pulldown",
            Exercise::Plank => "plank",
        }
    }

    /// Human readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            Exercise::Squat => "Squat",
            Exercise::Pushup => "Push-up",
            Exercise::BicepCurl => "Bicep Curl",
            Exercise::Deadlift => "Deadlift",
            Exercise::Lunge => "Lunge",
            Exercise::BenchPress => "Bench Press",
            Exercise::LatPulldown => "Lat Pulldown",
            Exercise::Plank => "Plank",
        }
    }

    /// Whether the service reports repetitions for this activity
    pub fn counts_repetitions(&self) -> bool {
        !matches!(self, Exercise::Plank)
    }
}

impl fmt::Display for Exercise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Exercise {
    type Err = LiveCoachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let exercise = match s.trim().to_ascii_lowercase().as_str() {
            "squat" | "squats" => Exercise::Squat,
            "pushup" | "push-up" | "push_up" => Exercise::Pushup,
            "bicep_curl" | "bicep-curl" | "curl" | "bicep" => Exercise::BicepCurl,
            "deadlift" | "deadlifts" => Exercise::Deadlift,
            "lunge" | "lunges" => Exercise::Lunge,
            "bench" | "bench_press" | "benchpress" | "bench-press" => Exercise::BenchPress,
            "lat" | "lat_pulldown" | "lat-pulldown" | "pulldown" => Exercise::LatPulldown,
            "plank" => Exercise::Plank,
            other => {
                return Err(LiveCoachError::InvalidConfiguration {
                    field: "exercise".to_string(),
                    reason: format!("unknown exercise '{}'", other),
                })
            }
        };
        Ok(exercise)
    }
}

/// How the service should decide which activity is being performed.
///
/// Chosen before a session starts and fixed for its duration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum DetectionMode {
    /// Let the service classify the activity
    #[default]
    Auto,
    /// Analyse the frames as the given activity identifier
    Manual(String),
}

impl DetectionMode {
    /// Manual mode for a catalogued activity
    pub fn manual(exercise: Exercise) -> Self {
        DetectionMode::Manual(exercise.id().to_string())
    }

    /// Value carried by the `exercise` query parameter
    pub fn query_value(&self) -> &str {
        match self {
            DetectionMode::Auto => AUTO_QUERY_VALUE,
            DetectionMode::Manual(id) => id,
        }
    }

    /// Whether the service picks the activity
    pub fn is_auto(&self) -> bool {
        matches!(self, DetectionMode::Auto)
    }
}

impl From<Exercise> for DetectionMode {
    fn from(exercise: Exercise) -> Self {
        DetectionMode::manual(exercise)
    }
}

impl FromStr for DetectionMode {
    type Err = LiveCoachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.is_empty() {
            return Err(LiveCoachError::InvalidConfiguration {
                field: "exercise".to_string(),
                reason: "detection mode must not be empty".to_string(),
            });
        }
        if value.eq_ignore_ascii_case(AUTO_QUERY_VALUE) {
            return Ok(DetectionMode::Auto);
        }
        // Aliases collapse onto the catalogue id; anything else passes through.
        Ok(match value.parse::<Exercise>() {
            Ok(exercise) => DetectionMode::manual(exercise),
            Err(_) => DetectionMode::Manual(value.to_string()),
        })
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.query_value())
    }
}

/// Build the connection URL for a detection mode
pub fn endpoint_url(base: &str, mode: &DetectionMode) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}{}={}",
        base,
        separator,
        MODE_QUERY_FIELD,
        urlencoding::encode(mode.query_value())
    )
}

/// Outbound frame message (client to service)
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FrameMessage<'a> {
    /// Compressed still image, serialized as an array of byte values
    pub frame: &'a [u8],
}

impl<'a> FrameMessage<'a> {
    /// Wrap an encoded image
    pub fn new(frame: &'a [u8]) -> Self {
        Self { frame }
    }

    /// Serialize to the JSON text sent on the channel
    pub fn to_json(&self) -> Result<String, LiveCoachError> {
        serde_json::to_string(self).map_err(|e| LiveCoachError::Encode {
            reason: format!("failed to serialize frame message: {}", e),
        })
    }
}

/// Inbound result message (service to client)
///
/// Every field is optional on the wire. Unknown fields such as `extra` and
/// `keypoints` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Detected or selected activity
    #[serde(default)]
    pub exercise: Option<String>,
    /// Repetition count; zero when absent
    #[serde(default, deserialize_with = "null_as_default")]
    pub reps: u32,
    /// Feedback cues in display order
    #[serde(default, deserialize_with = "null_as_default")]
    pub issues: Vec<String>,
}

impl InboundMessage {
    /// Decode a raw text or binary payload.
    ///
    /// The payload must be a JSON object; anything else is a decode error.
    pub fn decode(raw: &[u8]) -> Result<Self, LiveCoachError> {
        let value: serde_json::Value = serde_json::from_slice(raw)?;
        if !value.is_object() {
            return Err(LiveCoachError::Decode {
                source: <serde_json::Error as serde::de::Error>::custom(
                    "expected a JSON object",
                ),
            });
        }
        Ok(serde_json::from_value(value)?)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
