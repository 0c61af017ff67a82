//! Projection of inbound analysis messages onto the displayed result

use livecoach_core::{InboundMessage, LiveCoachError};
use serde::Serialize;
use std::fmt;

/// What the user sees for the current session
///
/// Replaced wholesale by every valid inbound message, never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiveResult {
    /// Detected or selected activity
    pub activity_label: Option<String>,
    /// Repetitions counted so far
    pub repetition_count: u32,
    /// Form feedback, in the order the service reported it
    pub cues: Vec<String>,
}

impl LiveResult {
    /// Whether nothing has been reported
    pub fn is_empty(&self) -> bool {
        self == &LiveResult::default()
    }
}

impl From<InboundMessage> for LiveResult {
    fn from(message: InboundMessage) -> Self {
        Self {
            activity_label: message.exercise,
            repetition_count: message.reps,
            cues: message.issues,
        }
    }
}

impl fmt::Display for LiveResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | reps: {}",
            self.activity_label.as_deref().unwrap_or("-"),
            self.repetition_count
        )?;
        if !self.cues.is_empty() {
            write!(f, " | {}", self.cues.join("; "))?;
        }
        Ok(())
    }
}

/// Project a raw inbound payload onto a new [`LiveResult`].
///
/// Pure and idempotent. A malformed payload yields a decode error and the
/// caller keeps its current result.
pub fn project(raw: &[u8]) -> Result<LiveResult, LiveCoachError> {
    InboundMessage::decode(raw).map(LiveResult::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_full_message() {
        let result = project(br#"{"exercise":"squat","reps":3,"issues":["knees forward"]}"#)
            .unwrap();
        assert_eq!(
            result,
            LiveResult {
                activity_label: Some("squat".to_string()),
                repetition_count: 3,
                cues: vec!["knees forward".to_string()],
            }
        );
    }

    #[test]
    fn test_project_empty_object() {
        let result = project(b"{}").unwrap();
        assert!(result.is_empty());
        assert_eq!(result.activity_label, None);
        assert_eq!(result.repetition_count, 0);
        assert!(result.cues.is_empty());
    }

    #[test]
    fn test_project_ignores_unknown_fields() {
        let result = project(
            br#"{"exercise":"pushup","reps":1,"issues":[],"extra":{"angle":92.5},"keypoints":[[0.1,0.2]]}"#,
        )
        .unwrap();
        assert_eq!(result.activity_label.as_deref(), Some("pushup"));
        assert_eq!(result.repetition_count, 1);
    }

    #[test]
    fn test_project_is_idempotent() {
        let raw = br#"{"exercise":"lunge","reps":4,"issues":["step longer","chest up"]}"#;
        assert_eq!(project(raw).unwrap(), project(raw).unwrap());
        assert_eq!(project(raw).unwrap().cues[1], "chest up");
    }

    #[test]
    fn test_project_malformed() {
        let error = project(b"{\"reps\":").unwrap_err();
        assert_eq!(error.error_code(), "DECODE_FAILED");
        assert!(project(b"\"squat\"").is_err());
    }

    #[test]
    fn test_display() {
        let result = LiveResult {
            activity_label: Some("squat".to_string()),
            repetition_count: 2,
            cues: vec!["knees forward".to_string(), "back straight".to_string()],
        };
        assert_eq!(
            result.to_string(),
            "squat | reps: 2 | knees forward; back straight"
        );
        assert_eq!(LiveResult::default().to_string(), "- | reps: 0");
    }
}
