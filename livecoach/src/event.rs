//! Session events

use crate::result::LiveResult;
use crate::session::SessionState;

/// Events broadcast by a [`StreamingSession`](crate::StreamingSession)
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session moved between states
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },
    /// A valid inbound message replaced the live result
    ResultUpdated {
        /// The new result
        result: LiveResult,
    },
    /// A malformed inbound message was dropped
    MessageDiscarded {
        /// Why it could not be decoded
        reason: String,
    },
    /// The service closed the channel while the session was running
    ChannelClosed {
        /// Close reason
        reason: String,
    },
    /// The session entered the error state
    Error {
        /// Error description
        error: String,
        /// Stable error code
        code: String,
    },
}

impl SessionEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::StateChanged { .. } => "state_changed",
            SessionEvent::ResultUpdated { .. } => "result_updated",
            SessionEvent::MessageDiscarded { .. } => "message_discarded",
            SessionEvent::ChannelClosed { .. } => "channel_closed",
            SessionEvent::Error { .. } => "error",
        }
    }

    /// Check if this event reports a state change
    pub fn is_state_event(&self) -> bool {
        matches!(self, SessionEvent::StateChanged { .. })
    }

    /// Check if this event came from the inbound message stream
    pub fn is_message_event(&self) -> bool {
        matches!(
            self,
            SessionEvent::ResultUpdated { .. } | SessionEvent::MessageDiscarded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        let changed = SessionEvent::StateChanged {
            from: SessionState::Idle,
            to: SessionState::Starting,
        };
        assert_eq!(changed.event_type(), "state_changed");
        assert!(changed.is_state_event());
        assert!(!changed.is_message_event());

        let discarded = SessionEvent::MessageDiscarded {
            reason: "expected a JSON object".to_string(),
        };
        assert_eq!(discarded.event_type(), "message_discarded");
        assert!(discarded.is_message_event());
    }
}
