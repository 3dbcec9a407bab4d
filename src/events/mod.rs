//! Events broadcast by the turn-taking controller
//!
//! Structured event types covering listening lifecycle, committed
//! utterances, reply delivery, and playback turns. Subscribed IPC clients
//! receive these as notifications.

use serde::{Deserialize, Serialize};

/// Events emitted by the controller as the conversation turns over
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Microphone capture began (user gesture accepted)
    ListeningStarted,

    /// Microphone capture ended
    ListeningStopped {
        /// Duration in milliseconds that listening was active
        duration_ms: u64,
    },

    /// A recognizer fault triggered a scheduled retry
    RetryScheduled {
        /// Delay in milliseconds until the restart attempt
        delay_ms: u64,
    },

    /// The recognizer cannot run and will not be retried
    RecognizerUnavailable { reason: String },

    /// The accumulated draft was committed as one user utterance
    UtteranceCommitted { text: String },

    /// The conversation sink produced a reply
    ReplyReceived { text: String },

    /// The conversation sink failed; this is the user-visible error slot
    ReplyFailed { message: String },

    /// Speech output began playing a reply
    SpeakingStarted,

    /// Speech output finished or was cut off
    SpeakingFinished {
        /// True when the user silenced playback before it completed
        interrupted: bool,
    },
}

impl std::fmt::Display for TurnEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnEvent::ListeningStarted => write!(f, "LISTENING_STARTED"),
            TurnEvent::ListeningStopped { duration_ms } => {
                write!(f, "LISTENING_STOPPED ({}ms)", duration_ms)
            }
            TurnEvent::RetryScheduled { delay_ms } => {
                write!(f, "RETRY_SCHEDULED ({}ms)", delay_ms)
            }
            TurnEvent::RecognizerUnavailable { reason } => {
                write!(f, "RECOGNIZER_UNAVAILABLE ({})", reason)
            }
            TurnEvent::UtteranceCommitted { text } => {
                write!(f, "UTTERANCE_COMMITTED ({} chars)", text.len())
            }
            TurnEvent::ReplyReceived { text } => {
                write!(f, "REPLY_RECEIVED ({} chars)", text.len())
            }
            TurnEvent::ReplyFailed { message } => write!(f, "REPLY_FAILED ({})", message),
            TurnEvent::SpeakingStarted => write!(f, "SPEAKING_STARTED"),
            TurnEvent::SpeakingFinished { interrupted } => {
                write!(f, "SPEAKING_FINISHED (interrupted={})", interrupted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = TurnEvent::ListeningStopped { duration_ms: 1500 };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("listening_stopped"));
        assert!(json.contains("1500"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"utterance_committed","text":"hello world"}"#;
        let event: TurnEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, TurnEvent::UtteranceCommitted { text } if text == "hello world"));
    }

    #[test]
    fn test_display_is_log_friendly() {
        let event = TurnEvent::RetryScheduled { delay_ms: 2000 };
        assert_eq!(event.to_string(), "RETRY_SCHEDULED (2000ms)");
    }
}
