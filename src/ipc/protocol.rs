//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.
//! Two kinds of clients speak this protocol: UI clients issuing gestures and
//! status queries, and the engine client that subscribes for commands and
//! pushes recognizer/playback events.

use serde::{Deserialize, Serialize};

use crate::events::TurnEvent;
use crate::speech::bridge::{EngineCommand, EngineEvent};
use crate::turn::ListeningPhase;

/// Microphone-session phase as reported over IPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No capture, waiting for a start gesture
    Idle,
    /// Capture active
    Listening,
    /// Waiting out a retry delay after a recognizer fault
    ErrorBackoff,
}

impl Default for Phase {
    fn default() -> Self {
        Self::Idle
    }
}

impl From<ListeningPhase> for Phase {
    fn from(phase: ListeningPhase) -> Self {
        match phase {
            ListeningPhase::Idle => Phase::Idle,
            ListeningPhase::Listening => Phase::Listening,
            ListeningPhase::ErrorBackoff => Phase::ErrorBackoff,
        }
    }
}

/// Requests from clients to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// User start gesture (or silence gesture while the assistant speaks)
    RequestStart,

    /// User stop gesture
    RequestStop,

    /// Toggle speaking replies aloud
    SetSpeakReplies { enabled: bool },

    /// Ping to check connectivity
    Ping,

    /// Subscribe to turn-event and engine-command notifications
    Subscribe,

    /// Recognizer or playback lifecycle event pushed by the engine client
    EngineEvent { event: EngineEvent },
}

/// Responses from daemon to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Request accepted and forwarded to the controller
    Ack,

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to subscribed clients
///
/// The payloads are tagged enums themselves, so they nest under their own
/// key instead of flattening into this envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// A turn event occurred
    TurnEvent { event: TurnEvent },

    /// The controller wants the engine client to do something
    EngineCommand { command: EngineCommand },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current microphone-session phase
    pub phase: Phase,

    /// Whether the assistant is speaking
    pub speaking: bool,

    /// Whether replies are spoken aloud
    pub speak_replies: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}
