//! Conversation sink seam
//!
//! The controller hands each committed utterance to a sink and gets the
//! assistant's reply back. How the reply is produced (which proxy, which
//! model) is the sink's business.

mod proxy;

pub use proxy::ProxyChatSink;

use async_trait::async_trait;
use thiserror::Error;

/// Errors a conversation sink can surface. Unlike recognizer faults, these
/// propagate to the user-visible error slot.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("chat request failed: {0}")]
    Transport(String),

    #[error("chat proxy returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed chat response: {0}")]
    Malformed(String),
}

/// Accepts one committed user utterance and produces the reply text.
#[async_trait]
pub trait ConversationSink: Send + Sync {
    async fn submit(&self, text: &str) -> Result<String, SinkError>;
}
