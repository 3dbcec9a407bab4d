//! HTTP chat-proxy sink
//!
//! Forwards committed utterances to a chat proxy's `/chat` endpoint with
//! the running conversation history and returns the reply content. The
//! history keeps the user's message even when a request fails, so a retry
//! of the next utterance still carries the full conversation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ProxyConfig;

use super::{ConversationSink, SinkError};

const MAX_TOKENS: u32 = 2048;

/// One chat message in proxy wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    provider: &'a str,
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    content: String,
}

/// Conversation sink backed by an HTTP chat proxy.
pub struct ProxyChatSink {
    client: reqwest::Client,
    config: ProxyConfig,
    history: Mutex<Vec<ChatMessage>>,
}

impl ProxyChatSink {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            history: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ConversationSink for ProxyChatSink {
    async fn submit(&self, text: &str) -> Result<String, SinkError> {
        let mut history = self.history.lock().await;
        history.push(ChatMessage::user(text));

        let url = format!("{}/chat", self.config.base_url.trim_end_matches('/'));
        let request = ChatRequest {
            provider: &self.config.provider,
            model: &self.config.model,
            messages: history.as_slice(),
            stream: false,
            max_tokens: MAX_TOKENS,
        };

        debug!(%url, model = %self.config.model, turns = history.len(), "submitting utterance");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "chat proxy rejected request");
            return Err(SinkError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| SinkError::Malformed(e.to_string()))?;

        history.push(ChatMessage::assistant(&reply.content));
        Ok(reply.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let messages = vec![ChatMessage::user("hello")];
        let request = ChatRequest {
            provider: "openai",
            model: "gpt-4o",
            messages: &messages,
            stream: false,
            max_tokens: MAX_TOKENS,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""provider":"openai""#));
        assert!(json.contains(r#""model":"gpt-4o""#));
        assert!(json.contains(r#""role":"user""#));
        assert!(json.contains(r#""stream":false"#));
        assert!(json.contains(r#""max_tokens":2048"#));
    }

    #[test]
    fn test_response_wire_shape() {
        let response: ChatResponse =
            serde_json::from_str(r#"{"content":"hi there","extra":"ignored"}"#).unwrap();
        assert_eq!(response.content, "hi there");
    }
}
