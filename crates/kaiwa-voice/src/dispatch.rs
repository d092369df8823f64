//! Turn dispatch — hand a transcribed utterance to the conversational agent
//!
//! The session controller observes only enough of the reply to know when it
//! may resume listening; reply content is opaque to the voice core. A
//! dispatched turn is owned by the agent once handed off.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Phases of one dispatched turn. `Ready` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Idle,
    Submitted,
    Streaming,
    Ready,
    Error,
}

impl TurnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnStatus::Ready | TurnStatus::Error)
    }
}

/// Events observed on a dispatched turn's reply stream.
#[derive(Debug, Clone)]
pub enum ReplyEvent {
    /// A fragment of the streamed reply. Content is opaque to the voice core.
    Delta(String),

    /// The turn reached a terminal status; listening may resume.
    Settled(TurnStatus),
}

/// Dispatches one text turn to the conversational agent and exposes its reply
/// stream. `send_turn` must return promptly; streaming happens on a spawned
/// task feeding the returned channel.
#[async_trait]
pub trait TurnDispatcher: Send + Sync {
    async fn send_turn(&self, text: &str) -> VoiceResult<mpsc::Receiver<ReplyEvent>>;
}

/// One message in the running conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
}

/// Production dispatcher: POSTs the running message history to a chat
/// endpoint and forwards the streamed reply. Uses `CHAT_API_URL` and
/// optionally `CHAT_API_KEY`.
pub struct ChatApiDispatcher {
    /// Full endpoint URL (e.g. https://example.com/api/chat).
    pub endpoint: String,
    /// Optional bearer API key.
    pub api_key: Option<String>,
    client: reqwest::Client,
    history: Arc<Mutex<Vec<ChatMessage>>>,
}

impl ChatApiDispatcher {
    /// Build from environment: `CHAT_API_URL` (required), `CHAT_API_KEY`.
    pub fn from_env() -> VoiceResult<Self> {
        let endpoint = crate::secrets::secret("CHAT_API_URL")
            .ok_or_else(|| VoiceError::Config("CHAT_API_URL is not set".to_string()))?;
        let api_key = crate::secrets::secret("CHAT_API_KEY");
        Self::new(endpoint, api_key)
    }

    /// Create with explicit config.
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| VoiceError::Dispatch(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            client,
            history: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Snapshot of the conversation so far.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TurnDispatcher for ChatApiDispatcher {
    async fn send_turn(&self, text: &str) -> VoiceResult<mpsc::Receiver<ReplyEvent>> {
        let messages = {
            let mut history = self
                .history
                .lock()
                .map_err(|e| VoiceError::Dispatch(e.to_string()))?;
            history.push(ChatMessage {
                role: "user".to_string(),
                content: text.to_string(),
            });
            history.clone()
        };

        let (tx, rx) = mpsc::channel(32);
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let api_key = self.api_key.clone();
        let history = Arc::clone(&self.history);

        tokio::spawn(async move {
            let mut request = client.post(&endpoint).json(&ChatRequest { messages: &messages });
            if let Some(ref key) = api_key {
                request = request.bearer_auth(key);
            }

            let res = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!("Turn dispatch failed: {}", e);
                    let _ = tx.send(ReplyEvent::Settled(TurnStatus::Error)).await;
                    return;
                }
            };

            if !res.status().is_success() {
                warn!("Chat endpoint returned {}", res.status());
                let _ = tx.send(ReplyEvent::Settled(TurnStatus::Error)).await;
                return;
            }

            let mut body = res.bytes_stream();
            let mut reply = String::new();
            while let Some(next) = body.next().await {
                match next {
                    Ok(bytes) => {
                        let delta = String::from_utf8_lossy(&bytes).to_string();
                        reply.push_str(&delta);
                        // Observer may be gone; keep draining so history stays complete.
                        let _ = tx.send(ReplyEvent::Delta(delta)).await;
                    }
                    Err(e) => {
                        warn!("Reply stream error: {}", e);
                        let _ = tx.send(ReplyEvent::Settled(TurnStatus::Error)).await;
                        return;
                    }
                }
            }

            debug!("Reply settled ({} bytes)", reply.len());
            if let Ok(mut history) = history.lock() {
                history.push(ChatMessage {
                    role: "assistant".to_string(),
                    content: reply,
                });
            }
            let _ = tx.send(ReplyEvent::Settled(TurnStatus::Ready)).await;
        });

        Ok(rx)
    }
}

/// Placeholder dispatcher: replies with a canned message after a fixed delay.
/// Use for exercising the session loop without a chat backend.
#[derive(Debug, Clone)]
pub struct PlaceholderDispatcher {
    /// The canned reply text.
    pub reply: String,
    /// Delay before the reply settles.
    pub delay: Duration,
}

impl Default for PlaceholderDispatcher {
    fn default() -> Self {
        Self {
            reply: "I heard you.".to_string(),
            delay: Duration::from_millis(200),
        }
    }
}

#[async_trait]
impl TurnDispatcher for PlaceholderDispatcher {
    async fn send_turn(&self, _text: &str) -> VoiceResult<mpsc::Receiver<ReplyEvent>> {
        let (tx, rx) = mpsc::channel(8);
        let reply = self.reply.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ReplyEvent::Delta(reply)).await;
            let _ = tx.send(ReplyEvent::Settled(TurnStatus::Ready)).await;
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(TurnStatus::Ready.is_terminal());
        assert!(TurnStatus::Error.is_terminal());
        assert!(!TurnStatus::Idle.is_terminal());
        assert!(!TurnStatus::Submitted.is_terminal());
        assert!(!TurnStatus::Streaming.is_terminal());
    }

    #[tokio::test]
    async fn placeholder_streams_then_settles() {
        let dispatcher = PlaceholderDispatcher {
            reply: "hello".to_string(),
            delay: Duration::from_millis(1),
        };

        let mut rx = dispatcher.send_turn("hi").await.unwrap();
        match rx.recv().await {
            Some(ReplyEvent::Delta(text)) => assert_eq!(text, "hello"),
            other => panic!("expected delta, got {:?}", other),
        }
        match rx.recv().await {
            Some(ReplyEvent::Settled(status)) => assert_eq!(status, TurnStatus::Ready),
            other => panic!("expected settled, got {:?}", other),
        }
    }

    #[test]
    fn chat_request_serializes_history() {
        let messages = vec![
            ChatMessage {
                role: "user".to_string(),
                content: "hello".to_string(),
            },
            ChatMessage {
                role: "assistant".to_string(),
                content: "hi".to_string(),
            },
        ];
        let json = serde_json::to_value(ChatRequest {
            messages: &messages,
        })
        .unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "hi");
    }
}
