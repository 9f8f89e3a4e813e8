//! Vision-language reasoner boundary: one frame plus a prompt in, free text
//! out. Failures never cross this boundary — callers get `None` and decide
//! what a missing verdict means for them.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Mode for reasoner invocation: mock (fixed local reply) or live (external
/// OpenAI-compatible API).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReasonerMode {
    #[default]
    Mock,
    Live,
}

/// The reasoning boundary. `ask` returns `None` on any failure.
#[async_trait]
pub trait VisionReasoner: Send + Sync {
    async fn ask(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        image_jpeg: Option<&[u8]>,
    ) -> Option<String>;
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// OpenAI-compatible vision chat client. The frame is inlined as a base64
/// data URL in the user message.
pub struct OpenAiVision {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiVision {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, crate::error::CoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl VisionReasoner for OpenAiVision {
    async fn ask(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        image_jpeg: Option<&[u8]>,
    ) -> Option<String> {
        let user_content = match image_jpeg {
            Some(bytes) => serde_json::json!([
                { "type": "text", "text": user_prompt },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:image/jpeg;base64,{}", BASE64.encode(bytes)) }
                }
            ]),
            None => serde_json::json!(user_prompt),
        };
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_content }
            ],
            "max_tokens": 200
        });

        let url = format!("{}/chat/completions", self.base_url);
        let res = match self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "reasoner request failed");
                return None;
            }
        };
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, body = %body.chars().take(200).collect::<String>(), "reasoner API error");
            return None;
        }
        let parsed: ChatResponse = match res.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "reasoner response parse failed");
                return None;
            }
        };
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())?;
        debug!(reply = %text, "reasoner answered");
        Some(text)
    }
}

/// Scripted reasoner: pops queued replies, then repeats the last one; counts
/// calls. Doubles as the mock-mode backend.
pub struct PlaceholderReasoner {
    replies: Mutex<Vec<Option<String>>>,
    calls: AtomicUsize,
}

impl PlaceholderReasoner {
    /// Always answers "yes" — enough to watch the camera nod without an API key.
    pub fn new() -> Self {
        Self::with_reply("yes")
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(vec![Some(reply.into())]),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails (returns `None`).
    pub fn failing() -> Self {
        Self {
            replies: Mutex::new(vec![None]),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a sequence of replies; the last queued behavior repeats.
    pub fn with_replies(replies: Vec<Option<String>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            calls: AtomicUsize::new(0),
        }
    }

    /// How many times `ask` was invoked.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for PlaceholderReasoner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisionReasoner for PlaceholderReasoner {
    async fn ask(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _image_jpeg: Option<&[u8]>,
    ) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.remove(0)
        } else {
            replies.first().cloned().flatten()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_counts_calls() {
        let reasoner = PlaceholderReasoner::with_reply("no");
        assert_eq!(reasoner.calls(), 0);
        let reply = reasoner.ask("sys", "user", None).await;
        assert_eq!(reply.as_deref(), Some("no"));
        assert_eq!(reasoner.calls(), 1);
    }

    #[tokio::test]
    async fn queued_replies_then_repeat() {
        let reasoner =
            PlaceholderReasoner::with_replies(vec![Some("yes".into()), Some("maybe".into())]);
        assert_eq!(reasoner.ask("s", "u", None).await.as_deref(), Some("yes"));
        assert_eq!(reasoner.ask("s", "u", None).await.as_deref(), Some("maybe"));
        assert_eq!(reasoner.ask("s", "u", None).await.as_deref(), Some("maybe"));
    }

    #[tokio::test]
    async fn failing_returns_none() {
        let reasoner = PlaceholderReasoner::failing();
        assert!(reasoner.ask("s", "u", Some(&[1, 2, 3])).await.is_none());
    }
}
