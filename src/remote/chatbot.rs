use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A prompt about one image: the user's text plus a URL the service can
/// download the image from and the row id for context lookups.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPrompt {
    pub content: String,
    pub image_url: String,
    pub image_id: String,
}

#[async_trait]
pub trait ChatService: Send + Sync {
    async fn send(&self, prompt: &ChatPrompt) -> Result<String>;
}

pub struct HttpChatbot {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    reply: String,
}

#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    message: Option<String>,
}

impl HttpChatbot {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChatService for HttpChatbot {
    async fn send(&self, prompt: &ChatPrompt) -> Result<String> {
        let response = self
            .http
            .post(format!("{}/chatbot", self.base_url))
            .json(prompt)
            .send()
            .await
            .map_err(|e| Error::ChatService(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ServiceErrorBody>()
                .await
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| status.to_string());
            return Err(Error::ChatService(format!(
                "HTTP {}: {detail}",
                status.as_u16()
            )));
        }
        let body: ChatReply = response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("chat reply: {e}")))?;
        Ok(body.reply)
    }
}
