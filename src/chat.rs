use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::backend::{ObjectStore, UploadOptions};
use crate::config::StorageConfig;
use crate::media::Blob;
use crate::records::{ChatMessage, ImageRecord, Role};
use crate::remote::{ChatPrompt, ChatService};
use crate::store::{ChatStore, ImageStore};

/// Placeholder shown while a prompt is in flight. The reply, or an error
/// message, replaces it in place.
pub const PROCESSING_MESSAGE: &str = "Processing your request...";

const NO_IMAGE_MESSAGE: &str = "Please upload an image before sending a prompt.";
const NO_URL_MESSAGE: &str = "Failed to get image URL";
const IMAGE_UPLOADED_MESSAGE: &str = "Image uploaded successfully.";
const SHARED_IMAGE_MESSAGE: &str = "Shared an image";

/// Where the chat surface currently is. `Sending` covers the local and
/// lookup work before the service call; `AwaitingReply` is the call itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPhase {
    Idle,
    Sending,
    AwaitingReply,
    Error,
}

/// Conversation about the most recently uploaded image. Keeps the visible
/// transcript, mirrors completed turns into the chat store, and never lets a
/// flow failure escape: errors become transcript text plus the error phase.
pub struct ChatView {
    session_id: String,
    user_id: String,
    store: Arc<dyn ImageStore>,
    chat_store: Arc<dyn ChatStore>,
    storage: Arc<dyn ObjectStore>,
    service: Arc<dyn ChatService>,
    image_bucket: String,
    chat_bucket: String,
    signed_url_ttl: u64,
    transcript: Vec<ChatMessage>,
    phase: ChatPhase,
}

impl ChatView {
    pub fn new(
        store: Arc<dyn ImageStore>,
        chat_store: Arc<dyn ChatStore>,
        storage: Arc<dyn ObjectStore>,
        service: Arc<dyn ChatService>,
        user_id: &str,
        storage_config: &StorageConfig,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            store,
            chat_store,
            storage,
            service,
            image_bucket: storage_config.image_bucket.clone(),
            chat_bucket: storage_config.chat_bucket.clone(),
            signed_url_ttl: storage_config.signed_url_ttl,
            transcript: Vec::new(),
            phase: ChatPhase::Idle,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn phase(&self) -> ChatPhase {
        self.phase
    }

    fn busy(&self) -> bool {
        matches!(self.phase, ChatPhase::Sending | ChatPhase::AwaitingReply)
    }

    /// Start the transcript from an image opened elsewhere, as when a search
    /// result is shared into the chat.
    pub async fn seed_image(&mut self, record: &ImageRecord, display_url: &str) {
        self.push_persisted(ChatMessage::image(
            SHARED_IMAGE_MESSAGE,
            display_url,
            &record.id,
        ))
        .await;
        if let Some(description) = &record.description {
            self.push_persisted(ChatMessage::user(description)).await;
        }
    }

    /// Send a prompt about the most recent image. Blank prompts and prompts
    /// sent while one is in flight are ignored. All failures end up as the
    /// placeholder's replacement text.
    pub async fn send(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() || self.busy() {
            return;
        }
        self.push_persisted(ChatMessage::user(text)).await;
        // local placeholder only; the stored transcript gets the final text
        self.transcript.push(ChatMessage::agent(PROCESSING_MESSAGE));
        self.phase = ChatPhase::Sending;

        let latest = match self.store.latest_image().await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.fail_placeholder(NO_IMAGE_MESSAGE).await;
                return;
            }
            Err(e) => {
                error!("latest image lookup failed: {e}");
                self.fail_placeholder(&e.user_message()).await;
                return;
            }
        };

        let image_url = match self
            .storage
            .signed_url(&self.image_bucket, &latest.storage_key, self.signed_url_ttl)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                error!("image URL issuance failed: {e}");
                self.fail_placeholder(NO_URL_MESSAGE).await;
                return;
            }
        };

        self.phase = ChatPhase::AwaitingReply;
        let prompt = ChatPrompt {
            content: text.to_string(),
            image_url,
            image_id: latest.id.clone(),
        };
        match self.service.send(&prompt).await {
            Ok(reply) => {
                debug!(image_id = %latest.id, "chat reply received");
                self.resolve_placeholder(&reply).await;
                self.phase = ChatPhase::Idle;
            }
            Err(e) => {
                error!("chat request failed: {e}");
                self.fail_placeholder(&e.user_message()).await;
            }
        }
    }

    /// Attach an image file to the conversation. It lands in the chat
    /// bucket under this session's prefix.
    pub async fn attach(&mut self, blob: &Blob, filename: &str) {
        if self.busy() {
            return;
        }
        self.push_persisted(ChatMessage::user(format!("Uploading file: {filename}")))
            .await;
        let key = format!("{}/{}", self.session_id, filename);
        match self
            .storage
            .upload(&self.chat_bucket, &key, blob, &UploadOptions::default())
            .await
        {
            Ok(path) => {
                let url = self.storage.public_url(&self.chat_bucket, &key);
                self.push_persisted(ChatMessage::image(IMAGE_UPLOADED_MESSAGE, url, path))
                    .await;
            }
            Err(e) => {
                error!("chat attachment upload failed: {e}");
                self.push_persisted(ChatMessage::agent(e.user_message())).await;
                self.phase = ChatPhase::Error;
            }
        }
    }

    /// Drop the transcript, locally and in the store.
    pub async fn clear(&mut self) {
        self.transcript.clear();
        if let Err(e) = self
            .chat_store
            .clear(&self.session_id, &self.user_id)
            .await
        {
            warn!("stored transcript clear failed: {e}");
        }
        self.phase = ChatPhase::Idle;
    }

    async fn push_persisted(&mut self, message: ChatMessage) {
        if let Err(e) = self
            .chat_store
            .append(&self.session_id, &self.user_id, &message)
            .await
        {
            warn!("transcript persistence failed: {e}");
        }
        self.transcript.push(message);
    }

    async fn resolve_placeholder(&mut self, text: &str) {
        self.replace_placeholder(text).await;
    }

    async fn fail_placeholder(&mut self, text: &str) {
        self.replace_placeholder(text).await;
        self.phase = ChatPhase::Error;
    }

    /// Swap the newest in-flight placeholder for its final text and persist
    /// that final turn.
    async fn replace_placeholder(&mut self, text: &str) {
        let slot = self
            .transcript
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::Agent && m.text == PROCESSING_MESSAGE);
        match slot {
            Some(message) => message.text = text.to_string(),
            None => self.transcript.push(ChatMessage::agent(text)),
        }
        if let Err(e) = self
            .chat_store
            .append(&self.session_id, &self.user_id, &ChatMessage::agent(text))
            .await
        {
            warn!("transcript persistence failed: {e}");
        }
    }
}
