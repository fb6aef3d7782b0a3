use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::backend::RowsClient;
use crate::error::{Error, Result};
use crate::records::{ChatMessage, ImageRecord, LikeRecord, NewImage, Role};
use crate::store::{ChatStore, ImageStore};

const IMAGES: &str = "images";
const LIKES: &str = "likes";
const MESSAGES: &str = "messages";

/// Row-API implementation of the domain stores.
pub struct PostgrestStore {
    rows: RowsClient,
}

/// Wire shape of one `messages` row.
#[derive(Debug, Serialize, Deserialize)]
struct MessageRow {
    session_id: String,
    user_id: String,
    role: Role,
    content: String,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    image_id: Option<String>,
}

impl MessageRow {
    fn from_message(session_id: &str, user_id: &str, message: &ChatMessage) -> Self {
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            role: message.role,
            content: message.text.clone(),
            image_url: message.image_url.clone(),
            image_id: message.image_id.clone(),
        }
    }

    fn into_message(self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            text: self.content,
            image_url: self.image_url,
            image_id: self.image_id,
        }
    }
}

impl PostgrestStore {
    pub fn new(rows: RowsClient) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl ImageStore for PostgrestStore {
    async fn insert_image(&self, image: &NewImage) -> Result<ImageRecord> {
        self.rows.from(IMAGES).insert_returning(image).await
    }

    async fn image(&self, id: &str) -> Result<Option<ImageRecord>> {
        self.rows
            .from(IMAGES)
            .select("*")
            .eq("id", id)
            .fetch_one()
            .await
    }

    async fn latest_image(&self) -> Result<Option<ImageRecord>> {
        self.rows
            .from(IMAGES)
            .select("*")
            .order("created_at", false)
            .fetch_one()
            .await
    }

    async fn search_tags(&self, needle: &str) -> Result<Vec<ImageRecord>> {
        self.rows
            .from(IMAGES)
            .select("*")
            .ilike("tags", needle)
            .fetch()
            .await
    }

    async fn any_tags(&self, needles: &[String]) -> Result<Vec<ImageRecord>> {
        if needles.is_empty() {
            return Ok(Vec::new());
        }
        self.rows
            .from(IMAGES)
            .select("*")
            .or_ilike("tags", needles)
            .fetch()
            .await
    }

    async fn most_liked(&self, limit: usize) -> Result<Vec<ImageRecord>> {
        self.rows
            .from(IMAGES)
            .select("*")
            .order("like_count", false)
            .limit(limit)
            .fetch()
            .await
    }

    async fn like(&self, user_id: &str, image_id: &str) -> Result<()> {
        let row = LikeRecord {
            user_id: user_id.to_string(),
            image_id: image_id.to_string(),
        };
        self.rows.from(LIKES).insert(&row).await
    }

    async fn unlike(&self, user_id: &str, image_id: &str) -> Result<()> {
        self.rows
            .from(LIKES)
            .eq("user_id", user_id)
            .eq("image_id", image_id)
            .delete()
            .await
    }

    async fn liked(&self, user_id: &str, image_id: &str) -> Result<bool> {
        let row: Option<LikeRecord> = self
            .rows
            .from(LIKES)
            .select("user_id,image_id")
            .eq("user_id", user_id)
            .eq("image_id", image_id)
            .fetch_one()
            .await?;
        Ok(row.is_some())
    }

    /// Backed by the `adjust_like_count` database function, which updates
    /// and returns the counter in one statement.
    async fn adjust_like_count(&self, image_id: &str, delta: i64) -> Result<i64> {
        let value = self
            .rows
            .rpc(
                "adjust_like_count",
                json!({ "image_id": image_id, "delta": delta }),
            )
            .await?;
        value
            .as_i64()
            .ok_or_else(|| Error::Decode(format!("adjust_like_count returned {value}")))
    }
}

#[async_trait]
impl ChatStore for PostgrestStore {
    async fn append(&self, session_id: &str, user_id: &str, message: &ChatMessage) -> Result<()> {
        let row = MessageRow::from_message(session_id, user_id, message);
        self.rows.from(MESSAGES).insert(&row).await
    }

    async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = self
            .rows
            .from(MESSAGES)
            .select("*")
            .eq("session_id", session_id)
            .order("created_at", true)
            .fetch()
            .await?;
        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }

    async fn clear(&self, session_id: &str, user_id: &str) -> Result<()> {
        self.rows
            .from(MESSAGES)
            .eq("session_id", session_id)
            .eq("user_id", user_id)
            .delete()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_row_round_trips_transcript_turns() {
        let turn = ChatMessage::image("Image uploaded successfully.", "http://x/y.png", "y.png");
        let row = MessageRow::from_message("session-1", "user-1", &turn);
        assert_eq!(row.session_id, "session-1");
        assert_eq!(row.content, "Image uploaded successfully.");
        assert_eq!(row.into_message(), turn);
    }
}
