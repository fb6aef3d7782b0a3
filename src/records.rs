use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the `images` table.
///
/// The deployed column for the storage object key is named `url` even though
/// it stores a bucket-relative key, so the field carries a serde rename to
/// keep the wire shape while the code uses the accurate name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: String,
    #[serde(rename = "url")]
    pub storage_key: String,
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub like_count: i64,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Case-insensitive substring match against the comma-separated tag text.
    pub fn tags_contain(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.tags
            .as_deref()
            .is_some_and(|tags| tags.to_lowercase().contains(&needle))
    }
}

/// Insert payload for a freshly uploaded image. The annotation service fills
/// in `description` and `tags` out of band.
#[derive(Debug, Clone, Serialize)]
pub struct NewImage {
    #[serde(rename = "url")]
    pub storage_key: String,
    pub public_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One row of the `likes` table. The pair of columns is unique, which is what
/// makes a double-like surface as a conflict instead of a second row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeRecord {
    pub user_id: String,
    pub image_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// One turn of a chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image_url: None,
            image_id: None,
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            text: text.into(),
            image_url: None,
            image_id: None,
        }
    }

    pub fn image(text: impl Into<String>, url: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image_url: Some(url.into()),
            image_id: Some(id.into()),
        }
    }

    pub fn is_image(&self) -> bool {
        self.image_url.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Auth token pair plus the signed-in user, as issued by the auth service and
/// persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: User,
}
