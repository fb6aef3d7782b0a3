//! Domain-level access to images, likes, and chat transcripts. The traits
//! are what the flows program against; [`PostgrestStore`] backs them with the
//! hosted row API and [`MemoryStore`] backs them for tests.

mod memory;
mod postgrest;

pub use memory::{MemoryStorage, MemoryStore};
pub use postgrest::PostgrestStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::records::{ChatMessage, ImageRecord, NewImage};

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Store a new image row and return it with generated columns filled in.
    async fn insert_image(&self, image: &NewImage) -> Result<ImageRecord>;

    async fn image(&self, id: &str) -> Result<Option<ImageRecord>>;

    /// The most recently created image, the one chat prompts are about.
    async fn latest_image(&self) -> Result<Option<ImageRecord>>;

    /// Rows whose tag text contains `needle`, case-insensitively.
    async fn search_tags(&self, needle: &str) -> Result<Vec<ImageRecord>>;

    /// Rows whose tag text contains any of `needles`.
    async fn any_tags(&self, needles: &[String]) -> Result<Vec<ImageRecord>>;

    async fn most_liked(&self, limit: usize) -> Result<Vec<ImageRecord>>;

    /// Record that `user_id` likes `image_id`. A duplicate surfaces as a
    /// conflict, never as a second row.
    async fn like(&self, user_id: &str, image_id: &str) -> Result<()>;

    /// Remove a like. Removing one that does not exist is a no-op.
    async fn unlike(&self, user_id: &str, image_id: &str) -> Result<()>;

    async fn liked(&self, user_id: &str, image_id: &str) -> Result<bool>;

    /// Atomically add `delta` to an image's like counter, clamped at zero,
    /// and return the stored value. The arithmetic happens in the data
    /// layer, so concurrent toggles cannot interleave a read with a write.
    async fn adjust_like_count(&self, image_id: &str, delta: i64) -> Result<i64>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn append(&self, session_id: &str, user_id: &str, message: &ChatMessage) -> Result<()>;

    async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>>;

    /// Drop every stored turn of one session owned by `user_id`.
    async fn clear(&self, session_id: &str, user_id: &str) -> Result<()>;
}
