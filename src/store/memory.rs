use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::backend::{ObjectStore, UploadOptions};
use crate::error::{Error, Result};
use crate::media::Blob;
use crate::records::{ChatMessage, ImageRecord, NewImage};
use crate::store::{ChatStore, ImageStore};

/// In-memory [`ImageStore`] and [`ChatStore`] used by tests. Supports
/// injecting insert failures so callers can exercise their degraded paths.
#[derive(Default)]
pub struct MemoryStore {
    images: Mutex<Vec<ImageRecord>>,
    likes: Mutex<HashSet<(String, String)>>,
    messages: Mutex<Vec<StoredTurn>>,
    fail_inserts: AtomicBool,
    fail_searches: AtomicBool,
    seq: AtomicI64,
}

struct StoredTurn {
    session_id: String,
    user_id: String,
    message: ChatMessage,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `insert_image` fail until switched back off.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make the read queries fail until switched back off.
    pub fn set_fail_searches(&self, fail: bool) {
        self.fail_searches.store(fail, Ordering::SeqCst);
    }

    fn check_searchable(&self) -> Result<()> {
        if self.fail_searches.load(Ordering::SeqCst) {
            return Err(Error::rows_read("search failure injected"));
        }
        Ok(())
    }

    /// Seed a fully annotated image, as if the annotation service had
    /// already run. Returns the stored record.
    pub async fn insert_annotated(
        &self,
        storage_key: &str,
        description: &str,
        tags: &str,
    ) -> ImageRecord {
        let record = ImageRecord {
            id: Uuid::new_v4().to_string(),
            storage_key: storage_key.to_string(),
            public_url: Some(format!("memory://image-store/{storage_key}")),
            description: Some(description.to_string()),
            tags: Some(tags.to_string()),
            like_count: 0,
            created_at: self.next_timestamp(),
        };
        self.images.lock().await.push(record.clone());
        record
    }

    /// Fill in description and tags on an existing row, the way the
    /// annotation service does out of band.
    pub async fn set_annotation(&self, id: &str, description: &str, tags: &str) -> Result<()> {
        let mut images = self.images.lock().await;
        let record = images
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::rows_write(format!("no image {id}")))?;
        record.description = Some(description.to_string());
        record.tags = Some(tags.to_string());
        Ok(())
    }

    /// Strictly increasing timestamps even when calls land in the same
    /// clock tick.
    fn next_timestamp(&self) -> chrono::DateTime<Utc> {
        let offset = self.seq.fetch_add(1, Ordering::SeqCst);
        Utc::now() + Duration::microseconds(offset)
    }
}

#[async_trait]
impl ImageStore for MemoryStore {
    async fn insert_image(&self, image: &NewImage) -> Result<ImageRecord> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::rows_write("insert failure injected"));
        }
        let record = ImageRecord {
            id: Uuid::new_v4().to_string(),
            storage_key: image.storage_key.clone(),
            public_url: image.public_url.clone(),
            description: None,
            tags: None,
            like_count: 0,
            created_at: self.next_timestamp(),
        };
        self.images.lock().await.push(record.clone());
        Ok(record)
    }

    async fn image(&self, id: &str) -> Result<Option<ImageRecord>> {
        Ok(self
            .images
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn latest_image(&self) -> Result<Option<ImageRecord>> {
        Ok(self
            .images
            .lock()
            .await
            .iter()
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn search_tags(&self, needle: &str) -> Result<Vec<ImageRecord>> {
        self.check_searchable()?;
        Ok(self
            .images
            .lock()
            .await
            .iter()
            .filter(|r| r.tags_contain(needle))
            .cloned()
            .collect())
    }

    async fn any_tags(&self, needles: &[String]) -> Result<Vec<ImageRecord>> {
        self.check_searchable()?;
        Ok(self
            .images
            .lock()
            .await
            .iter()
            .filter(|r| needles.iter().any(|needle| r.tags_contain(needle)))
            .cloned()
            .collect())
    }

    async fn most_liked(&self, limit: usize) -> Result<Vec<ImageRecord>> {
        self.check_searchable()?;
        let mut images: Vec<ImageRecord> = self.images.lock().await.clone();
        images.sort_by(|a, b| b.like_count.cmp(&a.like_count));
        images.truncate(limit);
        Ok(images)
    }

    async fn like(&self, user_id: &str, image_id: &str) -> Result<()> {
        let key = (user_id.to_string(), image_id.to_string());
        let mut likes = self.likes.lock().await;
        if !likes.insert(key) {
            return Err(Error::Conflict(format!(
                "duplicate like for image {image_id}"
            )));
        }
        Ok(())
    }

    async fn unlike(&self, user_id: &str, image_id: &str) -> Result<()> {
        let key = (user_id.to_string(), image_id.to_string());
        self.likes.lock().await.remove(&key);
        Ok(())
    }

    async fn liked(&self, user_id: &str, image_id: &str) -> Result<bool> {
        let key = (user_id.to_string(), image_id.to_string());
        Ok(self.likes.lock().await.contains(&key))
    }

    async fn adjust_like_count(&self, image_id: &str, delta: i64) -> Result<i64> {
        let mut images = self.images.lock().await;
        let record = images
            .iter_mut()
            .find(|r| r.id == image_id)
            .ok_or_else(|| Error::rows_write(format!("no image {image_id}")))?;
        record.like_count = (record.like_count + delta).max(0);
        Ok(record.like_count)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn append(&self, session_id: &str, user_id: &str, message: &ChatMessage) -> Result<()> {
        self.messages.lock().await.push(StoredTurn {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .messages
            .lock()
            .await
            .iter()
            .filter(|turn| turn.session_id == session_id)
            .map(|turn| turn.message.clone())
            .collect())
    }

    async fn clear(&self, session_id: &str, user_id: &str) -> Result<()> {
        self.messages
            .lock()
            .await
            .retain(|turn| !(turn.session_id == session_id && turn.user_id == user_id));
        Ok(())
    }
}

/// In-memory [`ObjectStore`]. URLs use a `memory://` scheme that `fetch`
/// understands, and signing can be switched off to exercise fallbacks.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    fail_signing: AtomicBool,
    missing_bucket: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_signing(&self, fail: bool) {
        self.fail_signing.store(fail, Ordering::SeqCst);
    }

    /// Make uploads fail as if the target bucket did not exist.
    pub fn set_missing_bucket(&self, missing: bool) {
        self.missing_bucket.store(missing, Ordering::SeqCst);
    }

    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .await
            .contains_key(&format!("{bucket}/{key}"))
    }

    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        blob: &Blob,
        options: &UploadOptions,
    ) -> Result<String> {
        if self.missing_bucket.load(Ordering::SeqCst) {
            return Err(Error::BucketNotFound(bucket.to_string()));
        }
        let path = format!("{bucket}/{key}");
        let mut objects = self.objects.lock().await;
        if objects.contains_key(&path) && !options.upsert {
            return Err(Error::Storage(format!("object already exists: {key}")));
        }
        objects.insert(path, (blob.bytes.clone(), blob.content_type.clone()));
        Ok(key.to_string())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("memory://{bucket}/{key}")
    }

    async fn signed_url(&self, bucket: &str, key: &str, ttl_secs: u64) -> Result<String> {
        if self.fail_signing.load(Ordering::SeqCst) {
            return Err(Error::Storage("signing unavailable".into()));
        }
        if !self.contains(bucket, key).await {
            return Err(Error::Storage(format!("object not found: {key}")));
        }
        Ok(format!("memory://{bucket}/{key}?token=signed&expires={ttl_secs}"))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let path = url
            .strip_prefix("memory://")
            .ok_or_else(|| Error::Storage(format!("not a memory URL: {url}")))?;
        let path = path.split('?').next().unwrap_or(path);
        self.objects
            .lock()
            .await
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| Error::Storage(format!("object not found: {path}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn latest_image_tracks_creation_order() {
        let store = MemoryStore::new();
        store.insert_annotated("a.png", "first", "one").await;
        let second = store.insert_annotated("b.png", "second", "two").await;
        let latest = store.latest_image().await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }

    #[tokio::test]
    async fn tag_search_is_case_insensitive() {
        let store = MemoryStore::new();
        store
            .insert_annotated("a.png", "eiffel tower", "Paris, landmarks")
            .await;
        store.insert_annotated("b.png", "dinner", "food, wine").await;

        assert_eq!(store.search_tags("paris").await.unwrap().len(), 1);
        assert_eq!(store.search_tags("PARIS").await.unwrap().len(), 1);
        assert!(store.search_tags("zuck").await.unwrap().is_empty());

        let tags = vec!["paris".to_string(), "wine".to_string()];
        assert_eq!(store.any_tags(&tags).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn double_like_is_a_conflict_and_unlike_is_idempotent() {
        let store = MemoryStore::new();
        let img = store.insert_annotated("a.png", "x", "t").await;

        store.like("u1", &img.id).await.unwrap();
        let err = store.like("u1", &img.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        store.unlike("u1", &img.id).await.unwrap();
        store.unlike("u1", &img.id).await.unwrap();
        assert!(!store.liked("u1", &img.id).await.unwrap());
    }

    #[tokio::test]
    async fn like_counter_clamps_at_zero() {
        let store = MemoryStore::new();
        let img = store.insert_annotated("a.png", "x", "t").await;
        assert_eq!(store.adjust_like_count(&img.id, -1).await.unwrap(), 0);
        assert_eq!(store.adjust_like_count(&img.id, 1).await.unwrap(), 1);
        assert_eq!(store.adjust_like_count(&img.id, 1).await.unwrap(), 2);
        assert_eq!(store.adjust_like_count(&img.id, -1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn chat_turns_are_scoped_by_session() {
        let store = MemoryStore::new();
        store
            .append("s1", "u1", &ChatMessage::user("hello"))
            .await
            .unwrap();
        store
            .append("s2", "u1", &ChatMessage::user("other"))
            .await
            .unwrap();

        assert_eq!(store.history("s1").await.unwrap().len(), 1);
        store.clear("s1", "u1").await.unwrap();
        assert!(store.history("s1").await.unwrap().is_empty());
        assert_eq!(store.history("s2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn storage_rejects_overwrite_without_upsert() {
        let storage = MemoryStorage::new();
        let blob = Blob::new(vec![1, 2, 3], "image/png");
        let options = UploadOptions::default();

        storage.upload("b", "k.png", &blob, &options).await.unwrap();
        assert!(storage.upload("b", "k.png", &blob, &options).await.is_err());

        let replace = UploadOptions {
            upsert: true,
            ..UploadOptions::default()
        };
        storage.upload("b", "k.png", &blob, &replace).await.unwrap();
    }

    #[tokio::test]
    async fn fetch_resolves_both_url_styles() {
        let storage = MemoryStorage::new();
        let blob = Blob::new(vec![9, 9], "image/png");
        storage
            .upload("b", "k.png", &blob, &UploadOptions::default())
            .await
            .unwrap();

        let public = storage.public_url("b", "k.png");
        assert_eq!(storage.fetch(&public).await.unwrap(), vec![9, 9]);

        let signed = storage.signed_url("b", "k.png", 60).await.unwrap();
        assert!(signed.contains("token=signed"));
        assert_eq!(storage.fetch(&signed).await.unwrap(), vec![9, 9]);

        storage.set_fail_signing(true);
        assert!(storage.signed_url("b", "k.png", 60).await.is_err());
    }
}
