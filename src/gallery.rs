use std::path::Path;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, error, warn};

use crate::backend::ObjectStore;
use crate::error::{Error, Result};
use crate::likes::{LikeState, LikeToggle};
use crate::records::ImageRecord;
use crate::store::ImageStore;

/// A record paired with the URL to display it from: a signed URL when
/// issuance worked, otherwise the raw stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImage {
    pub record: ImageRecord,
    pub display_url: String,
}

/// Where the search surface currently is.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchState {
    Idle,
    Searching,
    Results(Vec<ResolvedImage>),
    Empty { query: String },
    Error(String),
}

impl SearchState {
    /// The banner text for the empty state.
    pub fn no_results_message(&self) -> Option<String> {
        match self {
            SearchState::Empty { query } => Some(format!("No images found for \"{query}\"")),
            _ => None,
        }
    }
}

/// One opened result with its like state loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailView {
    pub image: ResolvedImage,
    pub liked: bool,
    pub like_count: i64,
}

/// Tag search plus the showcase and most-liked rails. Holds the search state
/// machine and the optional opened detail on top of the results.
pub struct SearchView {
    store: Arc<dyn ImageStore>,
    storage: Arc<dyn ObjectStore>,
    likes: LikeToggle,
    bucket: String,
    signed_url_ttl: u64,
    state: SearchState,
    detail: Option<DetailView>,
}

impl SearchView {
    pub fn new(
        store: Arc<dyn ImageStore>,
        storage: Arc<dyn ObjectStore>,
        bucket: String,
        signed_url_ttl: u64,
    ) -> Self {
        Self {
            likes: LikeToggle::new(store.clone()),
            store,
            storage,
            bucket,
            signed_url_ttl,
            state: SearchState::Idle,
            detail: None,
        }
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    pub fn detail(&self) -> Option<&DetailView> {
        self.detail.as_ref()
    }

    /// Run a tag search. A blank query resets to idle without touching the
    /// store; failures land in the error state with user-facing text.
    pub async fn search(&mut self, query: &str) -> &SearchState {
        self.detail = None;
        let query = query.trim();
        if query.is_empty() {
            self.state = SearchState::Idle;
            return &self.state;
        }
        self.state = SearchState::Searching;
        match self.store.search_tags(query).await {
            Ok(rows) if rows.is_empty() => {
                debug!(query, "search matched nothing");
                self.state = SearchState::Empty {
                    query: query.to_string(),
                };
            }
            Ok(rows) => {
                let resolved = self.resolve(rows).await;
                self.state = SearchState::Results(resolved);
            }
            Err(e) => {
                error!("image search failed: {e}");
                self.state = SearchState::Error(e.user_message());
            }
        }
        &self.state
    }

    /// The tag-sampler strip shown on the landing surface.
    pub async fn showcase(&self, tags: &[String]) -> Result<Vec<ResolvedImage>> {
        let rows = self.store.any_tags(tags).await?;
        Ok(self.resolve(rows).await)
    }

    pub async fn most_liked(&self, limit: usize) -> Result<Vec<ResolvedImage>> {
        let rows = self.store.most_liked(limit).await?;
        Ok(self.resolve(rows).await)
    }

    /// Issue display URLs for a batch of rows, concurrently. A row whose
    /// signing fails keeps its stored value so the batch never drops items.
    async fn resolve(&self, rows: Vec<ImageRecord>) -> Vec<ResolvedImage> {
        join_all(rows.into_iter().map(|record| self.resolve_one(record))).await
    }

    async fn resolve_one(&self, record: ImageRecord) -> ResolvedImage {
        match self
            .storage
            .signed_url(&self.bucket, &record.storage_key, self.signed_url_ttl)
            .await
        {
            Ok(url) => ResolvedImage {
                record,
                display_url: url,
            },
            Err(e) => {
                warn!("signed URL failed for {}: {e}", record.storage_key);
                let fallback = record.storage_key.clone();
                ResolvedImage {
                    record,
                    display_url: fallback,
                }
            }
        }
    }

    /// Open one result. Loads the viewer's like state for the detail pane.
    pub async fn open(&mut self, index: usize, user_id: &str) -> Result<&DetailView> {
        let SearchState::Results(images) = &self.state else {
            return Err(Error::Other("no search results to open".into()));
        };
        let image = images
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Other(format!("no result at index {index}")))?;
        let LikeState { liked, count } = self.likes.state(user_id, &image.record.id).await?;
        Ok(&*self.detail.insert(DetailView {
            image,
            liked,
            like_count: count,
        }))
    }

    /// Close the detail pane; the results underneath are untouched.
    pub fn close(&mut self) {
        self.detail = None;
    }

    /// Toggle the viewer's like on the opened detail.
    pub async fn toggle_like(&mut self, user_id: &str) -> Result<LikeState> {
        let detail = self
            .detail
            .as_mut()
            .ok_or_else(|| Error::Other("no detail open".into()))?;
        let state = self.likes.toggle(user_id, &detail.image.record.id).await?;
        detail.liked = state.liked;
        detail.like_count = state.count;
        Ok(state)
    }

    /// Download the opened detail's image to a local file.
    pub async fn download(&self, destination: &Path) -> Result<usize> {
        let detail = self
            .detail
            .as_ref()
            .ok_or_else(|| Error::Other("no detail open".into()))?;
        let bytes = self.storage.fetch(&detail.image.display_url).await?;
        tokio::fs::write(destination, &bytes)
            .await
            .map_err(|e| Error::Other(format!("cannot write {}: {e}", destination.display())))?;
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UploadOptions;
    use crate::media::Blob;
    use crate::store::{MemoryStorage, MemoryStore};

    async fn seeded() -> (Arc<MemoryStore>, Arc<MemoryStorage>, SearchView) {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorage::new());
        let view = SearchView::new(
            store.clone(),
            storage.clone(),
            "image-store".into(),
            3600,
        );
        (store, storage, view)
    }

    async fn put_object(storage: &MemoryStorage, key: &str) {
        storage
            .upload(
                "image-store",
                key,
                &Blob::new(vec![1, 2, 3], "image/png"),
                &UploadOptions::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn blank_query_resets_to_idle_without_querying() {
        let (_store, _storage, mut view) = seeded().await;
        assert_eq!(view.search("   ").await, &SearchState::Idle);
        assert_eq!(view.search("").await, &SearchState::Idle);
    }

    #[tokio::test]
    async fn no_match_lands_in_the_empty_state_with_the_query() {
        let (store, _storage, mut view) = seeded().await;
        store.insert_annotated("a.png", "tower", "paris").await;

        let state = view.search("zanzibar").await;
        assert_eq!(
            state.no_results_message(),
            Some("No images found for \"zanzibar\"".to_string())
        );
    }

    #[tokio::test]
    async fn results_carry_signed_urls() {
        let (store, storage, mut view) = seeded().await;
        store.insert_annotated("a.png", "tower", "paris").await;
        put_object(&storage, "a.png").await;

        match view.search("paris").await {
            SearchState::Results(images) => {
                assert_eq!(images.len(), 1);
                assert!(images[0].display_url.contains("token=signed"));
            }
            other => panic!("expected results, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn signing_failure_falls_back_to_the_stored_value() {
        let (store, storage, mut view) = seeded().await;
        store.insert_annotated("a.png", "tower", "paris").await;
        put_object(&storage, "a.png").await;
        storage.set_fail_signing(true);

        match view.search("paris").await {
            SearchState::Results(images) => {
                assert_eq!(images[0].display_url, "a.png");
            }
            other => panic!("expected results, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn detail_opens_with_like_state_and_closes_back_to_results() {
        let (store, storage, mut view) = seeded().await;
        let rec = store.insert_annotated("a.png", "tower", "paris").await;
        put_object(&storage, "a.png").await;
        store.like("u1", &rec.id).await.unwrap();
        store.adjust_like_count(&rec.id, 1).await.unwrap();

        view.search("paris").await;
        let detail = view.open(0, "u1").await.unwrap();
        assert!(detail.liked);
        assert_eq!(detail.like_count, 1);

        view.close();
        assert!(view.detail().is_none());
        assert!(matches!(view.state(), SearchState::Results(_)));
    }

    #[tokio::test]
    async fn toggling_from_the_detail_updates_the_pane() {
        let (store, storage, mut view) = seeded().await;
        store.insert_annotated("a.png", "tower", "paris").await;
        put_object(&storage, "a.png").await;

        view.search("paris").await;
        view.open(0, "u1").await.unwrap();

        let on = view.toggle_like("u1").await.unwrap();
        assert!(on.liked);
        assert_eq!(view.detail().unwrap().like_count, 1);

        let off = view.toggle_like("u1").await.unwrap();
        assert!(!off.liked);
        assert_eq!(view.detail().unwrap().like_count, 0);
    }

    #[tokio::test]
    async fn download_writes_the_detail_image() {
        let (store, storage, mut view) = seeded().await;
        store.insert_annotated("a.png", "tower", "paris").await;
        put_object(&storage, "a.png").await;

        view.search("paris").await;
        view.open(0, "u1").await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.png");
        let written = view.download(&dest).await.unwrap();
        assert_eq!(written, 3);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn showcase_collects_rows_for_any_tag() {
        let (store, storage, view) = seeded().await;
        store.insert_annotated("a.png", "tower", "paris").await;
        store.insert_annotated("b.png", "dinner", "wine, food").await;
        store.insert_annotated("c.png", "cat", "pets").await;
        put_object(&storage, "a.png").await;
        put_object(&storage, "b.png").await;
        put_object(&storage, "c.png").await;

        let tags = vec!["paris".to_string(), "wine".to_string()];
        let strip = view.showcase(&tags).await.unwrap();
        assert_eq!(strip.len(), 2);
    }

    #[tokio::test]
    async fn store_failure_lands_in_the_error_state() {
        let (store, _storage, mut view) = seeded().await;
        store.insert_annotated("a.png", "tower", "paris").await;
        store.set_fail_searches(true);

        match view.search("paris").await {
            SearchState::Error(message) => {
                assert_eq!(message, "Failed to load image information. Please try again.");
            }
            other => panic!("expected error state, got {other:?}"),
        }

        // recovery: the next search runs normally
        store.set_fail_searches(false);
        assert!(matches!(view.search("paris").await, SearchState::Results(_)));
    }

    #[tokio::test]
    async fn opening_a_bad_index_leaves_the_results_alone() {
        let (store, storage, mut view) = seeded().await;
        store.insert_annotated("a.png", "tower", "paris").await;
        put_object(&storage, "a.png").await;

        view.search("paris").await;
        assert!(view.open(7, "u1").await.is_err());
        assert!(view.detail().is_none());
        assert!(matches!(view.state(), SearchState::Results(_)));
    }
}
