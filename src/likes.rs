use std::sync::Arc;

use tracing::debug;

use crate::error::{ErrorKind, Result};
use crate::store::ImageStore;

/// Outcome of a toggle: whether the user now likes the image, and the
/// stored counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeState {
    pub liked: bool,
    pub count: i64,
}

/// Like toggling against the store. The membership row is the source of
/// truth; the counter is adjusted in the data layer afterwards, so two
/// sessions racing on the same image cannot lose an update.
pub struct LikeToggle {
    store: Arc<dyn ImageStore>,
}

impl LikeToggle {
    pub fn new(store: Arc<dyn ImageStore>) -> Self {
        Self { store }
    }

    pub async fn state(&self, user_id: &str, image_id: &str) -> Result<LikeState> {
        let liked = self.store.liked(user_id, image_id).await?;
        let count = self
            .store
            .image(image_id)
            .await?
            .map(|record| record.like_count)
            .unwrap_or(0);
        Ok(LikeState { liked, count })
    }

    pub async fn toggle(&self, user_id: &str, image_id: &str) -> Result<LikeState> {
        if self.store.liked(user_id, image_id).await? {
            self.store.unlike(user_id, image_id).await?;
            let count = self.store.adjust_like_count(image_id, -1).await?;
            debug!(image_id, count, "like removed");
            Ok(LikeState {
                liked: false,
                count,
            })
        } else {
            match self.store.like(user_id, image_id).await {
                Ok(()) => {
                    let count = self.store.adjust_like_count(image_id, 1).await?;
                    debug!(image_id, count, "like recorded");
                    Ok(LikeState { liked: true, count })
                }
                Err(e) if e.kind() == ErrorKind::Conflict => {
                    // another session of the same user got there first;
                    // absorb and report the stored state without counting twice
                    debug!(image_id, "like already recorded elsewhere");
                    let count = self
                        .store
                        .image(image_id)
                        .await?
                        .map(|record| record.like_count)
                        .unwrap_or(0);
                    Ok(LikeState { liked: true, count })
                }
                Err(e) => Err(e),
            }
        }
    }
}
