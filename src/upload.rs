use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::{ObjectStore, UploadOptions};
use crate::error::Result;
use crate::media::Blob;
use crate::records::{ImageRecord, NewImage};
use crate::remote::Annotator;
use crate::store::ImageStore;

const CAPTURE_PREFIX: &str = "capture";
const FILE_PREFIX: &str = "upload";

/// Takes a capture or a picked file through storage, the image row, and the
/// annotation call.
pub struct Uploader {
    storage: Arc<dyn ObjectStore>,
    store: Arc<dyn ImageStore>,
    annotator: Arc<dyn Annotator>,
    bucket: String,
    cache_control: u64,
}

/// How far the post-upload annotation got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    /// Description and tags were written to the row.
    Completed,
    /// No row existed to annotate, so the call was never made.
    Skipped,
    /// The service was called and failed; holds the user-facing message.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub key: String,
    pub public_url: String,
    /// The stored row, refreshed after annotation when possible. `None`
    /// when the row insert failed; the object itself is still stored.
    pub record: Option<ImageRecord>,
    pub annotation: Annotation,
}

/// Storage key for a new object. Prefix tells captures and picked files
/// apart; millisecond timestamp plus a random tail keeps keys unique.
pub fn object_key(prefix: &str, extension: &str) -> String {
    let tail = Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}.{}",
        prefix,
        Utc::now().timestamp_millis(),
        &tail[..12],
        extension
    )
}

impl Uploader {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        store: Arc<dyn ImageStore>,
        annotator: Arc<dyn Annotator>,
        bucket: String,
        cache_control: u64,
    ) -> Self {
        Self {
            storage,
            store,
            annotator,
            bucket,
            cache_control,
        }
    }

    /// Upload a camera capture handed over as a data URL.
    pub async fn upload_capture(&self, data_url: &str) -> Result<UploadOutcome> {
        let blob = Blob::from_data_url(data_url)?;
        self.push(&blob, CAPTURE_PREFIX, "png").await
    }

    /// Upload a picked file, keeping its extension.
    pub async fn upload_file(&self, blob: &Blob, original_name: &str) -> Result<UploadOutcome> {
        let extension = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        self.push(blob, FILE_PREFIX, extension).await
    }

    async fn push(&self, blob: &Blob, prefix: &str, extension: &str) -> Result<UploadOutcome> {
        let key = object_key(prefix, extension);
        let options = UploadOptions {
            cache_control: self.cache_control,
            upsert: false,
        };
        self.storage.upload(&self.bucket, &key, blob, &options).await?;
        let public_url = self.storage.public_url(&self.bucket, &key);
        info!(key, bytes = blob.len(), "image stored");

        // the object is usable from here on; a failed row insert degrades
        // the outcome instead of dropping the upload
        let inserted = match self
            .store
            .insert_image(&NewImage {
                storage_key: key.clone(),
                public_url: Some(public_url.clone()),
                created_at: Utc::now(),
            })
            .await
        {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("image row insert failed, upload kept: {e}");
                None
            }
        };

        let (record, annotation) = match inserted {
            Some(record) => match self.annotator.annotate(&record.id).await {
                Ok(()) => {
                    // the annotator wrote description and tags out of band
                    let refreshed = match self.store.image(&record.id).await {
                        Ok(Some(updated)) => updated,
                        Ok(None) => record,
                        Err(e) => {
                            warn!("annotated row re-read failed: {e}");
                            record
                        }
                    };
                    (Some(refreshed), Annotation::Completed)
                }
                Err(e) => {
                    error!("annotation failed for {}: {e}", record.id);
                    (Some(record), Annotation::Failed(e.user_message()))
                }
            },
            None => (None, Annotation::Skipped),
        };

        Ok(UploadOutcome {
            key,
            public_url,
            record,
            annotation,
        })
    }
}
