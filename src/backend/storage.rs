use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};
use crate::media::Blob;
use crate::session::SessionContext;

/// Object storage seam. The hosted implementation talks to the storage API;
/// tests swap in an in-memory one.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a blob under `key`. Returns the stored path (bucket-relative).
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        blob: &Blob,
        options: &UploadOptions,
    ) -> Result<String>;

    /// Public URL for an object in a public bucket. Built locally, no
    /// request involved.
    fn public_url(&self, bucket: &str, key: &str) -> String;

    /// Time-limited URL for an object in a restricted bucket.
    async fn signed_url(&self, bucket: &str, key: &str, ttl_secs: u64) -> Result<String>;

    /// Download the object behind a URL issued by this store.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// max-age for the stored object, in seconds.
    pub cache_control: u64,
    /// Whether an existing object under the same key may be replaced.
    pub upsert: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            cache_control: 3600,
            upsert: false,
        }
    }
}

pub struct SupabaseStorage {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: SessionContext,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

#[derive(Debug, Deserialize)]
struct StorageErrorBody {
    message: Option<String>,
    error: Option<String>,
}

impl SupabaseStorage {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        anon_key: String,
        session: SessionContext,
    ) -> Self {
        Self {
            http,
            base_url,
            anon_key,
            session,
        }
    }

    async fn bearer(&self) -> String {
        self.session
            .access_token()
            .await
            .unwrap_or_else(|| self.anon_key.clone())
    }

    async fn error_detail(response: reqwest::Response) -> String {
        match response.json::<StorageErrorBody>().await {
            Ok(body) => body
                .message
                .or(body.error)
                .unwrap_or_else(|| "no detail".to_string()),
            Err(_) => "no detail".to_string(),
        }
    }
}

/// Keys are path-like (`session/file.png`); encode each segment but keep the
/// separators.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        blob: &Blob,
        options: &UploadOptions,
    ) -> Result<String> {
        let token = self.bearer().await;
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            bucket,
            encode_key(key)
        );
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .header(CONTENT_TYPE, &blob.content_type)
            .header(CACHE_CONTROL, format!("max-age={}", options.cache_control))
            .header("x-upsert", options.upsert.to_string())
            .body(blob.bytes.clone())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = Self::error_detail(response).await;
            return Err(match status {
                // a 404 on upload means the bucket path does not exist;
                // the object itself is only being created
                StatusCode::NOT_FOUND => Error::BucketNotFound(bucket.to_string()),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::AuthRequired,
                StatusCode::CONFLICT => {
                    Error::Storage(format!("object already exists: {key} ({detail})"))
                }
                _ => Error::Storage(format!("HTTP {}: {detail}", status.as_u16())),
            });
        }
        debug!(bucket, key, bytes = blob.bytes.len(), "object stored");
        Ok(key.to_string())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            bucket,
            encode_key(key)
        )
    }

    async fn signed_url(&self, bucket: &str, key: &str, ttl_secs: u64) -> Result<String> {
        let token = self.bearer().await;
        let url = format!(
            "{}/storage/v1/object/sign/{}/{}",
            self.base_url,
            bucket,
            encode_key(key)
        );
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .json(&json!({ "expiresIn": ttl_secs }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let detail = Self::error_detail(response).await;
            return Err(match status {
                StatusCode::NOT_FOUND => Error::Storage(format!("object not found: {key}")),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::AuthRequired,
                _ => Error::Storage(format!("HTTP {}: {detail}", status.as_u16())),
            });
        }
        let body: SignResponse = response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("sign response: {e}")))?;
        // the service answers with a path relative to /storage/v1
        Ok(format!("{}/storage/v1{}", self.base_url, body.signed_url))
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .header("apikey", &self.anon_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Storage(format!(
                "HTTP {} fetching object",
                status.as_u16()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> SupabaseStorage {
        SupabaseStorage::new(
            reqwest::Client::new(),
            "https://example.supabase.co".into(),
            "anon".into(),
            SessionContext::new(),
        )
    }

    #[test]
    fn public_url_is_built_locally() {
        let url = storage().public_url("image-store", "capture-1700-abc.png");
        assert_eq!(
            url,
            "https://example.supabase.co/storage/v1/object/public/image-store/capture-1700-abc.png"
        );
    }

    #[test]
    fn key_encoding_keeps_path_separators() {
        assert_eq!(encode_key("a/b c.png"), "a/b%20c.png");
        assert_eq!(encode_key("plain.png"), "plain.png");
        let url = storage().public_url("chat-images", "session-1/my photo.png");
        assert!(url.ends_with("/chat-images/session-1/my%20photo.png"));
    }
}
