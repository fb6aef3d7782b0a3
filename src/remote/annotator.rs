use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};

/// Caption-and-tag service. Given a row id it downloads the image on its own
/// side, runs the vision model, and writes `description` and `tags` back to
/// the row; the call returns once that write has happened.
#[async_trait]
pub trait Annotator: Send + Sync {
    async fn annotate(&self, image_id: &str) -> Result<()>;
}

pub struct HttpAnnotator {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    message: Option<String>,
}

impl HttpAnnotator {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Annotator for HttpAnnotator {
    async fn annotate(&self, image_id: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/update_image_info", self.base_url))
            .json(&json!({ "id": image_id }))
            .send()
            .await
            .map_err(|e| Error::Annotation(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ServiceErrorBody>()
                .await
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| status.to_string());
            return Err(Error::Annotation(format!(
                "HTTP {}: {detail}",
                status.as_u16()
            )));
        }
        debug!(image_id, "annotation completed");
        Ok(())
    }
}
