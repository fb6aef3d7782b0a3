use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::camera::Facing;

/// Runtime configuration, read from a TOML file. Only the backend and
/// service endpoints are mandatory; everything else has defaults that match
/// the deployed buckets and policies.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub backend: BackendConfig,
    pub services: ServicesConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub gallery: GalleryConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend project, without a trailing slash.
    pub url: String,
    /// Public (anonymous) API key sent with every request.
    pub anon_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    /// Endpoint that fills in description and tags for a new image row.
    pub annotator_url: String,
    /// Endpoint that answers prompts about an image.
    pub chatbot_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_image_bucket")]
    pub image_bucket: String,
    #[serde(default = "default_chat_bucket")]
    pub chat_bucket: String,
    /// Lifetime of issued signed URLs, in seconds.
    #[serde(default = "default_hour")]
    pub signed_url_ttl: u64,
    /// max-age sent with uploads, in seconds.
    #[serde(default = "default_hour")]
    pub cache_control: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub facing: Facing,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// One-shot frame grabber invoked per capture, with `{device}` replaced
    /// by the selected device path. Unset means no local camera.
    #[serde(default)]
    pub capture_command: Option<String>,
    #[serde(default = "default_user_device")]
    pub user_device: String,
    #[serde(default = "default_environment_device")]
    pub environment_device: String,
    #[serde(default = "default_device_glob")]
    pub device_glob: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GalleryConfig {
    /// Tags the showcase strip is built from.
    #[serde(default = "default_showcase_tags")]
    pub showcase_tags: Vec<String>,
    /// How many rows the most-liked rail asks for.
    #[serde(default = "default_most_liked_limit")]
    pub most_liked_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Where the signed-in session is persisted between runs.
    #[serde(default = "default_session_file")]
    pub file: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image_bucket: default_image_bucket(),
            chat_bucket: default_chat_bucket(),
            signed_url_ttl: default_hour(),
            cache_control: default_hour(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            facing: Facing::default(),
            width: default_width(),
            height: default_height(),
            capture_command: None,
            user_device: default_user_device(),
            environment_device: default_environment_device(),
            device_glob: default_device_glob(),
        }
    }
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            showcase_tags: default_showcase_tags(),
            most_liked_limit: default_most_liked_limit(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            file: default_session_file(),
        }
    }
}

fn default_image_bucket() -> String {
    "image-store".to_string()
}

fn default_chat_bucket() -> String {
    "chat-images".to_string()
}

fn default_hour() -> u64 {
    3600
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_user_device() -> String {
    "/dev/video0".to_string()
}

fn default_environment_device() -> String {
    "/dev/video1".to_string()
}

fn default_device_glob() -> String {
    "/dev/video*".to_string()
}

fn default_showcase_tags() -> Vec<String> {
    ["paris", "wine", "food", "zuck"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_most_liked_limit() -> usize {
    8
}

fn default_session_file() -> PathBuf {
    PathBuf::from(".jadoo/session.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_fills_defaults() {
        let raw = r#"
[backend]
url = "https://example.supabase.co"
anon_key = "anon"

[services]
annotator_url = "http://localhost:8000"
chatbot_url = "http://localhost:8000"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.storage.image_bucket, "image-store");
        assert_eq!(config.storage.chat_bucket, "chat-images");
        assert_eq!(config.storage.signed_url_ttl, 3600);
        assert_eq!(config.camera.facing, Facing::User);
        assert_eq!(config.camera.width, 1920);
        assert_eq!(
            config.gallery.showcase_tags,
            vec!["paris", "wine", "food", "zuck"]
        );
        assert_eq!(config.session.file, PathBuf::from(".jadoo/session.json"));
    }

    #[test]
    fn sections_override_defaults() {
        let raw = r#"
[backend]
url = "https://example.supabase.co"
anon_key = "anon"

[services]
annotator_url = "http://annotator:9000"
chatbot_url = "http://chatbot:9000"

[storage]
image_bucket = "photos"
signed_url_ttl = 60

[camera]
facing = "environment"
capture_command = "fswebcam -d {device} --save -"

[gallery]
showcase_tags = ["sunset"]
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.storage.image_bucket, "photos");
        assert_eq!(config.storage.chat_bucket, "chat-images");
        assert_eq!(config.storage.signed_url_ttl, 60);
        assert_eq!(config.camera.facing, Facing::Environment);
        assert!(config.camera.capture_command.is_some());
        assert_eq!(config.gallery.showcase_tags, vec!["sunset"]);
    }

    #[test]
    fn missing_backend_section_is_an_error() {
        let raw = r#"
[services]
annotator_url = "http://localhost:8000"
chatbot_url = "http://localhost:8000"
"#;
        assert!(toml::from_str::<Config>(raw).is_err());
    }
}
