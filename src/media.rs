use std::io::Cursor;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{ImageFormat, RgbaImage};

use crate::error::{Error, Result};

const DEFAULT_IMAGE_TYPE: &str = "image/png";

/// A decoded video frame, RGBA row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::Decode(format!(
                "frame dimensions {width}x{height} are empty"
            )));
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(Error::Decode(format!(
                "frame buffer is {} bytes, expected {} for {}x{} RGBA",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Horizontal flip, matching how a selfie preview is drawn.
    pub fn mirrored(&self) -> Frame {
        let stride = self.width as usize * 4;
        let mut out = Vec::with_capacity(self.pixels.len());
        for row in self.pixels.chunks_exact(stride) {
            for px in row.chunks_exact(4).rev() {
                out.extend_from_slice(px);
            }
        }
        Frame {
            width: self.width,
            height: self.height,
            pixels: out,
        }
    }

    /// Encode as PNG. The buffer length invariant is checked at construction,
    /// so the only failure left is the encoder itself.
    pub fn to_png(&self) -> Result<Blob> {
        let img = RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| Error::Decode("frame buffer does not match its dimensions".into()))?;
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| Error::Decode(format!("PNG encode failed: {e}")))?;
        Ok(Blob::new(bytes, DEFAULT_IMAGE_TYPE))
    }
}

/// An opaque binary payload plus its content type, the unit moved between
/// camera, disk, and object storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl Blob {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Decode(format!("cannot read {}: {e}", path.display())))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Ok(Self::new(bytes, content_type_for(ext)))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `data:<type>;base64,<payload>` form used to hand a capture around
    /// without touching disk.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            BASE64.encode(&self.bytes)
        )
    }

    /// Accepts both full data URLs and bare base64 (assumed PNG).
    pub fn from_data_url(data: &str) -> Result<Self> {
        let trimmed = data.trim();
        if let Some(rest) = trimmed.strip_prefix("data:") {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or_else(|| Error::Decode("malformed data URL: missing comma".into()))?;
            let content_type = meta.strip_suffix(";base64").unwrap_or(meta);
            let content_type = if content_type.is_empty() {
                DEFAULT_IMAGE_TYPE
            } else {
                content_type
            };
            let bytes = BASE64
                .decode(payload)
                .map_err(|e| Error::Decode(format!("invalid base64 payload: {e}")))?;
            Ok(Self::new(bytes, content_type))
        } else {
            let bytes = BASE64
                .decode(trimmed)
                .map_err(|e| Error::Decode(format!("invalid base64 payload: {e}")))?;
            Ok(Self::new(bytes, DEFAULT_IMAGE_TYPE))
        }
    }
}

pub fn content_type_for(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_one() -> Frame {
        // left pixel red, right pixel blue
        Frame::new(2, 1, vec![255, 0, 0, 255, 0, 0, 255, 255]).unwrap()
    }

    #[test]
    fn frame_rejects_short_buffers() {
        assert!(Frame::new(2, 2, vec![0; 15]).is_err());
        assert!(Frame::new(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn frame_rejects_empty_dimensions() {
        assert!(Frame::new(0, 0, Vec::new()).is_err());
        assert!(Frame::new(0, 4, Vec::new()).is_err());
        assert!(Frame::new(4, 0, Vec::new()).is_err());
    }

    #[test]
    fn mirror_swaps_columns_and_is_an_involution() {
        let frame = two_by_one();
        let flipped = frame.mirrored();
        assert_eq!(&flipped.pixels()[..4], &[0, 0, 255, 255]);
        assert_eq!(&flipped.pixels()[4..], &[255, 0, 0, 255]);
        assert_eq!(flipped.mirrored(), frame);
    }

    #[test]
    fn png_round_trip_preserves_pixels() {
        let frame = two_by_one();
        let blob = frame.to_png().unwrap();
        assert_eq!(blob.content_type, "image/png");
        let decoded = image::load_from_memory(&blob.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.into_raw(), frame.pixels().to_vec());
    }

    #[test]
    fn data_url_round_trip() {
        let blob = Blob::new(vec![1, 2, 3, 4], "image/png");
        let url = blob.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(Blob::from_data_url(&url).unwrap(), blob);
    }

    #[test]
    fn bare_base64_defaults_to_png() {
        let blob = Blob::from_data_url(&BASE64.encode([9u8, 8, 7])).unwrap();
        assert_eq!(blob.content_type, "image/png");
        assert_eq!(blob.bytes, vec![9, 8, 7]);
    }

    #[test]
    fn malformed_data_url_is_a_decode_error() {
        assert!(Blob::from_data_url("data:image/png;base64").is_err());
        assert!(Blob::from_data_url("data:image/png;base64,!!!").is_err());
    }

    #[test]
    fn content_types_cover_common_image_extensions() {
        assert_eq!(content_type_for("JPG"), "image/jpeg");
        assert_eq!(content_type_for("png"), "image/png");
        assert_eq!(content_type_for("tar"), "application/octet-stream");
    }
}
