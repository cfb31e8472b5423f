//! Image handling and file-backed media storage.
//!
//! Uploads are sniffed by magic bytes (never trusted by declared content
//! type), re-encoded to JPEG, and written to deterministic paths under the
//! media root: `users/{user_id}/avatar.jpg` and
//! `builds/{build_id}/photo_{n}.jpg`. The server mounts the root at
//! `/media`. Decoding/encoding is CPU-bound — callers run it inside
//! `spawn_blocking`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tokio::fs;
use tracing::{info, warn};

const JPEG_QUALITY: u8 = 85;
const AVATAR_SIZE: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
}

/// Identify a supported image format from its magic bytes.
pub fn sniff_image(bytes: &[u8]) -> Option<ImageKind> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageKind::Jpeg)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some(ImageKind::Png)
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(ImageKind::Webp)
    } else {
        None
    }
}

/// Decode a raw upload and re-encode it as a baseline JPEG. Strips all
/// metadata as a side effect of the decode.
pub fn normalize_jpeg(bytes: &[u8]) -> Result<Vec<u8>> {
    ensure!(sniff_image(bytes).is_some(), "unsupported image format");
    let img = image::load_from_memory(bytes).context("image decode failed")?;
    encode_jpeg(&img)
}

/// Avatar variant: centre-square crop, resized to a fixed edge.
pub fn normalize_avatar(bytes: &[u8]) -> Result<Vec<u8>> {
    ensure!(sniff_image(bytes).is_some(), "unsupported image format");
    let img = image::load_from_memory(bytes).context("image decode failed")?;

    let (w, h) = (img.width(), img.height());
    let side = w.min(h);
    let cropped = img.crop_imm((w - side) / 2, (h - side) / 2, side, side);
    let resized = cropped.resize_exact(AVATAR_SIZE, AVATAR_SIZE, FilterType::Lanczos3);
    encode_jpeg(&resized)
}

fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>> {
    // JPEG has no alpha; flatten first.
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY))
        .context("jpeg encode failed")?;
    Ok(out)
}

/// Manages the on-disk media tree.
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!("Media storage directory: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn avatar_url(user_id: i64) -> String {
        format!("/media/users/{user_id}/avatar.jpg")
    }

    pub fn build_photo_url(build_id: i64, index: u8) -> String {
        format!("/media/builds/{build_id}/photo_{index}.jpg")
    }

    fn user_dir(&self, user_id: i64) -> PathBuf {
        self.root.join("users").join(user_id.to_string())
    }

    fn build_dir(&self, build_id: i64) -> PathBuf {
        self.root.join("builds").join(build_id.to_string())
    }

    /// Write a normalized avatar; returns its public URL.
    pub async fn save_avatar(&self, user_id: i64, jpeg: &[u8]) -> Result<String> {
        let dir = self.user_dir(user_id);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join("avatar.jpg"), jpeg).await?;
        Ok(Self::avatar_url(user_id))
    }

    /// Write a normalized build photo (index 1 or 2); returns its URL.
    pub async fn save_build_photo(&self, build_id: i64, index: u8, jpeg: &[u8]) -> Result<String> {
        let dir = self.build_dir(build_id);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(format!("photo_{index}.jpg")), jpeg).await?;
        Ok(Self::build_photo_url(build_id, index))
    }

    pub async fn remove_build_dir(&self, build_id: i64) -> Result<()> {
        remove_dir_if_present(self.build_dir(build_id)).await
    }

    pub async fn remove_user_dir(&self, user_id: i64) -> Result<()> {
        remove_dir_if_present(self.user_dir(user_id)).await
    }
}

async fn remove_dir_if_present(dir: PathBuf) -> Result<()> {
    match fs::remove_dir_all(&dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("media dir {} already gone", dir.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_known_formats() {
        assert_eq!(sniff_image(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageKind::Jpeg));
        assert_eq!(
            sniff_image(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]),
            Some(ImageKind::Png)
        );
        let mut webp = Vec::new();
        webp.extend_from_slice(b"RIFF");
        webp.extend_from_slice(&[0, 0, 0, 0]);
        webp.extend_from_slice(b"WEBP");
        assert_eq!(sniff_image(&webp), Some(ImageKind::Webp));
        assert_eq!(sniff_image(b"GIF89a"), None);
        assert_eq!(sniff_image(b""), None);
    }

    #[test]
    fn normalize_rejects_non_images() {
        assert!(normalize_jpeg(b"<html>not an image</html>").is_err());
    }

    #[test]
    fn normalize_produces_jpeg() {
        // 4x2 white PNG built in-memory.
        let img = DynamicImage::new_rgb8(4, 2);
        let mut png = Vec::new();
        img.write_with_encoder(image::codecs::png::PngEncoder::new(&mut png))
            .unwrap();

        let jpeg = normalize_jpeg(&png).unwrap();
        assert_eq!(sniff_image(&jpeg), Some(ImageKind::Jpeg));
    }

    #[test]
    fn avatar_is_square_at_fixed_size() {
        let img = DynamicImage::new_rgb8(640, 360);
        let mut png = Vec::new();
        img.write_with_encoder(image::codecs::png::PngEncoder::new(&mut png))
            .unwrap();

        let jpeg = normalize_avatar(&png).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (AVATAR_SIZE, AVATAR_SIZE));
    }

    #[test]
    fn urls_are_deterministic() {
        assert_eq!(MediaStore::avatar_url(42), "/media/users/42/avatar.jpg");
        assert_eq!(MediaStore::build_photo_url(7, 2), "/media/builds/7/photo_2.jpg");
    }
}
