//! On-disk artifact layout: uploaded sources and generated outputs.
//!
//! ```text
//! <uploads_dir>/<timestamp>_<id>_<sanitised name>
//! <generated_dir>/<timestamp>_<id>.png
//! ```
//!
//! Timestamps keep directory listings roughly chronological; the random id
//! component keeps names unique when two artifacts land in the same second.

use std::{
  io::Cursor,
  path::{Path, PathBuf},
};

use chrono::Utc;
use image::{DynamicImage, ImageFormat};
use tracing::debug;
use uuid::Uuid;

use crate::Result;

const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
  uploads:   PathBuf,
  generated: PathBuf,
}

impl ArtifactStore {
  pub fn new(uploads: impl Into<PathBuf>, generated: impl Into<PathBuf>) -> Self {
    Self { uploads: uploads.into(), generated: generated.into() }
  }

  /// Create both directories if they are missing.
  pub async fn ensure_dirs(&self) -> Result<()> {
    tokio::fs::create_dir_all(&self.uploads).await?;
    tokio::fs::create_dir_all(&self.generated).await?;
    Ok(())
  }

  pub fn uploads_dir(&self) -> &Path { &self.uploads }

  pub fn generated_dir(&self) -> &Path { &self.generated }

  /// Persist uploaded bytes and return the path they were written to.
  pub async fn store_upload(&self, bytes: &[u8], suggested_name: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(&self.uploads).await?;
    let path = self.uploads.join(format!(
      "{}_{}_{}",
      timestamp(),
      short_id(),
      sanitise(suggested_name)
    ));
    tokio::fs::write(&path, bytes).await?;
    debug!(path = %path.display(), bytes = bytes.len(), "stored upload");
    Ok(path)
  }

  /// A fresh, collision-resistant output path under the generated area.
  pub fn output_path(&self) -> PathBuf {
    self.generated.join(format!("{}_{}.png", timestamp(), Uuid::new_v4().simple()))
  }

  /// Encode `image` as PNG at `path`, creating parent directories.
  pub async fn save_png(&self, image: &DynamicImage, path: &Path) -> Result<()> {
    let bytes = encode_png(image)?;
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
  }
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
  let mut buf = Cursor::new(Vec::new());
  image.write_to(&mut buf, ImageFormat::Png)?;
  Ok(buf.into_inner())
}

fn timestamp() -> String { Utc::now().format("%Y%m%d%H%M%S").to_string() }

fn short_id() -> String {
  let mut id = Uuid::new_v4().simple().to_string();
  id.truncate(8);
  id
}

/// Keep only the final path component, restricted to a safe character set.
fn sanitise(name: &str) -> String {
  let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
  let cleaned: String = base
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
        c
      } else {
        '_'
      }
    })
    .take(MAX_NAME_LEN)
    .collect();
  let cleaned = cleaned.trim_start_matches('.');
  if cleaned.is_empty() { "upload".to_owned() } else { cleaned.to_owned() }
}

#[cfg(test)]
mod tests {
  use image::RgbImage;

  use super::*;

  #[test]
  fn sanitise_strips_directories_and_odd_chars() {
    assert_eq!(sanitise("../../etc/passwd"), "passwd");
    assert_eq!(sanitise("C:\\photos\\me 1.jpg"), "me_1.jpg");
    assert_eq!(sanitise(".hidden"), "hidden");
    assert_eq!(sanitise(""), "upload");
  }

  #[test]
  fn output_paths_are_unique_pngs() {
    let store = ArtifactStore::new("uploads", "generated");
    let a = store.output_path();
    let b = store.output_path();
    assert_ne!(a, b);
    assert!(a.starts_with("generated"));
    assert_eq!(a.extension().and_then(|e| e.to_str()), Some("png"));
  }

  #[tokio::test]
  async fn upload_and_save_land_in_their_areas() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().join("uploads"), dir.path().join("generated"));

    let upload = store.store_upload(b"raw", "face.jpg").await.unwrap();
    assert!(upload.starts_with(dir.path().join("uploads")));
    assert!(upload.to_string_lossy().ends_with("_face.jpg"));
    assert_eq!(tokio::fs::read(&upload).await.unwrap(), b"raw");

    let out = store.output_path();
    store
      .save_png(&DynamicImage::ImageRgb8(RgbImage::new(3, 3)), &out)
      .await
      .unwrap();
    let decoded = image::open(&out).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (3, 3));
  }
}
