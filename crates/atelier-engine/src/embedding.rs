//! Identity embedding creation.
//!
//! Producing a real identity embedding (textual inversion or similar) is a
//! training job owned by a separate service. The engine only depends on the
//! [`EmbeddingCreator`] contract; [`PlaceholderEmbedder`] satisfies it by
//! writing a marker file so identities can be created end to end.

use std::{future::Future, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSettings {
  #[serde(default = "default_steps")]
  pub num_training_steps: u32,
  #[serde(default = "default_learning_rate")]
  pub learning_rate:      f64,
}

fn default_steps() -> u32 { 1000 }

fn default_learning_rate() -> f64 { 5e-6 }

impl Default for TrainingSettings {
  fn default() -> Self {
    Self {
      num_training_steps: default_steps(),
      learning_rate:      default_learning_rate(),
    }
  }
}

pub trait EmbeddingCreator: Send + Sync {
  /// Build an identity embedding from reference images and return its path.
  fn create_embedding(
    &self,
    reference_images: Vec<PathBuf>,
    settings: TrainingSettings,
  ) -> impl Future<Output = Result<PathBuf>> + Send + '_;
}

/// Writes `embedding_<uuid>.pt` marker files into `dir`.
#[derive(Debug, Clone)]
pub struct PlaceholderEmbedder {
  dir: PathBuf,
}

impl PlaceholderEmbedder {
  pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }
}

impl EmbeddingCreator for PlaceholderEmbedder {
  async fn create_embedding(
    &self,
    reference_images: Vec<PathBuf>,
    settings: TrainingSettings,
  ) -> Result<PathBuf> {
    if reference_images.is_empty() {
      return Err(Error::Validation(
        "at least one reference image is required".into(),
      ));
    }

    info!(
      images = reference_images.len(),
      steps = settings.num_training_steps,
      "creating placeholder embedding"
    );

    tokio::fs::create_dir_all(&self.dir).await?;
    let path = self.dir.join(format!("embedding_{}.pt", Uuid::new_v4()));
    let sources: Vec<_> = reference_images
      .iter()
      .map(|p| p.to_string_lossy().into_owned())
      .collect();
    let marker = serde_json::json!({
      "placeholder": true,
      "reference_images": sources,
      "settings": settings,
    });
    tokio::fs::write(&path, marker.to_string()).await?;
    Ok(path)
  }
}
