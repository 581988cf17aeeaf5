//! Generation history: the provenance trail of every produced artifact.
//!
//! A history record is immutable once written. It disappears only when its
//! identity is deleted.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::settings::GenerationSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
  pub history_id:      Uuid,
  pub identity_id:     Uuid,
  pub image_path:      PathBuf,
  /// The composed prompt actually sent to the backend.
  pub prompt:          String,
  pub negative_prompt: String,
  pub settings:        GenerationSettings,
  /// Server-assigned; never changes after creation.
  pub created_at:      DateTime<Utc>,
}

/// Input to [`crate::store::StudioStore::record_history`].
#[derive(Debug, Clone)]
pub struct NewHistory {
  pub identity_id:     Uuid,
  pub image_path:      PathBuf,
  pub prompt:          String,
  pub negative_prompt: String,
  pub settings:        GenerationSettings,
}
