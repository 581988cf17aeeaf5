//! Lookbooks: curated, ordered selections of generated images.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lookbook {
  pub lookbook_id: Uuid,
  pub client_id:   Uuid,
  pub name:        String,
  pub description: Option<String>,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLookbook {
  pub client_id:   Uuid,
  pub name:        String,
  pub description: Option<String>,
}

/// A single history record placed in a lookbook. Holds non-owning
/// references to both; deleting either removes the entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookbookEntry {
  pub entry_id:    Uuid,
  pub lookbook_id: Uuid,
  pub history_id:  Uuid,
  /// Ascending display order within the lookbook.
  #[serde(rename = "order")]
  pub position:    i64,
  pub notes:       Option<String>,
  pub created_at:  DateTime<Utc>,
  pub updated_at:  DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLookbookEntry {
  pub lookbook_id: Uuid,
  pub history_id:  Uuid,
  pub position:    i64,
  pub notes:       Option<String>,
}
