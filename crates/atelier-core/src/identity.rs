//! Identity: a reusable virtual subject built from reference photos.
//!
//! The studio UI calls these "models". An identity is only usable for
//! generation once it carries a base embedding: an opaque path to the
//! precomputed representation produced by the embedding collaborator.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
  pub identity_id:     Uuid,
  /// Owning client; deleting the client deletes the identity.
  pub client_id:       Uuid,
  pub name:            String,
  pub base_embedding:  PathBuf,
  /// First uploaded reference photo, if any.
  pub reference_image: Option<PathBuf>,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
}

impl Identity {
  /// The base embedding path, or `None` when the identity was stored
  /// without one and cannot be used for generation.
  pub fn embedding(&self) -> Option<&Path> {
    if self.base_embedding.as_os_str().is_empty() {
      None
    } else {
      Some(&self.base_embedding)
    }
  }
}

/// Input to [`crate::store::StudioStore::create_identity`].
#[derive(Debug, Clone)]
pub struct NewIdentity {
  pub client_id:       Uuid,
  pub name:            String,
  pub base_embedding:  PathBuf,
  pub reference_image: Option<PathBuf>,
}

/// Partial update; the embedding itself is never replaced in place.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityPatch {
  pub name:            Option<String>,
  pub client_id:       Option<Uuid>,
  pub reference_image: Option<PathBuf>,
}

impl IdentityPatch {
  pub fn apply(self, identity: &mut Identity) {
    if let Some(name) = self.name {
      identity.name = name;
    }
    if let Some(client_id) = self.client_id {
      identity.client_id = client_id;
    }
    if let Some(path) = self.reference_image {
      identity.reference_image = Some(path);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn identity(embedding: &str) -> Identity {
    Identity {
      identity_id:     Uuid::new_v4(),
      client_id:       Uuid::new_v4(),
      name:            "Mara".into(),
      base_embedding:  PathBuf::from(embedding),
      reference_image: None,
      created_at:      Utc::now(),
      updated_at:      Utc::now(),
    }
  }

  #[test]
  fn empty_embedding_is_unusable() {
    assert!(identity("").embedding().is_none());
    assert_eq!(identity("emb.pt").embedding(), Some(Path::new("emb.pt")));
  }

  #[test]
  fn patch_leaves_missing_fields() {
    let mut id = identity("emb.pt");
    IdentityPatch { name: Some("Nia".into()), ..Default::default() }.apply(&mut id);
    assert_eq!(id.name, "Nia");
    assert_eq!(id.base_embedding, PathBuf::from("emb.pt"));
  }
}
