//! Client: the studio customer that owns identities and lookbooks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form presentation settings stored alongside a client (colours,
/// logo paths and the like). Opaque to the backend.
pub type ThemeSettings = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
  pub client_id:      Uuid,
  pub name:           String,
  pub description:    Option<String>,
  pub theme_settings: Option<ThemeSettings>,
  pub created_at:     DateTime<Utc>,
  pub updated_at:     DateTime<Utc>,
}

/// Input to [`crate::store::StudioStore::create_client`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewClient {
  pub name:           String,
  pub description:    Option<String>,
  pub theme_settings: Option<ThemeSettings>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientPatch {
  pub name:           Option<String>,
  pub description:    Option<String>,
  pub theme_settings: Option<ThemeSettings>,
}

impl ClientPatch {
  pub fn apply(self, client: &mut Client) {
    if let Some(name) = self.name {
      client.name = name;
    }
    if let Some(description) = self.description {
      client.description = Some(description);
    }
    if let Some(theme) = self.theme_settings {
      client.theme_settings = Some(theme);
    }
  }
}
