//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microsecond
//! precision, `Z` suffix) so lexical order equals chronological order.
//! Structured fields (theme settings, generation settings) are compact JSON.
//! UUIDs are hyphenated lowercase strings.

use std::path::PathBuf;

use atelier_core::{
  client::{Client, ThemeSettings},
  history::History,
  identity::Identity,
  layer::{LayerKind, StyleLayer},
  lookbook::{Lookbook, LookbookEntry},
  settings::GenerationSettings,
  user::{Role, Session, User},
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_path(p: &std::path::Path) -> String { p.to_string_lossy().into_owned() }

pub fn encode_theme(t: Option<&ThemeSettings>) -> Result<Option<String>> {
  t.map(serde_json::to_string).transpose().map_err(Error::from)
}

pub fn encode_settings(s: &GenerationSettings) -> Result<String> {
  Ok(serde_json::to_string(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────
//
// Each `Raw*` type holds the column strings of one row exactly as read;
// `COLUMNS` lists them in `from_row` order for use in SELECT statements.

pub struct RawClient {
  pub client_id:      String,
  pub name:           String,
  pub description:    Option<String>,
  pub theme_settings: Option<String>,
  pub created_at:     String,
  pub updated_at:     String,
}

impl RawClient {
  pub const COLUMNS: &'static str =
    "client_id, name, description, theme_settings, created_at, updated_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      client_id:      row.get(0)?,
      name:           row.get(1)?,
      description:    row.get(2)?,
      theme_settings: row.get(3)?,
      created_at:     row.get(4)?,
      updated_at:     row.get(5)?,
    })
  }

  pub fn into_client(self) -> Result<Client> {
    Ok(Client {
      client_id:      decode_uuid(&self.client_id)?,
      name:           self.name,
      description:    self.description,
      theme_settings: self
        .theme_settings
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?,
      created_at:     decode_dt(&self.created_at)?,
      updated_at:     decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawIdentity {
  pub identity_id:     String,
  pub client_id:       String,
  pub name:            String,
  pub base_embedding:  String,
  pub reference_image: Option<String>,
  pub created_at:      String,
  pub updated_at:      String,
}

impl RawIdentity {
  pub const COLUMNS: &'static str = "identity_id, client_id, name, base_embedding, \
                                     reference_image, created_at, updated_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      identity_id:     row.get(0)?,
      client_id:       row.get(1)?,
      name:            row.get(2)?,
      base_embedding:  row.get(3)?,
      reference_image: row.get(4)?,
      created_at:      row.get(5)?,
      updated_at:      row.get(6)?,
    })
  }

  pub fn into_identity(self) -> Result<Identity> {
    Ok(Identity {
      identity_id:     decode_uuid(&self.identity_id)?,
      client_id:       decode_uuid(&self.client_id)?,
      name:            self.name,
      base_embedding:  PathBuf::from(self.base_embedding),
      reference_image: self.reference_image.map(PathBuf::from),
      created_at:      decode_dt(&self.created_at)?,
      updated_at:      decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawLayer {
  pub layer_id:        String,
  pub name:            String,
  pub kind:            String,
  pub prompt:          String,
  pub negative_prompt: Option<String>,
  pub strength:        f64,
  pub reference_image: Option<String>,
  pub created_at:      String,
  pub updated_at:      String,
}

impl RawLayer {
  pub const COLUMNS: &'static str = "layer_id, name, kind, prompt, negative_prompt, \
                                     strength, reference_image, created_at, updated_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      layer_id:        row.get(0)?,
      name:            row.get(1)?,
      kind:            row.get(2)?,
      prompt:          row.get(3)?,
      negative_prompt: row.get(4)?,
      strength:        row.get(5)?,
      reference_image: row.get(6)?,
      created_at:      row.get(7)?,
      updated_at:      row.get(8)?,
    })
  }

  pub fn into_layer(self) -> Result<StyleLayer> {
    Ok(StyleLayer {
      layer_id:        decode_uuid(&self.layer_id)?,
      name:            self.name,
      kind:            LayerKind::parse(&self.kind)?,
      prompt:          self.prompt,
      negative_prompt: self.negative_prompt,
      strength:        self.strength as f32,
      reference_image: self.reference_image.map(PathBuf::from),
      created_at:      decode_dt(&self.created_at)?,
      updated_at:      decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawHistory {
  pub history_id:      String,
  pub identity_id:     String,
  pub image_path:      String,
  pub prompt:          String,
  pub negative_prompt: String,
  pub settings:        String,
  pub created_at:      String,
}

impl RawHistory {
  pub const COLUMNS: &'static str = "history_id, identity_id, image_path, prompt, \
                                     negative_prompt, settings, created_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      history_id:      row.get(0)?,
      identity_id:     row.get(1)?,
      image_path:      row.get(2)?,
      prompt:          row.get(3)?,
      negative_prompt: row.get(4)?,
      settings:        row.get(5)?,
      created_at:      row.get(6)?,
    })
  }

  pub fn into_history(self) -> Result<History> {
    Ok(History {
      history_id:      decode_uuid(&self.history_id)?,
      identity_id:     decode_uuid(&self.identity_id)?,
      image_path:      PathBuf::from(self.image_path),
      prompt:          self.prompt,
      negative_prompt: self.negative_prompt,
      settings:        serde_json::from_str(&self.settings)?,
      created_at:      decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawLookbook {
  pub lookbook_id: String,
  pub client_id:   String,
  pub name:        String,
  pub description: Option<String>,
  pub created_at:  String,
  pub updated_at:  String,
}

impl RawLookbook {
  pub const COLUMNS: &'static str =
    "lookbook_id, client_id, name, description, created_at, updated_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      lookbook_id: row.get(0)?,
      client_id:   row.get(1)?,
      name:        row.get(2)?,
      description: row.get(3)?,
      created_at:  row.get(4)?,
      updated_at:  row.get(5)?,
    })
  }

  pub fn into_lookbook(self) -> Result<Lookbook> {
    Ok(Lookbook {
      lookbook_id: decode_uuid(&self.lookbook_id)?,
      client_id:   decode_uuid(&self.client_id)?,
      name:        self.name,
      description: self.description,
      created_at:  decode_dt(&self.created_at)?,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawEntry {
  pub entry_id:    String,
  pub lookbook_id: String,
  pub history_id:  String,
  pub position:    i64,
  pub notes:       Option<String>,
  pub created_at:  String,
  pub updated_at:  String,
}

impl RawEntry {
  pub const COLUMNS: &'static str =
    "entry_id, lookbook_id, history_id, position, notes, created_at, updated_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entry_id:    row.get(0)?,
      lookbook_id: row.get(1)?,
      history_id:  row.get(2)?,
      position:    row.get(3)?,
      notes:       row.get(4)?,
      created_at:  row.get(5)?,
      updated_at:  row.get(6)?,
    })
  }

  pub fn into_entry(self) -> Result<LookbookEntry> {
    Ok(LookbookEntry {
      entry_id:    decode_uuid(&self.entry_id)?,
      lookbook_id: decode_uuid(&self.lookbook_id)?,
      history_id:  decode_uuid(&self.history_id)?,
      position:    self.position,
      notes:       self.notes,
      created_at:  decode_dt(&self.created_at)?,
      updated_at:  decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawUser {
  pub user_id:       String,
  pub username:      String,
  pub email:         String,
  pub password_hash: String,
  pub role:          String,
  pub active:        bool,
  pub created_at:    String,
  pub updated_at:    String,
}

impl RawUser {
  pub const COLUMNS: &'static str = "user_id, username, email, password_hash, role, \
                                     active, created_at, updated_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      user_id:       row.get(0)?,
      username:      row.get(1)?,
      email:         row.get(2)?,
      password_hash: row.get(3)?,
      role:          row.get(4)?,
      active:        row.get(5)?,
      created_at:    row.get(6)?,
      updated_at:    row.get(7)?,
    })
  }

  pub fn into_user(self) -> Result<User> {
    Ok(User {
      user_id:       decode_uuid(&self.user_id)?,
      username:      self.username,
      email:         self.email,
      password_hash: self.password_hash,
      role:          Role::parse(&self.role)?,
      active:        self.active,
      created_at:    decode_dt(&self.created_at)?,
      updated_at:    decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawSession {
  pub token_digest: String,
  pub user_id:      String,
  pub issued_at:    String,
  pub expires_at:   String,
}

impl RawSession {
  pub const COLUMNS: &'static str = "token_digest, user_id, issued_at, expires_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      token_digest: row.get(0)?,
      user_id:      row.get(1)?,
      issued_at:    row.get(2)?,
      expires_at:   row.get(3)?,
    })
  }

  pub fn into_session(self) -> Result<Session> {
    Ok(Session {
      token_digest: self.token_digest,
      user_id:      decode_uuid(&self.user_id)?,
      issued_at:    decode_dt(&self.issued_at)?,
      expires_at:   decode_dt(&self.expires_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;

  #[test]
  fn encoded_timestamps_sort_chronologically() {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let later = base + Duration::microseconds(1500);
    let (a, b) = (encode_dt(base), encode_dt(later));
    assert_eq!(a.len(), b.len());
    assert!(a < b);
    assert_eq!(decode_dt(&b).unwrap(), later);
  }
}
