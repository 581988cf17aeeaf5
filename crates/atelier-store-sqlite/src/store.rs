//! [`SqliteStore`], the SQLite implementation of [`StudioStore`].

use std::path::Path;

use atelier_core::{
  client::{Client, ClientPatch, NewClient},
  history::{History, NewHistory},
  identity::{Identity, IdentityPatch, NewIdentity},
  layer::{LayerPatch, NewLayer, StyleLayer},
  lookbook::{Lookbook, LookbookEntry, NewLookbook, NewLookbookEntry},
  store::{HistoryQuery, IdentityQuery, LayerQuery, LookbookQuery, Page, StudioStore},
  user::{NewUser, Session, User},
};
use chrono::Utc;
use rusqlite::{OptionalExtension as _, Row, params_from_iter, types::Value};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    RawClient, RawEntry, RawHistory, RawIdentity, RawLayer, RawLookbook, RawSession,
    RawUser, encode_dt, encode_path, encode_settings, encode_theme, encode_uuid,
  },
  schema::SCHEMA,
};

type RowMapper<R> = fn(&Row<'_>) -> rusqlite::Result<R>;

// ─── Store ───────────────────────────────────────────────────────────────────

/// An Atelier record store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Query helpers ─────────────────────────────────────────────────────────

  async fn fetch_one<R>(
    &self,
    sql: String,
    args: Vec<Value>,
    map: RowMapper<R>,
  ) -> Result<Option<R>>
  where
    R: Send + 'static,
  {
    let row = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(&sql, params_from_iter(args), map).optional()?)
      })
      .await?;
    Ok(row)
  }

  async fn fetch_all<R>(
    &self,
    sql: String,
    args: Vec<Value>,
    map: RowMapper<R>,
  ) -> Result<Vec<R>>
  where
    R: Send + 'static,
  {
    let rows = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params_from_iter(args), map)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(rows)
  }

  /// Run a single write statement and return the number of affected rows.
  async fn execute(&self, sql: &'static str, args: Vec<Value>) -> Result<usize> {
    let n = self
      .conn
      .call(move |conn| Ok(conn.execute(sql, params_from_iter(args))?))
      .await?;
    Ok(n)
  }

  async fn exists(&self, sql: &'static str, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let found = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(sql, [id_str], |_| Ok(()))
            .optional()?
            .is_some(),
        )
      })
      .await?;
    Ok(found)
  }
}

fn page_args(page: Page) -> [Value; 2] {
  [Value::Integer(page.limit as i64), Value::Integer(page.offset as i64)]
}

fn text(s: impl Into<String>) -> Value { Value::Text(s.into()) }

fn opt_text(s: Option<impl Into<String>>) -> Value {
  s.map(|s| Value::Text(s.into())).unwrap_or(Value::Null)
}

// ─── StudioStore impl ────────────────────────────────────────────────────────

impl StudioStore for SqliteStore {
  type Error = Error;

  // ── Clients ───────────────────────────────────────────────────────────────

  async fn create_client(&self, input: NewClient) -> Result<Client> {
    let now = Utc::now();
    let client = Client {
      client_id:      Uuid::new_v4(),
      name:           input.name,
      description:    input.description,
      theme_settings: input.theme_settings,
      created_at:     now,
      updated_at:     now,
    };

    self
      .execute(
        "INSERT INTO clients (client_id, name, description, theme_settings, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        vec![
          text(encode_uuid(client.client_id)),
          text(client.name.clone()),
          opt_text(client.description.clone()),
          opt_text(encode_theme(client.theme_settings.as_ref())?),
          text(encode_dt(now)),
          text(encode_dt(now)),
        ],
      )
      .await?;

    Ok(client)
  }

  async fn get_client(&self, id: Uuid) -> Result<Option<Client>> {
    let sql = format!("SELECT {} FROM clients WHERE client_id = ?1", RawClient::COLUMNS);
    self
      .fetch_one(sql, vec![text(encode_uuid(id))], RawClient::from_row)
      .await?
      .map(RawClient::into_client)
      .transpose()
  }

  async fn list_clients(&self, page: Page) -> Result<Vec<Client>> {
    let sql = format!(
      "SELECT {} FROM clients ORDER BY created_at, rowid LIMIT ?1 OFFSET ?2",
      RawClient::COLUMNS
    );
    self
      .fetch_all(sql, page_args(page).to_vec(), RawClient::from_row)
      .await?
      .into_iter()
      .map(RawClient::into_client)
      .collect()
  }

  async fn update_client(&self, id: Uuid, patch: ClientPatch) -> Result<Option<Client>> {
    let Some(mut client) = self.get_client(id).await? else {
      return Ok(None);
    };
    patch.apply(&mut client);
    client.updated_at = Utc::now();

    self
      .execute(
        "UPDATE clients SET name = ?2, description = ?3, theme_settings = ?4, updated_at = ?5
         WHERE client_id = ?1",
        vec![
          text(encode_uuid(id)),
          text(client.name.clone()),
          opt_text(client.description.clone()),
          opt_text(encode_theme(client.theme_settings.as_ref())?),
          text(encode_dt(client.updated_at)),
        ],
      )
      .await?;

    Ok(Some(client))
  }

  async fn delete_client(&self, id: Uuid) -> Result<bool> {
    let n = self
      .execute("DELETE FROM clients WHERE client_id = ?1", vec![text(encode_uuid(id))])
      .await?;
    Ok(n > 0)
  }

  // ── Identities ────────────────────────────────────────────────────────────

  async fn create_identity(&self, input: NewIdentity) -> Result<Identity> {
    if !self
      .exists("SELECT 1 FROM clients WHERE client_id = ?1", input.client_id)
      .await?
    {
      return Err(Error::ClientNotFound(input.client_id));
    }

    let now = Utc::now();
    let identity = Identity {
      identity_id:     Uuid::new_v4(),
      client_id:       input.client_id,
      name:            input.name,
      base_embedding:  input.base_embedding,
      reference_image: input.reference_image,
      created_at:      now,
      updated_at:      now,
    };

    self
      .execute(
        "INSERT INTO identities (
           identity_id, client_id, name, base_embedding, reference_image,
           created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        vec![
          text(encode_uuid(identity.identity_id)),
          text(encode_uuid(identity.client_id)),
          text(identity.name.clone()),
          text(encode_path(&identity.base_embedding)),
          opt_text(identity.reference_image.as_deref().map(encode_path)),
          text(encode_dt(now)),
          text(encode_dt(now)),
        ],
      )
      .await?;

    Ok(identity)
  }

  async fn get_identity(&self, id: Uuid) -> Result<Option<Identity>> {
    let sql = format!(
      "SELECT {} FROM identities WHERE identity_id = ?1",
      RawIdentity::COLUMNS
    );
    self
      .fetch_one(sql, vec![text(encode_uuid(id))], RawIdentity::from_row)
      .await?
      .map(RawIdentity::into_identity)
      .transpose()
  }

  async fn list_identities(&self, query: IdentityQuery) -> Result<Vec<Identity>> {
    let mut args = page_args(query.page).to_vec();
    let filter = match query.client_id {
      Some(client_id) => {
        args.push(text(encode_uuid(client_id)));
        "WHERE client_id = ?3"
      }
      None => "",
    };
    let sql = format!(
      "SELECT {} FROM identities {filter} ORDER BY created_at, rowid LIMIT ?1 OFFSET ?2",
      RawIdentity::COLUMNS
    );
    self
      .fetch_all(sql, args, RawIdentity::from_row)
      .await?
      .into_iter()
      .map(RawIdentity::into_identity)
      .collect()
  }

  async fn update_identity(
    &self,
    id: Uuid,
    patch: IdentityPatch,
  ) -> Result<Option<Identity>> {
    if let Some(client_id) = patch.client_id {
      if !self
        .exists("SELECT 1 FROM clients WHERE client_id = ?1", client_id)
        .await?
      {
        return Err(Error::ClientNotFound(client_id));
      }
    }

    let Some(mut identity) = self.get_identity(id).await? else {
      return Ok(None);
    };
    patch.apply(&mut identity);
    identity.updated_at = Utc::now();

    self
      .execute(
        "UPDATE identities
         SET client_id = ?2, name = ?3, reference_image = ?4, updated_at = ?5
         WHERE identity_id = ?1",
        vec![
          text(encode_uuid(id)),
          text(encode_uuid(identity.client_id)),
          text(identity.name.clone()),
          opt_text(identity.reference_image.as_deref().map(encode_path)),
          text(encode_dt(identity.updated_at)),
        ],
      )
      .await?;

    Ok(Some(identity))
  }

  async fn delete_identity(&self, id: Uuid) -> Result<bool> {
    let n = self
      .execute(
        "DELETE FROM identities WHERE identity_id = ?1",
        vec![text(encode_uuid(id))],
      )
      .await?;
    Ok(n > 0)
  }

  // ── Style layers ──────────────────────────────────────────────────────────

  async fn create_layer(&self, input: NewLayer) -> Result<StyleLayer> {
    input.validate()?;

    let now = Utc::now();
    let layer = StyleLayer {
      layer_id:        Uuid::new_v4(),
      name:            input.name,
      kind:            input.kind,
      prompt:          input.prompt,
      negative_prompt: input.negative_prompt,
      strength:        input.strength,
      reference_image: input.reference_image,
      created_at:      now,
      updated_at:      now,
    };

    self
      .execute(
        "INSERT INTO layers (
           layer_id, name, kind, prompt, negative_prompt, strength,
           reference_image, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        vec![
          text(encode_uuid(layer.layer_id)),
          text(layer.name.clone()),
          text(layer.kind.as_ref()),
          text(layer.prompt.clone()),
          opt_text(layer.negative_prompt.clone()),
          Value::Real(f64::from(layer.strength)),
          opt_text(layer.reference_image.as_deref().map(encode_path)),
          text(encode_dt(now)),
          text(encode_dt(now)),
        ],
      )
      .await?;

    Ok(layer)
  }

  async fn get_layer(&self, id: Uuid) -> Result<Option<StyleLayer>> {
    let sql = format!("SELECT {} FROM layers WHERE layer_id = ?1", RawLayer::COLUMNS);
    self
      .fetch_one(sql, vec![text(encode_uuid(id))], RawLayer::from_row)
      .await?
      .map(RawLayer::into_layer)
      .transpose()
  }

  async fn list_layers(&self, query: LayerQuery) -> Result<Vec<StyleLayer>> {
    let mut args = page_args(query.page).to_vec();
    let filter = match query.kind {
      Some(kind) => {
        args.push(text(kind.as_ref()));
        "WHERE kind = ?3"
      }
      None => "",
    };
    let sql = format!(
      "SELECT {} FROM layers {filter} ORDER BY created_at, rowid LIMIT ?1 OFFSET ?2",
      RawLayer::COLUMNS
    );
    self
      .fetch_all(sql, args, RawLayer::from_row)
      .await?
      .into_iter()
      .map(RawLayer::into_layer)
      .collect()
  }

  async fn update_layer(&self, id: Uuid, patch: LayerPatch) -> Result<Option<StyleLayer>> {
    patch.validate()?;

    let Some(mut layer) = self.get_layer(id).await? else {
      return Ok(None);
    };
    patch.apply(&mut layer);
    layer.updated_at = Utc::now();

    self
      .execute(
        "UPDATE layers
         SET name = ?2, kind = ?3, prompt = ?4, negative_prompt = ?5, strength = ?6,
             reference_image = ?7, updated_at = ?8
         WHERE layer_id = ?1",
        vec![
          text(encode_uuid(id)),
          text(layer.name.clone()),
          text(layer.kind.as_ref()),
          text(layer.prompt.clone()),
          opt_text(layer.negative_prompt.clone()),
          Value::Real(f64::from(layer.strength)),
          opt_text(layer.reference_image.as_deref().map(encode_path)),
          text(encode_dt(layer.updated_at)),
        ],
      )
      .await?;

    Ok(Some(layer))
  }

  async fn delete_layer(&self, id: Uuid) -> Result<bool> {
    let n = self
      .execute("DELETE FROM layers WHERE layer_id = ?1", vec![text(encode_uuid(id))])
      .await?;
    Ok(n > 0)
  }

  // ── Provenance ────────────────────────────────────────────────────────────

  async fn record_history(&self, input: NewHistory) -> Result<History> {
    if !self
      .exists("SELECT 1 FROM identities WHERE identity_id = ?1", input.identity_id)
      .await?
    {
      return Err(Error::IdentityNotFound(input.identity_id));
    }

    let history = History {
      history_id:      Uuid::new_v4(),
      identity_id:     input.identity_id,
      image_path:      input.image_path,
      prompt:          input.prompt,
      negative_prompt: input.negative_prompt,
      settings:        input.settings,
      created_at:      Utc::now(),
    };

    self
      .execute(
        "INSERT INTO histories (
           history_id, identity_id, image_path, prompt, negative_prompt,
           settings, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        vec![
          text(encode_uuid(history.history_id)),
          text(encode_uuid(history.identity_id)),
          text(encode_path(&history.image_path)),
          text(history.prompt.clone()),
          text(history.negative_prompt.clone()),
          text(encode_settings(&history.settings)?),
          text(encode_dt(history.created_at)),
        ],
      )
      .await?;

    Ok(history)
  }

  async fn get_history(&self, id: Uuid) -> Result<Option<History>> {
    let sql = format!(
      "SELECT {} FROM histories WHERE history_id = ?1",
      RawHistory::COLUMNS
    );
    self
      .fetch_one(sql, vec![text(encode_uuid(id))], RawHistory::from_row)
      .await?
      .map(RawHistory::into_history)
      .transpose()
  }

  async fn list_histories(&self, query: HistoryQuery) -> Result<Vec<History>> {
    let mut args = page_args(query.page).to_vec();
    let filter = match query.identity_id {
      Some(identity_id) => {
        args.push(text(encode_uuid(identity_id)));
        "WHERE identity_id = ?3"
      }
      None => "",
    };
    let sql = format!(
      "SELECT {} FROM histories {filter}
       ORDER BY created_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
      RawHistory::COLUMNS
    );
    self
      .fetch_all(sql, args, RawHistory::from_row)
      .await?
      .into_iter()
      .map(RawHistory::into_history)
      .collect()
  }

  // ── Lookbooks ─────────────────────────────────────────────────────────────

  async fn create_lookbook(&self, input: NewLookbook) -> Result<Lookbook> {
    if !self
      .exists("SELECT 1 FROM clients WHERE client_id = ?1", input.client_id)
      .await?
    {
      return Err(Error::ClientNotFound(input.client_id));
    }

    let now = Utc::now();
    let lookbook = Lookbook {
      lookbook_id: Uuid::new_v4(),
      client_id:   input.client_id,
      name:        input.name,
      description: input.description,
      created_at:  now,
      updated_at:  now,
    };

    self
      .execute(
        "INSERT INTO lookbooks (lookbook_id, client_id, name, description, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        vec![
          text(encode_uuid(lookbook.lookbook_id)),
          text(encode_uuid(lookbook.client_id)),
          text(lookbook.name.clone()),
          opt_text(lookbook.description.clone()),
          text(encode_dt(now)),
          text(encode_dt(now)),
        ],
      )
      .await?;

    Ok(lookbook)
  }

  async fn get_lookbook(&self, id: Uuid) -> Result<Option<Lookbook>> {
    let sql = format!(
      "SELECT {} FROM lookbooks WHERE lookbook_id = ?1",
      RawLookbook::COLUMNS
    );
    self
      .fetch_one(sql, vec![text(encode_uuid(id))], RawLookbook::from_row)
      .await?
      .map(RawLookbook::into_lookbook)
      .transpose()
  }

  async fn list_lookbooks(&self, query: LookbookQuery) -> Result<Vec<Lookbook>> {
    let mut args = page_args(query.page).to_vec();
    let filter = match query.client_id {
      Some(client_id) => {
        args.push(text(encode_uuid(client_id)));
        "WHERE client_id = ?3"
      }
      None => "",
    };
    let sql = format!(
      "SELECT {} FROM lookbooks {filter} ORDER BY created_at, rowid LIMIT ?1 OFFSET ?2",
      RawLookbook::COLUMNS
    );
    self
      .fetch_all(sql, args, RawLookbook::from_row)
      .await?
      .into_iter()
      .map(RawLookbook::into_lookbook)
      .collect()
  }

  async fn add_entry(&self, input: NewLookbookEntry) -> Result<LookbookEntry> {
    if !self
      .exists("SELECT 1 FROM lookbooks WHERE lookbook_id = ?1", input.lookbook_id)
      .await?
    {
      return Err(Error::LookbookNotFound(input.lookbook_id));
    }
    if !self
      .exists("SELECT 1 FROM histories WHERE history_id = ?1", input.history_id)
      .await?
    {
      return Err(Error::HistoryNotFound(input.history_id));
    }

    let now = Utc::now();
    let entry = LookbookEntry {
      entry_id:    Uuid::new_v4(),
      lookbook_id: input.lookbook_id,
      history_id:  input.history_id,
      position:    input.position,
      notes:       input.notes,
      created_at:  now,
      updated_at:  now,
    };

    self
      .execute(
        "INSERT INTO lookbook_entries (
           entry_id, lookbook_id, history_id, position, notes, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        vec![
          text(encode_uuid(entry.entry_id)),
          text(encode_uuid(entry.lookbook_id)),
          text(encode_uuid(entry.history_id)),
          Value::Integer(entry.position),
          opt_text(entry.notes.clone()),
          text(encode_dt(now)),
          text(encode_dt(now)),
        ],
      )
      .await?;

    Ok(entry)
  }

  async fn list_entries(&self, lookbook_id: Uuid, page: Page) -> Result<Vec<LookbookEntry>> {
    let mut args = page_args(page).to_vec();
    args.push(text(encode_uuid(lookbook_id)));
    let sql = format!(
      "SELECT {} FROM lookbook_entries WHERE lookbook_id = ?3
       ORDER BY position, created_at, rowid LIMIT ?1 OFFSET ?2",
      RawEntry::COLUMNS
    );
    self
      .fetch_all(sql, args, RawEntry::from_row)
      .await?
      .into_iter()
      .map(RawEntry::into_entry)
      .collect()
  }

  // ── Users and sessions ────────────────────────────────────────────────────

  async fn create_user(&self, input: NewUser) -> Result<User> {
    let now = Utc::now();
    let user = User {
      user_id:       Uuid::new_v4(),
      username:      input.username,
      email:         input.email,
      password_hash: input.password_hash,
      role:          input.role,
      active:        true,
      created_at:    now,
      updated_at:    now,
    };

    let args = vec![
      text(encode_uuid(user.user_id)),
      text(user.username.clone()),
      text(user.email.clone()),
      text(user.password_hash.clone()),
      text(user.role.as_ref()),
      text(encode_dt(now)),
    ];

    // The UNIQUE constraints decide; `INSERT OR IGNORE` reports a clash as
    // zero affected rows instead of an opaque constraint error.
    let inserted = self
      .execute(
        "INSERT OR IGNORE INTO users (
           user_id, username, email, password_hash, role, active, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
        args,
      )
      .await?;

    if inserted == 0 {
      return Err(Error::Conflict(format!(
        "username {:?} or email {:?} already registered",
        user.username, user.email
      )));
    }
    Ok(user)
  }

  async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE user_id = ?1", RawUser::COLUMNS);
    self
      .fetch_one(sql, vec![text(encode_uuid(id))], RawUser::from_row)
      .await?
      .map(RawUser::into_user)
      .transpose()
  }

  async fn find_user(&self, username: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE username = ?1", RawUser::COLUMNS);
    self
      .fetch_one(sql, vec![text(username)], RawUser::from_row)
      .await?
      .map(RawUser::into_user)
      .transpose()
  }

  /// Expired sessions are purged in the same transaction.
  async fn create_session(&self, session: Session) -> Result<()> {
    let now = encode_dt(Utc::now());
    let args = [
      text(session.token_digest),
      text(encode_uuid(session.user_id)),
      text(encode_dt(session.issued_at)),
      text(encode_dt(session.expires_at)),
    ];
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM sessions WHERE expires_at < ?1", [now])?;
        tx.execute(
          "INSERT INTO sessions (token_digest, user_id, issued_at, expires_at)
           VALUES (?1, ?2, ?3, ?4)",
          params_from_iter(args),
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn find_session(&self, token_digest: &str) -> Result<Option<Session>> {
    let sql = format!(
      "SELECT {} FROM sessions WHERE token_digest = ?1",
      RawSession::COLUMNS
    );
    self
      .fetch_one(sql, vec![text(token_digest)], RawSession::from_row)
      .await?
      .map(RawSession::into_session)
      .transpose()
  }
}
