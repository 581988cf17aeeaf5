//! The `StudioStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `atelier-store-sqlite`).
//! The engine and HTTP layers depend on this abstraction, not on any concrete
//! backend.

use std::future::Future;

use serde::Deserialize;
use uuid::Uuid;

use crate::{
  client::{Client, ClientPatch, NewClient},
  history::{History, NewHistory},
  identity::{Identity, IdentityPatch, NewIdentity},
  layer::{LayerKind, LayerPatch, NewLayer, StyleLayer},
  lookbook::{Lookbook, LookbookEntry, NewLookbook, NewLookbookEntry},
  user::{NewUser, Session, User},
};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// How a store failure should be surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
  /// A referenced record does not exist.
  NotFound,
  /// A uniqueness or integrity constraint was violated.
  Conflict,
  Internal,
}

/// Implemented by every store error type so upper layers can classify
/// failures without knowing the backend.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  fn failure(&self) -> Failure;
}

impl StoreError for std::convert::Infallible {
  fn failure(&self) -> Failure { match *self {} }
}

// ─── Query types ─────────────────────────────────────────────────────────────

pub const DEFAULT_LIMIT: usize = 100;

/// Offset pagination; mirrors the `skip`/`limit` query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
  #[serde(default, alias = "skip")]
  pub offset: usize,
  #[serde(default = "default_limit")]
  pub limit:  usize,
}

fn default_limit() -> usize { DEFAULT_LIMIT }

impl Default for Page {
  fn default() -> Self { Self { offset: 0, limit: DEFAULT_LIMIT } }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityQuery {
  pub client_id: Option<Uuid>,
  pub page:      Page,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LayerQuery {
  pub kind: Option<LayerKind>,
  pub page: Page,
}

/// Results are always newest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryQuery {
  pub identity_id: Option<Uuid>,
  pub page:        Page,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LookbookQuery {
  pub client_id: Option<Uuid>,
  pub page:      Page,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over an Atelier record store backend.
///
/// `get_*` methods return `None` for missing records; `update_*` return
/// `None` when there was nothing to update; `delete_*` report whether a
/// record was removed. Creates that reference a missing parent fail with an
/// error classified as [`Failure::NotFound`].
///
/// Deleting a client removes its identities and lookbooks; deleting an
/// identity removes its history; deleting a history record removes the
/// lookbook entries that point at it.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait StudioStore: Send + Sync {
  type Error: StoreError;

  // ── Clients ───────────────────────────────────────────────────────────

  fn create_client(
    &self,
    input: NewClient,
  ) -> impl Future<Output = Result<Client, Self::Error>> + Send + '_;

  fn get_client(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Client>, Self::Error>> + Send + '_;

  fn list_clients(
    &self,
    page: Page,
  ) -> impl Future<Output = Result<Vec<Client>, Self::Error>> + Send + '_;

  fn update_client(
    &self,
    id: Uuid,
    patch: ClientPatch,
  ) -> impl Future<Output = Result<Option<Client>, Self::Error>> + Send + '_;

  fn delete_client(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Identities ────────────────────────────────────────────────────────

  fn create_identity(
    &self,
    input: NewIdentity,
  ) -> impl Future<Output = Result<Identity, Self::Error>> + Send + '_;

  fn get_identity(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Identity>, Self::Error>> + Send + '_;

  fn list_identities(
    &self,
    query: IdentityQuery,
  ) -> impl Future<Output = Result<Vec<Identity>, Self::Error>> + Send + '_;

  fn update_identity(
    &self,
    id: Uuid,
    patch: IdentityPatch,
  ) -> impl Future<Output = Result<Option<Identity>, Self::Error>> + Send + '_;

  fn delete_identity(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Style layers ──────────────────────────────────────────────────────

  fn create_layer(
    &self,
    input: NewLayer,
  ) -> impl Future<Output = Result<StyleLayer, Self::Error>> + Send + '_;

  fn get_layer(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<StyleLayer>, Self::Error>> + Send + '_;

  fn list_layers(
    &self,
    query: LayerQuery,
  ) -> impl Future<Output = Result<Vec<StyleLayer>, Self::Error>> + Send + '_;

  fn update_layer(
    &self,
    id: Uuid,
    patch: LayerPatch,
  ) -> impl Future<Output = Result<Option<StyleLayer>, Self::Error>> + Send + '_;

  fn delete_layer(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Provenance ────────────────────────────────────────────────────────

  /// Durably record one generation. The `created_at` timestamp is set by
  /// the store. Records are never updated afterwards.
  fn record_history(
    &self,
    input: NewHistory,
  ) -> impl Future<Output = Result<History, Self::Error>> + Send + '_;

  fn get_history(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<History>, Self::Error>> + Send + '_;

  fn list_histories(
    &self,
    query: HistoryQuery,
  ) -> impl Future<Output = Result<Vec<History>, Self::Error>> + Send + '_;

  // ── Lookbooks ─────────────────────────────────────────────────────────

  fn create_lookbook(
    &self,
    input: NewLookbook,
  ) -> impl Future<Output = Result<Lookbook, Self::Error>> + Send + '_;

  fn get_lookbook(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Lookbook>, Self::Error>> + Send + '_;

  fn list_lookbooks(
    &self,
    query: LookbookQuery,
  ) -> impl Future<Output = Result<Vec<Lookbook>, Self::Error>> + Send + '_;

  /// Both the lookbook and the history record must exist.
  fn add_entry(
    &self,
    input: NewLookbookEntry,
  ) -> impl Future<Output = Result<LookbookEntry, Self::Error>> + Send + '_;

  /// Entries of one lookbook in ascending `position` order.
  fn list_entries(
    &self,
    lookbook_id: Uuid,
    page: Page,
  ) -> impl Future<Output = Result<Vec<LookbookEntry>, Self::Error>> + Send + '_;

  // ── Users and sessions ────────────────────────────────────────────────

  /// Fails with [`Failure::Conflict`] if the username or email is taken.
  fn create_user(
    &self,
    input: NewUser,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  fn get_user(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + '_;

  fn find_user<'a>(
    &'a self,
    username: &'a str,
  ) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send + 'a;

  fn create_session(
    &self,
    session: Session,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn find_session<'a>(
    &'a self,
    token_digest: &'a str,
  ) -> impl Future<Output = Result<Option<Session>, Self::Error>> + Send + 'a;
}
