//! JSON REST API for Atelier.
//!
//! Exposes an axum [`Router`] backed by any [`StudioStore`] and an
//! [`Orchestrator`] over the same store. Every route except `/health` and
//! `/token` requires a bearer token (see [`auth`]). TLS and transport
//! concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = atelier_api::api_router(state).layer(TraceLayer::new_for_http());
//! ```

pub mod auth;
pub mod clients;
pub mod error;
pub mod generation;
pub mod histories;
pub mod identities;
pub mod layers;
pub mod lookbooks;
pub mod upload;
pub mod users;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use atelier_core::store::{DEFAULT_LIMIT, Page, StudioStore};
use atelier_engine::{Orchestrator, artifacts::ArtifactStore, embedding::PlaceholderEmbedder};
use axum::{
  Json, Router,
  extract::DefaultBodyLimit,
  routing::{get, post},
};
use chrono::Utc;
use serde_json::{Value, json};

pub use auth::{AuthConfig, CurrentUser};
pub use error::ApiError;

/// Reference images and inpainting sources can be large.
pub const UPLOAD_LIMIT: usize = 32 * 1024 * 1024;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all handlers.
pub struct AppState<S> {
  pub store:        Arc<S>,
  pub orchestrator: Orchestrator<S>,
  pub artifacts:    ArtifactStore,
  pub embedder:     Arc<PlaceholderEmbedder>,
  pub auth:         Arc<AuthConfig>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store:        self.store.clone(),
      orchestrator: self.orchestrator.clone(),
      artifacts:    self.artifacts.clone(),
      embedder:     self.embedder.clone(),
      auth:         self.auth.clone(),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: AppState<S>) -> Router<()>
where
  S: StudioStore + 'static,
{
  Router::new()
    .route("/health", get(health))
    // Accounts
    .route("/token", post(auth::login::<S>))
    .route("/users", post(users::create::<S>))
    .route("/users/me", get(users::me))
    // Clients
    .route("/clients", get(clients::list::<S>).post(clients::create::<S>))
    .route(
      "/clients/{id}",
      get(clients::get_one::<S>)
        .put(clients::update::<S>)
        .delete(clients::delete::<S>),
    )
    // Identities
    .route("/models", get(identities::list::<S>).post(identities::create::<S>))
    .route(
      "/models/{id}",
      get(identities::get_one::<S>)
        .put(identities::update::<S>)
        .delete(identities::delete::<S>),
    )
    // Style layers
    .route("/layers", get(layers::list::<S>).post(layers::create::<S>))
    .route(
      "/layers/{id}",
      get(layers::get_one::<S>)
        .put(layers::update::<S>)
        .delete(layers::delete::<S>),
    )
    // Generation
    .route("/generate", post(generation::generate::<S>))
    .route("/styling", post(generation::styling::<S>))
    .route("/inpaint", post(generation::inpaint::<S>))
    .route("/pipelines", get(generation::status::<S>))
    .route("/pipelines/unload", post(generation::unload::<S>))
    // Provenance
    .route("/histories", get(histories::list::<S>))
    .route("/histories/{id}", get(histories::get_one::<S>))
    // Lookbooks
    .route("/lookbooks", get(lookbooks::list::<S>).post(lookbooks::create::<S>))
    .route("/lookbooks/{id}", get(lookbooks::get_one::<S>))
    .route(
      "/lookbooks/{id}/entries",
      get(lookbooks::list_entries::<S>).post(lookbooks::add_entry::<S>),
    )
    .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
    .with_state(state)
}

/// `GET /health`
async fn health() -> Json<Value> {
  Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

/// `skip`/`limit` query parameters with the store's defaults.
pub(crate) fn page(skip: Option<usize>, limit: Option<usize>) -> Page {
  Page {
    offset: skip.unwrap_or(0),
    limit:  limit.unwrap_or(DEFAULT_LIMIT),
  }
}
