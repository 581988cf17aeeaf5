//! Handlers for `/models` endpoints (identities).
//!
//! | Method   | Path          | Notes |
//! |----------|---------------|-------|
//! | `GET`    | `/models`     | `?client_id=&skip=&limit=` |
//! | `POST`   | `/models`     | Multipart: `name`, `client_id`, one or more `files` |
//! | `GET`    | `/models/:id` | 404 if not found |
//! | `PUT`    | `/models/:id` | JSON partial update |
//! | `DELETE` | `/models/:id` | Cascades to history |
//!
//! Creating an identity stores the uploaded reference images, hands them to
//! the embedding creator and records the resulting embedding path. The first
//! image becomes the primary reference.

use atelier_core::{
  identity::{Identity, IdentityPatch, NewIdentity},
  store::{IdentityQuery, StudioStore},
};
use atelier_engine::embedding::{EmbeddingCreator, TrainingSettings};
use axum::{
  Json,
  extract::{Multipart, Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{AppState, CurrentUser, error::ApiError, page, upload::Form};

const FILE_FIELDS: &[&str] = &["files", "file", "images"];

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub client_id: Option<Uuid>,
  pub skip:      Option<usize>,
  pub limit:     Option<usize>,
}

/// `GET /models[?client_id=&skip=&limit=]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Identity>>, ApiError>
where
  S: StudioStore + 'static,
{
  let identities = state
    .store
    .list_identities(IdentityQuery {
      client_id: params.client_id,
      page:      page(params.skip, params.limit),
    })
    .await
    .map_err(ApiError::store)?;
  Ok(Json(identities))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /models` (multipart)
pub async fn create<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  multipart: Multipart,
) -> Result<impl IntoResponse, ApiError>
where
  S: StudioStore + 'static,
{
  let form = Form::read(multipart).await?;
  let name = form.require("name")?.to_owned();
  let client_id = form.uuid("client_id")?;

  let mut training = TrainingSettings::default();
  if let Some(steps) = form.parse::<u32>("num_training_steps")? {
    training.num_training_steps = steps;
  }
  if let Some(rate) = form.parse::<f64>("learning_rate")? {
    training.learning_rate = rate;
  }

  let uploads: Vec<_> = form.files(FILE_FIELDS).collect();
  if uploads.is_empty() {
    return Err(ApiError::BadRequest("at least one reference image is required".into()));
  }

  // Nothing is written to disk for a client that does not exist.
  state
    .store
    .get_client(client_id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("client {client_id} not found")))?;

  let mut references = Vec::with_capacity(uploads.len());
  for upload in uploads {
    let path = state
      .artifacts
      .store_upload(&upload.bytes, &upload.file_name)
      .await?;
    references.push(path);
  }
  let reference_image = references.first().cloned();

  let base_embedding = state.embedder.create_embedding(references, training).await?;

  let identity = state
    .store
    .create_identity(NewIdentity { client_id, name, base_embedding, reference_image })
    .await
    .map_err(ApiError::store)?;
  info!(identity = %identity.identity_id, client = %client_id, "identity created");
  Ok((StatusCode::CREATED, Json(identity)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /models/:id`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
) -> Result<Json<Identity>, ApiError>
where
  S: StudioStore + 'static,
{
  let identity = state
    .store
    .get_identity(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("model {id} not found")))?;
  Ok(Json(identity))
}

// ─── Update ───────────────────────────────────────────────────────────────────

/// `PUT /models/:id`
pub async fn update<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
  Json(patch): Json<IdentityPatch>,
) -> Result<Json<Identity>, ApiError>
where
  S: StudioStore + 'static,
{
  let identity = state
    .store
    .update_identity(id, patch)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("model {id} not found")))?;
  Ok(Json(identity))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /models/:id`
pub async fn delete<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: StudioStore + 'static,
{
  if !state.store.delete_identity(id).await.map_err(ApiError::store)? {
    return Err(ApiError::NotFound(format!("model {id} not found")));
  }
  info!(identity = %id, "identity deleted");
  Ok(StatusCode::NO_CONTENT)
}
