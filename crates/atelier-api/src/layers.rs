//! Handlers for `/layers` endpoints.
//!
//! | Method   | Path          | Notes |
//! |----------|---------------|-------|
//! | `GET`    | `/layers`     | `?type=hair\|outfit\|scene&skip=&limit=` |
//! | `POST`   | `/layers`     | Multipart: `name`, `type`, `prompt`, `negative_prompt?`, `strength?`, `reference_image?` (file) |
//! | `GET`    | `/layers/:id` | 404 if not found |
//! | `PUT`    | `/layers/:id` | JSON partial update |
//! | `DELETE` | `/layers/:id` | |

use atelier_core::{
  layer::{DEFAULT_STRENGTH, LayerKind, LayerPatch, NewLayer, StyleLayer},
  store::{LayerQuery, StudioStore},
};
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

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  #[serde(rename = "type")]
  pub kind:  Option<String>,
  pub skip:  Option<usize>,
  pub limit: Option<usize>,
}

/// `GET /layers[?type=<kind>&skip=&limit=]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<StyleLayer>>, ApiError>
where
  S: StudioStore + 'static,
{
  let kind = params.kind.as_deref().map(LayerKind::parse).transpose()?;
  let layers = state
    .store
    .list_layers(LayerQuery { kind, page: page(params.skip, params.limit) })
    .await
    .map_err(ApiError::store)?;
  Ok(Json(layers))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /layers` (multipart)
pub async fn create<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  multipart: Multipart,
) -> Result<impl IntoResponse, ApiError>
where
  S: StudioStore + 'static,
{
  let form = Form::read(multipart).await?;
  let mut layer = NewLayer {
    name:            form.require("name")?.to_owned(),
    kind:            LayerKind::parse(form.require("type")?)?,
    prompt:          form.text("prompt").unwrap_or_default().to_owned(),
    negative_prompt: form.text("negative_prompt").map(ToOwned::to_owned),
    strength:        form.parse::<f32>("strength")?.unwrap_or(DEFAULT_STRENGTH),
    reference_image: None,
  };
  layer.validate()?;

  if let Some(upload) = form.file("reference_image") {
    let path = state
      .artifacts
      .store_upload(&upload.bytes, &upload.file_name)
      .await?;
    layer.reference_image = Some(path);
  }

  let layer = state.store.create_layer(layer).await.map_err(ApiError::store)?;
  info!(layer = %layer.layer_id, kind = %layer.kind, "style layer created");
  Ok((StatusCode::CREATED, Json(layer)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /layers/:id`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
) -> Result<Json<StyleLayer>, ApiError>
where
  S: StudioStore + 'static,
{
  let layer = state
    .store
    .get_layer(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("layer {id} not found")))?;
  Ok(Json(layer))
}

// ─── Update ───────────────────────────────────────────────────────────────────

/// `PUT /layers/:id`
pub async fn update<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
  Json(patch): Json<LayerPatch>,
) -> Result<Json<StyleLayer>, ApiError>
where
  S: StudioStore + 'static,
{
  patch.validate()?;
  let layer = state
    .store
    .update_layer(id, patch)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("layer {id} not found")))?;
  Ok(Json(layer))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /layers/:id`
pub async fn delete<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: StudioStore + 'static,
{
  if !state.store.delete_layer(id).await.map_err(ApiError::store)? {
    return Err(ApiError::NotFound(format!("layer {id} not found")));
  }
  Ok(StatusCode::NO_CONTENT)
}
