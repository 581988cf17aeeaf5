//! Handlers for image generation and pipeline management.
//!
//! | Method | Path                | Notes |
//! |--------|---------------------|-------|
//! | `POST` | `/generate`         | Body: [`GenerationRequest`]; records history |
//! | `POST` | `/styling`          | Body: [`StylingRequest`]; inline layers, no history |
//! | `POST` | `/inpaint`          | Multipart: `model_id`, `prompt`, `negative_prompt?`, `settings?`, `image`, `mask` |
//! | `GET`  | `/pipelines`        | Adapter status |
//! | `POST` | `/pipelines/unload` | Admin only |

use std::path::PathBuf;

use atelier_core::{settings::GenerationSettings, store::StudioStore};
use atelier_engine::{
  GenerationRequest, InpaintRequest, StylingRequest, adapter::AdapterStatus,
};
use axum::{
  Json,
  extract::{Multipart, State},
};
use image::DynamicImage;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{
  AppState, CurrentUser,
  error::ApiError,
  upload::{Form, Upload},
};

#[derive(Debug, Serialize)]
pub struct GenerationResponse {
  pub image_path: PathBuf,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub history_id: Option<Uuid>,
}

// ─── Generate ─────────────────────────────────────────────────────────────────

/// `POST /generate`
pub async fn generate<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Json(request): Json<GenerationRequest>,
) -> Result<Json<GenerationResponse>, ApiError>
where
  S: StudioStore + 'static,
{
  let recorded = state.orchestrator.generate(request).await?;
  Ok(Json(GenerationResponse {
    image_path: recorded.generation.image_path,
    history_id: Some(recorded.history.history_id),
  }))
}

// ─── Styling ──────────────────────────────────────────────────────────────────

/// `POST /styling`
pub async fn styling<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Json(request): Json<StylingRequest>,
) -> Result<Json<GenerationResponse>, ApiError>
where
  S: StudioStore + 'static,
{
  let generation = state.orchestrator.apply_styling_layers(request).await?;
  Ok(Json(GenerationResponse { image_path: generation.image_path, history_id: None }))
}

// ─── Inpaint ──────────────────────────────────────────────────────────────────

/// `POST /inpaint` (multipart)
///
/// `settings`, when present, is a JSON object encoded as a string field.
pub async fn inpaint<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  multipart: Multipart,
) -> Result<Json<GenerationResponse>, ApiError>
where
  S: StudioStore + 'static,
{
  let form = Form::read(multipart).await?;
  let identity_id = form.uuid("model_id")?;
  let prompt = form.require("prompt")?.to_owned();
  let negative_prompt = form.text("negative_prompt").unwrap_or_default().to_owned();
  let settings = match form.text("settings") {
    Some(raw) => serde_json::from_str::<GenerationSettings>(raw)
      .map_err(|e| ApiError::BadRequest(format!("settings must be a JSON object: {e}")))?,
    None => GenerationSettings::new(),
  };

  let image = decode(form.require_file("image")?, "image")?;
  let mask = decode(form.require_file("mask")?, "mask")?;

  let recorded = state
    .orchestrator
    .inpaint(InpaintRequest {
      identity_id,
      prompt,
      negative_prompt,
      image,
      mask,
      settings,
      output_path: None,
    })
    .await?;

  // Only a successful inpaint keeps its sources next to the other uploads.
  for field in ["image", "mask"] {
    let upload = form.require_file(field)?;
    state.artifacts.store_upload(&upload.bytes, &upload.file_name).await?;
  }

  Ok(Json(GenerationResponse {
    image_path: recorded.generation.image_path,
    history_id: Some(recorded.history.history_id),
  }))
}

fn decode(upload: &Upload, field: &str) -> Result<DynamicImage, ApiError> {
  image::load_from_memory(&upload.bytes)
    .map_err(|e| ApiError::BadRequest(format!("{field} is not a readable image: {e}")))
}

// ─── Pipelines ────────────────────────────────────────────────────────────────

/// `GET /pipelines`
pub async fn status<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
) -> Json<AdapterStatus>
where
  S: StudioStore + 'static,
{
  Json(state.orchestrator.adapter().status())
}

/// `POST /pipelines/unload`
pub async fn unload<S>(
  State(state): State<AppState<S>>,
  user: CurrentUser,
) -> Result<Json<AdapterStatus>, ApiError>
where
  S: StudioStore + 'static,
{
  user.require_admin()?;
  let adapter = state.orchestrator.adapter();
  adapter.unload().await;
  info!(user = %user.0.username, "pipelines unloaded on request");
  Ok(Json(adapter.status()))
}
