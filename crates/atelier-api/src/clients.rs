//! Handlers for `/clients` endpoints.
//!
//! | Method   | Path            | Notes |
//! |----------|-----------------|-------|
//! | `GET`    | `/clients`      | `?skip=&limit=` |
//! | `POST`   | `/clients`      | Body: `{"name":"..","description":..,"theme_settings":{..}}` |
//! | `GET`    | `/clients/:id`  | 404 if not found |
//! | `PUT`    | `/clients/:id`  | Partial update |
//! | `DELETE` | `/clients/:id`  | Cascades to identities and lookbooks |

use atelier_core::{
  client::{Client, ClientPatch, NewClient},
  store::StudioStore,
};
use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::{AppState, CurrentUser, error::ApiError, page};

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub skip:  Option<usize>,
  pub limit: Option<usize>,
}

/// `GET /clients[?skip=&limit=]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Client>>, ApiError>
where
  S: StudioStore + 'static,
{
  let clients = state
    .store
    .list_clients(page(params.skip, params.limit))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(clients))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /clients`
pub async fn create<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Json(body): Json<NewClient>,
) -> Result<impl IntoResponse, ApiError>
where
  S: StudioStore + 'static,
{
  if body.name.trim().is_empty() {
    return Err(ApiError::BadRequest("client name must not be empty".into()));
  }
  let client = state.store.create_client(body).await.map_err(ApiError::store)?;
  info!(client = %client.client_id, "client created");
  Ok((StatusCode::CREATED, Json(client)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /clients/:id`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
) -> Result<Json<Client>, ApiError>
where
  S: StudioStore + 'static,
{
  let client = state
    .store
    .get_client(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("client {id} not found")))?;
  Ok(Json(client))
}

// ─── Update ───────────────────────────────────────────────────────────────────

/// `PUT /clients/:id`
pub async fn update<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
  Json(patch): Json<ClientPatch>,
) -> Result<Json<Client>, ApiError>
where
  S: StudioStore + 'static,
{
  let client = state
    .store
    .update_client(id, patch)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("client {id} not found")))?;
  Ok(Json(client))
}

// ─── Delete ───────────────────────────────────────────────────────────────────

/// `DELETE /clients/:id`
pub async fn delete<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError>
where
  S: StudioStore + 'static,
{
  if !state.store.delete_client(id).await.map_err(ApiError::store)? {
    return Err(ApiError::NotFound(format!("client {id} not found")));
  }
  info!(client = %id, "client deleted");
  Ok(StatusCode::NO_CONTENT)
}
