//! Handlers for `/lookbooks` endpoints.
//!
//! | Method | Path                     | Notes |
//! |--------|--------------------------|-------|
//! | `GET`  | `/lookbooks`             | `?client_id=&skip=&limit=` |
//! | `POST` | `/lookbooks`             | Body: `{"client_id":..,"name":..,"description":..}` |
//! | `GET`  | `/lookbooks/:id`         | 404 if not found |
//! | `GET`  | `/lookbooks/:id/entries` | Ordered by `order` |
//! | `POST` | `/lookbooks/:id/entries` | Body: `{"history_id":..,"order":0,"notes":..}` |

use atelier_core::{
  lookbook::{Lookbook, LookbookEntry, NewLookbook, NewLookbookEntry},
  store::{LookbookQuery, StudioStore},
};
use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, CurrentUser, error::ApiError, page};

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub client_id: Option<Uuid>,
  pub skip:      Option<usize>,
  pub limit:     Option<usize>,
}

/// `GET /lookbooks[?client_id=&skip=&limit=]`
pub async fn list<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<Lookbook>>, ApiError>
where
  S: StudioStore + 'static,
{
  let lookbooks = state
    .store
    .list_lookbooks(LookbookQuery {
      client_id: params.client_id,
      page:      page(params.skip, params.limit),
    })
    .await
    .map_err(ApiError::store)?;
  Ok(Json(lookbooks))
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /lookbooks`
pub async fn create<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Json(body): Json<NewLookbook>,
) -> Result<impl IntoResponse, ApiError>
where
  S: StudioStore + 'static,
{
  if body.name.trim().is_empty() {
    return Err(ApiError::BadRequest("lookbook name must not be empty".into()));
  }
  let lookbook = state.store.create_lookbook(body).await.map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(lookbook)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /lookbooks/:id`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
) -> Result<Json<Lookbook>, ApiError>
where
  S: StudioStore + 'static,
{
  let lookbook = state
    .store
    .get_lookbook(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("lookbook {id} not found")))?;
  Ok(Json(lookbook))
}

// ─── Entries ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EntryParams {
  pub skip:  Option<usize>,
  pub limit: Option<usize>,
}

/// `GET /lookbooks/:id/entries`
pub async fn list_entries<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
  Query(params): Query<EntryParams>,
) -> Result<Json<Vec<LookbookEntry>>, ApiError>
where
  S: StudioStore + 'static,
{
  state
    .store
    .get_lookbook(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("lookbook {id} not found")))?;

  let entries = state
    .store
    .list_entries(id, page(params.skip, params.limit))
    .await
    .map_err(ApiError::store)?;
  Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct EntryBody {
  pub history_id: Uuid,
  #[serde(default, alias = "position")]
  pub order:      i64,
  pub notes:      Option<String>,
}

/// `POST /lookbooks/:id/entries`
pub async fn add_entry<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
  Json(body): Json<EntryBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: StudioStore + 'static,
{
  let entry = state
    .store
    .add_entry(NewLookbookEntry {
      lookbook_id: id,
      history_id:  body.history_id,
      position:    body.order,
      notes:       body.notes,
    })
    .await
    .map_err(ApiError::store)?;
  Ok((StatusCode::CREATED, Json(entry)))
}
