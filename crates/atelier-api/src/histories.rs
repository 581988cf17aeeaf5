//! Handlers for `/histories` endpoints. Records are read-only here; they are
//! written by the generation handlers.

use atelier_core::{
  history::History,
  store::{HistoryQuery, StudioStore},
};
use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{AppState, CurrentUser, error::ApiError, page};

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub model_id: Option<Uuid>,
  pub skip:     Option<usize>,
  pub limit:    Option<usize>,
}

/// `GET /histories[?model_id=&skip=&limit=]`, newest first.
pub async fn list<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<History>>, ApiError>
where
  S: StudioStore + 'static,
{
  let histories = state
    .store
    .list_histories(HistoryQuery {
      identity_id: params.model_id,
      page:        page(params.skip, params.limit),
    })
    .await
    .map_err(ApiError::store)?;
  Ok(Json(histories))
}

/// `GET /histories/:id`
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  _user: CurrentUser,
  Path(id): Path<Uuid>,
) -> Result<Json<History>, ApiError>
where
  S: StudioStore + 'static,
{
  let history = state
    .store
    .get_history(id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NotFound(format!("history {id} not found")))?;
  Ok(Json(history))
}
