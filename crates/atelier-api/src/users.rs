//! Handlers for `/users` endpoints.

use atelier_core::{
  store::StudioStore,
  user::{NewUser, Role, User},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use tracing::info;

use crate::{
  AppState, CurrentUser,
  auth::hash_password,
  error::ApiError,
};

/// `GET /users/me`
pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> { Json(user) }

#[derive(Debug, Deserialize)]
pub struct CreateBody {
  pub username: String,
  pub email:    String,
  pub password: String,
  #[serde(default)]
  pub role:     Role,
}

/// `POST /users`: administrators only.
pub async fn create<S>(
  State(state): State<AppState<S>>,
  admin: CurrentUser,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: StudioStore + 'static,
{
  admin.require_admin()?;
  if body.username.trim().is_empty() || body.password.is_empty() {
    return Err(ApiError::BadRequest("username and password are required".into()));
  }

  let password_hash =
    hash_password(&body.password).map_err(|e| ApiError::Internal(e.to_string().into()))?;
  let user = state
    .store
    .create_user(NewUser {
      username: body.username,
      email: body.email,
      password_hash,
      role: body.role,
    })
    .await
    .map_err(ApiError::store)?;
  info!(user = %user.username, role = %user.role, "user created");
  Ok((StatusCode::CREATED, Json(user)))
}
