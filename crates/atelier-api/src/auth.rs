//! Bearer-token authentication.
//!
//! `POST /token` trades a username and password for an opaque random token.
//! Only the SHA-256 digest of a token is stored, next to its expiry; the
//! [`CurrentUser`] extractor hashes the presented token and looks the
//! session up again on every request.

use argon2::{
  Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use atelier_core::{
  store::StudioStore,
  user::{Session, User},
};
use axum::{
  Form, Json,
  extract::{FromRequestParts, State},
  http::{HeaderMap, header, request::Parts},
};
use chrono::{TimeDelta, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{AppState, error::ApiError};

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct AuthConfig {
  /// Lifetime of an issued token.
  pub token_ttl: TimeDelta,
}

impl Default for AuthConfig {
  fn default() -> Self { Self { token_ttl: TimeDelta::minutes(30) } }
}

/// The authenticated, active user behind a request's bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl CurrentUser {
  pub fn require_admin(&self) -> Result<(), ApiError> {
    if self.0.is_admin() {
      Ok(())
    } else {
      Err(ApiError::Forbidden("administrator role required".into()))
    }
  }
}

impl<S> FromRequestParts<AppState<S>> for CurrentUser
where
  S: StudioStore + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S>,
  ) -> Result<Self, Self::Rejection> {
    let token = bearer_token(&parts.headers)?;
    let user = authenticate(state.store.as_ref(), token).await?;
    Ok(CurrentUser(user))
  }
}

/// Pull the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
  let value = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::Unauthorized)?;
  let token = value
    .strip_prefix("Bearer ")
    .or_else(|| value.strip_prefix("bearer "))
    .map(str::trim)
    .ok_or(ApiError::Unauthorized)?;
  if token.is_empty() {
    return Err(ApiError::Unauthorized);
  }
  Ok(token)
}

/// Resolve `token` to an active user with an unexpired session.
pub async fn authenticate<S: StudioStore>(store: &S, token: &str) -> Result<User, ApiError> {
  let digest = token_digest(token);
  let session = store
    .find_session(&digest)
    .await
    .map_err(ApiError::store)?
    .ok_or(ApiError::Unauthorized)?;
  if session.is_expired(Utc::now()) {
    return Err(ApiError::Unauthorized);
  }

  let user = store
    .get_user(session.user_id)
    .await
    .map_err(ApiError::store)?
    .ok_or(ApiError::Unauthorized)?;
  if !user.active {
    return Err(ApiError::Unauthorized);
  }
  Ok(user)
}

pub fn token_digest(token: &str) -> String { hex::encode(Sha256::digest(token.as_bytes())) }

/// Argon2 PHC string for `password` with a fresh salt.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
  let salt = SaltString::generate(&mut OsRng);
  Ok(Argon2::default().hash_password(password.as_bytes(), &salt)?.to_string())
}

/// `false` for a wrong password and for an unparseable hash alike.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
  let Ok(parsed) = PasswordHash::new(password_hash) else {
    return false;
  };
  Argon2::default()
    .verify_password(password.as_bytes(), &parsed)
    .is_ok()
}

/// Create a session for `user` and return the clear-text token.
pub async fn issue_token<S: StudioStore>(
  store: &S,
  user: &User,
  ttl: TimeDelta,
) -> Result<String, ApiError> {
  let mut bytes = [0u8; TOKEN_BYTES];
  OsRng.fill_bytes(&mut bytes);
  let token = hex::encode(bytes);

  let issued_at = Utc::now();
  store
    .create_session(Session {
      token_digest: token_digest(&token),
      user_id: user.user_id,
      issued_at,
      expires_at: issued_at + ttl,
    })
    .await
    .map_err(ApiError::store)?;
  Ok(token)
}

// ─── Login ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginForm {
  pub username: String,
  pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
  pub access_token: String,
  pub token_type:   &'static str,
}

/// `POST /token`: form body `username=..&password=..`
pub async fn login<S>(
  State(state): State<AppState<S>>,
  Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, ApiError>
where
  S: StudioStore + 'static,
{
  let user = state
    .store
    .find_user(&form.username)
    .await
    .map_err(ApiError::store)?
    .filter(|user| verify_password(&form.password, &user.password_hash))
    .ok_or(ApiError::Unauthorized)?;
  if !user.active {
    return Err(ApiError::Unauthorized);
  }

  let access_token = issue_token(state.store.as_ref(), &user, state.auth.token_ttl).await?;
  info!(user = %user.username, "issued access token");
  Ok(Json(TokenResponse { access_token, token_type: "bearer" }))
}
