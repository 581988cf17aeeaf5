//! API error type and [`axum::response::IntoResponse`] implementation.

use atelier_core::store::{Failure, StoreError};
use axum::{
  Json,
  extract::multipart::MultipartError,
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("unauthorized")]
  Unauthorized,

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("conflict: {0}")]
  Conflict(String),

  /// The generation backend could not be brought up.
  #[error("unavailable: {0}")]
  Unavailable(String),

  #[error("internal error: {0}")]
  Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Surface a record-store error according to its classification.
  pub fn store<E: StoreError>(err: E) -> Self {
    match err.failure() {
      Failure::NotFound => ApiError::NotFound(err.to_string()),
      Failure::Conflict => ApiError::Conflict(err.to_string()),
      Failure::Internal => ApiError::Internal(Box::new(err)),
    }
  }

  fn status(&self) -> StatusCode {
    match self {
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
      ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
      ApiError::Conflict(_) => StatusCode::CONFLICT,
      ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<atelier_engine::Error> for ApiError {
  fn from(err: atelier_engine::Error) -> Self {
    use atelier_engine::Error as E;
    match err {
      E::NotFound { .. } => ApiError::NotFound(err.to_string()),
      E::Validation(msg) => ApiError::BadRequest(msg),
      E::BackendLoad { .. } => ApiError::Unavailable(err.to_string()),
      E::Store { failure: Failure::NotFound, .. } => ApiError::NotFound(err.to_string()),
      E::Store { failure: Failure::Conflict, .. } => ApiError::Conflict(err.to_string()),
      other => ApiError::Internal(Box::new(other)),
    }
  }
}

impl From<atelier_core::Error> for ApiError {
  fn from(err: atelier_core::Error) -> Self { ApiError::BadRequest(err.to_string()) }
}

impl From<MultipartError> for ApiError {
  fn from(err: MultipartError) -> Self { ApiError::BadRequest(err.body_text()) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    let message = match &self {
      ApiError::NotFound(m)
      | ApiError::BadRequest(m)
      | ApiError::Forbidden(m)
      | ApiError::Conflict(m)
      | ApiError::Unavailable(m) => m.clone(),
      ApiError::Unauthorized => "not authenticated".to_owned(),
      ApiError::Internal(e) => {
        tracing::error!(error = %e, "internal error");
        e.to_string()
      }
    };

    let mut res = (status, Json(json!({ "error": message }))).into_response();
    if status == StatusCode::UNAUTHORIZED {
      res
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    res
  }
}
