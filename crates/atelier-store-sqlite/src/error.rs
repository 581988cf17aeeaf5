//! Error type for `atelier-store-sqlite`.

use atelier_core::store::{Failure, StoreError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] atelier_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("client not found: {0}")]
  ClientNotFound(Uuid),

  #[error("identity not found: {0}")]
  IdentityNotFound(Uuid),

  #[error("lookbook not found: {0}")]
  LookbookNotFound(Uuid),

  #[error("history not found: {0}")]
  HistoryNotFound(Uuid),

  #[error("conflict: {0}")]
  Conflict(String),
}

impl StoreError for Error {
  fn failure(&self) -> Failure {
    match self {
      Error::ClientNotFound(_)
      | Error::IdentityNotFound(_)
      | Error::LookbookNotFound(_)
      | Error::HistoryNotFound(_) => Failure::NotFound,
      Error::Conflict(_) => Failure::Conflict,
      _ => Failure::Internal,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
