//! Error type for `atelier-engine`.

use atelier_core::store::{Failure, StoreError};
use thiserror::Error;

use crate::backend::{BackendError, PipelineKind};

#[derive(Debug, Error)]
pub enum Error {
  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("invalid request: {0}")]
  Validation(String),

  /// The pipeline could not be brought up. The adapter has already returned
  /// the slot to `Unloaded`, so the next call retries.
  #[error("failed to load {kind} pipeline: {source}")]
  BackendLoad {
    kind:   PipelineKind,
    #[source]
    source: BackendError,
  },

  #[error("{kind} synthesis failed: {source}")]
  Synthesis {
    kind:   PipelineKind,
    #[source]
    source: BackendError,
  },

  #[error("artifact i/o error: {0}")]
  Artifact(#[from] std::io::Error),

  #[error("image encoding error: {0}")]
  Image(#[from] image::ImageError),

  #[error("pipeline task failed: {0}")]
  Task(#[from] tokio::task::JoinError),

  #[error("store error: {source}")]
  Store {
    failure: Failure,
    #[source]
    source:  Box<dyn std::error::Error + Send + Sync>,
  },
}

impl Error {
  pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
    Error::NotFound { entity, id: id.to_string() }
  }

  /// Wrap a record-store error, keeping its classification.
  pub fn store<E: StoreError>(err: E) -> Self {
    Error::Store { failure: err.failure(), source: Box::new(err) }
  }

  /// Collapse to the caller-facing classification.
  pub fn failure(&self) -> Failure {
    match self {
      Error::NotFound { .. } => Failure::NotFound,
      Error::Store { failure, .. } => *failure,
      _ => Failure::Internal,
    }
  }
}

impl From<atelier_core::Error> for Error {
  fn from(err: atelier_core::Error) -> Self { Error::Validation(err.to_string()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
