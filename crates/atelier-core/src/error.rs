//! Error types for `atelier-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown layer kind: {0:?}")]
  UnknownLayerKind(String),

  #[error("unknown role: {0:?}")]
  UnknownRole(String),

  #[error("layer prompt must not be empty")]
  EmptyLayerPrompt,

  #[error("layer strength must be a finite number, got {0}")]
  InvalidStrength(f32),

  #[error("invalid setting {key:?}: expected {expected}")]
  InvalidSetting {
    key:      String,
    expected: &'static str,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
