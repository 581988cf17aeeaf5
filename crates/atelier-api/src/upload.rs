//! Multipart form helpers shared by the upload endpoints.

use std::collections::HashMap;

use axum::{
  body::Bytes,
  extract::{Multipart, multipart::Field},
};
use uuid::Uuid;

use crate::error::ApiError;

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct Upload {
  pub file_name: String,
  pub bytes:     Bytes,
}

/// A fully drained multipart body: text fields by name, files in the order
/// they arrived.
#[derive(Debug, Default)]
pub struct Form {
  fields: HashMap<String, String>,
  files:  Vec<(String, Upload)>,
}

impl Form {
  pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
    let mut form = Form::default();
    while let Some(field) = multipart.next_field().await? {
      let name = field.name().unwrap_or_default().to_owned();
      let file_name = field.file_name().map(ToOwned::to_owned);
      match file_name {
        Some(file_name) => {
          let upload = Upload { file_name, bytes: read_bytes(field).await? };
          form.files.push((name, upload));
        }
        None => {
          form.fields.insert(name, field.text().await?);
        }
      }
    }
    Ok(form)
  }

  /// A text field, with surrounding whitespace removed; blank reads as absent.
  pub fn text(&self, name: &str) -> Option<&str> {
    self
      .fields
      .get(name)
      .map(|v| v.trim())
      .filter(|v| !v.is_empty())
  }

  pub fn require(&self, name: &str) -> Result<&str, ApiError> {
    self
      .text(name)
      .ok_or_else(|| ApiError::BadRequest(format!("missing form field {name:?}")))
  }

  pub fn uuid(&self, name: &str) -> Result<Uuid, ApiError> {
    self
      .require(name)?
      .parse()
      .map_err(|_| ApiError::BadRequest(format!("form field {name:?} is not a valid id")))
  }

  /// Parse an optional field with [`std::str::FromStr`].
  pub fn parse<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, ApiError> {
    self
      .text(name)
      .map(|v| {
        v.parse()
          .map_err(|_| ApiError::BadRequest(format!("form field {name:?} is malformed: {v:?}")))
      })
      .transpose()
  }

  /// Every file uploaded under any of `names`, in arrival order.
  pub fn files<'a>(&'a self, names: &'a [&'a str]) -> impl Iterator<Item = &'a Upload> + 'a {
    self
      .files
      .iter()
      .filter(move |(n, _)| names.iter().any(|name| *name == n.as_str()))
      .map(|(_, u)| u)
  }

  pub fn file(&self, name: &str) -> Option<&Upload> {
    self.files.iter().find(|(n, _)| n == name).map(|(_, u)| u)
  }

  pub fn require_file(&self, name: &str) -> Result<&Upload, ApiError> {
    self
      .file(name)
      .ok_or_else(|| ApiError::BadRequest(format!("missing file field {name:?}")))
  }
}

async fn read_bytes(field: Field<'_>) -> Result<Bytes, ApiError> {
  let bytes = field.bytes().await?;
  if bytes.is_empty() {
    return Err(ApiError::BadRequest("uploaded file is empty".into()));
  }
  Ok(bytes)
}
