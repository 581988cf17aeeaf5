//! Style layers: reusable, typed prompt fragments.
//!
//! A layer is referenced by id at generation time, never copied into the
//! identity. Editing a layer therefore changes every future generation that
//! uses it, but never rewrites recorded history.

use std::{path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result};

/// The slot a layer occupies. Closed set; the declaration order is the
/// composition order.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LayerKind {
  Hair,
  Outfit,
  Scene,
}

impl LayerKind {
  /// Identity → hair → clothing → environment.
  pub const ORDER: [LayerKind; 3] = [Self::Hair, Self::Outfit, Self::Scene];

  pub fn parse(s: &str) -> Result<Self> {
    Self::from_str(s.trim()).map_err(|_| Error::UnknownLayerKind(s.to_owned()))
  }
}

/// Default influence multiplier for a layer.
pub const DEFAULT_STRENGTH: f32 = 1.0;

fn default_strength() -> f32 { DEFAULT_STRENGTH }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleLayer {
  pub layer_id:        Uuid,
  pub name:            String,
  pub kind:            LayerKind,
  pub prompt:          String,
  pub negative_prompt: Option<String>,
  pub strength:        f32,
  pub reference_image: Option<PathBuf>,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
}

/// Input to [`crate::store::StudioStore::create_layer`].
#[derive(Debug, Clone, Deserialize)]
pub struct NewLayer {
  pub name:            String,
  #[serde(alias = "type")]
  pub kind:            LayerKind,
  pub prompt:          String,
  pub negative_prompt: Option<String>,
  #[serde(default = "default_strength")]
  pub strength:        f32,
  pub reference_image: Option<PathBuf>,
}

impl NewLayer {
  pub fn validate(&self) -> Result<()> {
    validate_prompt(&self.prompt)?;
    validate_strength(self.strength)
  }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayerPatch {
  pub name:            Option<String>,
  #[serde(alias = "type")]
  pub kind:            Option<LayerKind>,
  pub prompt:          Option<String>,
  pub negative_prompt: Option<String>,
  pub strength:        Option<f32>,
  pub reference_image: Option<PathBuf>,
}

impl LayerPatch {
  pub fn validate(&self) -> Result<()> {
    if let Some(prompt) = &self.prompt {
      validate_prompt(prompt)?;
    }
    if let Some(strength) = self.strength {
      validate_strength(strength)?;
    }
    Ok(())
  }

  pub fn apply(self, layer: &mut StyleLayer) {
    if let Some(name) = self.name {
      layer.name = name;
    }
    if let Some(kind) = self.kind {
      layer.kind = kind;
    }
    if let Some(prompt) = self.prompt {
      layer.prompt = prompt;
    }
    if let Some(negative) = self.negative_prompt {
      layer.negative_prompt = Some(negative);
    }
    if let Some(strength) = self.strength {
      layer.strength = strength;
    }
    if let Some(path) = self.reference_image {
      layer.reference_image = Some(path);
    }
  }
}

fn validate_prompt(prompt: &str) -> Result<()> {
  if prompt.trim().is_empty() {
    return Err(Error::EmptyLayerPrompt);
  }
  Ok(())
}

fn validate_strength(strength: f32) -> Result<()> {
  if !strength.is_finite() {
    return Err(Error::InvalidStrength(strength));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_kinds() {
    assert_eq!(LayerKind::parse("hair").unwrap(), LayerKind::Hair);
    assert_eq!(LayerKind::parse(" scene ").unwrap(), LayerKind::Scene);
    assert!(matches!(
      LayerKind::parse("shoes"),
      Err(Error::UnknownLayerKind(s)) if s == "shoes"
    ));
  }

  #[test]
  fn kind_display_matches_serde() {
    for kind in LayerKind::ORDER {
      let json = serde_json::to_value(kind).unwrap();
      assert_eq!(json, serde_json::Value::String(kind.to_string()));
    }
  }

  #[test]
  fn new_layer_accepts_type_alias_and_default_strength() {
    let layer: NewLayer = serde_json::from_value(serde_json::json!({
      "name": "Waves",
      "type": "hair",
      "prompt": "long wavy hair",
    }))
    .unwrap();
    assert_eq!(layer.kind, LayerKind::Hair);
    assert_eq!(layer.strength, DEFAULT_STRENGTH);
    assert!(layer.validate().is_ok());
  }

  #[test]
  fn blank_prompt_rejected() {
    let patch = LayerPatch { prompt: Some("   ".into()), ..Default::default() };
    assert!(matches!(patch.validate(), Err(Error::EmptyLayerPrompt)));
  }
}
