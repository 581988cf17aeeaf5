//! The open generation-settings map.
//!
//! Settings travel as a JSON object so that unknown keys reach the backend
//! untouched. The handful of keys the engine understands are read through
//! typed accessors that fall back to studio defaults.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

pub const WIDTH: &str = "width";
pub const HEIGHT: &str = "height";
pub const STEPS: &str = "num_inference_steps";
pub const GUIDANCE_SCALE: &str = "guidance_scale";
pub const SEED: &str = "seed";

pub const DEFAULT_WIDTH: u32 = 512;
pub const DEFAULT_HEIGHT: u32 = 512;
pub const DEFAULT_STEPS: u32 = 30;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;

/// Largest accepted width or height, in pixels.
pub const MAX_DIMENSION: u32 = 2048;
/// Width and height must be multiples of this.
pub const DIMENSION_STEP: u32 = 8;
pub const MAX_STEPS: u32 = 150;

const KNOWN: [&str; 5] = [WIDTH, HEIGHT, STEPS, GUIDANCE_SCALE, SEED];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationSettings(Map<String, Value>);

impl GenerationSettings {
  pub fn new() -> Self { Self::default() }

  pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.0.insert(key.to_owned(), value.into());
    self
  }

  pub fn get(&self, key: &str) -> Option<&Value> { self.0.get(key) }

  pub fn width(&self) -> Result<u32> { self.dimension(WIDTH, DEFAULT_WIDTH) }

  pub fn height(&self) -> Result<u32> { self.dimension(HEIGHT, DEFAULT_HEIGHT) }

  pub fn steps(&self) -> Result<u32> {
    self.bounded(STEPS, DEFAULT_STEPS, MAX_STEPS, 1, "an integer in 1..=150")
  }

  pub fn guidance_scale(&self) -> Result<f64> {
    match self.present(GUIDANCE_SCALE) {
      None => Ok(DEFAULT_GUIDANCE_SCALE),
      Some(v) => v
        .as_f64()
        .filter(|g| g.is_finite())
        .ok_or_else(|| invalid(GUIDANCE_SCALE, "a finite number")),
    }
  }

  /// `None` means every call draws fresh randomness.
  pub fn seed(&self) -> Result<Option<u64>> {
    match self.present(SEED) {
      None => Ok(None),
      Some(v) => v
        .as_u64()
        .map(Some)
        .ok_or_else(|| invalid(SEED, "a non-negative integer")),
    }
  }

  /// Every key the engine does not interpret itself.
  pub fn extras(&self) -> Map<String, Value> {
    self
      .0
      .iter()
      .filter(|(k, _)| !KNOWN.contains(&k.as_str()))
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }

  /// Check every known key up front so a malformed request fails before
  /// any backend work starts.
  pub fn validate(&self) -> Result<()> {
    self.width()?;
    self.height()?;
    self.steps()?;
    self.guidance_scale()?;
    self.seed()?;
    Ok(())
  }

  /// A JSON `null` counts as absent.
  fn present(&self, key: &str) -> Option<&Value> {
    self.0.get(key).filter(|v| !v.is_null())
  }

  fn dimension(&self, key: &str, default: u32) -> Result<u32> {
    self.bounded(
      key,
      default,
      MAX_DIMENSION,
      DIMENSION_STEP,
      "a multiple of 8 in 8..=2048",
    )
  }

  /// A positive integer no larger than `max` and divisible by `step`.
  fn bounded(
    &self,
    key: &str,
    default: u32,
    max: u32,
    step: u32,
    expected: &'static str,
  ) -> Result<u32> {
    match self.present(key) {
      None => Ok(default),
      Some(v) => v
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| *n > 0 && *n <= max && n % step == 0)
        .ok_or_else(|| invalid(key, expected)),
    }
  }
}

fn invalid(key: &str, expected: &'static str) -> Error {
  Error::InvalidSetting { key: key.to_owned(), expected }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn settings(v: Value) -> GenerationSettings { serde_json::from_value(v).unwrap() }

  #[test]
  fn defaults_when_empty() {
    let s = GenerationSettings::new();
    assert_eq!(s.width().unwrap(), 512);
    assert_eq!(s.height().unwrap(), 512);
    assert_eq!(s.steps().unwrap(), 30);
    assert_eq!(s.guidance_scale().unwrap(), 7.5);
    assert_eq!(s.seed().unwrap(), None);
  }

  #[test]
  fn reads_known_keys() {
    let s = settings(json!({
      "width": 768, "height": 640, "num_inference_steps": 12,
      "guidance_scale": 5, "seed": 42
    }));
    assert_eq!(s.width().unwrap(), 768);
    assert_eq!(s.height().unwrap(), 640);
    assert_eq!(s.steps().unwrap(), 12);
    assert_eq!(s.guidance_scale().unwrap(), 5.0);
    assert_eq!(s.seed().unwrap(), Some(42));
  }

  #[test]
  fn null_seed_is_absent() {
    assert_eq!(settings(json!({ "seed": null })).seed().unwrap(), None);
  }

  #[test]
  fn rejects_malformed_known_keys() {
    for bad in [
      json!({ "width": "wide" }),
      json!({ "height": 0 }),
      json!({ "seed": -1 }),
      json!({ "guidance_scale": "high" }),
      json!({ "width": 2_147_483_648u64 }),
      json!({ "height": 4096 }),
      json!({ "width": 500 }),
      json!({ "num_inference_steps": 151 }),
    ] {
      assert!(matches!(
        settings(bad).validate(),
        Err(Error::InvalidSetting { .. })
      ));
    }
  }

  #[test]
  fn accepts_bounds() {
    let s = settings(json!({ "width": 2048, "height": 8, "num_inference_steps": 150 }));
    assert_eq!(s.width().unwrap(), MAX_DIMENSION);
    assert_eq!(s.height().unwrap(), 8);
    assert_eq!(s.steps().unwrap(), MAX_STEPS);
  }

  #[test]
  fn extras_pass_through() {
    let s = settings(json!({ "width": 512, "scheduler": "ddim", "eta": 0.3 }));
    let extras = s.extras();
    assert_eq!(extras.len(), 2);
    assert_eq!(extras["scheduler"], json!("ddim"));
    assert!(!extras.contains_key("width"));
  }
}
