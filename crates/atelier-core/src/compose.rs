//! Prompt composition: merging a base prompt with up to three style layers.
//!
//! Composition is a pure function. Fragments are appended in the fixed
//! order hair → outfit → scene, each separated by `", "`. Token position
//! influences the sampler's attention, so the order is part of the
//! reproducibility contract and must never depend on input order.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::layer::{DEFAULT_STRENGTH, LayerKind, StyleLayer};

const SEPARATOR: &str = ", ";

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// The parts of a layer that take part in composition. Callers may build
/// these directly to try out ad-hoc layers without touching the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleFragment {
  pub prompt:          String,
  #[serde(default)]
  pub negative_prompt: Option<String>,
  #[serde(default = "default_strength")]
  pub strength:        f32,
  #[serde(default)]
  pub reference_image: Option<PathBuf>,
}

fn default_strength() -> f32 { DEFAULT_STRENGTH }

impl StyleFragment {
  pub fn new(prompt: impl Into<String>) -> Self {
    Self {
      prompt:          prompt.into(),
      negative_prompt: None,
      strength:        DEFAULT_STRENGTH,
      reference_image: None,
    }
  }

  pub fn with_negative(mut self, negative: impl Into<String>) -> Self {
    self.negative_prompt = Some(negative.into());
    self
  }

  pub fn with_strength(mut self, strength: f32) -> Self {
    self.strength = strength;
    self
  }
}

impl From<&StyleLayer> for StyleFragment {
  fn from(layer: &StyleLayer) -> Self {
    Self {
      prompt:          layer.prompt.clone(),
      negative_prompt: layer.negative_prompt.clone(),
      strength:        layer.strength,
      reference_image: layer.reference_image.clone(),
    }
  }
}

/// Zero or one fragment per layer kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleStack {
  #[serde(default)]
  pub hair:   Option<StyleFragment>,
  #[serde(default)]
  pub outfit: Option<StyleFragment>,
  #[serde(default)]
  pub scene:  Option<StyleFragment>,
}

impl StyleStack {
  pub fn get(&self, kind: LayerKind) -> Option<&StyleFragment> {
    match kind {
      LayerKind::Hair => self.hair.as_ref(),
      LayerKind::Outfit => self.outfit.as_ref(),
      LayerKind::Scene => self.scene.as_ref(),
    }
  }

  pub fn set(&mut self, kind: LayerKind, fragment: Option<StyleFragment>) {
    match kind {
      LayerKind::Hair => self.hair = fragment,
      LayerKind::Outfit => self.outfit = fragment,
      LayerKind::Scene => self.scene = fragment,
    }
  }

  /// Compose this stack over the given base prompts.
  pub fn compose(
    &self,
    base_prompt: &str,
    base_negative_prompt: &str,
    weighting: Weighting,
  ) -> ComposedPrompt {
    compose_weighted(
      base_prompt,
      base_negative_prompt,
      LayerKind::ORDER.map(|kind| self.get(kind)),
      weighting,
    )
  }
}

// ─── Output ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedPrompt {
  pub prompt:          String,
  pub negative_prompt: String,
}

/// How layer strength is reflected in the composed text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
  /// Strength is carried on the fragment but does not alter the text.
  #[default]
  Ignore,
  /// Fragments whose strength differs from 1.0 are wrapped in the common
  /// `(text:weight)` emphasis syntax understood by diffusion prompt parsers.
  Emphasis,
}

// ─── Composition ─────────────────────────────────────────────────────────────

/// Compose `base_prompt`/`base_negative_prompt` with the optional hair,
/// outfit and scene fragments. Never fails; absent layers leave no trace.
pub fn compose(
  base_prompt: &str,
  base_negative_prompt: &str,
  hair: Option<&StyleFragment>,
  outfit: Option<&StyleFragment>,
  scene: Option<&StyleFragment>,
) -> ComposedPrompt {
  compose_weighted(
    base_prompt,
    base_negative_prompt,
    [hair, outfit, scene],
    Weighting::Ignore,
  )
}

/// As [`compose`], with the fragments given in [`LayerKind::ORDER`].
pub fn compose_weighted(
  base_prompt: &str,
  base_negative_prompt: &str,
  layers: [Option<&StyleFragment>; 3],
  weighting: Weighting,
) -> ComposedPrompt {
  let mut prompt = base_prompt.to_owned();
  let mut negative_prompt = base_negative_prompt.to_owned();

  for fragment in layers.into_iter().flatten() {
    prompt.push_str(SEPARATOR);
    push_weighted(&mut prompt, fragment, weighting);

    if let Some(negative) = fragment.negative_prompt.as_deref()
      && !negative.is_empty()
    {
      negative_prompt.push_str(SEPARATOR);
      negative_prompt.push_str(negative);
    }
  }

  ComposedPrompt { prompt, negative_prompt }
}

fn push_weighted(out: &mut String, fragment: &StyleFragment, weighting: Weighting) {
  let neutral = (fragment.strength - DEFAULT_STRENGTH).abs() < f32::EPSILON;
  match weighting {
    Weighting::Emphasis if !neutral => {
      out.push('(');
      out.push_str(&fragment.prompt);
      out.push(':');
      out.push_str(&format!("{:.2}", fragment.strength));
      out.push(')');
    }
    _ => out.push_str(&fragment.prompt),
  }
}
