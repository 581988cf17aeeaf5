//! The Generation Orchestrator.
//!
//! Binds a generation request to a concrete computation: resolve the
//! identity and its layers through the record store, compose the prompt,
//! dispatch to the [`PipelineAdapter`], persist the image and record its
//! provenance.

use std::{path::PathBuf, sync::Arc};

use atelier_core::{
  compose::{ComposedPrompt, StyleFragment, StyleStack, Weighting},
  history::{History, NewHistory},
  identity::Identity,
  layer::LayerKind,
  settings::GenerationSettings,
  store::StudioStore,
};
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  adapter::PipelineAdapter,
  artifacts::ArtifactStore,
  backend::{InpaintJob, Sampling, SynthesisJob, TextToImageJob},
};

/// Settings key added to the recorded settings of inpainting runs.
pub const INPAINT_MARKER: &str = "inpaint";

/// What to do with a layer id that does not resolve to a layer of the
/// slot's kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedLayers {
  /// Skip the layer and log a warning.
  #[default]
  Ignore,
  /// Fail the request with a not-found error.
  Reject,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrchestratorConfig {
  pub unresolved_layers: UnresolvedLayers,
  pub weighting:         Weighting,
}

/// At most one layer id per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerSelection {
  pub hair:   Option<Uuid>,
  pub outfit: Option<Uuid>,
  pub scene:  Option<Uuid>,
}

impl LayerSelection {
  pub fn get(&self, kind: LayerKind) -> Option<Uuid> {
    match kind {
      LayerKind::Hair => self.hair,
      LayerKind::Outfit => self.outfit,
      LayerKind::Scene => self.scene,
    }
  }
}

/// A text-to-image request against a stored identity and stored layers.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
  #[serde(alias = "model_id")]
  pub identity_id:     Uuid,
  #[serde(default)]
  pub hair_layer_id:   Option<Uuid>,
  #[serde(default)]
  pub outfit_layer_id: Option<Uuid>,
  #[serde(default)]
  pub scene_layer_id:  Option<Uuid>,
  #[serde(default)]
  pub prompt:          String,
  #[serde(default)]
  pub negative_prompt: String,
  #[serde(default)]
  pub settings:        GenerationSettings,
  /// Explicit artifact location; a fresh name is chosen when absent.
  #[serde(skip)]
  pub output_path:     Option<PathBuf>,
}

impl GenerationRequest {
  pub fn new(identity_id: Uuid) -> Self {
    Self {
      identity_id,
      hair_layer_id: None,
      outfit_layer_id: None,
      scene_layer_id: None,
      prompt: String::new(),
      negative_prompt: String::new(),
      settings: GenerationSettings::new(),
      output_path: None,
    }
  }

  pub fn layers(&self) -> LayerSelection {
    LayerSelection {
      hair:   self.hair_layer_id,
      outfit: self.outfit_layer_id,
      scene:  self.scene_layer_id,
    }
  }
}

/// Ad-hoc layers given as plain data, bypassing the layer records.
#[derive(Debug, Clone, Deserialize)]
pub struct StylingRequest {
  #[serde(alias = "model_id")]
  pub identity_id:     Uuid,
  #[serde(default)]
  pub layers:          StyleStack,
  #[serde(default)]
  pub prompt:          String,
  #[serde(default)]
  pub negative_prompt: String,
  #[serde(default)]
  pub settings:        GenerationSettings,
  #[serde(skip)]
  pub output_path:     Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct InpaintRequest {
  pub identity_id:     Uuid,
  pub prompt:          String,
  pub negative_prompt: String,
  pub image:           DynamicImage,
  /// Same dimensions as `image`; non-zero pixels mark the editable area.
  pub mask:            DynamicImage,
  pub settings:        GenerationSettings,
  pub output_path:     Option<PathBuf>,
}

/// A rendered image and where it was written.
#[derive(Debug, Clone)]
pub struct Generation {
  pub image:      DynamicImage,
  pub image_path: PathBuf,
  /// The prompts actually sent to the backend.
  pub prompt:     ComposedPrompt,
}

/// A generation together with its provenance record.
#[derive(Debug, Clone)]
pub struct RecordedGeneration {
  pub generation: Generation,
  pub history:    History,
}

pub struct Orchestrator<S> {
  store:     Arc<S>,
  adapter:   PipelineAdapter,
  artifacts: ArtifactStore,
  config:    OrchestratorConfig,
}

impl<S> Clone for Orchestrator<S> {
  fn clone(&self) -> Self {
    Self {
      store:     self.store.clone(),
      adapter:   self.adapter.clone(),
      artifacts: self.artifacts.clone(),
      config:    self.config,
    }
  }
}

impl<S: StudioStore> Orchestrator<S> {
  pub fn new(
    store: Arc<S>,
    adapter: PipelineAdapter,
    artifacts: ArtifactStore,
    config: OrchestratorConfig,
  ) -> Self {
    Self { store, adapter, artifacts, config }
  }

  pub fn adapter(&self) -> &PipelineAdapter { &self.adapter }

  pub fn artifacts(&self) -> &ArtifactStore { &self.artifacts }

  /// Text-to-image with stored layers; records history on success.
  pub async fn generate(&self, request: GenerationRequest) -> Result<RecordedGeneration> {
    let identity = self.resolve_identity(request.identity_id).await?;
    request.settings.validate()?;
    let stack = self.resolve_layers(request.layers()).await?;

    let composed = stack.compose(&request.prompt, &request.negative_prompt, self.config.weighting);
    let generation = self
      .render(&identity, composed, &request.settings, request.output_path)
      .await?;

    let history = self
      .record(&identity, &generation, request.settings)
      .await?;
    Ok(RecordedGeneration { generation, history })
  }

  /// Text-to-image with layers given inline. Nothing is recorded.
  pub async fn apply_styling_layers(&self, request: StylingRequest) -> Result<Generation> {
    let identity = self.resolve_identity(request.identity_id).await?;
    request.settings.validate()?;

    let composed = request.layers.compose(
      &request.prompt,
      &request.negative_prompt,
      self.config.weighting,
    );
    self
      .render(&identity, composed, &request.settings, request.output_path)
      .await
  }

  /// Repaint the masked region of `request.image`; records history with an
  /// `"inpaint": true` settings entry.
  pub async fn inpaint(&self, request: InpaintRequest) -> Result<RecordedGeneration> {
    let identity = self.resolve_identity(request.identity_id).await?;
    request.settings.validate()?;
    if request.image.dimensions() != request.mask.dimensions() {
      let (iw, ih) = request.image.dimensions();
      let (mw, mh) = request.mask.dimensions();
      return Err(Error::Validation(format!(
        "mask is {mw}x{mh} but image is {iw}x{ih}"
      )));
    }

    let prompt = ComposedPrompt {
      prompt:          request.prompt,
      negative_prompt: request.negative_prompt,
    };
    let job = SynthesisJob::Inpaint(InpaintJob {
      prompt:          prompt.prompt.clone(),
      negative_prompt: prompt.negative_prompt.clone(),
      image:           request.image,
      mask:            request.mask,
      embedding:       identity.embedding().map(ToOwned::to_owned),
      sampling:        sampling(&request.settings)?,
    });

    info!(identity = %identity.identity_id, "dispatching inpaint");
    let image = self.adapter.synthesize(job).await?;
    let generation = self.persist(image, prompt, request.output_path).await?;

    let settings = request.settings.with(INPAINT_MARKER, true);
    let history = self.record(&identity, &generation, settings).await?;
    Ok(RecordedGeneration { generation, history })
  }

  async fn resolve_identity(&self, id: Uuid) -> Result<Identity> {
    let identity = self
      .store
      .get_identity(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found("identity", id))?;
    if identity.embedding().is_none() {
      return Err(Error::Validation(format!(
        "identity {id} has no base embedding"
      )));
    }
    Ok(identity)
  }

  async fn resolve_layers(&self, selection: LayerSelection) -> Result<StyleStack> {
    let mut stack = StyleStack::default();
    for kind in LayerKind::ORDER {
      let Some(id) = selection.get(kind) else { continue };
      let layer = self.store.get_layer(id).await.map_err(Error::store)?;
      match layer {
        Some(layer) if layer.kind == kind => {
          stack.set(kind, Some(StyleFragment::from(&layer)));
        }
        found => {
          let reason = match found {
            Some(layer) => format!("layer is a {} layer", layer.kind),
            None => "no such layer".to_owned(),
          };
          match self.config.unresolved_layers {
            UnresolvedLayers::Ignore => {
              warn!(slot = %kind, layer = %id, %reason, "ignoring unresolved layer");
            }
            UnresolvedLayers::Reject => {
              return Err(Error::not_found("layer", format!("{id} ({kind} slot: {reason})")));
            }
          }
        }
      }
    }
    Ok(stack)
  }

  async fn render(
    &self,
    identity: &Identity,
    composed: ComposedPrompt,
    settings: &GenerationSettings,
    output_path: Option<PathBuf>,
  ) -> Result<Generation> {
    debug!(prompt = %composed.prompt, negative = %composed.negative_prompt, "composed prompt");

    let job = SynthesisJob::TextToImage(TextToImageJob {
      prompt:          composed.prompt.clone(),
      negative_prompt: composed.negative_prompt.clone(),
      width:           settings.width()?,
      height:          settings.height()?,
      embedding:       identity.embedding().map(ToOwned::to_owned),
      sampling:        sampling(settings)?,
    });

    info!(identity = %identity.identity_id, "dispatching text-to-image");
    let image = self.adapter.synthesize(job).await?;
    self.persist(image, composed, output_path).await
  }

  async fn persist(
    &self,
    image: DynamicImage,
    prompt: ComposedPrompt,
    output_path: Option<PathBuf>,
  ) -> Result<Generation> {
    let image_path = output_path.unwrap_or_else(|| self.artifacts.output_path());
    self.artifacts.save_png(&image, &image_path).await?;
    info!(path = %image_path.display(), "artifact written");
    Ok(Generation { image, image_path, prompt })
  }

  async fn record(
    &self,
    identity: &Identity,
    generation: &Generation,
    settings: GenerationSettings,
  ) -> Result<History> {
    self
      .store
      .record_history(NewHistory {
        identity_id: identity.identity_id,
        image_path: generation.image_path.clone(),
        prompt: generation.prompt.prompt.clone(),
        negative_prompt: generation.prompt.negative_prompt.clone(),
        settings,
      })
      .await
      .map_err(Error::store)
  }
}

fn sampling(settings: &GenerationSettings) -> Result<Sampling> {
  Ok(Sampling {
    steps:          settings.steps()?,
    guidance_scale: settings.guidance_scale()?,
    seed:           settings.seed()?,
    extra:          settings.extras(),
  })
}
