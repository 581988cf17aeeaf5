//! The Generation Backend contract.
//!
//! A [`GenerationBackend`] turns a model reference plus a [`Placement`] into
//! a loaded [`Pipeline`]. Pipelines are heavyweight, stateful and not safe
//! for concurrent use; [`crate::adapter::PipelineAdapter`] owns them and
//! serialises access. Every method here is blocking and is called from a
//! blocking task, never directly on the async runtime.

use std::path::PathBuf;

use image::DynamicImage;
use serde::Serialize;
use serde_json::{Map, Value};
use strum::{AsRefStr, Display};

use crate::device::{Device, Placement};

/// The two independently managed pipeline kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "kebab-case")]
pub enum PipelineKind {
  TextToImage,
  Inpaint,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
  #[error("model weights not found: {0}")]
  MissingWeights(String),

  #[error("device {0} is not supported by this backend")]
  UnsupportedDevice(Device),

  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("remote backend: {0}")]
  Remote(#[from] reqwest::Error),

  #[error("image codec: {0}")]
  Image(#[from] image::ImageError),

  #[error("base64 decode: {0}")]
  Decode(#[from] base64::DecodeError),

  #[error("{0}")]
  Other(String),
}

/// Sampler parameters shared by both job kinds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sampling {
  pub steps:          u32,
  pub guidance_scale: f64,
  /// Seeds the sampler immediately before it runs. `None` draws fresh
  /// entropy on every call.
  pub seed:           Option<u64>,
  /// Settings keys the engine does not interpret, forwarded verbatim.
  pub extra:          Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct TextToImageJob {
  pub prompt:          String,
  pub negative_prompt: String,
  pub width:           u32,
  pub height:          u32,
  /// Identity conditioning, if the identity carries one.
  pub embedding:       Option<PathBuf>,
  pub sampling:        Sampling,
}

/// Repaint the areas of `image` where `mask` is non-zero.
#[derive(Debug, Clone)]
pub struct InpaintJob {
  pub prompt:          String,
  pub negative_prompt: String,
  pub image:           DynamicImage,
  pub mask:            DynamicImage,
  pub embedding:       Option<PathBuf>,
  pub sampling:        Sampling,
}

#[derive(Debug, Clone)]
pub enum SynthesisJob {
  TextToImage(TextToImageJob),
  Inpaint(InpaintJob),
}

impl SynthesisJob {
  pub fn kind(&self) -> PipelineKind {
    match self {
      SynthesisJob::TextToImage(_) => PipelineKind::TextToImage,
      SynthesisJob::Inpaint(_) => PipelineKind::Inpaint,
    }
  }

  pub fn sampling(&self) -> &Sampling {
    match self {
      SynthesisJob::TextToImage(job) => &job.sampling,
      SynthesisJob::Inpaint(job) => &job.sampling,
    }
  }
}

/// A loaded, resident pipeline of one kind.
pub trait Pipeline: Send {
  fn synthesize(&mut self, job: &SynthesisJob) -> Result<DynamicImage, BackendError>;

  /// Release device memory held by this pipeline. Dropping is equivalent
  /// for backends with nothing extra to free.
  fn unload(self: Box<Self>) {}
}

pub trait GenerationBackend: Send + Sync {
  fn name(&self) -> &str;

  /// Whether this backend can place pipelines on `device`.
  fn supports(&self, device: Device) -> bool;

  fn load(
    &self,
    kind: PipelineKind,
    model: &str,
    placement: Placement,
  ) -> Result<Box<dyn Pipeline>, BackendError>;

  /// Return cached device memory to the system after pipelines are unloaded.
  fn reclaim(&self, _device: Device) {}
}
