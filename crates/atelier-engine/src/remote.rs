//! A backend that forwards jobs to an HTTP diffusion server.
//!
//! Jobs are POSTed as JSON to `/v1/images/generations` (text-to-image) and
//! `/v1/images/edits` (inpainting). Images travel as base64-encoded PNG in
//! both directions. The placement is sent along as a hint; the server owns
//! the actual device.

use std::time::Duration;

use base64::{Engine as _, prelude::BASE64_STANDARD};
use image::DynamicImage;
use reqwest::{Url, blocking::Client};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  backend::{BackendError, GenerationBackend, Pipeline, PipelineKind, SynthesisJob},
  device::{Device, Placement},
};

const GENERATIONS_PATH: &str = "v1/images/generations";
const EDITS_PATH: &str = "v1/images/edits";

#[derive(Debug, Clone)]
pub struct RemoteBackend {
  base_url: String,
  timeout:  Duration,
}

impl RemoteBackend {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self { base_url: base_url.into(), timeout: Duration::from_secs(600) }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }
}

impl GenerationBackend for RemoteBackend {
  fn name(&self) -> &str { "remote" }

  // Any device is accepted as a hint.
  fn supports(&self, _device: Device) -> bool { true }

  fn load(
    &self,
    kind: PipelineKind,
    model: &str,
    placement: Placement,
  ) -> Result<Box<dyn Pipeline>, BackendError> {
    let mut base = Url::parse(&self.base_url)
      .map_err(|e| BackendError::InvalidInput(format!("remote url {:?}: {e}", self.base_url)))?;
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }
    let path = match kind {
      PipelineKind::TextToImage => GENERATIONS_PATH,
      PipelineKind::Inpaint => EDITS_PATH,
    };
    let endpoint = base
      .join(path)
      .map_err(|e| BackendError::InvalidInput(e.to_string()))?;

    let client = Client::builder().timeout(self.timeout).build()?;
    Ok(Box::new(RemotePipeline {
      client,
      endpoint,
      model: model.to_owned(),
      placement,
    }))
  }
}

struct RemotePipeline {
  client:    Client,
  endpoint:  Url,
  model:     String,
  placement: Placement,
}

#[derive(Serialize)]
struct RemoteRequest<'a> {
  model:           &'a str,
  device:          Device,
  precision:       &'a str,
  prompt:          &'a str,
  negative_prompt: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  width:           Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  height:          Option<u32>,
  steps:           u32,
  guidance:        f64,
  seed:            Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  embedding:       Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  image:           Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  mask:            Option<String>,
  #[serde(flatten)]
  extra:           &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct RemoteResponse {
  image: String,
}

impl Pipeline for RemotePipeline {
  fn synthesize(&mut self, job: &SynthesisJob) -> Result<DynamicImage, BackendError> {
    let sampling = job.sampling();
    let mut request = RemoteRequest {
      model:           &self.model,
      device:          self.placement.device,
      precision:       self.placement.precision.as_ref(),
      prompt:          "",
      negative_prompt: "",
      width:           None,
      height:          None,
      steps:           sampling.steps,
      guidance:        sampling.guidance_scale,
      seed:            sampling.seed,
      embedding:       None,
      image:           None,
      mask:            None,
      extra:           &sampling.extra,
    };

    match job {
      SynthesisJob::TextToImage(job) => {
        request.prompt = &job.prompt;
        request.negative_prompt = &job.negative_prompt;
        request.width = Some(job.width);
        request.height = Some(job.height);
        request.embedding = job.embedding.as_ref().map(|p| p.to_string_lossy().into_owned());
      }
      SynthesisJob::Inpaint(job) => {
        request.prompt = &job.prompt;
        request.negative_prompt = &job.negative_prompt;
        request.embedding = job.embedding.as_ref().map(|p| p.to_string_lossy().into_owned());
        request.image = Some(to_base64_png(&job.image)?);
        request.mask = Some(to_base64_png(&job.mask)?);
      }
    }

    let response: RemoteResponse = self
      .client
      .post(self.endpoint.clone())
      .json(&request)
      .send()?
      .error_for_status()?
      .json()?;

    let bytes = BASE64_STANDARD.decode(response.image)?;
    Ok(image::load_from_memory(&bytes)?)
  }
}

fn to_base64_png(image: &DynamicImage) -> Result<String, BackendError> {
  let mut bytes = Vec::new();
  image.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)?;
  Ok(BASE64_STANDARD.encode(&bytes))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::Precision;

  const CPU: Placement = Placement { device: Device::Cpu, precision: Precision::Full };

  #[test]
  fn bad_url_fails_to_load() {
    let err = RemoteBackend::new("not a url")
      .load(PipelineKind::TextToImage, "sd", CPU)
      .err()
      .unwrap();
    assert!(matches!(err, BackendError::InvalidInput(_)));
  }

  #[test]
  fn base64_png_round_trips() {
    let img = DynamicImage::ImageRgb8(image::RgbImage::new(4, 2));
    let encoded = to_base64_png(&img).unwrap();
    let decoded =
      image::load_from_memory(&BASE64_STANDARD.decode(encoded).unwrap()).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (4, 2));
  }
}
