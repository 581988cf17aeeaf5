//! A weight-free backend that synthesises images procedurally.
//!
//! Output is a pure function of the job and the seed, which makes it the
//! backend of choice for tests, demos and hosts without an accelerator.
//! A model reference starting with `missing:` simulates absent weights.

use std::{
  collections::hash_map::DefaultHasher,
  hash::{Hash, Hasher},
};

use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
  backend::{
    BackendError, GenerationBackend, InpaintJob, Pipeline, PipelineKind, Sampling,
    SynthesisJob, TextToImageJob,
  },
  device::{Device, Placement},
};

const MISSING_PREFIX: &str = "missing:";

#[derive(Debug, Clone, Copy, Default)]
pub struct ProceduralBackend;

impl GenerationBackend for ProceduralBackend {
  fn name(&self) -> &str { "procedural" }

  fn supports(&self, device: Device) -> bool { device == Device::Cpu }

  fn load(
    &self,
    kind: PipelineKind,
    model: &str,
    _placement: Placement,
  ) -> Result<Box<dyn Pipeline>, BackendError> {
    if let Some(name) = model.strip_prefix(MISSING_PREFIX) {
      return Err(BackendError::MissingWeights(name.to_owned()));
    }
    Ok(Box::new(ProceduralPipeline { kind, model: model.to_owned() }))
  }
}

struct ProceduralPipeline {
  kind:  PipelineKind,
  model: String,
}

impl Pipeline for ProceduralPipeline {
  fn synthesize(&mut self, job: &SynthesisJob) -> Result<DynamicImage, BackendError> {
    if job.kind() != self.kind {
      return Err(BackendError::InvalidInput(format!(
        "{} pipeline cannot run a {} job",
        self.kind,
        job.kind()
      )));
    }
    match job {
      SynthesisJob::TextToImage(job) => Ok(self.text_to_image(job)),
      SynthesisJob::Inpaint(job) => self.inpaint(job),
    }
  }
}

impl ProceduralPipeline {
  fn text_to_image(&self, job: &TextToImageJob) -> DynamicImage {
    let key = self.fingerprint(&job.prompt, &job.negative_prompt, job, &job.sampling);
    let mut rng = sampler(key, job.sampling.seed);
    DynamicImage::ImageRgb8(paint(&mut rng, job.width, job.height, &job.sampling))
  }

  fn inpaint(&self, job: &InpaintJob) -> Result<DynamicImage, BackendError> {
    let (width, height) = job.image.dimensions();
    if job.mask.dimensions() != (width, height) {
      return Err(BackendError::InvalidInput(format!(
        "mask is {}x{} but image is {width}x{height}",
        job.mask.width(),
        job.mask.height()
      )));
    }

    let key = self.fingerprint(&job.prompt, &job.negative_prompt, job, &job.sampling);
    let mut rng = sampler(key, job.sampling.seed);
    let fill = paint(&mut rng, width, height, &job.sampling);

    let mask = job.mask.to_luma8();
    let mut out = job.image.to_rgb8();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
      if mask.get_pixel(x, y)[0] != 0 {
        *pixel = *fill.get_pixel(x, y);
      }
    }
    Ok(DynamicImage::ImageRgb8(out))
  }

  fn fingerprint(
    &self,
    prompt: &str,
    negative_prompt: &str,
    job: &impl Fingerprint,
    sampling: &Sampling,
  ) -> u64 {
    let mut h = DefaultHasher::new();
    self.kind.as_ref().hash(&mut h);
    self.model.hash(&mut h);
    prompt.hash(&mut h);
    negative_prompt.hash(&mut h);
    job.fingerprint(&mut h);
    sampling.steps.hash(&mut h);
    sampling.guidance_scale.to_bits().hash(&mut h);
    serde_json::Value::Object(sampling.extra.clone())
      .to_string()
      .hash(&mut h);
    h.finish()
  }
}

/// Job-specific inputs that must influence the output.
trait Fingerprint {
  fn fingerprint(&self, h: &mut DefaultHasher);
}

impl Fingerprint for TextToImageJob {
  fn fingerprint(&self, h: &mut DefaultHasher) {
    self.width.hash(h);
    self.height.hash(h);
    self.embedding.hash(h);
  }
}

impl Fingerprint for InpaintJob {
  fn fingerprint(&self, h: &mut DefaultHasher) {
    self.embedding.hash(h);
    self.image.as_bytes().hash(h);
    self.mask.as_bytes().hash(h);
  }
}

/// Seed immediately before sampling; without a seed every call differs.
fn sampler(key: u64, seed: Option<u64>) -> StdRng {
  match seed {
    Some(seed) => StdRng::seed_from_u64(key ^ seed.rotate_left(17)),
    None => StdRng::from_entropy(),
  }
}

/// A smooth three-colour field perturbed by per-pixel noise. Each step
/// relaxes the noise further; guidance sets how far colours stay apart.
fn paint(rng: &mut StdRng, width: u32, height: u32, sampling: &Sampling) -> RgbImage {
  let palette: [[f64; 3]; 3] =
    std::array::from_fn(|_| std::array::from_fn(|_| rng.gen_range(0.0..255.0)));
  let contrast = (sampling.guidance_scale / 7.5).clamp(0.1, 2.0);
  let noise = 64.0 / f64::from(sampling.steps.max(1)).sqrt();

  RgbImage::from_fn(width, height, |x, y| {
    let u = f64::from(x) / f64::from(width.max(1));
    let v = f64::from(y) / f64::from(height.max(1));
    let mut channel = |c: usize| {
      let base = palette[0][c] * (1.0 - u) + palette[1][c] * u;
      let mixed = base * (1.0 - v) + palette[2][c] * v;
      let centred = 127.5 + (mixed - 127.5) * contrast;
      let jitter = rng.gen_range(-noise..=noise);
      (centred + jitter).clamp(0.0, 255.0) as u8
    };
    Rgb([channel(0), channel(1), channel(2)])
  })
}

#[cfg(test)]
mod tests {
  use image::{GrayImage, Luma};
  use serde_json::Map;

  use super::*;
  use crate::device::Precision;

  const CPU: Placement = Placement { device: Device::Cpu, precision: Precision::Full };

  fn sampling(seed: Option<u64>) -> Sampling {
    Sampling { steps: 10, guidance_scale: 7.5, seed, extra: Map::new() }
  }

  fn text(prompt: &str, seed: Option<u64>) -> SynthesisJob {
    SynthesisJob::TextToImage(TextToImageJob {
      prompt:          prompt.into(),
      negative_prompt: "blurry".into(),
      width:           16,
      height:          12,
      embedding:       None,
      sampling:        sampling(seed),
    })
  }

  fn pipeline(kind: PipelineKind) -> Box<dyn Pipeline> {
    ProceduralBackend.load(kind, "procedural/v1", CPU).unwrap()
  }

  #[test]
  fn seeded_output_is_reproducible() {
    let mut p = pipeline(PipelineKind::TextToImage);
    let a = p.synthesize(&text("portrait", Some(7))).unwrap();
    let b = p.synthesize(&text("portrait", Some(7))).unwrap();
    assert_eq!(a.as_bytes(), b.as_bytes());
    assert_eq!((a.width(), a.height()), (16, 12));

    let other_prompt = p.synthesize(&text("landscape", Some(7))).unwrap();
    assert_ne!(a.as_bytes(), other_prompt.as_bytes());
  }

  #[test]
  fn unseeded_output_differs() {
    let mut p = pipeline(PipelineKind::TextToImage);
    let a = p.synthesize(&text("portrait", None)).unwrap();
    let b = p.synthesize(&text("portrait", None)).unwrap();
    assert_ne!(a.as_bytes(), b.as_bytes());
  }

  #[test]
  fn missing_weights_fail_to_load() {
    let err = ProceduralBackend
      .load(PipelineKind::TextToImage, "missing:sd-v1-5", CPU)
      .err()
      .unwrap();
    assert!(matches!(err, BackendError::MissingWeights(name) if name == "sd-v1-5"));
  }

  #[test]
  fn inpaint_only_touches_masked_pixels() {
    let base = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])));
    let mut mask = GrayImage::new(8, 8);
    for x in 0..4 {
      mask.put_pixel(x, 0, Luma([255]));
    }
    let job = SynthesisJob::Inpaint(InpaintJob {
      prompt:          "red hat".into(),
      negative_prompt: String::new(),
      image:           base,
      mask:            DynamicImage::ImageLuma8(mask),
      embedding:       None,
      sampling:        sampling(Some(3)),
    });

    let out = pipeline(PipelineKind::Inpaint).synthesize(&job).unwrap().to_rgb8();
    for (x, y, pixel) in out.enumerate_pixels() {
      if y != 0 || x >= 4 {
        assert_eq!(*pixel, Rgb([10, 20, 30]), "pixel {x},{y} changed");
      }
    }
  }

  #[test]
  fn inpaint_rejects_mismatched_mask() {
    let job = SynthesisJob::Inpaint(InpaintJob {
      prompt:          "p".into(),
      negative_prompt: String::new(),
      image:           DynamicImage::ImageRgb8(RgbImage::new(8, 8)),
      mask:            DynamicImage::ImageLuma8(GrayImage::new(4, 4)),
      embedding:       None,
      sampling:        sampling(None),
    });
    let err = pipeline(PipelineKind::Inpaint).synthesize(&job).unwrap_err();
    assert!(matches!(err, BackendError::InvalidInput(_)));
  }

  #[test]
  fn pipeline_rejects_other_kind() {
    let err = pipeline(PipelineKind::Inpaint)
      .synthesize(&text("portrait", None))
      .unwrap_err();
    assert!(matches!(err, BackendError::InvalidInput(_)));
  }
}
