//! The Generation Backend Adapter.
//!
//! Owns at most one resident pipeline per [`PipelineKind`]. Each kind has its
//! own slot guarded by an async mutex; loading, synthesis and unloading of a
//! kind all happen under that lock, so two callers never share a pipeline
//! and a load can never race an unload.
//!
//! The lock guard is moved into the blocking task that does the work. If the
//! caller's future is dropped (timeout, client disconnect) the task still
//! runs to completion and releases the slot in a consistent state.

use std::sync::{
  Arc,
  atomic::{AtomicU8, AtomicU64, Ordering},
};

use image::DynamicImage;
use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::{
  Error, Result,
  backend::{BackendError, GenerationBackend, Pipeline, PipelineKind, SynthesisJob},
  device::{DevicePolicy, Placement, Precision},
};

/// Observable lifecycle of one pipeline kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PipelineState {
  Unloaded,
  Loading,
  Ready,
}

impl PipelineState {
  fn from_u8(v: u8) -> Self {
    match v {
      1 => PipelineState::Loading,
      2 => PipelineState::Ready,
      _ => PipelineState::Unloaded,
    }
  }
}

#[derive(Debug, Clone)]
pub struct AdapterConfig {
  /// Model reference handed to [`GenerationBackend::load`].
  pub model:                  String,
  pub device:                 DevicePolicy,
  /// Overrides the device's default precision.
  pub precision:              Option<Precision>,
  /// Consecutive synthesis failures after which a pipeline is unloaded.
  /// `0` disables the policy.
  pub max_synthesis_failures: u32,
}

impl Default for AdapterConfig {
  fn default() -> Self {
    Self {
      model:                  "runwayml/stable-diffusion-v1-5".to_owned(),
      device:                 DevicePolicy::Auto,
      precision:              None,
      max_synthesis_failures: 2,
    }
  }
}

/// Snapshot returned by [`PipelineAdapter::status`].
#[derive(Debug, Clone, Serialize)]
pub struct AdapterStatus {
  pub backend:       String,
  pub model:         String,
  pub placement:     Placement,
  pub text_to_image: PipelineState,
  pub inpaint:       PipelineState,
}

#[derive(Default)]
struct Resident {
  pipeline: Option<Box<dyn Pipeline>>,
  failures: u32,
}

struct Slot {
  kind:     PipelineKind,
  state:    AtomicU8,
  loads:    AtomicU64,
  resident: Arc<Mutex<Resident>>,
}

impl Slot {
  fn new(kind: PipelineKind) -> Self {
    Self {
      kind,
      state: AtomicU8::new(PipelineState::Unloaded as u8),
      loads: AtomicU64::new(0),
      resident: Arc::new(Mutex::new(Resident::default())),
    }
  }

  fn set_state(&self, state: PipelineState) { self.state.store(state as u8, Ordering::SeqCst); }

  fn state(&self) -> PipelineState { PipelineState::from_u8(self.state.load(Ordering::SeqCst)) }
}

/// Shared state moved into blocking tasks.
struct Inner {
  backend:      Arc<dyn GenerationBackend>,
  model:        String,
  placement:    Placement,
  max_failures: u32,
  text:         Slot,
  inpaint:      Slot,
}

/// Lazily loads and serialises access to the text-to-image and inpainting
/// pipelines of one backend. Cheap to clone.
#[derive(Clone)]
pub struct PipelineAdapter {
  inner: Arc<Inner>,
}

impl PipelineAdapter {
  /// Bind `backend` to a placement. Nothing is loaded until the first
  /// synthesis call of each kind.
  pub fn new(backend: Arc<dyn GenerationBackend>, config: AdapterConfig) -> Self {
    let placement = Placement::select(config.device, config.precision, backend.as_ref());
    info!(
      backend = backend.name(),
      model = %config.model,
      %placement,
      "generation adapter configured"
    );
    Self {
      inner: Arc::new(Inner {
        backend,
        model: config.model,
        placement,
        max_failures: config.max_synthesis_failures,
        text: Slot::new(PipelineKind::TextToImage),
        inpaint: Slot::new(PipelineKind::Inpaint),
      }),
    }
  }

  pub fn placement(&self) -> Placement { self.inner.placement }

  pub fn state(&self, kind: PipelineKind) -> PipelineState { self.inner.slot(kind).state() }

  /// How many times `kind` has completed a load since construction.
  pub fn load_count(&self, kind: PipelineKind) -> u64 {
    self.inner.slot(kind).loads.load(Ordering::SeqCst)
  }

  pub fn status(&self) -> AdapterStatus {
    AdapterStatus {
      backend:       self.inner.backend.name().to_owned(),
      model:         self.inner.model.clone(),
      placement:     self.inner.placement,
      text_to_image: self.state(PipelineKind::TextToImage),
      inpaint:       self.state(PipelineKind::Inpaint),
    }
  }

  /// Run `job` on the pipeline of its kind, loading it first if needed.
  ///
  /// Concurrent calls of the same kind wait for each other; calls of
  /// different kinds proceed independently.
  pub async fn synthesize(&self, job: SynthesisJob) -> Result<DynamicImage> {
    let kind = job.kind();
    let guard = self.inner.slot(kind).resident.clone().lock_owned().await;
    let inner = self.inner.clone();
    tokio::task::spawn_blocking(move || inner.run(guard, &job)).await?
  }

  /// Release both pipelines. Safe to call at any time, any number of times.
  ///
  /// Waits for in-flight synthesis of either kind to finish first. Slots are
  /// always locked text-to-image first, then inpaint.
  pub async fn unload(&self) {
    let text = self.inner.text.resident.clone().lock_owned().await;
    let inpaint = self.inner.inpaint.resident.clone().lock_owned().await;
    let inner = self.inner.clone();
    if let Err(err) = tokio::task::spawn_blocking(move || inner.release([text, inpaint])).await {
      warn!(error = %err, "pipeline unload task failed");
    }
  }
}

impl Inner {
  fn slot(&self, kind: PipelineKind) -> &Slot {
    match kind {
      PipelineKind::TextToImage => &self.text,
      PipelineKind::Inpaint => &self.inpaint,
    }
  }

  fn load(&self, slot: &Slot) -> Result<Box<dyn Pipeline>> {
    slot.set_state(PipelineState::Loading);
    info!(
      kind = %slot.kind,
      model = %self.model,
      placement = %self.placement,
      "loading pipeline"
    );

    let loaded = if self.backend.supports(self.placement.device) {
      self.backend.load(slot.kind, &self.model, self.placement)
    } else {
      Err(BackendError::UnsupportedDevice(self.placement.device))
    };

    match loaded {
      Ok(pipeline) => {
        slot.loads.fetch_add(1, Ordering::SeqCst);
        slot.set_state(PipelineState::Ready);
        info!(kind = %slot.kind, "pipeline ready");
        Ok(pipeline)
      }
      Err(source) => {
        slot.set_state(PipelineState::Unloaded);
        warn!(kind = %slot.kind, error = %source, "pipeline load failed");
        Err(Error::BackendLoad { kind: slot.kind, source })
      }
    }
  }

  fn release(&self, residents: [OwnedMutexGuard<Resident>; 2]) {
    let mut released = false;
    for (slot, mut resident) in [&self.text, &self.inpaint].into_iter().zip(residents) {
      resident.failures = 0;
      if let Some(pipeline) = resident.pipeline.take() {
        pipeline.unload();
        slot.set_state(PipelineState::Unloaded);
        info!(kind = %slot.kind, "pipeline unloaded");
        released = true;
      }
    }
    if released {
      self.backend.reclaim(self.placement.device);
    }
  }

  fn run(&self, mut resident: OwnedMutexGuard<Resident>, job: &SynthesisJob) -> Result<DynamicImage> {
    let slot = self.slot(job.kind());

    let pipeline = match &mut resident.pipeline {
      Some(pipeline) => pipeline,
      empty => empty.insert(self.load(slot)?),
    };

    match pipeline.synthesize(job) {
      Ok(image) => {
        resident.failures = 0;
        Ok(image)
      }
      Err(source) => {
        resident.failures += 1;
        warn!(
          kind = %slot.kind,
          failures = resident.failures,
          error = %source,
          "synthesis failed"
        );
        if self.max_failures > 0 && resident.failures >= self.max_failures {
          if let Some(pipeline) = resident.pipeline.take() {
            pipeline.unload();
          }
          resident.failures = 0;
          slot.set_state(PipelineState::Unloaded);
          self.backend.reclaim(self.placement.device);
          warn!(kind = %slot.kind, "pipeline unloaded after repeated failures");
        }
        Err(Error::Synthesis { kind: slot.kind, source })
      }
    }
  }
}
