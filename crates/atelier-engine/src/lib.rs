//! Generation orchestration for the Atelier studio backend.
//!
//! ```text
//! Orchestrator ──► compose (atelier-core) ──► PipelineAdapter ──► GenerationBackend
//!      │                                                               │
//!      └──────────── StudioStore::record_history ◄── ArtifactStore ◄───┘
//! ```
//!
//! The adapter is an explicitly owned value handed to the orchestrator at
//! construction; there is no process-global pipeline.

pub mod adapter;
pub mod artifacts;
pub mod backend;
pub mod device;
pub mod embedding;
pub mod error;
pub mod orchestrator;
pub mod procedural;
pub mod remote;

pub use adapter::{AdapterConfig, PipelineAdapter, PipelineState};
pub use error::{Error, Result};
pub use orchestrator::{
  GenerationRequest, InpaintRequest, Orchestrator, OrchestratorConfig, StylingRequest,
  UnresolvedLayers,
};
