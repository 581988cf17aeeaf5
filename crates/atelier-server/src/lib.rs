//! Wiring for the Atelier server binary.
//!
//! Turns a [`ServerConfig`] into a running application: opens the store,
//! binds the generation backend to a device, builds the orchestrator and
//! mounts the API router behind tracing (and optionally timeout) layers.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::{Context as _, bail};
use atelier_api::{AppState, AuthConfig};
use atelier_core::{
  compose::Weighting,
  store::StudioStore,
  user::{NewUser, Role},
};
use atelier_engine::{
  AdapterConfig, Orchestrator, OrchestratorConfig, PipelineAdapter, UnresolvedLayers,
  artifacts::ArtifactStore,
  backend::GenerationBackend,
  device::{DevicePolicy, Precision},
  embedding::PlaceholderEmbedder,
  procedural::ProceduralBackend,
  remote::RemoteBackend,
};
use atelier_store_sqlite::SqliteStore;
use axum::Router;
use chrono::TimeDelta;
use serde::Deserialize;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `ATELIER_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                 String,
  #[serde(default = "default_port")]
  pub port:                 u16,
  #[serde(default = "default_store_path")]
  pub store_path:           PathBuf,
  #[serde(default = "default_uploads_dir")]
  pub uploads_dir:          PathBuf,
  #[serde(default = "default_generated_dir")]
  pub generated_dir:        PathBuf,
  #[serde(default = "default_embeddings_dir")]
  pub embeddings_dir:       PathBuf,
  /// Account created at startup when it does not exist yet.
  pub admin_username:       Option<String>,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub admin_password_hash:  Option<String>,
  pub admin_email:          Option<String>,
  #[serde(default = "default_token_ttl")]
  pub token_ttl_minutes:    i64,
  pub request_timeout_secs: Option<u64>,
  #[serde(default)]
  pub generation:           GenerationConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
  #[default]
  Procedural,
  Remote,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
  #[serde(default)]
  pub backend:                BackendKind,
  #[serde(default = "default_model")]
  pub model:                  String,
  #[serde(default)]
  pub device:                 DevicePolicy,
  pub precision:              Option<Precision>,
  pub remote_url:             Option<String>,
  pub remote_timeout_secs:    Option<u64>,
  #[serde(default)]
  pub unresolved_layers:      UnresolvedLayers,
  #[serde(default)]
  pub prompt_weighting:       bool,
  #[serde(default = "default_max_failures")]
  pub max_synthesis_failures: u32,
}

impl Default for GenerationConfig {
  fn default() -> Self {
    Self {
      backend:                BackendKind::default(),
      model:                  default_model(),
      device:                 DevicePolicy::default(),
      precision:              None,
      remote_url:             None,
      remote_timeout_secs:    None,
      unresolved_layers:      UnresolvedLayers::default(),
      prompt_weighting:       false,
      max_synthesis_failures: default_max_failures(),
    }
  }
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 8000 }
fn default_store_path() -> PathBuf { PathBuf::from("atelier.db") }
fn default_uploads_dir() -> PathBuf { PathBuf::from("uploads") }
fn default_generated_dir() -> PathBuf { PathBuf::from("generated") }
fn default_embeddings_dir() -> PathBuf { PathBuf::from("embeddings") }
fn default_token_ttl() -> i64 { 30 }
fn default_model() -> String { AdapterConfig::default().model }
fn default_max_failures() -> u32 { AdapterConfig::default().max_synthesis_failures }

impl ServerConfig {
  /// Layer the optional TOML file at `path` with `ATELIER_*` environment
  /// variables. Nested keys use a double underscore, e.g.
  /// `ATELIER_GENERATION__DEVICE=cuda:1`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("ATELIER")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise ServerConfig")
  }
}

// ─── Wiring ───────────────────────────────────────────────────────────────────

pub fn backend(cfg: &GenerationConfig) -> anyhow::Result<Arc<dyn GenerationBackend>> {
  Ok(match cfg.backend {
    BackendKind::Procedural => Arc::new(ProceduralBackend),
    BackendKind::Remote => {
      let Some(url) = &cfg.remote_url else {
        bail!("generation.remote_url is required for the remote backend");
      };
      let mut remote = RemoteBackend::new(url.clone());
      if let Some(secs) = cfg.remote_timeout_secs {
        remote = remote.with_timeout(Duration::from_secs(secs));
      }
      Arc::new(remote)
    }
  })
}

/// Build the shared handler state over an opened store.
pub async fn app_state<S>(store: Arc<S>, cfg: &ServerConfig) -> anyhow::Result<AppState<S>>
where
  S: StudioStore + 'static,
{
  let artifacts = ArtifactStore::new(
    expand_tilde(&cfg.uploads_dir),
    expand_tilde(&cfg.generated_dir),
  );
  artifacts
    .ensure_dirs()
    .await
    .context("failed to create artifact directories")?;

  let generation = &cfg.generation;
  let adapter = PipelineAdapter::new(
    backend(generation)?,
    AdapterConfig {
      model:                  generation.model.clone(),
      device:                 generation.device,
      precision:              generation.precision,
      max_synthesis_failures: generation.max_synthesis_failures,
    },
  );
  let orchestrator = Orchestrator::new(
    store.clone(),
    adapter,
    artifacts.clone(),
    OrchestratorConfig {
      unresolved_layers: generation.unresolved_layers,
      weighting:         if generation.prompt_weighting {
        Weighting::Emphasis
      } else {
        Weighting::Ignore
      },
    },
  );

  Ok(AppState {
    store,
    orchestrator,
    artifacts,
    embedder: Arc::new(PlaceholderEmbedder::new(expand_tilde(&cfg.embeddings_dir))),
    auth: Arc::new(AuthConfig { token_ttl: TimeDelta::minutes(cfg.token_ttl_minutes) }),
  })
}

/// Create the configured admin account if it does not exist yet.
///
/// Returns whether an account was created.
pub async fn bootstrap_admin<S: StudioStore>(store: &S, cfg: &ServerConfig) -> anyhow::Result<bool> {
  let (Some(username), Some(password_hash)) = (&cfg.admin_username, &cfg.admin_password_hash)
  else {
    return Ok(false);
  };
  if store.find_user(username).await?.is_some() {
    return Ok(false);
  }

  store
    .create_user(NewUser {
      username:      username.clone(),
      email:         cfg
        .admin_email
        .clone()
        .unwrap_or_else(|| format!("{username}@localhost")),
      password_hash: password_hash.clone(),
      role:          Role::Admin,
    })
    .await
    .with_context(|| format!("failed to create admin account {username:?}"))?;
  info!(user = %username, "created admin account");
  Ok(true)
}

/// Open the SQLite store at the configured path.
pub async fn open_store(cfg: &ServerConfig) -> anyhow::Result<SqliteStore> {
  let store_path = expand_tilde(&cfg.store_path);
  if let Some(parent) = store_path.parent().filter(|p| !p.as_os_str().is_empty()) {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))
}

/// The API router with request tracing and the optional request timeout.
pub fn router<S>(state: AppState<S>, cfg: &ServerConfig) -> Router
where
  S: StudioStore + 'static,
{
  let app = atelier_api::api_router(state).layer(TraceLayer::new_for_http());
  match cfg.request_timeout_secs {
    Some(secs) => app.layer(TimeoutLayer::new(Duration::from_secs(secs))),
    None => app,
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use atelier_api::auth::hash_password;
  use atelier_engine::device::Device;
  use axum::{body::Body, http::Request};
  use tower::ServiceExt as _;

  use super::*;

  fn config(dir: &Path, toml: &str) -> ServerConfig {
    let path = dir.join("config.toml");
    std::fs::write(&path, toml).unwrap();
    ServerConfig::load(&path).unwrap()
  }

  #[test]
  fn defaults_fill_missing_keys() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), "port = 9000\n");
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.host, "127.0.0.1");
    assert_eq!(cfg.token_ttl_minutes, 30);
    assert_eq!(cfg.uploads_dir, PathBuf::from("uploads"));
    assert_eq!(cfg.generation.backend, BackendKind::Procedural);
    assert_eq!(cfg.generation.model, "runwayml/stable-diffusion-v1-5");
    assert_eq!(cfg.generation.device, DevicePolicy::Auto);
    assert_eq!(cfg.generation.max_synthesis_failures, 2);
    assert!(!cfg.generation.prompt_weighting);
  }

  #[test]
  fn generation_table_is_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(
      dir.path(),
      r#"
        [generation]
        backend = "remote"
        remote_url = "http://gpu-box:7860"
        device = "cuda:1"
        precision = "full"
        unresolved_layers = "reject"
        prompt_weighting = true
      "#,
    );
    let generation = &cfg.generation;
    assert_eq!(generation.backend, BackendKind::Remote);
    assert_eq!(generation.device, DevicePolicy::Force(Device::Cuda(1)));
    assert_eq!(generation.precision, Some(Precision::Full));
    assert_eq!(generation.unresolved_layers, UnresolvedLayers::Reject);
    assert!(generation.prompt_weighting);
    assert!(backend(generation).is_ok());
  }

  #[test]
  fn remote_backend_needs_url() {
    let cfg = GenerationConfig { backend: BackendKind::Remote, ..Default::default() };
    assert!(backend(&cfg).is_err());
  }

  #[test]
  fn tilde_expansion() {
    let Ok(home) = std::env::var("HOME") else { return };
    assert_eq!(expand_tilde(Path::new("~/atelier.db")), PathBuf::from(home).join("atelier.db"));
    assert_eq!(expand_tilde(Path::new("/var/atelier.db")), PathBuf::from("/var/atelier.db"));
  }

  #[tokio::test]
  async fn admin_bootstrap_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), "");
    cfg.admin_username = Some("root".into());
    cfg.admin_password_hash = Some(hash_password("secret").unwrap());

    let store = SqliteStore::open_in_memory().await.unwrap();
    assert!(bootstrap_admin(&store, &cfg).await.unwrap());
    assert!(!bootstrap_admin(&store, &cfg).await.unwrap());

    let admin = store.find_user("root").await.unwrap().unwrap();
    assert!(admin.is_admin());
    assert_eq!(admin.email, "root@localhost");
  }

  #[tokio::test]
  async fn wired_router_serves_health() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path(), "request_timeout_secs = 30\n");
    cfg.uploads_dir = dir.path().join("uploads");
    cfg.generated_dir = dir.path().join("generated");
    cfg.embeddings_dir = dir.path().join("embeddings");

    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let state = app_state(store, &cfg).await.unwrap();
    assert!(cfg.generated_dir.is_dir());

    let resp = router(state, &cfg)
      .oneshot(Request::get("/health").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);
  }
}
