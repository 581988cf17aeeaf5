//! Router tests: every request goes through `api_router` via `oneshot`.

use std::sync::Arc;

use atelier_core::{
  store::StudioStore,
  user::{NewUser, Role, Session},
};
use atelier_engine::{
  AdapterConfig, Orchestrator, OrchestratorConfig, PipelineAdapter,
  artifacts::{ArtifactStore, encode_png},
  embedding::PlaceholderEmbedder,
  procedural::ProceduralBackend,
};
use atelier_store_sqlite::SqliteStore;
use axum::{
  body::Body,
  http::{Request, StatusCode, header},
  response::Response,
};
use chrono::{TimeDelta, Utc};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt as _;

use crate::{
  AppState, api_router,
  auth::{AuthConfig, hash_password, token_digest},
};

const BOUNDARY: &str = "atelier-test-boundary";

struct Harness {
  state: AppState<SqliteStore>,
  admin: String,
  user:  String,
  _dir:  TempDir,
}

impl Harness {
  async fn new() -> Self { Self::with_model("procedural/v1").await }

  async fn with_model(model: &str) -> Self {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let artifacts = ArtifactStore::new(dir.path().join("uploads"), dir.path().join("generated"));
    let adapter = PipelineAdapter::new(
      Arc::new(ProceduralBackend),
      AdapterConfig { model: model.into(), ..AdapterConfig::default() },
    );
    let orchestrator = Orchestrator::new(
      store.clone(),
      adapter,
      artifacts.clone(),
      OrchestratorConfig::default(),
    );

    for (name, role) in [("admin", Role::Admin), ("stylist", Role::User)] {
      store
        .create_user(NewUser {
          username:      name.into(),
          email:         format!("{name}@atelier.test"),
          password_hash: hash_password("secret").unwrap(),
          role,
        })
        .await
        .unwrap();
    }

    let state = AppState {
      store,
      orchestrator,
      artifacts,
      embedder: Arc::new(PlaceholderEmbedder::new(dir.path().join("embeddings"))),
      auth: Arc::new(AuthConfig::default()),
    };
    let mut harness = Self { state, admin: String::new(), user: String::new(), _dir: dir };
    harness.admin = harness.login("admin", "secret").await;
    harness.user = harness.login("stylist", "secret").await;
    harness
  }

  async fn send(&self, req: Request<Body>) -> Response {
    api_router(self.state.clone()).oneshot(req).await.unwrap()
  }

  async fn login(&self, username: &str, password: &str) -> String {
    let resp = self
      .send(
        Request::post("/token")
          .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
          .body(Body::from(format!("username={username}&password={password}")))
          .unwrap(),
      )
      .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["token_type"], "bearer");
    body["access_token"].as_str().unwrap().to_owned()
  }

  async fn call(&self, method: &str, uri: &str, token: &str, body: Option<Value>) -> Response {
    let mut builder = Request::builder()
      .method(method)
      .uri(uri)
      .header(header::AUTHORIZATION, format!("Bearer {token}"));
    let body = match body {
      Some(json) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(json.to_string())
      }
      None => Body::empty(),
    };
    self.send(builder.body(body).unwrap()).await
  }

  async fn multipart(&self, uri: &str, parts: &[Part<'_>]) -> Response {
    let req = Request::post(uri)
      .header(header::AUTHORIZATION, format!("Bearer {}", self.user))
      .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
      .body(Body::from(multipart_body(parts)))
      .unwrap();
    self.send(req).await
  }

  async fn client(&self) -> String {
    let resp = self
      .call("POST", "/clients", &self.user, Some(json!({ "name": "Maison Vale" })))
      .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    json_body(resp).await["client_id"].as_str().unwrap().to_owned()
  }

  async fn model(&self) -> String {
    let client_id = self.client().await;
    let png = png(8, 8);
    let resp = self
      .multipart("/models", &[
        Part::Text("name", "Mara"),
        Part::Text("client_id", &client_id),
        Part::File("files", "front.png", &png),
      ])
      .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    json_body(resp).await["identity_id"].as_str().unwrap().to_owned()
  }

  fn upload_count(&self) -> usize {
    std::fs::read_dir(self.state.artifacts.uploads_dir())
      .map(|entries| entries.count())
      .unwrap_or(0)
  }
}

enum Part<'a> {
  Text(&'a str, &'a str),
  File(&'a str, &'a str, &'a [u8]),
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
  let mut body = Vec::new();
  for part in parts {
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    match part {
      Part::Text(name, value) => {
        body.extend_from_slice(
          format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
      }
      Part::File(name, file_name, bytes) => {
        body.extend_from_slice(
          format!(
            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
          )
          .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
      }
    }
  }
  body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
  body
}

fn png(width: u32, height: u32) -> Vec<u8> {
  encode_png(&DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 80, 120]))))
    .unwrap()
}

fn mask_png(width: u32, height: u32) -> Vec<u8> {
  let mut mask = GrayImage::new(width, height);
  mask.put_pixel(0, 0, Luma([255]));
  encode_png(&DynamicImage::ImageLuma8(mask)).unwrap()
}

async fn json_body(resp: Response) -> Value {
  let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
  serde_json::from_slice(&bytes).unwrap()
}

fn small_settings() -> Value {
  json!({ "width": 16, "height": 16, "num_inference_steps": 2, "seed": 11 })
}

// ── Health and auth ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_needs_no_token() {
  let h = Harness::new().await;
  let resp = h.send(Request::get("/health").body(Body::empty()).unwrap()).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = json_body(resp).await;
  assert_eq!(body["status"], "ok");
  assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn protected_routes_reject_missing_token() {
  let h = Harness::new().await;
  let resp = h.send(Request::get("/clients").body(Body::empty()).unwrap()).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  assert_eq!(resp.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
  assert!(json_body(resp).await["error"].is_string());

  let resp = h.call("GET", "/clients", "not-a-token", None).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
  let h = Harness::new().await;
  let resp = h
    .send(
      Request::post("/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("username=admin&password=guess"))
        .unwrap(),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn only_the_token_digest_is_stored() {
  let h = Harness::new().await;
  assert!(h.state.store.find_session(&h.user).await.unwrap().is_none());
  let session = h.state.store.find_session(&token_digest(&h.user)).await.unwrap().unwrap();
  assert!(session.expires_at > Utc::now());
}

#[tokio::test]
async fn expired_sessions_are_rejected() {
  let h = Harness::new().await;
  let user = h.state.store.find_user("stylist").await.unwrap().unwrap();
  let issued_at = Utc::now() - TimeDelta::hours(2);
  h.state
    .store
    .create_session(Session {
      token_digest: token_digest("stale-token"),
      user_id: user.user_id,
      issued_at,
      expires_at: issued_at + TimeDelta::minutes(30),
    })
    .await
    .unwrap();

  let resp = h.call("GET", "/users/me", "stale-token", None).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_hides_password_hash() {
  let h = Harness::new().await;
  let resp = h.call("GET", "/users/me", &h.user, None).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = json_body(resp).await;
  assert_eq!(body["username"], "stylist");
  assert_eq!(body["role"], "user");
  assert!(body.get("password_hash").is_none());
}

#[tokio::test]
async fn creating_users_requires_admin() {
  let h = Harness::new().await;
  let new_user = json!({ "username": "intern", "email": "intern@atelier.test", "password": "pw" });

  let resp = h.call("POST", "/users", &h.user, Some(new_user.clone())).await;
  assert_eq!(resp.status(), StatusCode::FORBIDDEN);

  let resp = h.call("POST", "/users", &h.admin, Some(new_user.clone())).await;
  assert_eq!(resp.status(), StatusCode::CREATED);

  let resp = h.call("POST", "/users", &h.admin, Some(new_user)).await;
  assert_eq!(resp.status(), StatusCode::CONFLICT);

  assert!(!h.login("intern", "pw").await.is_empty());
}

// ── Clients ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn client_crud() {
  let h = Harness::new().await;
  let id = h.client().await;

  let resp = h
    .call(
      "PUT",
      &format!("/clients/{id}"),
      &h.user,
      Some(json!({ "description": "spring line" })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = json_body(resp).await;
  assert_eq!(body["name"], "Maison Vale");
  assert_eq!(body["description"], "spring line");

  h.client().await;
  let resp = h.call("GET", "/clients?skip=1&limit=5", &h.user, None).await;
  assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);

  let resp = h.call("DELETE", &format!("/clients/{id}"), &h.user, None).await;
  assert_eq!(resp.status(), StatusCode::NO_CONTENT);
  let resp = h.call("GET", &format!("/clients/{id}"), &h.user, None).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  let resp = h.call("DELETE", &format!("/clients/{id}"), &h.user, None).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ── Identities ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn model_upload_creates_embedding() {
  let h = Harness::new().await;
  let client_id = h.client().await;
  let (front, side) = (png(8, 8), png(4, 4));
  let resp = h
    .multipart("/models", &[
      Part::Text("name", "Mara"),
      Part::Text("client_id", &client_id),
      Part::File("files", "front.png", &front),
      Part::File("files", "side.png", &side),
    ])
    .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let body = json_body(resp).await;

  let reference = body["reference_image"].as_str().unwrap();
  assert!(reference.ends_with("front.png"), "{reference}");
  let embedding = body["base_embedding"].as_str().unwrap();
  assert!(tokio::fs::metadata(embedding).await.is_ok());

  let resp = h
    .call("GET", &format!("/models?client_id={client_id}"), &h.user, None)
    .await;
  assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn model_upload_validation() {
  let h = Harness::new().await;
  let png = png(4, 4);

  let missing_client = uuid::Uuid::new_v4().to_string();
  let resp = h
    .multipart("/models", &[
      Part::Text("name", "Mara"),
      Part::Text("client_id", &missing_client),
      Part::File("files", "a.png", &png),
    ])
    .await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);

  let client_id = h.client().await;
  let resp = h
    .multipart("/models", &[Part::Text("name", "Mara"), Part::Text("client_id", &client_id)])
    .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Layers ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn layer_create_and_filter() {
  let h = Harness::new().await;
  for (kind, prompt) in [("hair", "long wavy hair"), ("scene", "paris street")] {
    let resp = h
      .multipart("/layers", &[
        Part::Text("name", prompt),
        Part::Text("type", kind),
        Part::Text("prompt", prompt),
        Part::Text("strength", "0.8"),
      ])
      .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
  }

  let resp = h.call("GET", "/layers?type=hair", &h.user, None).await;
  let layers = json_body(resp).await;
  assert_eq!(layers.as_array().unwrap().len(), 1);
  assert_eq!(layers[0]["kind"], "hair");

  let resp = h.call("GET", "/layers?type=shoes", &h.user, None).await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn layer_validation() {
  let h = Harness::new().await;
  let resp = h
    .multipart("/layers", &[
      Part::Text("name", "x"),
      Part::Text("type", "shoes"),
      Part::Text("prompt", "red boots"),
    ])
    .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

  let resp = h
    .multipart("/layers", &[Part::Text("name", "x"), Part::Text("type", "outfit")])
    .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ── Generation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn generate_records_history() {
  let h = Harness::new().await;
  let model_id = h.model().await;

  let resp = h
    .call(
      "POST",
      "/generate",
      &h.user,
      Some(json!({ "model_id": model_id, "prompt": "portrait", "settings": small_settings() })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = json_body(resp).await;
  let image_path = body["image_path"].as_str().unwrap();
  assert!(tokio::fs::metadata(image_path).await.is_ok());
  let history_id = body["history_id"].as_str().unwrap();

  let resp = h.call("GET", &format!("/histories/{history_id}"), &h.user, None).await;
  let history = json_body(resp).await;
  assert_eq!(history["image_path"], image_path);
  assert_eq!(history["settings"]["seed"], 11);

  let resp = h
    .call("GET", &format!("/histories?model_id={model_id}"), &h.user, None)
    .await;
  assert_eq!(json_body(resp).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn generate_error_statuses() {
  let h = Harness::new().await;
  let resp = h
    .call("POST", "/generate", &h.user, Some(json!({ "model_id": uuid::Uuid::new_v4() })))
    .await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);

  let model_id = h.model().await;
  let resp = h
    .call(
      "POST",
      "/generate",
      &h.user,
      Some(json!({ "model_id": model_id, "settings": { "width": "wide" } })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn load_failure_is_unavailable() {
  let h = Harness::with_model("missing:sd-v1-5").await;
  let model_id = h.model().await;
  let resp = h
    .call(
      "POST",
      "/generate",
      &h.user,
      Some(json!({ "model_id": model_id, "settings": small_settings() })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

  let resp = h.call("GET", "/pipelines", &h.user, None).await;
  assert_eq!(json_body(resp).await["text_to_image"], "unloaded");
}

#[tokio::test]
async fn styling_records_nothing() {
  let h = Harness::new().await;
  let model_id = h.model().await;
  let resp = h
    .call(
      "POST",
      "/styling",
      &h.user,
      Some(json!({
        "model_id": model_id,
        "prompt": "portrait",
        "layers": { "hair": { "prompt": "braids" } },
        "settings": small_settings(),
      })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::OK);
  let body = json_body(resp).await;
  assert!(body.get("history_id").is_none());

  let resp = h.call("GET", "/histories", &h.user, None).await;
  assert!(json_body(resp).await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn inpaint_marks_history() {
  let h = Harness::new().await;
  let model_id = h.model().await;
  let (image, mask) = (png(16, 16), mask_png(16, 16));
  let settings = json!({ "num_inference_steps": 2 }).to_string();
  let uploads = h.upload_count();
  let resp = h
    .multipart("/inpaint", &[
      Part::Text("model_id", &model_id),
      Part::Text("prompt", "red hat"),
      Part::Text("settings", &settings),
      Part::File("image", "base.png", &image),
      Part::File("mask", "mask.png", &mask),
    ])
    .await;
  assert_eq!(resp.status(), StatusCode::OK);
  let history_id = json_body(resp).await["history_id"].as_str().unwrap().to_owned();
  assert_eq!(h.upload_count(), uploads + 2);

  let resp = h.call("GET", &format!("/histories/{history_id}"), &h.user, None).await;
  let history = json_body(resp).await;
  assert_eq!(history["settings"]["inpaint"], true);
  assert_eq!(history["prompt"], "red hat");
}

#[tokio::test]
async fn inpaint_rejects_bad_inputs() {
  let h = Harness::new().await;
  let model_id = h.model().await;
  let (image, mask) = (png(16, 16), mask_png(8, 8));
  let uploads = h.upload_count();

  let resp = h
    .multipart("/inpaint", &[
      Part::Text("model_id", &model_id),
      Part::Text("prompt", "red hat"),
      Part::File("image", "base.png", &image),
      Part::File("mask", "mask.png", &mask),
    ])
    .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

  let resp = h
    .multipart("/inpaint", &[
      Part::Text("model_id", &model_id),
      Part::Text("prompt", "red hat"),
      Part::File("image", "base.png", b"not an image"),
      Part::File("mask", "mask.png", &mask),
    ])
    .await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

  let missing = uuid::Uuid::new_v4().to_string();
  let mask = mask_png(16, 16);
  let resp = h
    .multipart("/inpaint", &[
      Part::Text("model_id", &missing),
      Part::Text("prompt", "red hat"),
      Part::File("image", "base.png", &image),
      Part::File("mask", "mask.png", &mask),
    ])
    .await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);

  assert_eq!(h.upload_count(), uploads);
}

#[tokio::test]
async fn unload_is_admin_only() {
  let h = Harness::new().await;
  let model_id = h.model().await;
  h.call(
    "POST",
    "/generate",
    &h.user,
    Some(json!({ "model_id": model_id, "settings": small_settings() })),
  )
  .await;

  let resp = h.call("GET", "/pipelines", &h.user, None).await;
  let status = json_body(resp).await;
  assert_eq!(status["text_to_image"], "ready");
  assert_eq!(status["inpaint"], "unloaded");

  let resp = h.call("POST", "/pipelines/unload", &h.user, None).await;
  assert_eq!(resp.status(), StatusCode::FORBIDDEN);

  let resp = h.call("POST", "/pipelines/unload", &h.admin, None).await;
  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(json_body(resp).await["text_to_image"], "unloaded");
}

// ── Lookbooks ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn lookbook_entries_in_order() {
  let h = Harness::new().await;
  let model_id = h.model().await;
  let client_id = h.state.store.get_identity(model_id.parse().unwrap()).await.unwrap().unwrap().client_id;

  let resp = h
    .call(
      "POST",
      "/lookbooks",
      &h.user,
      Some(json!({ "client_id": client_id, "name": "SS27" })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let lookbook_id = json_body(resp).await["lookbook_id"].as_str().unwrap().to_owned();

  let mut histories = Vec::new();
  for _ in 0..2 {
    let resp = h
      .call(
        "POST",
        "/generate",
        &h.user,
        Some(json!({ "model_id": model_id, "settings": small_settings() })),
      )
      .await;
    histories.push(json_body(resp).await["history_id"].as_str().unwrap().to_owned());
  }

  for (order, history_id) in [(2, &histories[0]), (1, &histories[1])] {
    let resp = h
      .call(
        "POST",
        &format!("/lookbooks/{lookbook_id}/entries"),
        &h.user,
        Some(json!({ "history_id": history_id, "order": order, "notes": "look" })),
      )
      .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
  }

  let resp = h
    .call("GET", &format!("/lookbooks/{lookbook_id}/entries"), &h.user, None)
    .await;
  let entries = json_body(resp).await;
  assert_eq!(entries[0]["history_id"].as_str().unwrap(), histories[1]);
  assert_eq!(entries[1]["order"], 2);

  let resp = h
    .call(
      "POST",
      &format!("/lookbooks/{lookbook_id}/entries"),
      &h.user,
      Some(json!({ "history_id": uuid::Uuid::new_v4(), "order": 3 })),
    )
    .await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);

  let resp = h
    .call("GET", &format!("/lookbooks/{}/entries", uuid::Uuid::new_v4()), &h.user, None)
    .await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
