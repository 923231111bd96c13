//! In-process registry for integration tests
//!
//! Serves the registry's JSON API and signed blob URLs from an axum router
//! bound to `127.0.0.1:0`. Every request is counted, so tests can assert
//! that offline operations made no network calls.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use model_bazaar::ClientConfig;
use model_bazaar::models::{create_archive, hash_tree, size_of_tree};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::task::JoinHandle;

pub const EMAIL: &str = "alice@example.com";
pub const PASSWORD: &str = "hunter2";
pub const USERNAME: &str = "alice";
pub const USER_ID: &str = "u-alice";
const TOKEN: &str = "token-alice";
/// `alice@example.com:hunter2`
const BASIC: &str = "Basic YWxpY2VAZXhhbXBsZS5jb206aHVudGVyMg==";

/// A published artifact as the registry stores it
#[derive(Debug, Clone)]
pub struct FixtureModel {
    pub entry: Value,
    pub archive: Vec<u8>,
    /// Overrides the archive length the registry declares on resolve
    pub declared_archive_size: Option<u64>,
}

impl FixtureModel {
    /// Pack `files` into an archive and describe it with a matching entry
    pub fn build(identifier: &str, access_level: &str, files: &[(&str, Vec<u8>)]) -> Self {
        let source = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = source.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }

        let work = tempfile::tempdir().unwrap();
        let archive_path = work.path().join("archive.zip");
        create_archive(source.path(), &archive_path).unwrap();

        let hash = hash_tree(source.path()).unwrap();
        let size = size_of_tree(source.path()).unwrap();

        Self {
            entry: entry_json(identifier, access_level, &hash, size),
            archive: std::fs::read(archive_path).unwrap(),
            declared_archive_size: None,
        }
    }

    pub fn identifier(&self) -> &str {
        self.entry["saved_path"].as_str().unwrap()
    }

    pub fn hash(&self) -> &str {
        self.entry["hash"].as_str().unwrap()
    }

    pub fn size(&self) -> u64 {
        self.entry["size"].as_u64().unwrap()
    }

    fn visible(&self, authenticated: bool) -> bool {
        match self.entry["access_level"].as_str().unwrap_or("public") {
            "public" => true,
            "protected" => authenticated,
            _ => authenticated && self.entry["author_username"] == USERNAME,
        }
    }
}

pub fn entry_json(identifier: &str, access_level: &str, hash: &str, size: u64) -> Value {
    let (author, model) = identifier.split_once('/').unwrap();
    json!({
        "model_name": model,
        "trained_on": "wikipedia",
        "num_params": 1000,
        "size": size,
        "size_in_memory": size * 4,
        "hash": hash,
        "saved_path": identifier,
        "domain": "example.com",
        "description": null,
        "is_indexed": false,
        "publish_date": "2024-01-15",
        "author_email": format!("{}@example.com", author),
        "author_username": author,
        "access_level": access_level,
        "schema_version": "0.4.0"
    })
}

/// Deterministic incompressible bytes
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

#[derive(Default)]
struct FixtureState {
    root: OnceLock<String>,
    requests: AtomicUsize,
    downloads: AtomicUsize,
    models: Mutex<HashMap<String, FixtureModel>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    registered: Mutex<Vec<Value>>,
}

impl FixtureState {
    fn root(&self) -> &str {
        self.root.get().map(String::as_str).unwrap_or_default()
    }
}

pub struct FixtureRegistry {
    state: Arc<FixtureState>,
    root: String,
    handle: JoinHandle<()>,
}

impl FixtureRegistry {
    pub async fn start() -> Self {
        let state = Arc::new(FixtureState::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let root = format!("http://{}", listener.local_addr().unwrap());
        state.root.set(root.clone()).unwrap();

        let app = router(state.clone());
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            root,
            handle,
        }
    }

    pub fn api_url(&self) -> String {
        format!("{}/api/", self.root)
    }

    /// Client configuration pointing at this registry with a small block size
    pub fn config(&self, cache_dir: &std::path::Path) -> ClientConfig {
        ClientConfig {
            base_url: self.api_url(),
            cache_dir: cache_dir.to_path_buf(),
            block_size_bytes: 4096,
            request_timeout_secs: 10,
            connect_timeout_secs: 5,
            ..Default::default()
        }
    }

    pub fn add(&self, model: FixtureModel) {
        let identifier = model.identifier().to_string();
        self.state.models.lock().unwrap().insert(identifier, model);
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.state.models.lock().unwrap().contains_key(identifier)
    }

    /// Every request served so far
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Archive downloads served so far
    pub fn downloads(&self) -> usize {
        self.state.downloads.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.state.blobs.lock().unwrap().len()
    }

    pub fn registered(&self) -> Vec<Value> {
        self.state.registered.lock().unwrap().clone()
    }
}

impl Drop for FixtureRegistry {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn router(state: Arc<FixtureState>) -> Router {
    Router::new()
        .route("/api/user/email-login", get(login))
        .route("/api/user/email-signup-basic", post(signup))
        .route("/api/bazaar/public-list", get(public_list))
        .route("/api/bazaar/{uid}/list", get(user_list))
        .route("/api/bazaar/model", get(public_lookup))
        .route("/api/bazaar/{uid}/model", get(user_lookup))
        .route("/api/bazaar/public-download", get(public_download))
        .route("/api/bazaar/{uid}/download", get(user_download))
        .route("/api/bazaar/{uid}/model-check", get(model_check))
        .route("/api/bazaar/{uid}/upload-url", get(upload_url))
        .route("/api/bazaar/{uid}/upload-info", post(upload_info))
        .route("/api/bazaar/{uid}/delete", post(delete))
        .route("/files/{author}/{model}", get(archive))
        .route("/blob/{name}", put(blob))
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .with_state(state)
}

async fn count_requests(State(state): State<Arc<FixtureState>>, request: Request, next: Next) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    next.run(request).await
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn authorize(headers: &HeaderMap, uid: &str) -> Result<(), Response> {
    let bearer = format!("Bearer {}", TOKEN);
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if uid == USER_ID && header == Some(bearer.as_str()) {
        Ok(())
    } else {
        Err(error(StatusCode::UNAUTHORIZED, "Invalid token"))
    }
}

async fn login(headers: HeaderMap) -> Response {
    match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(BASIC) => Json(json!({
            "data": { "access_token": TOKEN, "user": { "user_id": USER_ID, "username": USERNAME } }
        }))
        .into_response(),
        _ => error(StatusCode::UNAUTHORIZED, "Invalid email or password"),
    }
}

async fn signup(Json(body): Json<Value>) -> Response {
    if body["email"] == EMAIL {
        return error(StatusCode::CONFLICT, "Email already registered");
    }
    Json(json!({ "message": "Check your email" })).into_response()
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    name: String,
}

fn listing(state: &FixtureState, authenticated: bool, name: &str) -> Value {
    let models = state.models.lock().unwrap();
    let mut entries: Vec<Value> = models
        .values()
        .filter(|m| m.visible(authenticated))
        .filter(|m| {
            m.entry["model_name"]
                .as_str()
                .unwrap_or_default()
                .to_lowercase()
                .contains(&name.to_lowercase())
        })
        .map(|m| m.entry.clone())
        .collect();
    entries.sort_by(|a, b| a["saved_path"].as_str().cmp(&b["saved_path"].as_str()));

    // A broken record and a null must not hide the rest of the catalog
    entries.push(json!({ "model_name": 5, "saved_path": "broken" }));
    entries.push(Value::Null);
    json!({ "data": entries })
}

async fn public_list(State(state): State<Arc<FixtureState>>, Query(q): Query<ListQuery>) -> Response {
    Json(listing(&state, false, &q.name)).into_response()
}

async fn user_list(
    State(state): State<Arc<FixtureState>>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> Response {
    if let Err(e) = authorize(&headers, &uid) {
        return e;
    }
    Json(listing(&state, true, &q.name)).into_response()
}

#[derive(Deserialize)]
struct ModelQuery {
    saved_path: String,
}

fn find(state: &FixtureState, saved_path: &str, authenticated: bool) -> Option<FixtureModel> {
    state
        .models
        .lock()
        .unwrap()
        .get(saved_path)
        .filter(|m| m.visible(authenticated))
        .cloned()
}

fn lookup_response(state: &FixtureState, saved_path: &str, authenticated: bool) -> Response {
    match find(state, saved_path, authenticated) {
        Some(model) => Json(json!({ "data": model.entry })).into_response(),
        None => error(StatusCode::NOT_FOUND, "Model not found"),
    }
}

async fn public_lookup(State(state): State<Arc<FixtureState>>, Query(q): Query<ModelQuery>) -> Response {
    lookup_response(&state, &q.saved_path, false)
}

async fn user_lookup(
    State(state): State<Arc<FixtureState>>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    Query(q): Query<ModelQuery>,
) -> Response {
    if let Err(e) = authorize(&headers, &uid) {
        return e;
    }
    lookup_response(&state, &q.saved_path, true)
}

fn download_response(state: &FixtureState, saved_path: &str, authenticated: bool) -> Response {
    let Some(model) = find(state, saved_path, authenticated) else {
        return error(StatusCode::NOT_FOUND, "Model not found");
    };
    let mut data = model.entry.clone();
    data["url"] = json!(format!("{}/files/{}?sig=secret", state.root(), saved_path));
    if let Some(size) = model.declared_archive_size {
        data["archive_size"] = json!(size);
    }
    Json(json!({ "data": data })).into_response()
}

async fn public_download(State(state): State<Arc<FixtureState>>, Query(q): Query<ModelQuery>) -> Response {
    download_response(&state, &q.saved_path, false)
}

async fn user_download(
    State(state): State<Arc<FixtureState>>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    Query(q): Query<ModelQuery>,
) -> Response {
    if let Err(e) = authorize(&headers, &uid) {
        return e;
    }
    download_response(&state, &q.saved_path, true)
}

async fn archive(State(state): State<Arc<FixtureState>>, Path((author, model)): Path<(String, String)>) -> Response {
    state.downloads.fetch_add(1, Ordering::SeqCst);
    let identifier = format!("{}/{}", author, model);
    match state.models.lock().unwrap().get(&identifier) {
        Some(model) => model.archive.clone().into_response(),
        None => error(StatusCode::NOT_FOUND, "Blob not found"),
    }
}

#[derive(Deserialize)]
struct HashQuery {
    hash: String,
}

async fn model_check(
    State(state): State<Arc<FixtureState>>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    Query(q): Query<HashQuery>,
) -> Response {
    if let Err(e) = authorize(&headers, &uid) {
        return e;
    }
    let present = state
        .models
        .lock()
        .unwrap()
        .values()
        .any(|m| m.entry["author_username"] == USERNAME && m.entry["hash"] == q.hash.as_str());
    Json(json!({ "data": { "model_present": present } })).into_response()
}

#[derive(Deserialize)]
struct UploadQuery {
    name: String,
    size: u64,
}

async fn upload_url(
    State(state): State<Arc<FixtureState>>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    Query(q): Query<UploadQuery>,
) -> Response {
    if let Err(e) = authorize(&headers, &uid) {
        return e;
    }
    let url = format!("{}/blob/{}?sig=secret&size={}", state.root(), q.name, q.size);
    Json(json!({ "data": { "url": url } })).into_response()
}

async fn blob(
    State(state): State<Arc<FixtureState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if headers.get("x-ms-blob-type").and_then(|v| v.to_str().ok()) != Some("BlockBlob") {
        return error(StatusCode::BAD_REQUEST, "Missing blob type");
    }
    state.blobs.lock().unwrap().insert(name, body.to_vec());
    StatusCode::CREATED.into_response()
}

async fn upload_info(
    State(state): State<Arc<FixtureState>>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(e) = authorize(&headers, &uid) {
        return e;
    }
    let name = body["name"].as_str().unwrap_or_default().to_string();
    let Some(archive) = state.blobs.lock().unwrap().get(&name).cloned() else {
        return error(StatusCode::BAD_REQUEST, "No upload for this name");
    };

    let identifier = format!("{}/{}", USERNAME, name);
    let mut entry = entry_json(
        &identifier,
        body["access_level"].as_str().unwrap_or("public"),
        body["hash"].as_str().unwrap_or_default(),
        body["size"].as_u64().unwrap_or_default(),
    );
    for key in ["trained_on", "num_params", "size_in_memory", "description", "is_indexed", "schema_version"] {
        entry[key] = body[key].clone();
    }
    entry["author_email"] = json!(EMAIL);

    state.registered.lock().unwrap().push(body);
    state.models.lock().unwrap().insert(
        identifier,
        FixtureModel {
            entry,
            archive,
            declared_archive_size: None,
        },
    );
    Json(json!({ "message": "Upload info saved", "data": {} })).into_response()
}

async fn delete(
    State(state): State<Arc<FixtureState>>,
    Path(uid): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ModelQuery>,
) -> Response {
    if let Err(e) = authorize(&headers, &uid) {
        return e;
    }
    match state.models.lock().unwrap().remove(&body.saved_path) {
        Some(_) => Json(json!({ "message": "Deleted", "data": {} })).into_response(),
        None => error(StatusCode::NOT_FOUND, "Model not found"),
    }
}
