//! In-process stand-in for the content API and media host.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

#[derive(Default)]
struct Inner {
    playlist: Mutex<Value>,
    menu: Mutex<Value>,
    /// Status and message returned instead of the descriptor.
    descriptor_error: Mutex<Option<(u16, String)>>,
    broken_media: Mutex<HashSet<String>>,
    media_hits: Mutex<HashMap<String, usize>>,
    media_total: AtomicUsize,
    descriptor_total: AtomicUsize,
    last_auth: Mutex<Option<String>>,
}

#[derive(Clone)]
pub struct FakeApi {
    pub addr: SocketAddr,
    inner: Arc<Inner>,
}

impl FakeApi {
    pub async fn start() -> Self {
        let inner = Arc::new(Inner::default());
        let app = Router::new()
            .route("/playlist/:id", get(playlist))
            .route("/cardapio/:id", get(menu))
            .route("/files/:name", get(media))
            .with_state(Arc::clone(&inner));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, inner }
    }

    pub fn origin(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Base URL that media `file_url`s are relative to.
    pub fn base_url(&self) -> String {
        format!("http://{}/files", self.addr)
    }

    pub fn media_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url(), name)
    }

    /// Serves a playlist whose items are the given file names, with durations.
    pub fn set_playlist(&self, files: &[(&str, Option<u64>)]) {
        let contents: Vec<Value> = files
            .iter()
            .map(|(name, duration)| {
                json!({
                    "contentType": "file",
                    "duration": duration,
                    "media": {"file_url": name, "file_extension": "png", "file_name": name}
                })
            })
            .collect();
        *self.inner.playlist.lock().unwrap() = json!({
            "data": [{
                "id": 1,
                "name": "Lobby",
                "base_url": self.base_url(),
                "content": Value::Array(contents).to_string()
            }]
        });
    }

    pub fn set_playlist_body(&self, body: Value) {
        *self.inner.playlist.lock().unwrap() = body;
    }

    pub fn set_menu_body(&self, body: Value) {
        *self.inner.menu.lock().unwrap() = body;
    }

    pub fn fail_descriptors(&self, status: u16, message: &str) {
        *self.inner.descriptor_error.lock().unwrap() = Some((status, message.to_string()));
    }

    pub fn heal_descriptors(&self) {
        *self.inner.descriptor_error.lock().unwrap() = None;
    }

    pub fn break_media(&self, name: &str) {
        self.inner.broken_media.lock().unwrap().insert(name.to_string());
    }

    pub fn heal_media(&self) {
        self.inner.broken_media.lock().unwrap().clear();
    }

    pub fn media_requests(&self) -> usize {
        self.inner.media_total.load(Ordering::SeqCst)
    }

    pub fn media_requests_for(&self, name: &str) -> usize {
        self.inner
            .media_hits
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn descriptor_requests(&self) -> usize {
        self.inner.descriptor_total.load(Ordering::SeqCst)
    }

    pub fn last_auth(&self) -> Option<String> {
        self.inner.last_auth.lock().unwrap().clone()
    }
}

fn descriptor_response(inner: &Inner, headers: &HeaderMap, body: &Mutex<Value>) -> Response {
    inner.descriptor_total.fetch_add(1, Ordering::SeqCst);
    *inner.last_auth.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some((status, message)) = inner.descriptor_error.lock().unwrap().clone() {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, Json(json!({ "message": message }))).into_response();
    }
    Json(body.lock().unwrap().clone()).into_response()
}

async fn playlist(
    Path(_id): Path<String>,
    headers: HeaderMap,
    State(inner): State<Arc<Inner>>,
) -> Response {
    descriptor_response(&inner, &headers, &inner.playlist)
}

async fn menu(
    Path(_id): Path<String>,
    headers: HeaderMap,
    State(inner): State<Arc<Inner>>,
) -> Response {
    descriptor_response(&inner, &headers, &inner.menu)
}

async fn media(Path(name): Path<String>, State(inner): State<Arc<Inner>>) -> Response {
    inner.media_total.fetch_add(1, Ordering::SeqCst);
    *inner.media_hits.lock().unwrap().entry(name.clone()).or_default() += 1;
    if inner.broken_media.lock().unwrap().contains(&name) {
        return StatusCode::NOT_FOUND.into_response();
    }
    format!("bytes of {name}").into_response()
}
