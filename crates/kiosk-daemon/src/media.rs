//! Serves cached payloads to the renderer.
//!
//! `GET /media/:digest` streams the file behind a [`MediaHandle`] straight
//! from disk, so a renderer that has a `cached` media location never needs
//! the network. The content type is derived from the cache key.
//!
//! [`MediaHandle`]: kiosk_proto::cache::MediaHandle

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::http::HttpState;

pub async fn serve_cached(
    Path(digest): Path<String>,
    State(state): State<HttpState>,
) -> Response {
    let Some(handle) = state.cache.handle_for_digest(&digest).await else {
        debug!("media: {} not cached", digest);
        return StatusCode::NOT_FOUND.into_response();
    };

    let file = match tokio::fs::File::open(&handle.path).await {
        Ok(f) => f,
        Err(e) => {
            warn!("media: cannot open {}: {}", handle.path.display(), e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    (
        [(header::CONTENT_TYPE, content_type(&handle.key))],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

fn content_type(key: &str) -> &'static str {
    if key.starts_with("html-") {
        return "text/html; charset=utf-8";
    }
    let path = key.split(['?', '#']).next().unwrap_or(key);
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::router;
    use axum::http::Request;
    use kiosk_proto::cache::MediaCache;
    use kiosk_proto::state::StateManager;
    use std::sync::Arc;
    use tower::ServiceExt;

    #[test]
    fn content_type_follows_the_key() {
        assert_eq!(content_type("http://cdn/a.PNG"), "image/png");
        assert_eq!(content_type("http://cdn/v.mp4?sig=1"), "video/mp4");
        assert_eq!(content_type("html-12"), "text/html; charset=utf-8");
        assert_eq!(content_type("descriptor:menu/3"), "application/octet-stream");
    }

    #[tokio::test]
    async fn cached_payload_is_streamed_and_unknown_digest_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MediaCache::open(dir.path(), "media").await.unwrap();
        let handle = cache.put("http://cdn/logo.png", b"\x89PNG").await.unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let app = router(HttpState {
            state_manager: Arc::new(StateManager::new(dir.path().join("state.json"))),
            event_tx: tx,
            cache,
        });

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/media/{}", handle.digest))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"\x89PNG");

        let missing = app
            .oneshot(
                Request::get(format!("/media/{}", "0".repeat(64)))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
