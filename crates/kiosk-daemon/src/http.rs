//! Local control surface for the renderer.
//!
//! `GET /api/state` returns the full snapshot; the POST routes turn into
//! [`Command`]s on the core's event channel. Cached payloads are served from
//! `/media/:digest` (see [`crate::media`]).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use kiosk_proto::cache::MediaCache;
use kiosk_proto::protocol::{Command, Target};
use kiosk_proto::state::StateManager;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::core::DaemonEvent;
use crate::media;

#[derive(Clone)]
pub struct HttpState {
    pub state_manager: Arc<StateManager>,
    pub event_tx: mpsc::Sender<DaemonEvent>,
    pub cache: MediaCache,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/select/playlist/:id", post(select_playlist))
        .route("/api/select/menu/:id", post(select_menu))
        .route("/api/retry", post(retry))
        .route("/api/exit", post(exit))
        .route("/api/refresh", post(refresh))
        .route("/media/:digest", get(media::serve_cached))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("HTTP API: failed to bind {}: {}", addr, e);
                return;
            }
        };
        info!("HTTP API listening on http://{}", addr);
        if let Err(e) = axum::serve(listener, router(state)).await {
            error!("HTTP API: server error: {}", e);
        }
    })
}

async fn get_state(State(state): State<HttpState>) -> impl IntoResponse {
    Json(state.state_manager.get_state().await)
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    match state.event_tx.send(DaemonEvent::ClientCommand(cmd)).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn select_playlist(Path(id): Path<String>, State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Select {
        target: Target::Playlist { id },
    })
    .await
}

async fn select_menu(Path(id): Path<String>, State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Select {
        target: Target::Menu { id },
    })
    .await
}

async fn retry(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Retry).await
}

async fn exit(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Exit).await
}

async fn refresh(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Refresh).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use kiosk_proto::protocol::DaemonState;
    use tower::ServiceExt;

    async fn fixture() -> (HttpState, mpsc::Receiver<DaemonEvent>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel(8);
        let state = HttpState {
            state_manager: Arc::new(StateManager::new(dir.path().join("state.json"))),
            event_tx: tx,
            cache: MediaCache::open(dir.path(), "media").await.unwrap(),
        };
        (state, rx, dir)
    }

    #[tokio::test]
    async fn state_endpoint_returns_snapshot() {
        let (state, _rx, _dir) = fixture().await;
        let response = router(state)
            .oneshot(Request::get("/api/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let snapshot: DaemonState = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(snapshot.rev, 1);
        assert!(snapshot.target.is_none());
    }

    #[tokio::test]
    async fn select_menu_forwards_a_command() {
        let (state, mut rx, _dir) = fixture().await;
        let response = router(state)
            .oneshot(
                Request::post("/api/select/menu/42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        match rx.recv().await.unwrap() {
            DaemonEvent::ClientCommand(Command::Select { target }) => {
                assert_eq!(target, Target::Menu { id: "42".into() })
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn commands_fail_when_core_is_gone() {
        let (state, rx, _dir) = fixture().await;
        drop(rx);
        let response = router(state)
            .oneshot(Request::post("/api/retry").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
