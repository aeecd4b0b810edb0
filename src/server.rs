//! HTTP and websocket transport.
//!
//! One websocket endpoint carries the whole game protocol; two plain HTTP
//! endpoints expose read-only listings. Each socket gets a writer task that
//! drains the connection's outbound queue, so game logic never awaits a
//! network send.
//!
//! The first frame on a socket decides admission: `join`, `create_room`, or
//! `join_room`. A `move` before admission is rejected without touching any
//! registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::message::{ClientMessage, ServerMessage};
use crate::state::connection::ClientHandle;
use crate::state::session::SharedSession;

/// How long a fresh socket has to send its admission message.
const FIRST_MESSAGE_DEADLINE: Duration = Duration::from_secs(30);

/// Interval between websocket keepalive pings.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Read deadline, reset by any inbound frame. Pong replies to the keepalive
/// pings keep a quiet but live connection under this.
const READ_DEADLINE: Duration = Duration::from_secs(75);

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/rooms", get(list_rooms))
        .route("/leaderboard", get(leaderboard))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Bind and serve until the process is stopped.
pub async fn serve(engine: Arc<Engine>) -> anyhow::Result<()> {
    engine.spawn_reaper();
    let addr = SocketAddr::from(([0, 0, 0, 0], engine.config().port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router(engine)).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, engine))
}

async fn list_rooms(State(engine): State<Arc<Engine>>) -> Response {
    Json(engine.waiting_rooms().await).into_response()
}

async fn leaderboard(State(engine): State<Arc<Engine>>) -> Response {
    match engine.leaderboard() {
        Ok(leaderboard) => Json(leaderboard).into_response(),
        Err(err) => {
            warn!(%err, "leaderboard read failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "store unavailable" })),
            )
                .into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, engine: Arc<Engine>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Writer task: drains the outbound queue and keeps the socket alive.
    // Exits when every sender (the handle clones held by the registries and
    // this function) is gone.
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await; // immediate first tick
        loop {
            tokio::select! {
                queued = rx.recv() => {
                    let Some(message) = queued else { break };
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(%err, "failed to encode outbound message");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let handle = admit(&engine, &mut stream, &tx).await;
    if let Some(handle) = &handle {
        read_loop(&engine, &mut stream, handle).await;
        engine.disconnect(&handle.username).await;
    }

    // Let any queued error payload flush before the socket drops.
    drop(handle);
    drop(tx);
    let _ = writer.await;
}

/// Read the admission message and run it. Returns the admitted handle, or
/// `None` if the socket should close.
async fn admit(
    engine: &Arc<Engine>,
    stream: &mut SplitStream<WebSocket>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
) -> Option<ClientHandle> {
    let first = tokio::time::timeout(FIRST_MESSAGE_DEADLINE, next_text(stream)).await;
    let text = match first {
        Ok(Some(text)) => text,
        Ok(None) => return None,
        Err(_) => {
            debug!("socket sent no admission message before deadline");
            return None;
        }
    };

    let message = match serde_json::from_str::<ClientMessage>(&text) {
        Ok(message) => message,
        Err(err) => {
            debug!(%err, "unparseable admission message");
            send_error(tx, "invalid message");
            return None;
        }
    };

    if !message.admits_connection() {
        send_error(tx, "expected join, create_room, or join_room");
        return None;
    }

    match message {
        ClientMessage::Join { username, game_id } => {
            let handle = ClientHandle::new(username, tx.clone());
            engine.connect(handle.clone()).await;
            engine.join(&handle, game_id).await;
            Some(handle)
        }
        ClientMessage::CreateRoom {
            username,
            room_name,
        } => {
            let handle = ClientHandle::new(username, tx.clone());
            engine.connect(handle.clone()).await;
            engine.create_room(&handle, room_name).await;
            Some(handle)
        }
        ClientMessage::JoinRoom { username, room_id } => {
            let handle = ClientHandle::new(username, tx.clone());
            engine.connect(handle.clone()).await;
            if let Err(err) = engine.join_room(&handle, &room_id).await {
                send_error(tx, &err.to_string());
                engine.disconnect(&handle.username).await;
                return None;
            }
            Some(handle)
        }
        ClientMessage::Move { .. } => None, // rejected above
    }
}

/// Post-admission message loop. The session a connection is playing in is
/// cached once resolved; a `gameId` in the message re-resolves it.
async fn read_loop(
    engine: &Arc<Engine>,
    stream: &mut SplitStream<WebSocket>,
    handle: &ClientHandle,
) {
    let mut current: Option<Arc<SharedSession>> = None;

    while let Some(text) = next_text(stream).await {
        let message = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => message,
            Err(err) => {
                debug!(username = %handle.username, %err, "unparseable message");
                handle.send(ServerMessage::Error {
                    error: "invalid message".to_string(),
                });
                continue;
            }
        };

        match message {
            ClientMessage::Move { game_id, col } => {
                let session = match &game_id {
                    Some(id) => match &current {
                        Some(s) if s.id == *id => Some(s.clone()),
                        _ => engine.find_session(id).await,
                    },
                    None => current.clone(),
                };
                match session {
                    Some(session) => {
                        current = Some(session.clone());
                        engine.apply_move(&session, col).await;
                    }
                    None => handle.send(ServerMessage::Error {
                        error: "game not found".to_string(),
                    }),
                }
            }
            _ => handle.send(ServerMessage::Error {
                error: "unexpected message".to_string(),
            }),
        }
    }
}

/// Next text frame, skipping control frames. `None` when the socket closes
/// or goes silent past the read deadline.
async fn next_text(stream: &mut SplitStream<WebSocket>) -> Option<String> {
    loop {
        let frame = tokio::time::timeout(READ_DEADLINE, stream.next())
            .await
            .ok()??;
        match frame {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

fn send_error(tx: &mpsc::UnboundedSender<ServerMessage>, error: &str) {
    let _ = tx.send(ServerMessage::Error {
        error: error.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::FileEventSink;
    use crate::store::{FileStore, Storage};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_engine(dir: &std::path::Path) -> Arc<Engine> {
        let config = Config {
            data_dir: dir.to_path_buf(),
            ..Config::default()
        };
        let store = FileStore::open(dir).unwrap();
        Engine::new(config, Storage::file_only(store), Box::new(FileEventSink::new(dir)))
    }

    #[tokio::test]
    async fn test_rooms_endpoint_empty() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_engine(dir.path()));

        let response = app
            .oneshot(Request::builder().uri("/rooms").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let rooms: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(rooms, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_leaderboard_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());

        let store = FileStore::open(dir.path()).unwrap();
        use crate::store::GameStore;
        store.increment_winner("alice").unwrap();

        let response = router(engine)
            .oneshot(
                Request::builder()
                    .uri("/leaderboard")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let leaderboard: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(leaderboard["alice"], 1);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_engine(dir.path()));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
