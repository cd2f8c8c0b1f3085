//! RoomRelay 시그널링 / 드로잉 중계 서버

mod auth;
mod call;
mod config;
mod error;
mod handlers;
mod protocol;
mod relay;
mod state;

use anyhow::Context;
use auth::{ConnectParams, Identity};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{HeaderValue, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use config::Config;
use futures::{SinkExt, StreamExt};
use protocol::ServerMessage;
use state::AppState;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = Arc::new(AppState::from_config(config.clone()));

    // 방 정리 스케줄러
    let cleanup_state = state.clone();
    let cleanup_every = std::time::Duration::from_secs(config.room.cleanup_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_every);
        loop {
            interval.tick().await;
            handlers::cleanup_rooms(cleanup_state.clone()).await;
        }
    });

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&config.cors_origins)),
    );

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("RoomRelay server started");
    tracing::info!("Address: {}", addr);
    tracing::info!("WebSocket: ws://{}/ws/room/{{room_id}}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws/room/:room_id", get(ws_handler))
        .route("/ws/video/:room_id", get(ws_handler))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn index_handler() -> Html<&'static str> {
    Html("<h1>RoomRelay Server</h1><p>WebSocket endpoints: /ws/room/{room_id}, /ws/video/{room_id}</p>")
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "server": "roomrelay",
        "rooms": state.rooms.len(),
        "connections": state.connection_count(),
        "timestamp": std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let room_id = room_id.trim().to_string();
    if !state.directory.admits(&room_id) {
        tracing::warn!(room_id = %room_id, "Refused connection to unauthorized room");
        return (StatusCode::FORBIDDEN, "room not available").into_response();
    }

    let identity = match state.authenticator.authenticate(&room_id, &params) {
        Ok(identity) => identity,
        Err(err) => {
            tracing::warn!(room_id = %room_id, error = %err, "Refused connection");
            return (StatusCode::FORBIDDEN, err.to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, identity))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, room_id: String, identity: Identity) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.config.connection.outbound_buffer);

    // 연결 처리
    let mut session = match handlers::handle_connection(&state, &room_id, identity, tx).await {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(room_id = %room_id, error = %err, "Join refused");
            if let Ok(json) = serde_json::to_string(&ServerMessage::error(&err)) {
                let _ = ws_sender.send(Message::Text(json)).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    // 송신 태스크. 한 프레임이라도 제한 시간 안에 못 보내면 연결을 끊는다.
    let send_timeout = state.config.connection.send_timeout();
    let writer_id = session.client_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(err) => {
                    tracing::warn!(client_id = %writer_id, error = %err, "Failed to encode frame");
                    continue;
                }
            };
            match tokio::time::timeout(send_timeout, ws_sender.send(Message::Text(json))).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::debug!(client_id = %writer_id, error = %err, "Socket write failed");
                    break;
                }
                Err(_) => {
                    tracing::warn!(client_id = %writer_id, "Socket write timed out, closing");
                    break;
                }
            }
        }
    });

    // 수신 처리
    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handlers::handle_text(&state, &mut session, &text).await;
                }
                Some(Ok(Message::Binary(_))) => handlers::handle_binary(&session),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    tracing::debug!(client_id = %session.client_id, error = %err, "Socket read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = &mut send_task => break,
        }
    }

    // 연결 해제
    handlers::handle_disconnect(&state, &session).await;
    send_task.abort();
}
