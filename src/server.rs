//! ==============================================================================
//! server.rs - dashboard web server
//! ==============================================================================
//!
//! routes:
//!     GET  /ws             push channel (json text frames, see domain.rs)
//!     GET  /api/status     current snapshot
//!     POST /api/settings   targets update {sys?, dia?, hr?, zero?, calib?}
//!     POST /api/zero       capture zero offset from the latest reading
//!     POST /api/calibrate  capture calibration offset from the latest reading
//!     POST /api/connect    report whether the device is linked, or why not
//!     everything else      static dashboard files
//!
//! ==============================================================================

use anyhow::Result;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::domain::{ClientMessage, ServerMessage, SettingsUpdate};
use crate::session::SessionHandle;

pub async fn run_server(config: &ServerConfig, session: SessionHandle) -> Result<()> {
    let app = router(session, &config.static_dir);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("dashboard live at http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(session: SessionHandle, static_dir: &str) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/status", get(status_handler))
        .route("/api/settings", post(settings_handler))
        .route("/api/zero", post(zero_handler))
        .route("/api/calibrate", post(calibrate_handler))
        .route("/api/connect", post(connect_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(session)
}

async fn ws_handler(ws: WebSocketUpgrade, State(session): State<SessionHandle>) -> Response {
    ws.on_upgrade(move |socket| client_loop(socket, session))
}

async fn status_handler(State(session): State<SessionHandle>) -> Response {
    match session.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => unavailable(e),
    }
}

async fn settings_handler(
    State(session): State<SessionHandle>,
    Json(update): Json<SettingsUpdate>,
) -> Response {
    match session.send(ClientMessage::Update(update)).await {
        Ok(_) => Json(serde_json::json!({"success": true})).into_response(),
        Err(e) => unavailable(e),
    }
}

async fn zero_handler(State(session): State<SessionHandle>) -> Response {
    command_reply(&session, ClientMessage::CaptureZero).await
}

async fn calibrate_handler(State(session): State<SessionHandle>) -> Response {
    command_reply(&session, ClientMessage::CaptureCalibration).await
}

async fn connect_handler(State(session): State<SessionHandle>) -> Response {
    command_reply(&session, ClientMessage::Connect).await
}

async fn command_reply(session: &SessionHandle, message: ClientMessage) -> Response {
    match session.send(message).await {
        Ok(Some(reply)) => Json(reply).into_response(),
        Ok(None) => Json(serde_json::json!({"success": true})).into_response(),
        Err(e) => unavailable(e),
    }
}

fn unavailable(e: anyhow::Error) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({"status": "error", "message": e.to_string()})),
    )
        .into_response()
}

/// one dashboard connection: replay the snapshot, then relay both directions
async fn client_loop(mut socket: WebSocket, session: SessionHandle) {
    // subscribe before the snapshot so nothing falls in between
    let mut updates = session.subscribe();

    let snapshot = match session.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(_) => return,
    };
    for message in snapshot.replay() {
        if send_json(&mut socket, &message).await.is_err() {
            return;
        }
    }
    info!("dashboard client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let message = match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => message,
                        Err(e) => {
                            debug!("ignoring malformed client message: {}", e);
                            continue;
                        }
                    };
                    match session.send(message).await {
                        Ok(Some(reply)) => {
                            if send_json(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(_) => break,
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("websocket error: {}", e);
                    break;
                }
            },
            update = updates.recv() => match update {
                Ok(message) => {
                    if send_json(&mut socket, &message).await.is_err() {
                        break;
                    }
                }
                // only the latest values matter to the dashboard
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "dashboard client lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("dashboard client disconnected");
}

async fn send_json(socket: &mut WebSocket, message: &ServerMessage) -> Result<()> {
    let text = serde_json::to_string(message)?;
    socket.send(Message::Text(text)).await?;
    Ok(())
}
