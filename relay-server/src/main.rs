mod hand_shake;
mod lobby;
mod processing_module;

use crate::hand_shake::pair;
use crate::lobby::{reload_config, AppState};
use crate::processing_module::relay;
use axum::extract::ws::WebSocket;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::StreamExt;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
/// Activates tracing, spawns a watchdog task to clear out abandoned rooms,
/// then sets up the routing for the relay websocket and the config
/// enlist/reload pages. The server listens on port 8080.
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=trace", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(true) // Module path (e.g. relay_server::processing_module)
                .with_thread_ids(true)
                .with_thread_names(true),
        )
        .init();

    let app_state = Arc::new(AppState::default());
    let watchdog_state = app_state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(1200)); // 20 min
        loop {
            interval.tick().await;
            cleanup_stale_rooms(&watchdog_state).await;
        }
    });

    let initial = reload_config(&app_state).await;
    if let Err(message) = initial {
        tracing::error!(message, "Initial load error.");
        panic!("Initial load error: {}", message);
    }

    let app = Router::new()
        .route("/reload", get(reload_handler))
        .route("/enlist", get(enlist_handler))
        .route("/ws", get(websocket_handler))
        .with_state(app_state)
        .fallback_service(ServeDir::new(".").not_found_service(ServeFile::new("index.html")));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8080")
        .await
        .unwrap();

    axum::serve(listener, app).await.unwrap();
}

/// A room only ever holds unpaired connections (see [`crate::lobby::Room`]),
/// so a room entry left around after the channel senders queued inside it
/// have all been dropped means its connections vanished without a proper
/// handshake completing. This is a fallback; the normal path prunes a room
/// as soon as it empties.
async fn cleanup_stale_rooms(state: &Arc<AppState>) {
    let mut rooms = state.rooms.lock().await;
    let before = rooms.len();
    rooms.retain(|_, room| {
        room.waiting_hosts.iter().any(|p| !p.inbox.is_closed())
            || room.waiting_guests.iter().any(|p| !p.inbox.is_closed())
    });
    let removed = before - rooms.len();
    if removed > 0 {
        tracing::info!(removed, "cleared stale rooms");
    }
}

/// Lists the rooms currently holding an unpaired connection.
async fn enlist_handler(State(state): State<Arc<AppState>>) -> String {
    let rooms = state.rooms.lock().await;
    rooms
        .iter()
        .map(|(code, room)| {
            format!(
                "Room: {:<10} waiting hosts: {:03} waiting guests: {:03}",
                code,
                room.waiting_hosts.len(),
                room.waiting_guests.len()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Forces a reload of the config file and lists its content. This enables
/// adding new games without restarting the service.
async fn reload_handler(State(state): State<Arc<AppState>>) -> String {
    match reload_config(&state).await {
        Ok(_) => state
            .configs
            .read()
            .await
            .iter()
            .map(|(key, players)| {
                format!("Game: {:<40} Maximum Amount of Players: {}", key, players)
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => format!("Config reload failed: {}", e),
    }
}

/// Upgrades the HTTP request to a websocket and hands it to [`websocket`].
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| websocket(socket, state))
}

/// Handshakes the connection into a room pairing, then relays frames until
/// the pairing ends.
async fn websocket(stream: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = stream.split();

    let Some(paired) = pair(&mut sender, &mut receiver, state).await else {
        return;
    };

    let reason = relay(sender, receiver, paired).await;
    tracing::debug!(reason, "relay pairing ended");
}
