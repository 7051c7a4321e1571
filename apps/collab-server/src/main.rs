//! Collaboration relay server
//! Keeps one shared document per room and relays changes between participants.

mod session;
mod ws;

use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use session::RoomManager;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "collab-server", about = "WebSocket relay for collaborative sessions")]
struct Config {
    /// Interface to bind
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 1234)]
    port: u16,
}

#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RoomManager>,
    pub started: Instant,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("collab_server=debug,collaboration=debug")),
        )
        .init();

    let config = Config::parse();

    let state = AppState {
        rooms: Arc::new(RoomManager::new()),
        started: Instant::now(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        // CORS for browser clients
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Collaboration server listening on: {}", addr);
    info!("  GET /health - Server status");
    info!("  GET /ws?room=<name>&user_id=<uuid>&user_name=<name> - Join a room");

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
        "uptime_secs": state.started.elapsed().as_secs(),
        "rooms": state.rooms.room_count(),
    }))
}
