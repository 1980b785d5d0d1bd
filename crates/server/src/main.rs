//! Deskmate Server
//!
//! Pairs people up for focus sessions and walks each pair through
//! negotiation and the icebreaker/focus/debrief phases, over WebSocket.

mod http;
mod logging;
mod matchmaker;
mod negotiation;
mod paths;
mod phase;
mod session;
mod state;
mod store;
mod websocket;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use clap::Parser;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::{AppState, SharedState};
use crate::store::{unix_now, Store, TICKET_STALENESS_SECS};
use crate::websocket::ws_handler;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Interval between stale-ticket sweeps
const SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Parser, Debug)]
#[command(name = "deskmate-server", version, about = "Deskmate coordination server")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "DESKMATE_HOST")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 4600, env = "DESKMATE_PORT")]
    port: u16,

    /// Data directory (default: ~/.deskmate)
    #[arg(long, env = "DESKMATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Run phases at 10 seconds each instead of the agreed durations.
    /// For demos and local testing.
    #[arg(long, default_value_t = false)]
    quick_phases: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = paths::init_data_dir(args.data_dir.as_deref());
    paths::ensure_dirs()?;
    let _logging = logging::init_logging()?;

    info!(
        component = "server",
        event = "server.starting",
        version = VERSION,
        data_dir = %data_dir.display(),
        quick_phases = args.quick_phases,
        "Starting Deskmate server"
    );

    let store = Store::open(&paths::db_path())?;
    let state: SharedState = Arc::new(Mutex::new(AppState::new(store, args.quick_phases)));

    spawn_ticket_sweeper(state.clone());

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(http::health_handler))
        .route("/lobby", get(http::lobby_handler))
        .route("/sessions", get(http::sessions_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!(
        component = "server",
        event = "server.listening",
        addr = %addr,
        "Listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically delete tickets older than the staleness window so
/// abandoned queue entries never linger in match queries.
fn spawn_ticket_sweeper(state: SharedState) {
    tokio::spawn(async move {
        let store = state.lock().await.store.clone();
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match store.sweep_stale_tickets(unix_now()).await {
                Ok(0) => {}
                Ok(n) => {
                    info!(
                        component = "server",
                        event = "tickets.swept",
                        count = n,
                        staleness_secs = TICKET_STALENESS_SECS,
                        "Removed stale tickets"
                    );
                }
                Err(e) => {
                    warn!(
                        component = "server",
                        event = "tickets.sweep_failed",
                        error = %e,
                        "Stale ticket sweep failed"
                    );
                }
            }
        }
    });
}
