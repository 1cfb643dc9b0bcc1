//! gn-server - live Geometry Nodes streaming
//! - One engine process per request, output demultiplexed from log noise
//! - Per-connection rebuild coalescing (debounce + single follow-up build)
//! - WebSocket: schema as text, meshes as binary packets
//! - Optional asset watcher and static viewer hosting

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use futures::{future, SinkExt, StreamExt};
use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod coordinator;
mod error;
mod invoker;
mod session;
#[cfg(test)]
mod testing;
mod watch;

use config::Cli;
use invoker::{Compute, EngineConfig, ProcessInvoker};
use session::{run_session, Inbound, Outbound};

struct AppState<C> {
    compute: Arc<C>,
    debounce: Duration,
    /// Asset change notifications, when watching.
    changes: Option<broadcast::Sender<()>>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            compute: Arc::clone(&self.compute),
            debounce: self.debounce,
            changes: self.changes.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (engine, server) = Cli::parse().into_parts();
    let invoker = ProcessInvoker::new(engine);
    log_engine(invoker.config());

    let changes = if server.watch {
        let (changes_tx, _) = broadcast::channel(16);
        let files = vec![invoker.config().asset.clone(), invoker.config().script.clone()];
        let watch_tx = changes_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = watch::watch_files(files, watch_tx).await {
                error!("Asset watcher stopped: {:#}", e);
            }
        });
        Some(changes_tx)
    } else {
        None
    };

    let state = AppState {
        compute: Arc::new(invoker),
        debounce: server.debounce,
        changes,
    };
    let app = router(state, server.static_dir.as_deref());

    let addr = SocketAddr::from(([0, 0, 0, 0], server.port));
    info!("Server: http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn log_engine(config: &EngineConfig) {
    info!("Engine: {:?}", config.binary);
    info!("Scene: {:?}", config.asset);
    info!("Script: {:?}", config.script);
    match &config.target_object {
        Some(object) => info!("Target object: {}", object),
        None => info!("Target object: first with a Geometry Nodes modifier"),
    }
    if !config.asset.exists() {
        warn!("Scene file {:?} not found, builds will fail", config.asset);
    }
}

/// `/ws` always upgrades. Without a viewer directory `/` upgrades too, for
/// clients that connect to the bare host; with one, `/` serves `index.html`.
fn router<C: Compute>(state: AppState<C>, static_dir: Option<&Path>) -> Router {
    let mut app = Router::new().route("/ws", get(ws_handler::<C>));
    match static_dir {
        Some(dir) => {
            info!("Serving viewer from {:?}", dir);
            app = app.fallback_service(ServeDir::new(dir));
        }
        None => app = app.route("/", get(ws_handler::<C>)),
    }
    app.layer(CorsLayer::permissive()).with_state(state)
}

async fn ws_handler<C: Compute>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<C>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket<C: Compute>(socket: WebSocket, state: AppState<C>) {
    let (sender, receiver) = socket.split();

    let inbound = receiver.filter_map(|msg| {
        future::ready(match msg {
            Ok(Message::Text(text)) => Some(Inbound::Text(text)),
            Ok(Message::Binary(bytes)) => Some(Inbound::Binary(bytes)),
            Ok(Message::Close(_)) | Err(_) => Some(Inbound::Close),
            // answered by axum
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        })
    });
    let outbound = sender.with(|frame: Outbound| {
        future::ready(Ok::<_, axum::Error>(match frame {
            Outbound::Text(text) => Message::Text(text),
            Outbound::Binary(bytes) => Message::Binary(bytes),
        }))
    });

    let changes = state.changes.as_ref().map(|tx| tx.subscribe());
    run_session(state.compute, state.debounce, inbound, outbound, changes).await;
}
