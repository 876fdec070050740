//! Server bootstrap: binds the axum router and runs it to completion,
//! grounded on the teacher's `kild-daemon::server::run_server` — signal
//! handling spawned as its own task driving a shared
//! `CancellationToken`, graceful shutdown draining live work before exit
//! — re-expressed for axum's `serve().with_graceful_shutdown()` instead
//! of a hand-rolled accept loop, since the Unix-socket/TLS listener the
//! teacher manually accepted on has no counterpart here (the transport
//! is one `TcpListener` serving HTTP + the WebSocket upgrade).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::GatewayError;
use crate::state::GatewayState;
use crate::{config::GatewayConfig, http, ws_gateway};

pub async fn run(config: GatewayConfig) -> Result<(), GatewayError> {
    let paths = gateway_paths::GatewayPaths::resolve(&config.agent_dotdir)
        .map_err(|e| GatewayError::InvalidArgument(e.to_string()))?;
    std::fs::create_dir_all(paths.projects_dir())?;

    let bind_addr = config.bind_addr;
    let state = GatewayState::new(config, paths);

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_shutdown.cancel();
    });

    let app = build_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(event = "gateway.server.started", addr = %bind_addr);

    let shutdown_for_serve = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_for_serve.cancelled().await })
        .await?;

    info!(event = "gateway.server.shutdown_started");
    state.runner.shutdown_all().await;
    info!(event = "gateway.server.shutdown_completed");
    Ok(())
}

fn build_router(state: Arc<GatewayState>) -> axum::Router {
    http::router()
        .route("/ws", axum::routing::get(ws_gateway::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(event = "gateway.server.sigterm_register_failed", error = %e);
                let _ = ctrl_c.await;
                info!(event = "gateway.server.signal_received", signal = "SIGINT");
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {
                info!(event = "gateway.server.signal_received", signal = "SIGINT");
            }
            _ = sigterm.recv() => {
                info!(event = "gateway.server.signal_received", signal = "SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!(event = "gateway.server.signal_received", signal = "SIGINT");
    }
}
