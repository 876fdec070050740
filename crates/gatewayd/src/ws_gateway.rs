//! WebSocket Gateway (C6): the single `/ws` endpoint multiplexing agent
//! invocation frames and watch-broadcast frames onto one socket per
//! browser tab (spec.md §4.6, §5).
//!
//! Grounded on `frecar-beam`'s `handle_browser_ws` — same single-socket
//! `tokio::select!` loop (no `futures_util::split`), same ping/pong
//! keepalive timings (30s interval, 90s pong timeout) — adapted from a
//! `broadcast::Sender<String>` fan-out to a per-socket bounded
//! `mpsc::Sender<ServerFrame>` so the gateway can apply its own
//! backpressure rule instead of a lossy broadcast channel.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use gateway_protocol::{ClientFrame, ServerFrame};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Instant};
use uuid::Uuid;

use crate::agent_runner::RunRequest;
use crate::state::GatewayState;

/// Outbound queue depth per socket. Bounded so the backpressure rule in
/// spec.md §5 has something to apply to: the watch broadcaster's
/// `ClientSink::send` is a non-blocking `try_send` on this channel and
/// drops `projects_updated` when it's full; the Agent Runner's stdout
/// pump instead uses a blocking `send().await` on the very same channel
/// and is never dropped — it just backs up the agent's own output.
const OUTBOUND_CAPACITY: usize = 128;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(90);

struct SocketSink {
    tx: mpsc::Sender<ServerFrame>,
}

impl gateway_watch::ClientSink for SocketSink {
    fn send(&self, frame: &ServerFrame) -> bool {
        match self.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(event = "ws.outbound_queue_full_dropped_projects_updated");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

pub async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<GatewayState>) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_CAPACITY);
    let sink = Arc::new(SocketSink {
        tx: outbound_tx.clone(),
    });
    let client_id = state.clients.attach(sink).await;
    tracing::info!(event = "ws.client_connected", client_id = client_id);

    // Invocation ids started on this socket, aborted if it closes while
    // they're still running (spec.md §5).
    let live_invocations: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let mut ping_timer = interval(PING_INTERVAL);
    ping_timer.tick().await;
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = ping_timer.tick() => {
                if last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::warn!(event = "ws.pong_timeout", client_id = client_id);
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                let Ok(json) = serde_json::to_string(&frame) else { continue };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound_text(&text, &state, &outbound_tx, &live_invocations).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(event = "ws.recv_failed", client_id = client_id, error = %e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.clients.detach(client_id).await;
    for invocation_id in live_invocations.lock().await.iter() {
        state.runner.abort(invocation_id).await;
    }
    tracing::info!(event = "ws.client_disconnected", client_id = client_id);
}

async fn handle_inbound_text(
    text: &str,
    state: &Arc<GatewayState>,
    outbound_tx: &mpsc::Sender<ServerFrame>,
    live_invocations: &Arc<Mutex<Vec<String>>>,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            let _ = outbound_tx
                .send(ServerFrame::Error {
                    error: format!("malformed frame: {e}"),
                })
                .await;
            return;
        }
    };

    match frame {
        ClientFrame::ClaudeCommand { command, options } => {
            let Some(real_cwd) = resolve_real_cwd(state, &options) else {
                let _ = outbound_tx
                    .send(ServerFrame::Error {
                        error: "unable to resolve a project working directory".to_string(),
                    })
                    .await;
                return;
            };

            let invocation_id = Uuid::new_v4().to_string();
            live_invocations.lock().await.push(invocation_id.clone());

            let req = RunRequest {
                invocation_id,
                session_id: options.session_id.clone(),
                real_cwd,
                resume: options.resume,
                prompt: command.clone(),
                command,
                images: options.images,
                tool_policy: options.tools_settings,
                permission_mode: options.permission_mode,
                extra_env: options.env,
            };

            let runner = state.runner.clone();
            let outbound_tx = outbound_tx.clone();
            tokio::spawn(async move {
                runner.run(req, outbound_tx).await;
            });
        }
        ClientFrame::AbortSession { session_id } => {
            let aborted = state.runner.abort(&session_id).await;
            let _ = outbound_tx
                .send(ServerFrame::SessionAborted {
                    session_id,
                    success: aborted,
                })
                .await;
        }
    }
}

/// `cwd`/`projectPath` is either a ready-made absolute path or a project
/// alias; the Project Registry resolves aliases to their real path
/// (spec.md §4.2, §4.5).
fn resolve_real_cwd(
    state: &Arc<GatewayState>,
    options: &gateway_protocol::RunOptions,
) -> Option<PathBuf> {
    if let Some(cwd) = &options.cwd {
        return Some(PathBuf::from(cwd));
    }
    let alias = options.project_path.as_ref()?;
    Some(state.projects.resolve_alias(alias))
}
