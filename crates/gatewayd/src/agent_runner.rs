//! Agent Runner (C5): spawns the agent binary with a computed argument
//! list and an isolated environment, streams its stdout/stderr, and owns
//! the per-invocation lifecycle and cancellation (spec.md §4.5).
//!
//! Grounded on the teacher's `sessions/daemon_spawn.rs` (spawn sequence
//! structuring) and `kild-daemon/pty/manager.rs` (per-invocation resource
//! ownership), re-expressed with `tokio::process::Command` (piped
//! stdout/stderr, not a PTY) since the agent's `--output-format
//! stream-json` output is line-oriented NDJSON.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use gateway_core::EnvStore;
use gateway_paths::GatewayPaths;
use gateway_protocol::tool_policy::PLAN_MODE_DEFAULT_TOOLS;
use gateway_protocol::types::ImageAttachment;
use gateway_protocol::{PermissionMode, ServerFrame, ToolPolicy};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};

/// Host environment variables visible to the child, before the Env Store
/// and per-request `extraEnv` are layered on top (spec.md §4.5).
const HOST_ENV_WHITELIST: &[&str] =
    &["PATH", "HOME", "USER", "SHELL", "TERM", "TMPDIR", "LANG", "LC_ALL"];

/// Grace period between `abort()` sending SIGTERM and a forced SIGKILL if
/// the child hasn't exited. The spec's contract (§5) leaves no hard
/// timeout, but an orphaned child left running indefinitely is a resource
/// leak a complete implementation must close (documented in DESIGN.md).
const HARD_KILL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// One `claude-command` frame's worth of run parameters (spec.md §4.5,
/// §6.1).
pub struct RunRequest {
    pub invocation_id: String,
    pub session_id: Option<String>,
    pub real_cwd: PathBuf,
    pub resume: bool,
    pub prompt: Option<String>,
    pub command: Option<String>,
    pub images: Vec<ImageAttachment>,
    pub tool_policy: ToolPolicy,
    pub permission_mode: PermissionMode,
    pub extra_env: HashMap<String, String>,
}

struct AbortEntry {
    pid: u32,
}

/// Owns argument assembly, environment construction, spawn, and streaming
/// for every agent invocation.
///
/// `abort_map` is keyed by `invocation_id` for the entire lifetime of the
/// invocation; a captured agent `session_id` is recorded separately in
/// `session_alias` (session_id -> invocation_id) rather than moving the
/// entry, so a caller that only ever learned the `invocation_id` (the
/// WebSocket Gateway's socket-close cleanup, spec.md §4.6) can still find
/// and abort it after the session id has been captured.
#[derive(Clone)]
pub struct AgentRunner {
    paths: GatewayPaths,
    agent_binary: String,
    env_store: EnvStore,
    abort_map: Arc<Mutex<HashMap<String, AbortEntry>>>,
    session_alias: Arc<Mutex<HashMap<String, String>>>,
}

impl AgentRunner {
    pub fn new(paths: GatewayPaths, agent_binary: String, env_store: EnvStore) -> Self {
        Self {
            paths,
            agent_binary,
            env_store,
            abort_map: Arc::new(Mutex::new(HashMap::new())),
            session_alias: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs one invocation to completion, pushing frames to `outbound` in
    /// emission order. Intended to be `tokio::spawn`ed by the caller so it
    /// does not block the owning socket's read loop.
    pub async fn run(&self, req: RunRequest, outbound: mpsc::Sender<ServerFrame>) {
        let invocation_id = req.invocation_id.clone();
        let is_new_session = req.session_id.is_none() && req.prompt.is_some();

        let (image_paths, image_tmp_dir) = match materialize_images(&req.real_cwd, &req.images) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(event = "runner.image_materialize_failed", error = %e);
                (Vec::new(), None)
            }
        };

        let args = self.build_args(&req, &image_paths);
        let env = self.build_env(&req.extra_env).await;

        tracing::info!(
            event = "runner.spawn_starting",
            invocation_id = %invocation_id,
            cwd = %req.real_cwd.display(),
            resume = req.resume,
        );

        let mut command = Command::new(&self.agent_binary);
        command
            .current_dir(&req.real_cwd)
            .args(&args)
            .env_clear()
            .envs(&env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(event = "runner.spawn_failed", error = %e);
                let _ = outbound
                    .send(ServerFrame::AgentError {
                        error: format!("failed to spawn agent: {e}"),
                    })
                    .await;
                cleanup_images(image_tmp_dir.as_deref());
                return;
            }
        };

        if let Some(pid) = child.id() {
            self.abort_map
                .lock()
                .await
                .insert(invocation_id.clone(), AbortEntry { pid });
        }

        self.write_stdin(&mut child, &req).await;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let stdout_outbound = outbound.clone();
        let session_id_seed = req.session_id.clone();
        let runner_for_capture = self.clone();
        let invocation_id_for_capture = invocation_id.clone();
        let stdout_task = tokio::spawn(async move {
            pump_stdout(
                stdout,
                stdout_outbound,
                session_id_seed,
                runner_for_capture,
                invocation_id_for_capture,
            )
            .await
        });

        let stderr_outbound = outbound.clone();
        let stderr_task = tokio::spawn(async move { pump_stderr(stderr, stderr_outbound).await });

        let exit_status = child.wait().await;
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        self.abort_map.lock().await.remove(&invocation_id);
        self.session_alias
            .lock()
            .await
            .retain(|_, id| id != &invocation_id);

        cleanup_images(image_tmp_dir.as_deref());

        match exit_status {
            Ok(status) => {
                let exit_code = status.code().unwrap_or(-1);
                tracing::info!(
                    event = "runner.agent_complete",
                    invocation_id = %invocation_id,
                    exit_code = exit_code,
                );
                let _ = outbound
                    .send(ServerFrame::AgentComplete {
                        exit_code,
                        is_new_session,
                    })
                    .await;
            }
            Err(e) => {
                tracing::warn!(event = "runner.wait_failed", error = %e);
                let _ = outbound
                    .send(ServerFrame::AgentError {
                        error: format!("failed waiting for agent: {e}"),
                    })
                    .await;
            }
        }
    }

    /// Looks up `key` (an invocation id or a captured session id, via
    /// `session_alias`) in the abort map and sends SIGTERM. Returns
    /// whether a live handle was found. Schedules a hard SIGKILL after
    /// [`HARD_KILL_TIMEOUT`] if the child hasn't exited by then.
    pub async fn abort(&self, key: &str) -> bool {
        let invocation_id = {
            let guard = self.abort_map.lock().await;
            if guard.contains_key(key) {
                key.to_string()
            } else {
                drop(guard);
                let Some(id) = self.session_alias.lock().await.get(key).cloned() else {
                    return false;
                };
                id
            }
        };

        let pid = {
            let guard = self.abort_map.lock().await;
            let Some(entry) = guard.get(&invocation_id) else {
                return false;
            };
            entry.pid
        };

        send_signal(pid, nix::sys::signal::Signal::SIGTERM);
        self.abort_map.lock().await.remove(&invocation_id);

        let abort_map = Arc::clone(&self.abort_map);
        let invocation_id_for_kill = invocation_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(HARD_KILL_TIMEOUT).await;
            if process_alive(pid) {
                tracing::warn!(event = "runner.hard_kill", pid = pid, invocation_id = %invocation_id_for_kill);
                send_signal(pid, nix::sys::signal::Signal::SIGKILL);
            }
            abort_map.lock().await.remove(&invocation_id_for_kill);
        });
        true
    }

    /// Sends SIGTERM to every live child, for graceful-shutdown (spec.md
    /// §6.4): mirrors the teacher's `SessionManager::stop_all`.
    pub async fn shutdown_all(&self) {
        let pids: Vec<u32> = self
            .abort_map
            .lock()
            .await
            .values()
            .map(|entry| entry.pid)
            .collect();
        for pid in pids {
            send_signal(pid, nix::sys::signal::Signal::SIGTERM);
        }
    }

    /// Records that `session_id` was captured for `invocation_id`, so a
    /// subsequent `abort-session` frame (which addresses sessions, not
    /// invocations) can find the still-`invocation_id`-keyed abort-map
    /// entry (spec.md §4.5). The abort-map entry itself is never moved —
    /// the WebSocket Gateway's socket-close cleanup only ever knows the
    /// `invocation_id`, so that key must stay valid for the invocation's
    /// whole lifetime.
    pub(crate) async fn rekey(&self, invocation_id: &str, session_id: &str) {
        self.session_alias
            .lock()
            .await
            .insert(session_id.to_string(), invocation_id.to_string());
    }

    async fn write_stdin(&self, child: &mut tokio::process::Child, req: &RunRequest) {
        let Some(mut stdin) = child.stdin.take() else {
            return;
        };
        if req.prompt.is_some() {
            // `--print` mode: the prompt already travels via argv, nothing to
            // write. Close stdin immediately.
            drop(stdin);
        } else if let Some(command) = &req.command {
            let _ = stdin.write_all(command.as_bytes()).await;
            let _ = stdin.write_all(b"\n").await;
            drop(stdin);
        } else {
            // Leave stdin open for interactive use — give ownership back to
            // the child handle instead of dropping it.
            child.stdin = Some(stdin);
        }
    }

    /// Argument assembly (spec.md §4.5): order matters for agent CLI
    /// compatibility.
    fn build_args(&self, req: &RunRequest, image_paths: &[PathBuf]) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(prompt) = &req.prompt {
            let full_prompt = if image_paths.is_empty() {
                prompt.clone()
            } else {
                let mut block = String::from("\n\n[Images provided at the following paths:]\n");
                for (i, path) in image_paths.iter().enumerate() {
                    block.push_str(&format!("{}. {}\n", i + 1, path.display()));
                }
                format!("{prompt}{block}")
            };
            args.push("--print".to_string());
            args.push(full_prompt);
        }

        if req.resume {
            if let Some(session_id) = &req.session_id {
                args.push("--resume".to_string());
                args.push(session_id.clone());
            }
        }

        args.push("--output-format".to_string());
        args.push("stream-json".to_string());
        args.push("--verbose".to_string());

        if let Some(mcp_config_path) = self.mcp_config_path_if_active(&req.real_cwd) {
            args.push("--mcp-config".to_string());
            args.push(mcp_config_path.to_string_lossy().into_owned());
        }

        if !req.resume {
            args.push("--model".to_string());
            args.push("sonnet".to_string());
        }

        if let Some(value) = req.permission_mode.cli_value() {
            args.push("--permission-mode".to_string());
            args.push(value.to_string());
        }

        if req.tool_policy.skip_permissions && req.permission_mode != PermissionMode::Plan {
            args.push("--dangerously-skip-permissions".to_string());
        } else {
            let mut allowed = req.tool_policy.allowed_tools.clone();
            if req.permission_mode == PermissionMode::Plan {
                for tool in PLAN_MODE_DEFAULT_TOOLS {
                    if !allowed.iter().any(|t| t == tool) {
                        allowed.push((*tool).to_string());
                    }
                }
            }
            for tool in &allowed {
                args.push("--allowedTools".to_string());
                args.push(tool.clone());
            }
            for tool in &req.tool_policy.disallowed_tools {
                args.push("--disallowedTools".to_string());
                args.push(tool.clone());
            }
        }

        args
    }

    /// Returns the MCP tool-config path if it exists and declares at least
    /// one server, globally or scoped to `cwd` (spec.md §4.5 step 4).
    fn mcp_config_path_if_active(&self, cwd: &Path) -> Option<PathBuf> {
        let path = self.paths.agent_tool_config_file(&self.agent_binary);
        let content = std::fs::read_to_string(&path).ok()?;
        let value: serde_json::Value = serde_json::from_str(&content).ok()?;

        let has_global = value
            .get("mcpServers")
            .and_then(|v| v.as_object())
            .is_some_and(|m| !m.is_empty());
        let has_scoped = value
            .get("projects")
            .and_then(|v| v.as_object())
            .and_then(|projects| projects.get(cwd.to_string_lossy().as_ref()))
            .and_then(|project| project.get("mcpServers"))
            .and_then(|v| v.as_object())
            .is_some_and(|m| !m.is_empty());

        if has_global || has_scoped {
            Some(path)
        } else {
            None
        }
    }

    /// Environment construction (spec.md §4.5): host whitelist, then the
    /// Env Store's full record, then per-request `extraEnv`, each layer
    /// overriding the last.
    async fn build_env(&self, extra_env: &HashMap<String, String>) -> HashMap<String, String> {
        let mut env = HashMap::new();
        for key in HOST_ENV_WHITELIST {
            if let Ok(value) = std::env::var(key) {
                env.insert((*key).to_string(), value);
            }
        }
        env.extend(self.env_store.as_record().await);
        env.extend(extra_env.clone());
        env
    }
}

async fn pump_stdout(
    stdout: tokio::process::ChildStdout,
    outbound: mpsc::Sender<ServerFrame>,
    mut session_id_seed: Option<String>,
    runner: AgentRunner,
    invocation_id: String,
) {
    let mut captured_session_id: Option<String> = None;
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(event = "runner.stdout_read_failed", error = %e);
                break;
            }
        };
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(value) => {
                if captured_session_id.is_none() {
                    if let Some(session_id) = value.get("session_id").and_then(|v| v.as_str()) {
                        captured_session_id = Some(session_id.to_string());
                        runner.rekey(&invocation_id, session_id).await;
                        if session_id_seed.is_none() {
                            session_id_seed = Some(session_id.to_string());
                            if outbound
                                .send(ServerFrame::SessionCreated {
                                    session_id: session_id.to_string(),
                                })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                }
                if outbound
                    .send(ServerFrame::AgentResponse { data: value })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(_) => {
                if outbound
                    .send(ServerFrame::AgentOutput { data: line })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

async fn pump_stderr(stderr: tokio::process::ChildStderr, outbound: mpsc::Sender<ServerFrame>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if outbound
                    .send(ServerFrame::AgentError { error: line })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(event = "runner.stderr_read_failed", error = %e);
                break;
            }
        }
    }
}

fn send_signal(pid: u32, signal: nix::sys::signal::Signal) {
    let nix_pid = nix::unistd::Pid::from_raw(pid as i32);
    if let Err(e) = nix::sys::signal::kill(nix_pid, signal) {
        tracing::warn!(event = "runner.signal_failed", pid = pid, error = %e);
    }
}

fn process_alive(pid: u32) -> bool {
    let nix_pid = nix::unistd::Pid::from_raw(pid as i32);
    nix::sys::signal::kill(nix_pid, None).is_ok()
}

/// Decodes every `data:<mime>;base64,<payload>` attachment into
/// `<real_cwd>/.tmp/images/<now_ms>/image_<n>.<ext>`. Skips malformed URIs
/// with a log (spec.md §4.5). Returns the written paths and the
/// directory, if any was created.
fn materialize_images(
    real_cwd: &Path,
    images: &[ImageAttachment],
) -> std::io::Result<(Vec<PathBuf>, Option<PathBuf>)> {
    if images.is_empty() {
        return Ok((Vec::new(), None));
    }
    let ts_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let dir = GatewayPaths::image_tmp_dir(real_cwd, ts_ms);
    std::fs::create_dir_all(&dir)?;

    let mut paths = Vec::new();
    for (index, image) in images.iter().enumerate() {
        let Some((mime, payload)) = parse_data_uri(&image.data) else {
            tracing::warn!(event = "runner.image_malformed_uri", name = %image.name);
            continue;
        };
        let Ok(bytes) = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, payload)
        else {
            tracing::warn!(event = "runner.image_base64_invalid", name = %image.name);
            continue;
        };
        let ext = ext_from_mime(mime);
        let path = GatewayPaths::image_path(real_cwd, ts_ms, index, ext);
        std::fs::write(&path, bytes)?;
        paths.push(path);
    }
    Ok((paths, Some(dir)))
}

fn parse_data_uri(data: &str) -> Option<(&str, &str)> {
    let rest = data.strip_prefix("data:")?;
    let (mime_and_encoding, payload) = rest.split_once(',')?;
    let mime = mime_and_encoding.strip_suffix(";base64")?;
    Some((mime, payload))
}

fn ext_from_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

fn cleanup_images(dir: Option<&Path>) {
    let Some(dir) = dir else { return };
    if let Err(e) = std::fs::remove_dir_all(dir) {
        tracing::warn!(
            event = "runner.image_cleanup_failed",
            path = %dir.display(),
            error = %e,
        );
    }
}
