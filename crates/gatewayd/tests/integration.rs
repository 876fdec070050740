//! End-to-end Agent Runner scenarios (spec.md §8 S1/S2/S3/S6), driven
//! against a fake agent binary (a short shell script) instead of the real
//! CLI, matching the teacher's own
//! `kild-daemon/tests/integration.rs` convention of spawning a real child
//! process and observing the emitted events rather than mocking the
//! process boundary.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use gateway_core::EnvStore;
use gateway_paths::GatewayPaths;
use gateway_protocol::types::ImageAttachment;
use gateway_protocol::{PermissionMode, ServerFrame, ToolPolicy};
use gateway_server::agent_runner::{AgentRunner, RunRequest};
use tokio::sync::mpsc;

fn write_script(dir: &std::path::Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().into_owned()
}

fn runner_with_script(script: String) -> (tempfile::TempDir, AgentRunner) {
    let dir = tempfile::TempDir::new().unwrap();
    let paths = GatewayPaths::from_dir(dir.path().to_path_buf(), dir.path().to_path_buf());
    (dir, AgentRunner::new(paths, script, EnvStore::new()))
}

fn base_request(invocation_id: &str, real_cwd: PathBuf) -> RunRequest {
    RunRequest {
        invocation_id: invocation_id.to_string(),
        session_id: None,
        real_cwd,
        resume: false,
        prompt: Some("hello".to_string()),
        command: None,
        images: Vec::new(),
        tool_policy: ToolPolicy::default(),
        permission_mode: PermissionMode::Default,
        extra_env: HashMap::new(),
    }
}

async fn drain(mut rx: mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }
    frames
}

/// S1: a new session. The fake agent writes one NDJSON line carrying
/// `session_id` then exits 0. Expected order: `session-created`, then
/// `agent-response`, then `agent-complete(0, isNewSession=true)`.
#[tokio::test]
async fn s1_new_session_frame_order() {
    let scripts_dir = tempfile::TempDir::new().unwrap();
    let script = write_script(
        scripts_dir.path(),
        "agent.sh",
        r#"echo '{"session_id":"abc","type":"assistant","message":{"role":"assistant","content":"hi"}}'"#,
    );
    let (cwd_dir, runner) = runner_with_script(script);
    let (tx, rx) = mpsc::channel(32);

    runner
        .run(base_request("inv-1", cwd_dir.path().to_path_buf()), tx)
        .await;
    let frames = drain(rx).await;

    assert!(matches!(frames[0], ServerFrame::SessionCreated { ref session_id } if session_id == "abc"));
    assert!(matches!(frames[1], ServerFrame::AgentResponse { .. }));
    match frames.last().unwrap() {
        ServerFrame::AgentComplete {
            exit_code,
            is_new_session,
        } => {
            assert_eq!(*exit_code, 0);
            assert!(*is_new_session);
        }
        other => panic!("expected agent-complete last, got {other:?}"),
    }
    assert_eq!(frames.len(), 3, "no frames after agent-complete");
}

/// S2: resuming a known session never re-emits `session-created`.
#[tokio::test]
async fn s2_resume_omits_session_created() {
    let scripts_dir = tempfile::TempDir::new().unwrap();
    let script = write_script(
        scripts_dir.path(),
        "agent.sh",
        r#"echo '{"session_id":"abc","type":"assistant","message":{"role":"assistant","content":"hi again"}}'"#,
    );
    let (cwd_dir, runner) = runner_with_script(script);
    let (tx, rx) = mpsc::channel(32);

    let mut req = base_request("inv-2", cwd_dir.path().to_path_buf());
    req.session_id = Some("abc".to_string());
    req.resume = true;
    runner.run(req, tx).await;
    let frames = drain(rx).await;

    assert!(!frames
        .iter()
        .any(|f| matches!(f, ServerFrame::SessionCreated { .. })));
    match frames.last().unwrap() {
        ServerFrame::AgentComplete { is_new_session, .. } => assert!(!is_new_session),
        other => panic!("expected agent-complete last, got {other:?}"),
    }
}

/// S3: abort mid-stream. A long-running fake agent is SIGTERM'd; a second
/// abort for the same key returns `false`.
#[tokio::test]
async fn s3_abort_terminates_and_second_abort_fails() {
    let scripts_dir = tempfile::TempDir::new().unwrap();
    let script = write_script(scripts_dir.path(), "agent.sh", "sleep 30");
    let (cwd_dir, runner) = runner_with_script(script);
    let (tx, rx) = mpsc::channel(32);

    let run_handle = {
        let runner = runner.clone();
        let req = base_request("inv-3", cwd_dir.path().to_path_buf());
        tokio::spawn(async move { runner.run(req, tx).await })
    };

    // Give the child a moment to spawn and register in the abort map.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let aborted = runner.abort("inv-3").await;
    assert!(aborted, "expected a live invocation to be found");

    tokio::time::timeout(Duration::from_secs(5), run_handle)
        .await
        .expect("run() should complete after SIGTERM")
        .unwrap();

    let frames = drain(rx).await;
    match frames.last().unwrap() {
        ServerFrame::AgentComplete { exit_code, .. } => assert_ne!(*exit_code, 0),
        other => panic!("expected agent-complete last, got {other:?}"),
    }

    let second_abort = runner.abort("inv-3").await;
    assert!(!second_abort, "invocation already reaped");
}

/// Abort-by-invocation-id must still work once the agent's first NDJSON
/// line has revealed its `session_id` and the run has been rekeyed under
/// that alias. This is the scenario the gateway's socket-close cleanup
/// relies on: it only ever learned the invocation id, never the session
/// id captured later.
#[tokio::test]
async fn s3b_abort_by_invocation_id_survives_session_capture() {
    let scripts_dir = tempfile::TempDir::new().unwrap();
    let script = write_script(
        scripts_dir.path(),
        "agent.sh",
        r#"echo '{"session_id":"sess-3b"}'; sleep 30"#,
    );
    let (cwd_dir, runner) = runner_with_script(script);
    let (tx, rx) = mpsc::channel(32);

    let run_handle = {
        let runner = runner.clone();
        let req = base_request("inv-3b", cwd_dir.path().to_path_buf());
        tokio::spawn(async move { runner.run(req, tx).await })
    };

    // Give the child a moment to emit its session_id line and trigger a
    // rekey, then abort by the original invocation id, not the session id.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let aborted = runner.abort("inv-3b").await;
    assert!(
        aborted,
        "abort by invocation id should still find the live run after rekey"
    );

    tokio::time::timeout(Duration::from_secs(5), run_handle)
        .await
        .expect("run() should complete after SIGTERM")
        .unwrap();

    let frames = drain(rx).await;
    match frames.last().unwrap() {
        ServerFrame::AgentComplete { exit_code, .. } => assert_ne!(*exit_code, 0),
        other => panic!("expected agent-complete last, got {other:?}"),
    }
}

/// S6: image injection. The decoded file exists while the agent runs and
/// is removed, along with its parent `.tmp/images/<ts>` directory, once
/// `agent-complete` fires.
#[tokio::test]
async fn s6_image_materialized_then_cleaned_up() {
    let scripts_dir = tempfile::TempDir::new().unwrap();
    // Confirm the image path landed in argv, then exit clean.
    let script = write_script(
        scripts_dir.path(),
        "agent.sh",
        r#"
case "$*" in
  *"[Images provided at the following paths:]"*) echo '{"session_id":"img-sess"}' ;;
  *) echo "missing image block" >&2; exit 1 ;;
esac
"#,
    );
    let (cwd_dir, runner) = runner_with_script(script);
    let (tx, rx) = mpsc::channel(32);

    let png_bytes = [0x89u8, 0x50, 0x4e, 0x47];
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, png_bytes);
    let mut req = base_request("inv-6", cwd_dir.path().to_path_buf());
    req.images = vec![ImageAttachment {
        name: "a.png".to_string(),
        data: format!("data:image/png;base64,{encoded}"),
        size: 4,
        mime_type: "image/png".to_string(),
    }];

    runner.run(req, tx).await;
    let frames = drain(rx).await;
    match frames.last().unwrap() {
        ServerFrame::AgentComplete { exit_code, .. } => assert_eq!(*exit_code, 0),
        other => panic!("expected agent-complete last, got {other:?}"),
    }

    let tmp_images = cwd_dir.path().join(".tmp").join("images");
    assert!(
        !tmp_images.exists() || std::fs::read_dir(&tmp_images).unwrap().next().is_none(),
        "image tmp directory should be cleaned up after agent-complete"
    );
}
