//! Sibling HTTP CRUD surface for C1 (env vars), C2 (projects), C3
//! (sessions/messages), and C7 (file read/write) — spec.md §6.3,
//! SPEC_FULL.md "Sibling HTTP surface".
//!
//! Router composition grounded on `frecar-beam::web`'s `/api/...` route
//! table mounted alongside the WebSocket upgrade route on one shared
//! `Arc<State>`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use gateway_core::PathSandbox;
use gateway_protocol::{EnvVarDto, ProjectDto, SessionMessageDto, SessionSummaryDto};
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::state::GatewayState;

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/api/env", get(list_env))
        .route("/api/env/bulk", post(bulk_set_env))
        .route("/api/env/{key}", put(set_env).delete(delete_env))
        .route("/api/projects", get(list_projects).post(add_project))
        .route(
            "/api/projects/{alias}",
            patch(rename_project).delete(delete_project),
        )
        .route("/api/projects/{alias}/sessions", get(list_sessions))
        .route(
            "/api/projects/{alias}/sessions/{session_id}",
            delete(delete_session),
        )
        .route(
            "/api/projects/{alias}/sessions/{session_id}/messages",
            get(get_messages),
        )
        .route(
            "/api/projects/{alias}/files/{*path}",
            get(read_project_file).put(write_project_file),
        )
        .route("/api/files", get(read_absolute_file).put(write_absolute_file))
}

// --- Env Store (C1) ---

async fn list_env(State(state): State<Arc<GatewayState>>) -> Json<Vec<EnvVarDto>> {
    Json(state.env_store.list().await)
}

#[derive(Deserialize)]
struct SetEnvBody {
    value: String,
    #[serde(default)]
    description: Option<String>,
}

async fn set_env(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<String>,
    Json(body): Json<SetEnvBody>,
) -> Result<Json<EnvVarDto>, GatewayError> {
    let dto = state.env_store.set(key, body.value, body.description).await?;
    Ok(Json(dto))
}

async fn delete_env(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<String>,
) -> Json<serde_json::Value> {
    let existed = state.env_store.delete(&key).await;
    Json(serde_json::json!({ "deleted": existed }))
}

async fn bulk_set_env(
    State(state): State<Arc<GatewayState>>,
    Json(entries): Json<HashMap<String, String>>,
) -> Result<Json<Vec<EnvVarDto>>, GatewayError> {
    let dtos = state.env_store.bulk_set(entries).await?;
    Ok(Json(dtos))
}

// --- Project Registry (C2) ---

async fn list_projects(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Vec<ProjectDto>>, GatewayError> {
    Ok(Json(state.projects.discover()?))
}

#[derive(Deserialize)]
struct AddProjectBody {
    path: String,
    #[serde(default, rename = "displayName")]
    display_name: Option<String>,
}

async fn add_project(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<AddProjectBody>,
) -> Result<Json<ProjectDto>, GatewayError> {
    Ok(Json(state.projects.add_manual(&body.path, body.display_name)?))
}

#[derive(Deserialize)]
struct RenameProjectBody {
    #[serde(rename = "displayName")]
    display_name: String,
}

async fn rename_project(
    State(state): State<Arc<GatewayState>>,
    Path(alias): Path<String>,
    Json(body): Json<RenameProjectBody>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    state.projects.rename(&alias, &body.display_name)?;
    Ok(Json(serde_json::json!({ "renamed": true })))
}

async fn delete_project(
    State(state): State<Arc<GatewayState>>,
    Path(alias): Path<String>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    state.projects.delete(&alias)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

// --- Session Log Reader (C3) ---

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<SessionSummaryDto>,
    total: usize,
    #[serde(rename = "hasMore")]
    has_more: bool,
}

async fn list_sessions(
    State(state): State<Arc<GatewayState>>,
    Path(alias): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<SessionListResponse>, GatewayError> {
    let result = state.sessions.list_sessions(&alias, page.limit, page.offset)?;
    Ok(Json(SessionListResponse {
        sessions: result.sessions,
        total: result.total,
        has_more: result.has_more,
    }))
}

async fn delete_session(
    State(state): State<Arc<GatewayState>>,
    Path((alias, session_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    state.sessions.delete_session(&alias, &session_id)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Deserialize)]
struct MessagesQuery {
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessagesResponse {
    All {
        messages: Vec<SessionMessageDto>,
    },
    Page {
        messages: Vec<SessionMessageDto>,
        total: usize,
        #[serde(rename = "hasMore")]
        has_more: bool,
    },
}

async fn get_messages(
    State(state): State<Arc<GatewayState>>,
    Path((alias, session_id)): Path<(String, String)>,
    Query(page): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, GatewayError> {
    let result = state
        .sessions
        .get_messages(&alias, &session_id, page.limit, page.offset)?;
    let response = match result {
        gateway_core::GetMessagesResult::All(messages) => MessagesResponse::All { messages },
        gateway_core::GetMessagesResult::Page {
            messages,
            total,
            has_more,
        } => MessagesResponse::Page {
            messages,
            total,
            has_more,
        },
    };
    Ok(Json(response))
}

// --- Path Sandbox (C7) ---

#[derive(Serialize)]
struct FileContentResponse {
    content: String,
}

#[derive(Deserialize)]
struct FileWriteBody {
    content: String,
}

async fn read_project_file(
    State(state): State<Arc<GatewayState>>,
    Path((alias, path)): Path<(String, String)>,
) -> Result<Json<FileContentResponse>, GatewayError> {
    let root = state.projects.resolve_alias(&alias);
    let sandbox = PathSandbox::new(root);
    let resolved = sandbox.resolve_relative(&path)?;
    let content = std::fs::read_to_string(resolved)?;
    Ok(Json(FileContentResponse { content }))
}

async fn write_project_file(
    State(state): State<Arc<GatewayState>>,
    Path((alias, path)): Path<(String, String)>,
    Json(body): Json<FileWriteBody>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let root = state.projects.resolve_alias(&alias);
    let sandbox = PathSandbox::new(root);
    let resolved = sandbox.resolve_relative(&path)?;
    if let Some(parent) = resolved.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(resolved, body.content)?;
    Ok(Json(serde_json::json!({ "written": true })))
}

#[derive(Deserialize)]
struct AbsolutePathQuery {
    path: String,
}

async fn read_absolute_file(
    State(_state): State<Arc<GatewayState>>,
    Query(query): Query<AbsolutePathQuery>,
) -> Result<Json<FileContentResponse>, GatewayError> {
    let sandbox = PathSandbox::new("/");
    let resolved = sandbox.resolve_absolute(&query.path)?;
    let content = std::fs::read_to_string(resolved)?;
    Ok(Json(FileContentResponse { content }))
}

#[derive(Deserialize)]
struct AbsoluteWriteBody {
    path: String,
    content: String,
}

async fn write_absolute_file(
    State(_state): State<Arc<GatewayState>>,
    Json(body): Json<AbsoluteWriteBody>,
) -> Result<Json<serde_json::Value>, GatewayError> {
    let sandbox = PathSandbox::new("/");
    let resolved = sandbox.resolve_absolute(&body.path)?;
    if let Some(parent) = resolved.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(resolved, body.content)?;
    Ok(Json(serde_json::json!({ "written": true })))
}
