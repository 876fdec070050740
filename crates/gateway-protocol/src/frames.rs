use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tool_policy::{PermissionMode, ToolPolicy};
use crate::types::{ImageAttachment, ProjectDto};

/// Options accompanying a `claude-command` frame (spec.md §6.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default, rename = "projectPath")]
    pub project_path: Option<String>,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub resume: bool,
    #[serde(default, rename = "permissionMode")]
    pub permission_mode: PermissionMode,
    #[serde(default, rename = "toolsSettings")]
    pub tools_settings: ToolPolicy,
    #[serde(default)]
    pub images: Vec<ImageAttachment>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Client -> Gateway frames (spec.md §6.1).
///
/// A closed tagged union; unknown tags fail to deserialize into this type
/// and the Gateway replies with a protocol-error `ServerFrame::Error`
/// instead of dropping the connection (spec.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "claude-command")]
    ClaudeCommand {
        #[serde(default)]
        command: Option<String>,
        #[serde(default)]
        options: RunOptions,
    },

    #[serde(rename = "abort-session")]
    AbortSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
}

/// Gateway -> Client frames (spec.md §6.1).
///
/// Type tags are preserved verbatim for client compatibility; do not rename
/// variants without a matching `#[serde(rename = "...")]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "session-created")]
    SessionCreated {
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    #[serde(rename = "agent-response")]
    AgentResponse { data: serde_json::Value },

    #[serde(rename = "agent-output")]
    AgentOutput { data: String },

    #[serde(rename = "agent-error")]
    AgentError { error: String },

    #[serde(rename = "agent-complete")]
    AgentComplete {
        #[serde(rename = "exitCode")]
        exit_code: i32,
        #[serde(rename = "isNewSession")]
        is_new_session: bool,
    },

    #[serde(rename = "session-aborted")]
    SessionAborted {
        #[serde(rename = "sessionId")]
        session_id: String,
        success: bool,
    },

    #[serde(rename = "projects_updated")]
    ProjectsUpdated {
        projects: Vec<ProjectDto>,
        timestamp: String,
        #[serde(rename = "changeType")]
        change_type: ChangeType,
        #[serde(rename = "changedFile")]
        changed_file: String,
    },

    /// Protocol-level error, distinct from `agent-error` (spec.md §7).
    #[serde(rename = "error")]
    Error { error: String },
}

/// Raw filesystem event kind observed by the watcher (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeType {
    Add,
    Change,
    Unlink,
    AddDir,
    UnlinkDir,
}
