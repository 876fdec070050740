use serde::{Deserialize, Serialize};

/// An environment variable tracked by the Env Store (C1).
///
/// `value` is masked to [`SENSITIVE_MASK`] on any external read when `key`
/// matches [`is_sensitive_key`]; the unmasked record is only ever handed to
/// the Agent Runner for environment construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarDto {
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Masking sentinel returned in place of a sensitive value on external reads.
pub const SENSITIVE_MASK: &str = "***HIDDEN***";

/// A key counts as sensitive if it contains `TOKEN`, `KEY`, or `SECRET`
/// (case-insensitive).
pub fn is_sensitive_key(key: &str) -> bool {
    let upper = key.to_uppercase();
    upper.contains("TOKEN") || upper.contains("KEY") || upper.contains("SECRET")
}

/// An image attachment as submitted on a `claude-command` frame.
///
/// `data` is a `data:<mime>;base64,<payload>` URI. Materialized to a temp
/// file for the duration of one invocation by the Agent Runner, then
/// removed; never persisted beyond that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub name: String,
    pub data: String,
    pub size: u64,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// A discovered or manually-added project (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDto {
    pub alias: String,
    #[serde(rename = "realPath")]
    pub real_path: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub origin: ProjectOrigin,
    #[serde(rename = "sessionCount")]
    pub session_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectOrigin {
    AgentManaged,
    ManuallyAdded,
}

/// One line of a session log, merged and re-framed for `getMessages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessageDto {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageBody>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBody {
    pub role: MessageRole,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Message content is either a plain string or an array of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A single part of a structured message. `Other` preserves the raw value
/// verbatim so round-trips through the Session Log Reader lose nothing
/// (spec.md §9: "untyped JSON parts").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<serde_json::Value>,
        #[serde(default, rename = "is_error", skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    #[serde(other)]
    Other,
}

/// Derived summary of a session, as returned by `listSessions` (C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummaryDto {
    pub id: String,
    pub summary: String,
    #[serde(rename = "lastActivity")]
    pub last_activity: String,
    #[serde(rename = "messageCount")]
    pub message_count: usize,
    pub cwd: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_key_matches_any_case() {
        assert!(is_sensitive_key("ANTHROPIC_TOKEN"));
        assert!(is_sensitive_key("api_key"));
        assert!(is_sensitive_key("my_SECRET_value"));
        assert!(!is_sensitive_key("PATH"));
        assert!(!is_sensitive_key("HOME"));
    }

    #[test]
    fn env_var_dto_roundtrip() {
        let var = EnvVarDto {
            key: "FOO".to_string(),
            value: "bar".to_string(),
            description: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let json = serde_json::to_string(&var).unwrap();
        assert!(!json.contains("description"));
        let parsed: EnvVarDto = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, var);
    }

    #[test]
    fn project_origin_wire_format() {
        assert_eq!(
            serde_json::to_string(&ProjectOrigin::AgentManaged).unwrap(),
            r#""agent-managed""#
        );
        assert_eq!(
            serde_json::to_string(&ProjectOrigin::ManuallyAdded).unwrap(),
            r#""manually-added""#
        );
    }

    #[test]
    fn message_content_text_variant() {
        let json = r#""hello world""#;
        let parsed: MessageContent = serde_json::from_str(json).unwrap();
        matches!(parsed, MessageContent::Text(ref s) if s == "hello world");
    }

    #[test]
    fn message_content_parts_variant_with_other_fallback() {
        let json = r#"[{"type":"text","text":"hi"},{"type":"something_new","foo":1}]"#;
        let parsed: MessageContent = serde_json::from_str(json).unwrap();
        if let MessageContent::Parts(parts) = parsed {
            assert_eq!(parts.len(), 2);
            assert!(matches!(parts[1], ContentPart::Other));
        } else {
            panic!("expected Parts variant");
        }
    }

    #[test]
    fn session_message_dto_roundtrip() {
        let msg = SessionMessageDto {
            session_id: "abc".to_string(),
            timestamp: Some("2026-01-01T00:00:00Z".to_string()),
            cwd: Some("/tmp/p".to_string()),
            message: Some(MessageBody {
                role: MessageRole::User,
                content: MessageContent::Text("hi".to_string()),
            }),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: SessionMessageDto = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session_id, "abc");
    }
}
