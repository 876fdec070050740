use serde::{Deserialize, Serialize};

/// The agent's per-invocation allow/deny list plus a "skip permissions" escape.
///
/// Consumed by the Agent Runner's tool-policy expansion (spec.md §4.5 step 7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default, rename = "allowedTools")]
    pub allowed_tools: Vec<String>,
    #[serde(default, rename = "disallowedTools")]
    pub disallowed_tools: Vec<String>,
    #[serde(default, rename = "skipPermissions")]
    pub skip_permissions: bool,
}

/// Fixed default tool set merged into `allowedTools` when `mode == Plan`
/// (spec.md §4.5 step 7).
pub const PLAN_MODE_DEFAULT_TOOLS: &[&str] =
    &["Read", "Task", "exit_plan_mode", "TodoRead", "TodoWrite"];

/// Agent permission mode, passed through the `--permission-mode` flag.
///
/// `BypassPermissions` is advertised by the UI but the agent's acceptance of
/// it is unverified upstream; it is passed through opaquely (spec.md §9,
/// open question 1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    Plan,
    BypassPermissions,
}

impl PermissionMode {
    /// The `--permission-mode` CLI value, or `None` for the default mode
    /// (spec.md §4.5 step 6: the flag is omitted entirely when mode is
    /// `default`).
    pub fn cli_value(self) -> Option<&'static str> {
        match self {
            PermissionMode::Default => None,
            PermissionMode::Plan => Some("plan"),
            PermissionMode::BypassPermissions => Some("bypassPermissions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_mode_wire_format() {
        assert_eq!(
            serde_json::to_string(&PermissionMode::Default).unwrap(),
            r#""default""#
        );
        assert_eq!(
            serde_json::to_string(&PermissionMode::Plan).unwrap(),
            r#""plan""#
        );
        assert_eq!(
            serde_json::to_string(&PermissionMode::BypassPermissions).unwrap(),
            r#""bypassPermissions""#
        );
    }

    #[test]
    fn permission_mode_cli_value_omits_default() {
        assert_eq!(PermissionMode::Default.cli_value(), None);
        assert_eq!(PermissionMode::Plan.cli_value(), Some("plan"));
        assert_eq!(
            PermissionMode::BypassPermissions.cli_value(),
            Some("bypassPermissions")
        );
    }

    #[test]
    fn tool_policy_defaults_are_empty() {
        let policy = ToolPolicy::default();
        assert!(policy.allowed_tools.is_empty());
        assert!(policy.disallowed_tools.is_empty());
        assert!(!policy.skip_permissions);
    }

    #[test]
    fn tool_policy_deserializes_missing_fields() {
        let policy: ToolPolicy = serde_json::from_str("{}").unwrap();
        assert!(policy.allowed_tools.is_empty());
        assert!(!policy.skip_permissions);
    }
}
