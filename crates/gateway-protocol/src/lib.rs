//! gateway-protocol: wire types shared between the gateway server and its clients.
//!
//! Defines the WebSocket frame union (`SPEC_FULL.md` §6.1), the DTOs the
//! sibling HTTP surface exchanges with the browser, and the small set of
//! domain enums (tool policy, permission mode) the Agent Runner consumes.

pub mod frames;
pub mod tool_policy;
pub mod types;

pub use frames::{ClientFrame, RunOptions, ServerFrame};
pub use tool_policy::{PermissionMode, ToolPolicy};
pub use types::{EnvVarDto, ImageAttachment, ProjectDto, SessionMessageDto, SessionSummaryDto};
