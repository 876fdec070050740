//! gateway-core: the gateway's owned business logic — Env Store (C1),
//! Project Registry (C2), Session Log Reader (C3), and Path Sandbox (C7).
//!
//! The remaining components named in `SPEC_FULL.md` — the FS Watcher (C4),
//! the Agent Runner (C5), and the WebSocket Gateway (C6) — live in
//! `gateway-watch` and the `gatewayd` binary crate respectively, since they
//! own process- and socket-lifetime state the core library does not.

pub mod env_store;
pub mod errors;
pub mod logging;
pub mod projects;
pub mod sandbox;
pub mod sessions;
pub mod util;

pub use env_store::EnvStore;
pub use errors::{CoreError, EnvError, ProjectError, SandboxError, SessionError};
pub use logging::init_logging;
pub use projects::{alias_of, ProjectRegistry};
pub use sandbox::PathSandbox;
pub use sessions::{GetMessagesResult, SessionListResult, SessionLogReader};
