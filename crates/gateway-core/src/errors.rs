use std::error::Error;

/// Base trait for the gateway's error taxonomy (spec.md §7).
pub trait CoreError: Error + Send + Sync + 'static {
    /// Machine-readable code for programmatic handling and HTTP mapping.
    fn error_code(&self) -> &'static str;

    /// Whether this error should be logged as a warning (user-caused) or
    /// an error (unexpected).
    fn is_user_error(&self) -> bool {
        false
    }
}

/// Env Store (C1) errors.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("environment variable key must not be empty")]
    EmptyKey,
}

impl CoreError for EnvError {
    fn error_code(&self) -> &'static str {
        match self {
            EnvError::EmptyKey => "INVALID_ARGUMENT",
        }
    }

    fn is_user_error(&self) -> bool {
        true
    }
}

/// Project Registry (C2) errors.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("no project found with alias '{alias}'")]
    NotFound { alias: String },

    #[error("project with alias '{alias}' already exists")]
    AlreadyExists { alias: String },

    #[error("path does not exist: {path}")]
    PathNotFound { path: String },

    #[error("project '{alias}' still has non-empty session logs")]
    NotEmpty { alias: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl CoreError for ProjectError {
    fn error_code(&self) -> &'static str {
        match self {
            ProjectError::NotFound { .. } => "NOT_FOUND",
            ProjectError::AlreadyExists { .. } => "CONFLICT",
            ProjectError::PathNotFound { .. } => "INVALID_ARGUMENT",
            ProjectError::NotEmpty { .. } => "CONFLICT",
            ProjectError::Io { .. } => "INTERNAL",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            ProjectError::NotFound { .. }
                | ProjectError::AlreadyExists { .. }
                | ProjectError::PathNotFound { .. }
                | ProjectError::NotEmpty { .. }
        )
    }
}

/// Session Log Reader (C3) errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session '{session_id}' found under alias '{alias}'")]
    NotFound { alias: String, session_id: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl CoreError for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            SessionError::NotFound { .. } => "NOT_FOUND",
            SessionError::Io { .. } => "INTERNAL",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(self, SessionError::NotFound { .. })
    }
}

/// Path Sandbox (C7) errors.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("invalid path: {reason}")]
    InvalidPath { reason: String },

    #[error("path not found")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError for SandboxError {
    fn error_code(&self) -> &'static str {
        match self {
            SandboxError::InvalidPath { .. } => "INVALID_ARGUMENT",
            SandboxError::NotFound => "NOT_FOUND",
            SandboxError::PermissionDenied => "PERMISSION_DENIED",
            SandboxError::Internal(_) => "INTERNAL",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            SandboxError::InvalidPath { .. } | SandboxError::NotFound
        )
    }
}
