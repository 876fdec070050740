use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("home directory not found — set $HOME environment variable")]
    HomeNotFound,
}

/// Centralized path construction for the gateway's on-disk layout
/// (spec.md §6.2).
///
/// Single source of truth for every path the Project Registry, Session Log
/// Reader, and Agent Runner touch. Use `resolve()` in production code and
/// `from_dir()` in tests.
#[derive(Debug, Clone)]
pub struct GatewayPaths {
    home: PathBuf,
    root: PathBuf,
}

impl GatewayPaths {
    /// Resolve paths from the user's home directory, rooted at
    /// `~/<dotdir>` (the agent's own config directory, e.g. `.claude`).
    pub fn resolve(dotdir: &str) -> Result<Self, PathError> {
        let home = dirs::home_dir().ok_or(PathError::HomeNotFound)?;
        let root = home.join(dotdir);
        Ok(Self { home, root })
    }

    /// Create paths from explicit home/root directories. Use in tests.
    pub fn from_dir(home: PathBuf, root: PathBuf) -> Self {
        Self { home, root }
    }

    /// The user's home directory.
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// The agent root, `~/<dotdir>`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // --- Project Registry (C2) ---

    /// `<root>/projects` — parent of every alias directory.
    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    /// `<root>/projects/<alias>`.
    pub fn project_dir(&self, alias: &str) -> PathBuf {
        self.projects_dir().join(alias)
    }

    /// `<root>/project-config.json` — sidecar config (spec.md §6.2).
    pub fn sidecar_file(&self) -> PathBuf {
        self.root.join("project-config.json")
    }

    // --- Session Log Reader (C3) ---

    /// `<root>/projects/<alias>/<session_id>.jsonl`.
    pub fn session_log_file(&self, alias: &str, session_id: &str) -> PathBuf {
        self.project_dir(alias).join(format!("{session_id}.jsonl"))
    }

    // --- Agent Runner (C5) ---

    /// `<home>/.<agent_binary>.json` — optional MCP-style tool config,
    /// read-only from the core (spec.md §4.5 step 4, §6.2).
    pub fn agent_tool_config_file(&self, agent_binary: &str) -> PathBuf {
        self.home.join(format!(".{agent_binary}.json"))
    }

    /// `<real_cwd>/.tmp/images/<ts_ms>` — ephemeral image attachment
    /// directory for one invocation (spec.md §4.5, §6.2).
    pub fn image_tmp_dir(real_cwd: &Path, ts_ms: u64) -> PathBuf {
        real_cwd.join(".tmp").join("images").join(ts_ms.to_string())
    }

    /// `<real_cwd>/.tmp/images/<ts_ms>/image_<index>.<ext>`.
    pub fn image_path(real_cwd: &Path, ts_ms: u64, index: usize, ext: &str) -> PathBuf {
        Self::image_tmp_dir(real_cwd, ts_ms).join(format!("image_{index}.{ext}"))
    }
}
