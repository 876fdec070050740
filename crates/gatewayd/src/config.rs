//! Startup configuration: a dotenv-style file plus two CLI flags
//! (spec.md §6.4), hand-parsed in the style of the teacher's `parse_args`
//! (the surface is two flags, `clap` would be overkill).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid --port value: {0}")]
    InvalidPort(String),

    #[error("home directory not found")]
    HomeNotFound,
}

/// Parsed CLI arguments, before `.env` / defaults are layered in.
#[derive(Debug, Default)]
struct Cli {
    env_path: Option<PathBuf>,
    port: Option<u16>,
}

fn parse_args(args: &[String]) -> Cli {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--env" | "-e" => {
                if let Some(value) = args.get(i + 1) {
                    cli.env_path = Some(PathBuf::from(value));
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if let Some(value) = args.get(i + 1) {
                    cli.port = value.parse().ok();
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    cli
}

/// The agent's own config directory name, e.g. `.claude`. Separate from
/// the gateway's own `~/.gatewayd` layout used for the sidecar.
fn default_agent_dotdir() -> String {
    std::env::var("GATEWAY_AGENT_DOTDIR").unwrap_or_else(|_| ".claude".to_string())
}

fn default_agent_binary() -> String {
    std::env::var("GATEWAY_AGENT_BINARY").unwrap_or_else(|_| "claude".to_string())
}

fn default_port() -> u16 {
    3001
}

fn default_debounce() -> Duration {
    gateway_watch::DEFAULT_DEBOUNCE
}

fn default_stabilization() -> Duration {
    gateway_watch::DEFAULT_STABILIZATION
}

/// Bundles everything the gateway needs at startup (modeled on the
/// teacher's `DaemonConfig`).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    /// The agent's own dotdir, e.g. `.claude` — where project logs and the
    /// optional MCP tool-config file live.
    pub agent_dotdir: String,
    /// The agent binary name to spawn, e.g. `claude`.
    pub agent_binary: String,
    /// Trailing debounce passed to `WatchBroadcaster::new` (spec.md §4.4).
    pub debounce: Duration,
    /// Per-path stabilization window passed to `WatchBroadcaster::new`
    /// (spec.md §4.4).
    pub stabilization: Duration,
}

impl GatewayConfig {
    /// Parse `--env`/`-e` and `--port`/`-p` from `args` (typically
    /// `std::env::args().skip(1)`), load the optional dotenv file over the
    /// process environment, then build the config from environment
    /// defaults.
    pub fn load(args: &[String]) -> Result<Self, ConfigError> {
        let cli = parse_args(args);

        if let Some(path) = &cli.env_path {
            if let Err(e) = dotenvy::from_path(path) {
                tracing::warn!(
                    event = "gateway.config.env_file_load_failed",
                    path = %path.display(),
                    error = %e,
                );
            }
        } else {
            // Best-effort `.env` in the current directory; absence is fine.
            let _ = dotenvy::dotenv();
        }

        let port = match cli.port {
            Some(p) => p,
            None => match std::env::var("GATEWAY_PORT") {
                Ok(v) => v
                    .parse()
                    .map_err(|_| ConfigError::InvalidPort(v.clone()))?,
                Err(_) => default_port(),
            },
        };

        let config = Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            agent_dotdir: default_agent_dotdir(),
            agent_binary: default_agent_binary(),
            debounce: default_debounce(),
            stabilization: default_stabilization(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if dirs::home_dir().is_none() {
            return Err(ConfigError::HomeNotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args_reads_port_and_env_flags() {
        let args: Vec<String> = vec![
            "--env".to_string(),
            "/tmp/custom.env".to_string(),
            "-p".to_string(),
            "4000".to_string(),
        ];
        let cli = parse_args(&args);
        assert_eq!(cli.env_path, Some(PathBuf::from("/tmp/custom.env")));
        assert_eq!(cli.port, Some(4000));
    }

    #[test]
    fn parse_args_ignores_unknown_flags() {
        let args: Vec<String> = vec!["--bogus".to_string(), "value".to_string()];
        let cli = parse_args(&args);
        assert!(cli.env_path.is_none());
        assert!(cli.port.is_none());
    }

    #[test]
    fn parse_args_tolerates_trailing_flag_without_value() {
        let args: Vec<String> = vec!["--port".to_string()];
        let cli = parse_args(&args);
        assert!(cli.port.is_none());
    }
}
