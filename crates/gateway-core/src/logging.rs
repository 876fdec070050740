//! `tracing` initialization shared by the `gatewayd` binary.
//!
//! The teacher's own `kild-core::init_logging` source wasn't present in
//! the retrieved reference set; this reconstructs it from the same
//! `tracing` + `tracing-subscriber` + `EnvFilter` shape used throughout
//! the rest of the teacher's crates, with a JSON formatter for production
//! and a human-readable one for local runs.

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. `json` selects the
/// structured formatter (set for any non-interactive run); `false` gives
/// a compact, human-readable format for local development.
///
/// Safe to call once at process start; a second call is a no-op (the
/// underlying `set_global_default` error is swallowed since tests may
/// initialize logging more than once across the binary).
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("gatewayd: tracing already initialized: {e}");
    }
}
