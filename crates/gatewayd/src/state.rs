//! `GatewayState`: the single `Arc`-shared bundle every axum handler closes
//! over (spec.md §4, §6).

use std::sync::Arc;

use gateway_core::{EnvStore, ProjectRegistry, SessionLogReader};
use gateway_paths::GatewayPaths;
use gateway_watch::{ClientRegistry, WatchBroadcaster, WatchHandle};

use crate::agent_runner::AgentRunner;
use crate::config::GatewayConfig;

pub struct GatewayState {
    pub config: GatewayConfig,
    pub paths: GatewayPaths,
    pub env_store: EnvStore,
    pub projects: ProjectRegistry,
    pub sessions: SessionLogReader,
    pub runner: AgentRunner,
    pub clients: ClientRegistry,
    _watch_handle: Option<WatchHandle>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, paths: GatewayPaths) -> Arc<Self> {
        let env_store = EnvStore::new();
        let projects = ProjectRegistry::new(paths.clone());
        let sessions = SessionLogReader::new(paths.clone());
        let runner = AgentRunner::new(paths.clone(), config.agent_binary.clone(), env_store.clone());
        let clients = ClientRegistry::new();

        let broadcaster = Arc::new(WatchBroadcaster::new(
            projects.clone(),
            clients.clone(),
            config.debounce,
            config.stabilization,
        ));
        let watch_handle = broadcaster.spawn(paths.clone());
        if watch_handle.is_none() {
            tracing::warn!(event = "gateway.watch_unavailable");
        }

        Arc::new(Self {
            config,
            paths,
            env_store,
            projects,
            sessions,
            runner,
            clients,
            _watch_handle: watch_handle,
        })
    }
}
