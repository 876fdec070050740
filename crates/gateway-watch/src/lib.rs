//! FS Watcher / Broadcaster (C4): recursively watches the agent's project
//! root, debounces and stabilizes events, and fans change notifications out
//! to every attached socket as `projects_updated` frames.
//!
//! Grounded on the teacher's `kild-ui::watcher::SessionWatcher` (notify,
//! relevant-event filtering, graceful fallback when a watch can't be
//! established) generalized from a synchronous `mpsc` + poll loop to an
//! async `tokio::sync::mpsc` channel plus a trailing debounce timer task,
//! since the gateway is tokio-native end to end.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gateway_core::ProjectRegistry;
use gateway_paths::GatewayPaths;
use gateway_protocol::frames::{ChangeType, ServerFrame};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};

/// Trailing debounce applied after the last observed event before the
/// project list is recomputed and broadcast (spec.md §4.4). Default used
/// when the gateway's configuration doesn't override it.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Write-quiescence window an `add`/`change` event must survive before it
/// is forwarded to the debounce stage (spec.md §4.4). Default used when
/// the gateway's configuration doesn't override it.
pub const DEFAULT_STABILIZATION: Duration = Duration::from_millis(100);

/// Directory names and suffixes never watched (spec.md §4.4, §5).
const IGNORED_DIR_NAMES: &[&str] = &["node_modules", ".git", "dist", "build"];
const IGNORED_FILE_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];
const IGNORED_SUFFIXES: &[&str] = &["~", ".swp", ".swx", ".tmp"];

/// Maximum directory depth the watcher honors relative to the agent root
/// (spec.md §5).
const MAX_DEPTH: usize = 10;

/// A socket the broadcaster can push frames to. Implemented by the gateway
/// binary's WebSocket connection wrapper; kept as a trait here so this
/// crate never depends on axum (spec.md §9: "small broadcaster interface
/// that the gateway implements and passes in by reference").
pub trait ClientSink: Send + Sync {
    /// Attempt to deliver a frame. `false` means the socket is gone and
    /// should be dropped from the registry.
    fn send(&self, frame: &ServerFrame) -> bool;
}

/// Set of attached sockets. Concurrent insert/remove; broadcast iterates a
/// snapshot and sweeps dead entries inline (spec.md §4.4, §5).
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<Mutex<HashMap<u64, Arc<dyn ClientSink>>>>,
    next_id: Arc<AtomicU64>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, sink: Arc<dyn ClientSink>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().await.insert(id, sink);
        id
    }

    pub async fn detach(&self, id: u64) {
        self.clients.lock().await.remove(&id);
    }

    /// Send one frame to every attached socket. Sends that return `false`
    /// remove the client immediately.
    pub async fn broadcast(&self, frame: &ServerFrame) {
        let mut guard = self.clients.lock().await;
        guard.retain(|_, sink| sink.send(frame));
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }
}

/// Owns the `notify` watch and the debounce/broadcast pipeline for one
/// agent root.
pub struct WatchBroadcaster {
    registry: ProjectRegistry,
    clients: ClientRegistry,
    debounce: Duration,
    stabilization: Duration,
}

impl WatchBroadcaster {
    /// `debounce` and `stabilization` parameterize stage 2 and stage 1 of
    /// the pipeline below; callers typically thread these through from
    /// `GatewayConfig` rather than hardcoding [`DEFAULT_DEBOUNCE`] /
    /// [`DEFAULT_STABILIZATION`].
    pub fn new(
        registry: ProjectRegistry,
        clients: ClientRegistry,
        debounce: Duration,
        stabilization: Duration,
    ) -> Self {
        Self {
            registry,
            clients,
            debounce,
            stabilization,
        }
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Start watching `paths.projects_dir()` recursively. Returns the
    /// `notify` watcher (must be kept alive) plus the spawned debounce
    /// task's handle. Returns `None` if the watch can't be established —
    /// non-fatal, matching the teacher's graceful-degradation behavior.
    pub fn spawn(self: Arc<Self>, paths: GatewayPaths) -> Option<WatchHandle> {
        let root = paths.projects_dir();
        std::fs::create_dir_all(&root).ok()?;
        let startup_snapshot = snapshot_existing(&root);

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Event>();
        let mut watcher = match notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = raw_tx.send(event);
            }
        }) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(event = "watch.create_failed", error = %e);
                return None;
            }
        };

        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            tracing::warn!(event = "watch.watch_failed", path = %root.display(), error = %e);
            return None;
        }

        tracing::info!(event = "watch.started", path = %root.display());

        let (stage_tx, mut stage_rx) = mpsc::unbounded_channel::<(ChangeType, String)>();
        let root_for_stabilize = root.clone();
        let stabilization = self.stabilization;
        let debounce = self.debounce;
        let this = Arc::clone(&self);

        // Stage 1: consume raw notify events, apply ignore rules and the
        // write-quiescence stabilization, forward survivors. A per-path
        // generation counter lets a later event for the same path cancel
        // an in-flight stabilization wait for an older one.
        let generations: Arc<Mutex<HashMap<PathBuf, u64>>> = Arc::new(Mutex::new(HashMap::new()));
        let stabilize_task = tokio::spawn(async move {
            while let Some(event) = raw_rx.recv().await {
                let Some((change_type, path)) = classify(&event) else {
                    continue;
                };
                if !is_watchable(&root_for_stabilize, &path) {
                    continue;
                }
                if change_type == ChangeType::Add && startup_snapshot.contains(&path) {
                    continue;
                }

                let relative = relative_path(&root_for_stabilize, &path);
                let needs_stabilization =
                    matches!(change_type, ChangeType::Add | ChangeType::Change);

                if !needs_stabilization {
                    let _ = stage_tx.send((change_type, relative));
                    continue;
                }

                let my_gen = {
                    let mut guard = generations.lock().await;
                    let slot = guard.entry(path.clone()).or_insert(0);
                    *slot += 1;
                    *slot
                };
                let tx = stage_tx.clone();
                let generations = Arc::clone(&generations);
                let path = path.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(stabilization).await;
                    let still_current = generations.lock().await.get(&path).copied() == Some(my_gen);
                    if still_current {
                        let _ = tx.send((change_type, relative));
                    }
                });
            }
        });

        // Stage 2: trailing debounce — any event resets the timer; on
        // fire, recompute the project list and broadcast once.
        let debounce_task = tokio::spawn(async move {
            let mut pending: Option<(ChangeType, String)> = None;
            loop {
                let sleep = tokio::time::sleep(debounce);
                tokio::pin!(sleep);
                tokio::select! {
                    received = stage_rx.recv() => {
                        match received {
                            Some(ev) => pending = Some(ev),
                            None => break,
                        }
                    }
                    _ = &mut sleep, if pending.is_some() => {
                        if let Some((change_type, changed_file)) = pending.take() {
                            this.fire(change_type, changed_file).await;
                        }
                    }
                }
            }
        });

        Some(WatchHandle {
            _watcher: watcher,
            _stabilize_task: stabilize_task,
            _debounce_task: debounce_task,
        })
    }

    async fn fire(&self, change_type: ChangeType, changed_file: String) {
        let projects = match self.registry.discover() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(event = "watch.discover_failed", error = %e);
                return;
            }
        };
        let frame = ServerFrame::ProjectsUpdated {
            projects,
            timestamp: chrono::Utc::now().to_rfc3339(),
            change_type,
            changed_file,
        };
        self.clients.broadcast(&frame).await;
    }
}

/// Owns the live watcher and its background tasks; dropping it stops the
/// watch.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    _stabilize_task: tokio::task::JoinHandle<()>,
    _debounce_task: tokio::task::JoinHandle<()>,
}

fn classify(event: &Event) -> Option<(ChangeType, PathBuf)> {
    let path = event.paths.first()?.clone();
    let change_type = match &event.kind {
        EventKind::Create(k) if matches!(k, notify::event::CreateKind::Folder) => {
            ChangeType::AddDir
        }
        EventKind::Create(_) => ChangeType::Add,
        EventKind::Modify(_) => ChangeType::Change,
        EventKind::Remove(k) if matches!(k, notify::event::RemoveKind::Folder) => {
            ChangeType::UnlinkDir
        }
        EventKind::Remove(_) => ChangeType::Unlink,
        _ => return None,
    };
    Some((change_type, path))
}

fn is_watchable(root: &Path, path: &Path) -> bool {
    if path
        .components()
        .count()
        .saturating_sub(root.components().count())
        > MAX_DEPTH
    {
        return false;
    }
    if std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
    {
        return false;
    }
    for component in path.components() {
        let std::path::Component::Normal(name) = component else {
            continue;
        };
        let Some(name) = name.to_str() else { continue };
        if IGNORED_DIR_NAMES.contains(&name) || IGNORED_FILE_NAMES.contains(&name) {
            return false;
        }
        if IGNORED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            return false;
        }
    }
    true
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Walks the existing tree at startup (bounded depth, no symlinks) so the
/// watcher can suppress `add` events for files that predate it.
fn snapshot_existing(root: &Path) -> HashSet<PathBuf> {
    let mut seen = HashSet::new();
    walk(root, root, 0, &mut seen);
    seen
}

fn walk(root: &Path, dir: &Path, depth: usize, seen: &mut HashSet<PathBuf>) {
    if depth > MAX_DEPTH {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_symlink() {
            continue;
        }
        if !is_watchable(root, &path) {
            continue;
        }
        seen.insert(path.clone());
        if file_type.is_dir() {
            walk(root, &path, depth + 1, seen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_watchable_filters_ignored_dirs() {
        let root = Path::new("/root/projects");
        assert!(!is_watchable(root, &root.join("node_modules/pkg/index.js")));
        assert!(!is_watchable(root, &root.join(".git/HEAD")));
        assert!(!is_watchable(root, &root.join("alias/.DS_Store")));
        assert!(!is_watchable(root, &root.join("alias/file.jsonl~")));
        assert!(is_watchable(root, &root.join("alias/session.jsonl")));
    }

    #[test]
    fn is_watchable_rejects_excess_depth() {
        let root = Path::new("/root/projects");
        let mut deep = root.to_path_buf();
        for i in 0..(MAX_DEPTH + 2) {
            deep = deep.join(format!("d{i}"));
        }
        assert!(!is_watchable(root, &deep));
    }

    #[test]
    fn relative_path_strips_root() {
        let root = Path::new("/root/projects");
        let path = root.join("alias").join("new.jsonl");
        assert_eq!(relative_path(root, &path), "alias/new.jsonl");
    }

    #[tokio::test]
    async fn client_registry_sweeps_failed_sends() {
        struct AlwaysFails;
        impl ClientSink for AlwaysFails {
            fn send(&self, _frame: &ServerFrame) -> bool {
                false
            }
        }
        let registry = ClientRegistry::new();
        registry.attach(Arc::new(AlwaysFails)).await;
        assert_eq!(registry.len().await, 1);
        registry
            .broadcast(&ServerFrame::Error {
                error: "x".to_string(),
            })
            .await;
        assert_eq!(registry.len().await, 0);
    }

    /// spec.md §8 property 9: 50 rapid writes to the same file within the
    /// stabilization window collapse into exactly one `projects_updated`
    /// after the pipeline goes quiet, not one per event.
    #[tokio::test]
    async fn fifty_rapid_events_produce_one_projects_updated() {
        use tempfile::TempDir;

        struct Collector {
            frames: std::sync::Arc<std::sync::Mutex<Vec<ServerFrame>>>,
        }
        impl ClientSink for Collector {
            fn send(&self, frame: &ServerFrame) -> bool {
                self.frames.lock().unwrap().push(frame.clone());
                true
            }
        }

        let dir = TempDir::new().unwrap();
        let paths = GatewayPaths::from_dir(dir.path().to_path_buf(), dir.path().to_path_buf());
        std::fs::create_dir_all(paths.projects_dir().join("alias")).unwrap();

        let registry = ProjectRegistry::new(paths.clone());
        let clients = ClientRegistry::new();
        let frames = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        clients
            .attach(Arc::new(Collector {
                frames: std::sync::Arc::clone(&frames),
            }))
            .await;

        let stabilization = Duration::from_millis(20);
        let debounce = Duration::from_millis(50);
        let broadcaster = Arc::new(WatchBroadcaster::new(
            registry,
            clients,
            debounce,
            stabilization,
        ));
        let _handle = broadcaster
            .spawn(paths.clone())
            .expect("watch should start on a real temp dir");

        // Let the watch establish before the startup snapshot matters.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let target = paths.projects_dir().join("alias").join("session.jsonl");
        for i in 0..50u32 {
            std::fs::write(&target, i.to_string()).unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Outlast stabilization + debounce so the single quiet-period fire
        // has happened.
        tokio::time::sleep(stabilization + debounce + Duration::from_millis(200)).await;

        let updates = frames
            .lock()
            .unwrap()
            .iter()
            .filter(|f| matches!(f, ServerFrame::ProjectsUpdated { .. }))
            .count();
        assert_eq!(
            updates, 1,
            "50 rapid events in one quiet period must collapse to a single projects_updated"
        );
    }

    #[tokio::test]
    async fn client_registry_detach_removes_client() {
        struct Echo;
        impl ClientSink for Echo {
            fn send(&self, _frame: &ServerFrame) -> bool {
                true
            }
        }
        let registry = ClientRegistry::new();
        let id = registry.attach(Arc::new(Echo)).await;
        assert_eq!(registry.len().await, 1);
        registry.detach(id).await;
        assert_eq!(registry.len().await, 0);
    }
}
