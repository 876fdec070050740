//! Project Registry (C2): discovers agent project directories, maintains a
//! sidecar config of manually-added and renamed projects, and resolves
//! alias → real path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use gateway_paths::GatewayPaths;
use gateway_protocol::types::{ProjectDto, ProjectOrigin};
use serde::{Deserialize, Serialize};

use crate::errors::ProjectError;
use crate::sessions::SessionLogReader;
use crate::util::write_atomic;

/// OS junk filtered out of directory listings (spec.md §4.2).
const JUNK_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// Sidecar entry for one alias, persisted at `<root>/project-config.json`
/// (spec.md §6.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SidecarEntry {
    #[serde(default, rename = "manuallyAdded", skip_serializing_if = "is_false")]
    manually_added: bool,
    #[serde(default, rename = "originalPath", skip_serializing_if = "Option::is_none")]
    original_path: Option<String>,
    #[serde(default, rename = "displayName", skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

type Sidecar = HashMap<String, SidecarEntry>;

/// Discovers, names, and resolves agent projects.
///
/// The alias → real-path map is memoized for the process lifetime once a
/// given alias's real path has been resolved (spec.md §5: "write-once per
/// alias"); the discovered project *list* itself is recomputed on every
/// `discover()` call, including the FS Watcher's debounce callback.
#[derive(Clone)]
pub struct ProjectRegistry {
    paths: GatewayPaths,
    reader: SessionLogReader,
    resolved: Arc<RwLock<HashMap<String, PathBuf>>>,
}

impl ProjectRegistry {
    pub fn new(paths: GatewayPaths) -> Self {
        let reader = SessionLogReader::new(paths.clone());
        Self {
            paths,
            reader,
            resolved: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn load_sidecar(&self) -> Sidecar {
        let path = self.paths.sidecar_file();
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Sidecar::new();
        };
        match serde_json::from_str(&content) {
            Ok(sidecar) => sidecar,
            Err(e) => {
                tracing::warn!(
                    event = "core.project.sidecar_parse_failed",
                    path = %path.display(),
                    error = %e,
                );
                Sidecar::new()
            }
        }
    }

    fn save_sidecar(&self, sidecar: &Sidecar) -> Result<(), ProjectError> {
        let body = serde_json::to_vec_pretty(sidecar).expect("sidecar map always serializes");
        write_atomic(&self.paths.sidecar_file(), &body)?;
        Ok(())
    }

    /// Enumerate subdirectories of the agent root, filtering OS junk, then
    /// union with sidecar entries marked `manuallyAdded`.
    pub fn discover(&self) -> Result<Vec<ProjectDto>, ProjectError> {
        let sidecar = self.load_sidecar();
        let mut aliases: Vec<String> = Vec::new();

        if let Ok(entries) = std::fs::read_dir(self.paths.projects_dir()) {
            for entry in entries.flatten() {
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if !file_type.is_dir() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if JUNK_NAMES.contains(&name.as_str()) {
                    continue;
                }
                aliases.push(name);
            }
        }

        for (alias, entry) in &sidecar {
            if entry.manually_added && !aliases.contains(alias) {
                aliases.push(alias.clone());
            }
        }
        aliases.sort();
        aliases.dedup();

        aliases
            .into_iter()
            .map(|alias| self.build_project_dto(&alias, &sidecar))
            .collect()
    }

    fn build_project_dto(
        &self,
        alias: &str,
        sidecar: &Sidecar,
    ) -> Result<ProjectDto, ProjectError> {
        let entry = sidecar.get(alias);
        let origin = if entry.is_some_and(|e| e.manually_added) {
            ProjectOrigin::ManuallyAdded
        } else {
            ProjectOrigin::AgentManaged
        };
        let real_path = self.resolve_alias_with(alias, entry);
        let display_name = self.resolve_display_name(alias, &real_path, entry);
        let session_count = self.reader.count_sessions(alias).unwrap_or(0);

        Ok(ProjectDto {
            alias: alias.to_string(),
            real_path: real_path.to_string_lossy().into_owned(),
            display_name,
            origin,
            session_count,
        })
    }

    /// `resolveAlias`: the real path backing an alias. Panics-free; falls
    /// back to the decoded alias if nothing else is known.
    pub fn resolve_alias(&self, alias: &str) -> PathBuf {
        let sidecar = self.load_sidecar();
        self.resolve_alias_with(alias, sidecar.get(alias))
    }

    fn resolve_alias_with(&self, alias: &str, sidecar_entry: Option<&SidecarEntry>) -> PathBuf {
        if let Some(cached) = self.resolved.read().expect("lock poisoned").get(alias) {
            return cached.clone();
        }

        let resolved = if let Some(original) = sidecar_entry.and_then(|e| e.original_path.clone())
        {
            PathBuf::from(original)
        } else if let Some(cwd) = self.reader.resolve_cwd(alias) {
            PathBuf::from(cwd)
        } else {
            PathBuf::from(decode_alias(alias))
        };

        self.resolved
            .write()
            .expect("lock poisoned")
            .insert(alias.to_string(), resolved.clone());
        resolved
    }

    /// Display-name resolution order: sidecar override → manifest `name`
    /// field → final path segment → decoded alias (spec.md §4.2).
    fn resolve_display_name(
        &self,
        alias: &str,
        real_path: &Path,
        entry: Option<&SidecarEntry>,
    ) -> String {
        if let Some(name) = entry.and_then(|e| e.display_name.clone())
            && !name.is_empty()
        {
            return name;
        }
        if let Some(name) = read_manifest_name(real_path) {
            return name;
        }
        if let Some(segment) = real_path.file_name().and_then(|n| n.to_str()) {
            return segment.to_string();
        }
        decode_alias(alias)
    }

    /// `addManual`: fails if `path` doesn't exist or the alias already exists.
    pub fn add_manual(
        &self,
        path: &str,
        display_name: Option<String>,
    ) -> Result<ProjectDto, ProjectError> {
        let path_buf = PathBuf::from(path);
        if !path_buf.exists() {
            return Err(ProjectError::PathNotFound {
                path: path.to_string(),
            });
        }
        let alias = alias_of(path);

        let mut sidecar = self.load_sidecar();
        if sidecar.contains_key(&alias) || self.paths.project_dir(&alias).exists() {
            return Err(ProjectError::AlreadyExists { alias });
        }

        sidecar.insert(
            alias.clone(),
            SidecarEntry {
                manually_added: true,
                original_path: Some(path.to_string()),
                display_name,
            },
        );
        self.save_sidecar(&sidecar)?;
        std::fs::create_dir_all(self.paths.project_dir(&alias))?;

        self.resolved
            .write()
            .expect("lock poisoned")
            .insert(alias.clone(), path_buf);

        self.build_project_dto(&alias, &sidecar)
    }

    /// `rename`: mutates only the sidecar, never the alias. An empty
    /// display name clears the override.
    pub fn rename(&self, alias: &str, display_name: &str) -> Result<(), ProjectError> {
        if !self.paths.project_dir(alias).exists() {
            return Err(ProjectError::NotFound {
                alias: alias.to_string(),
            });
        }
        let mut sidecar = self.load_sidecar();
        let entry = sidecar.entry(alias.to_string()).or_default();
        entry.display_name = if display_name.is_empty() {
            None
        } else {
            Some(display_name.to_string())
        };
        self.save_sidecar(&sidecar)
    }

    /// `delete`: fails unless every `.jsonl` under the alias directory is
    /// effectively empty (no non-blank lines).
    pub fn delete(&self, alias: &str) -> Result<(), ProjectError> {
        let dir = self.paths.project_dir(alias);
        if !dir.exists() {
            return Err(ProjectError::NotFound {
                alias: alias.to_string(),
            });
        }

        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                let content = std::fs::read_to_string(&path).unwrap_or_default();
                if content.lines().any(|l| !l.trim().is_empty()) {
                    return Err(ProjectError::NotEmpty {
                        alias: alias.to_string(),
                    });
                }
            }
        }

        std::fs::remove_dir_all(&dir)?;
        let mut sidecar = self.load_sidecar();
        sidecar.remove(alias);
        self.save_sidecar(&sidecar)?;
        self.resolved.write().expect("lock poisoned").remove(alias);
        Ok(())
    }
}

/// Directory-name-safe encoding of a project's real path.
pub fn alias_of(real_path: &str) -> String {
    real_path.replace(['/', '\\'], "-")
}

fn decode_alias(alias: &str) -> String {
    alias.replace('-', "/")
}

/// Reads the `name` field out of a `package.json`-style manifest at the
/// project root, if present and parseable.
fn read_manifest_name(real_path: &Path) -> Option<String> {
    let manifest = real_path.join("package.json");
    let content = std::fs::read_to_string(manifest).ok()?;
    let value: serde_json::Value = serde_json::from_str(&content).ok()?;
    value
        .get("name")
        .and_then(|n| n.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ProjectRegistry) {
        let dir = TempDir::new().unwrap();
        let paths = GatewayPaths::from_dir(dir.path().to_path_buf(), dir.path().to_path_buf());
        (dir, ProjectRegistry::new(paths))
    }

    fn write_log(dir: &TempDir, alias: &str, file_name: &str, content: &str) {
        let path = dir.path().join("projects").join(alias).join(file_name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn alias_of_replaces_separators() {
        assert_eq!(alias_of("/home/user/my-app"), "-home-user-my-app");
    }

    #[test]
    fn discover_finds_agent_managed_project_dir() {
        let (dir, registry) = setup();
        write_log(
            &dir,
            "home-user-my-app",
            "s1.jsonl",
            "{\"sessionId\":\"s1\",\"timestamp\":\"2026-01-01T00:00:00Z\",\"cwd\":\"/home/user/my-app\"}\n",
        );
        let projects = registry.discover().unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].alias, "home-user-my-app");
        assert_eq!(projects[0].real_path, "/home/user/my-app");
        assert_eq!(projects[0].origin, ProjectOrigin::AgentManaged);
    }

    #[test]
    fn discover_filters_os_junk() {
        let (dir, registry) = setup();
        std::fs::create_dir_all(dir.path().join("projects").join(".DS_Store")).unwrap();
        let projects = registry.discover().unwrap();
        assert!(projects.is_empty());
    }

    #[test]
    fn add_manual_fails_when_path_missing() {
        let (_dir, registry) = setup();
        let err = registry
            .add_manual("/nonexistent/path", None)
            .unwrap_err();
        assert!(matches!(err, ProjectError::PathNotFound { .. }));
    }

    #[test]
    fn add_manual_then_discover_round_trips() {
        let (dir, registry) = setup();
        let real = dir.path().join("some-project");
        std::fs::create_dir_all(&real).unwrap();
        let project = registry
            .add_manual(real.to_str().unwrap(), Some("My App".to_string()))
            .unwrap();
        assert_eq!(project.origin, ProjectOrigin::ManuallyAdded);
        assert_eq!(project.display_name, "My App");

        let err = registry
            .add_manual(real.to_str().unwrap(), None)
            .unwrap_err();
        assert!(matches!(err, ProjectError::AlreadyExists { .. }));

        let discovered = registry.discover().unwrap();
        assert_eq!(discovered.len(), 1);
        assert_eq!(discovered[0].alias, project.alias);
    }

    #[test]
    fn rename_overrides_display_name_and_empty_clears() {
        let (dir, registry) = setup();
        write_log(&dir, "proj", "s1.jsonl", "{\"sessionId\":\"s1\"}\n");
        registry.rename("proj", "Renamed").unwrap();
        let projects = registry.discover().unwrap();
        assert_eq!(projects[0].display_name, "Renamed");

        registry.rename("proj", "").unwrap();
        let projects = registry.discover().unwrap();
        assert_eq!(projects[0].display_name, "proj");
    }

    #[test]
    fn rename_fails_for_unknown_alias() {
        let (_dir, registry) = setup();
        let err = registry.rename("nope", "x").unwrap_err();
        assert!(matches!(err, ProjectError::NotFound { .. }));
    }

    #[test]
    fn delete_fails_when_sessions_non_empty() {
        let (dir, registry) = setup();
        write_log(
            &dir,
            "proj",
            "s1.jsonl",
            "{\"sessionId\":\"s1\",\"message\":{\"role\":\"user\",\"content\":\"hi\"}}\n",
        );
        let err = registry.delete("proj").unwrap_err();
        assert!(matches!(err, ProjectError::NotEmpty { .. }));
    }

    #[test]
    fn delete_succeeds_when_logs_are_blank() {
        let (dir, registry) = setup();
        write_log(&dir, "proj", "s1.jsonl", "\n\n");
        registry.delete("proj").unwrap();
        assert!(!dir.path().join("projects/proj").exists());
        assert!(registry.discover().unwrap().is_empty());
    }

    #[test]
    fn display_name_falls_back_to_manifest_name() {
        let (dir, registry) = setup();
        let real = dir.path().join("some-project");
        std::fs::create_dir_all(&real).unwrap();
        std::fs::write(real.join("package.json"), r#"{"name":"manifest-name"}"#).unwrap();
        let project = registry.add_manual(real.to_str().unwrap(), None).unwrap();
        assert_eq!(project.display_name, "manifest-name");
    }

    #[test]
    fn resolve_alias_is_memoized_after_first_resolution() {
        let (dir, registry) = setup();
        write_log(
            &dir,
            "proj",
            "s1.jsonl",
            "{\"sessionId\":\"s1\",\"cwd\":\"/tmp/original\"}\n",
        );
        let first = registry.resolve_alias("proj");
        assert_eq!(first, PathBuf::from("/tmp/original"));

        // Even if the log changes, the cached resolution sticks.
        write_log(
            &dir,
            "proj",
            "s2.jsonl",
            "{\"sessionId\":\"s2\",\"cwd\":\"/tmp/changed\"}\n",
        );
        let second = registry.resolve_alias("proj");
        assert_eq!(second, PathBuf::from("/tmp/original"));
    }
}
