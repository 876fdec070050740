//! In-memory map of agent-scoped environment variables (C1).
//!
//! Volatile by design (spec.md §1 non-goals: no durable per-user secrets).
//! A restart empties the store.

use std::collections::HashMap;
use std::sync::Arc;

use gateway_protocol::types::{is_sensitive_key, EnvVarDto, SENSITIVE_MASK};
use tokio::sync::RwLock;

use crate::errors::EnvError;

#[derive(Debug, Clone)]
struct EnvVarRecord {
    value: String,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

/// Process-wide, volatile environment variable store.
///
/// Cheaply cloneable: the underlying map is shared via `Arc<RwLock<_>>`
/// (teacher pattern: `Arc<RwLock<SessionManager>>` in the daemon crate).
#[derive(Debug, Clone, Default)]
pub struct EnvStore {
    inner: Arc<RwLock<HashMap<String, EnvVarRecord>>>,
}

impl EnvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All variables sorted by key, with sensitive values masked.
    pub async fn list(&self) -> Vec<EnvVarDto> {
        let guard = self.inner.read().await;
        let mut keys: Vec<&String> = guard.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|k| to_dto(k, guard.get(k).expect("key came from this map")))
            .collect()
    }

    /// A single variable, masked. `None` if it does not exist.
    pub async fn get(&self, key: &str) -> Option<EnvVarDto> {
        let guard = self.inner.read().await;
        guard.get(key).map(|record| to_dto(key, record))
    }

    /// Upsert a variable, preserving `created_at` across updates.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        description: Option<String>,
    ) -> Result<EnvVarDto, EnvError> {
        let key = key.into();
        if key.is_empty() {
            return Err(EnvError::EmptyKey);
        }
        let value = value.into();
        let now = now_rfc3339();

        let mut guard = self.inner.write().await;
        let record = guard
            .entry(key.clone())
            .and_modify(|r| {
                r.value = value.clone();
                r.description = description.clone();
                r.updated_at = now.clone();
            })
            .or_insert_with(|| EnvVarRecord {
                value,
                description,
                created_at: now.clone(),
                updated_at: now,
            });
        Ok(to_dto(&key, record))
    }

    /// Remove a variable. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> bool {
        self.inner.write().await.remove(key).is_some()
    }

    /// Upsert many variables at once, returning their masked DTOs.
    pub async fn bulk_set(
        &self,
        entries: HashMap<String, String>,
    ) -> Result<Vec<EnvVarDto>, EnvError> {
        let mut result = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            result.push(self.set(key, value, None).await?);
        }
        Ok(result)
    }

    /// Unmasked snapshot, consumed only by the Agent Runner (C5) when
    /// constructing the child's environment.
    pub async fn as_record(&self) -> HashMap<String, String> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(k, r)| (k.clone(), r.value.clone()))
            .collect()
    }
}

fn to_dto(key: &str, record: &EnvVarRecord) -> EnvVarDto {
    let value = if is_sensitive_key(key) && !record.value.is_empty() {
        SENSITIVE_MASK.to_string()
    } else {
        record.value.clone()
    };
    EnvVarDto {
        key: key.to_string(),
        value,
        description: record.description.clone(),
        created_at: record.created_at.clone(),
        updated_at: record.updated_at.clone(),
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
