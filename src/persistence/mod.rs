// src/persistence/mod.rs

//! Persistence adapter: a synchronous local cache for full snapshots and an
//! asynchronous remote document store.

pub mod local;
pub mod remote;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use local::{FileCache, LocalCache, MemoryCache};
pub use remote::{HttpRemote, LocalOnly, RemoteSync, SyncPayload};

use crate::{
    error::{PersistenceError, SyncError},
    models::{document::QuestionDocument, problem::Problem},
    store::Snapshot,
};

/// Copy of the whole store kept under `<namespace>_backup`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub data: Snapshot,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

pub const BACKUP_VERSION: &str = "1.0";

/// A backup as read from storage, before its records are checked.
#[derive(Deserialize)]
struct StoredBackup {
    data: serde_json::Value,
    timestamp: DateTime<Utc>,
    version: String,
}

pub struct PersistenceAdapter {
    local: Arc<dyn LocalCache>,
    remote: Arc<dyn RemoteSync>,
    namespace: String,
}

impl PersistenceAdapter {
    pub fn new(local: Arc<dyn LocalCache>, remote: Arc<dyn RemoteSync>, namespace: impl Into<String>) -> Self {
        Self {
            local,
            remote,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn data_key(&self) -> String {
        format!("{}_data", self.namespace)
    }

    fn backup_key(&self) -> String {
        format!("{}_backup", self.namespace)
    }

    /// Reads the last saved snapshot. `None` when nothing usable is stored;
    /// individual malformed records are dropped, not the whole snapshot.
    pub fn load_local(&self) -> Option<Snapshot> {
        let raw = match self.local.get_item(&self.data_key()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Local snapshot unreadable, starting empty: {}", e);
                return None;
            }
        };
        match Snapshot::from_json_lenient(&raw) {
            Ok(loaded) => {
                if loaded.rejected > 0 {
                    tracing::warn!(
                        "Local snapshot loaded with {} malformed records dropped",
                        loaded.rejected
                    );
                }
                Some(loaded.snapshot)
            }
            Err(e) => {
                tracing::error!("Local snapshot is corrupt, starting empty: {}", e);
                None
            }
        }
    }

    /// Writes the full snapshot. Callers treat a failure as "local cache
    /// stale" and keep serving from memory.
    pub fn save_local(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let raw = serde_json::to_string(snapshot)?;
        self.local.set_item(&self.data_key(), &raw)
    }

    pub fn save_backup(&self, backup: &Backup) -> Result<(), PersistenceError> {
        let raw = serde_json::to_string(backup)?;
        self.local.set_item(&self.backup_key(), &raw)
    }

    /// Reads the saved backup. Its records go through the same per-record
    /// checks as the local snapshot; malformed ones are dropped.
    pub fn load_backup(&self) -> Result<Option<Backup>, PersistenceError> {
        let Some(raw) = self.local.get_item(&self.backup_key())? else {
            return Ok(None);
        };
        let envelope: StoredBackup = serde_json::from_str(&raw)?;
        let loaded = Snapshot::from_value_lenient(envelope.data)?;
        if loaded.rejected > 0 {
            tracing::warn!("Backup loaded with {} malformed records dropped", loaded.rejected);
        }
        Ok(Some(Backup {
            data: loaded.snapshot,
            timestamp: envelope.timestamp,
            version: envelope.version,
        }))
    }

    pub async fn fetch_remote_problems(&self) -> Result<Vec<Problem>, SyncError> {
        self.remote.fetch_question_bank().await
    }

    pub async fn fetch_remote_derived(&self) -> Result<QuestionDocument, SyncError> {
        self.remote.fetch_derived_questions().await
    }

    pub async fn push_remote(&self, payload: &SyncPayload) -> Result<(), SyncError> {
        self.remote.push(payload).await
    }
}
