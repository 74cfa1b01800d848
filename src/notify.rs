// src/notify.rs

//! Change notifications for UI collaborators.
//!
//! Every successful mutation is broadcast so pages can re-render without
//! polling. Notices are observability only: nothing inside the crate listens
//! to them to keep data consistent.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::{store::PartitionName, sync::MutationEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Add,
    Update,
    Delete,
    /// Bulk load of the question bank.
    Import,
    Restore,
    Clear,
}

/// `{ partition, action, key, timestamp }` as seen by subscribers.
/// Whole-store actions carry no partition and no key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeNotice {
    pub partition: Option<PartitionName>,
    pub action: ChangeAction,
    pub key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeNotice {
    pub fn whole_store(action: ChangeAction) -> Self {
        Self {
            partition: None,
            action,
            key: None,
            timestamp: Utc::now(),
        }
    }
}

impl From<&MutationEntry> for ChangeNotice {
    fn from(entry: &MutationEntry) -> Self {
        Self {
            partition: Some(entry.partition),
            action: entry.action.into(),
            key: Some(entry.key.clone()),
            timestamp: entry.timestamp,
        }
    }
}

/// Broadcast channel for change notices.
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeNotice>,
}

impl ChangeNotifier {
    /// Create a notifier with the given broadcast channel capacity.
    /// Slow subscribers lag and skip notices beyond it.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, notice: ChangeNotice) {
        tracing::trace!(?notice, "change");
        // No receivers is fine
        let _ = self.tx.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.tx.subscribe()
    }
}
