// src/sync/engine.rs

//! Mutation queue drain loop.
//!
//! Every mutation is written to local storage before `enqueue` returns; the
//! remote push happens later on a background task, one entry at a time so the
//! remote sees mutations in queue order. Failed pushes go back to the tail and
//! are retried after the current pass, after `retry_delay`.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::{
    sync::{Notify, watch},
    task::JoinHandle,
};

use crate::{
    models::document::QuestionDocument,
    persistence::{PersistenceAdapter, SyncPayload},
    store::{PartitionName, PartitionedStore, Snapshot},
    sync::queue::{MutationEntry, MutationQueue},
};

/// Observable state of the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    /// Entries not yet confirmed by the remote (pending, in flight, or
    /// waiting for a retry).
    pub queue_depth: usize,
    pub draining: bool,
    /// Entries confirmed by the remote since start.
    pub completed: u64,
    /// Push attempts that failed and were requeued.
    pub failed_attempts: u64,
    pub last_local_save: Option<DateTime<Utc>>,
    /// The last local save failed; the in-memory state is ahead of storage.
    pub local_degraded: bool,
}

struct Shared {
    queue: Mutex<MutationQueue>,
    store: Arc<RwLock<PartitionedStore>>,
    persistence: Arc<PersistenceAdapter>,
    wake: Notify,
    status: watch::Sender<SyncStatus>,
    retry_delay: Duration,
}

pub struct SyncEngine {
    shared: Arc<Shared>,
    worker: JoinHandle<()>,
}

impl SyncEngine {
    /// Starts the drain task. Must be called from within a Tokio runtime.
    pub fn start(
        store: Arc<RwLock<PartitionedStore>>,
        persistence: Arc<PersistenceAdapter>,
        retry_delay: Duration,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        let shared = Arc::new(Shared {
            queue: Mutex::new(MutationQueue::new()),
            store,
            persistence,
            wake: Notify::new(),
            status,
            retry_delay,
        });
        let worker = tokio::spawn(run(shared.clone()));
        Self { shared, worker }
    }

    /// Records a mutation. Saves `snapshot` locally first, then queues the
    /// entry for the remote and wakes the drain task. Never blocks on I/O
    /// beyond the local write and never fails.
    pub fn enqueue(&self, entry: MutationEntry, snapshot: &Snapshot) {
        self.shared.save_local(snapshot);
        tracing::debug!(
            partition = %entry.partition,
            action = ?entry.action,
            key = %entry.key,
            "mutation queued"
        );
        let mut queue = self.shared.queue.lock();
        queue.push(entry);
        self.shared.publish_depth(&queue);
        drop(queue);
        self.shared.wake.notify_one();
    }

    /// Local write without a remote push (bulk import, restore, clear).
    pub fn persist_local(&self, snapshot: &Snapshot) -> bool {
        self.shared.save_local(snapshot)
    }

    /// Drops every pending entry. The entry in flight, if any, still completes.
    pub fn clear_queue(&self) -> usize {
        let mut queue = self.shared.queue.lock();
        let dropped = queue.clear();
        self.shared.publish_depth(&queue);
        drop(queue);
        if dropped > 0 {
            tracing::info!("Dropped {} pending sync entries", dropped);
        }
        dropped
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.status.borrow().queue_depth
    }

    pub fn is_draining(&self) -> bool {
        self.shared.status.borrow().draining
    }

    pub fn status(&self) -> SyncStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    /// Waits until every queued entry is confirmed and the drain task is idle.
    pub async fn settle(&self) {
        let mut rx = self.shared.status.subscribe();
        let _ = rx.wait_for(|s| s.queue_depth == 0 && !s.draining).await;
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run(shared: Arc<Shared>) {
    loop {
        shared.wake.notified().await;
        shared.drain().await;
    }
}

impl Shared {
    fn save_local(&self, snapshot: &Snapshot) -> bool {
        match self.persistence.save_local(snapshot) {
            Ok(()) => {
                self.status.send_modify(|s| {
                    if s.local_degraded {
                        tracing::info!("Local storage writable again");
                    }
                    s.local_degraded = false;
                    s.last_local_save = Some(Utc::now());
                });
                true
            }
            Err(e) => {
                tracing::warn!("Local save failed, continuing in memory: {}", e);
                self.status.send_modify(|s| s.local_degraded = true);
                false
            }
        }
    }

    /// Called with the queue lock held so published depths never go back in time.
    fn publish_depth(&self, queue: &MutationQueue) {
        let depth = queue.depth();
        self.status.send_if_modified(|s| {
            let changed = s.queue_depth != depth;
            s.queue_depth = depth;
            changed
        });
    }

    fn begin_next(&self) -> Option<MutationEntry> {
        let mut queue = self.queue.lock();
        let entry = queue.begin_next();
        self.publish_depth(&queue);
        entry
    }

    async fn drain(&self) {
        self.status.send_modify(|s| s.draining = true);
        loop {
            while let Some(entry) = self.begin_next() {
                let payload = self.payload_for(&entry);
                let result = self.persistence.push_remote(&payload).await;

                let mut queue = self.queue.lock();
                match result {
                    Ok(()) => {
                        queue.complete();
                        tracing::debug!(
                            partition = %entry.partition,
                            key = %entry.key,
                            attempts = entry.attempts,
                            "mutation synced"
                        );
                        self.status.send_modify(|s| s.completed += 1);
                    }
                    Err(e) => {
                        let attempts = queue.fail().map_or(0, |failed| failed.attempts);
                        tracing::warn!(
                            "Sync of {} {} failed (attempt {}), will retry: {}",
                            entry.partition,
                            entry.key,
                            attempts,
                            e
                        );
                        self.status.send_modify(|s| s.failed_attempts += 1);
                    }
                }
                self.publish_depth(&queue);
            }

            let retrying = {
                let mut queue = self.queue.lock();
                let retrying = queue.requeue_deferred();
                self.publish_depth(&queue);
                retrying
            };
            if retrying == 0 {
                break;
            }
            tokio::time::sleep(self.retry_delay).await;
        }
        self.status.send_modify(|s| s.draining = false);
    }

    /// Reads the current store state for an entry. Problem mutations push the
    /// whole derived-question document; other partitions push the record.
    fn payload_for(&self, entry: &MutationEntry) -> SyncPayload {
        let store = self.store.read();
        let snapshot = store.snapshot();
        let record = match entry.partition {
            PartitionName::Problem => {
                let now = Utc::now();
                let derived = snapshot
                    .problems
                    .values()
                    .filter(|p| p.is_derived())
                    .cloned()
                    .collect();
                return SyncPayload::DerivedQuestions(
                    QuestionDocument::empty(now).with_questions(derived, now),
                );
            }
            PartitionName::User => snapshot.users.get(&entry.key).map(serde_json::to_value),
            PartitionName::Event => snapshot.events.get(&entry.key).map(serde_json::to_value),
            PartitionName::Statistics => {
                snapshot.statistics.get(&entry.key).map(serde_json::to_value)
            }
        };
        SyncPayload::Record {
            partition: entry.partition,
            action: entry.action,
            key: entry.key.clone(),
            record: record.and_then(Result::ok),
        }
    }
}
