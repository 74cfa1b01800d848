// src/store/mod.rs

//! The partitioned store and its coupling to the sync queue.
//!
//! `PartitionedStore` is plain data. `Store` is the shared handle: every
//! successful mutation is applied under the write lock, saved locally, queued
//! for the remote and broadcast, in that order, before the call returns.

pub mod filter;
pub mod partitions;
pub mod record;
pub mod snapshot;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Map, Value};

pub use filter::RecordFilter;
pub use partitions::{PartitionedStore, Upserted};
pub use record::{Insertable, Mutable, PartitionName, Record, Upsertable};
pub use snapshot::{LoadedSnapshot, SCHEMA_VERSION, Snapshot, SnapshotMetadata};

use crate::{
    error::StoreError,
    models::{event::Event, event::NewEvent, problem::Problem, statistics::Statistics},
    notify::{ChangeAction, ChangeNotice, ChangeNotifier},
    persistence::PersistenceAdapter,
    sync::{MutationAction, MutationEntry, SyncEngine},
};

pub struct Store {
    inner: Arc<RwLock<PartitionedStore>>,
    sync: SyncEngine,
    notifier: ChangeNotifier,
}

impl Store {
    /// Wraps `snapshot` and starts the sync engine. Needs a Tokio runtime.
    pub fn new(
        snapshot: Snapshot,
        persistence: Arc<PersistenceAdapter>,
        retry_delay: Duration,
        notify_capacity: usize,
    ) -> Self {
        let inner = Arc::new(RwLock::new(PartitionedStore::new(snapshot)));
        let sync = SyncEngine::start(inner.clone(), persistence, retry_delay);
        Self {
            inner,
            sync,
            notifier: ChangeNotifier::new(notify_capacity),
        }
    }

    pub fn get<R: Record>(&self, key: &str) -> Option<R> {
        self.inner.read().get::<R>(key).cloned()
    }

    pub fn list<R: Record>(&self, filter: &RecordFilter) -> Vec<R> {
        self.inner.read().list::<R>(filter)
    }

    /// Every key currently in `R`'s partition, in order.
    pub fn keys<R: Record>(&self) -> Vec<String> {
        self.inner.read().keys::<R>().map(str::to_string).collect()
    }

    pub fn count<R: Record>(&self) -> usize {
        self.inner.read().count::<R>()
    }

    pub fn add<R: Insertable>(&self, key: &str, record: R) -> Result<bool, StoreError> {
        let mut guard = self.inner.write();
        if !guard.add(key, record)? {
            tracing::debug!("Add rejected, {} {} already exists", R::PARTITION, key);
            return Ok(false);
        }
        self.commit(&guard, R::PARTITION, MutationAction::Add, key);
        Ok(true)
    }

    pub fn update<R: Mutable>(&self, key: &str, patch: &Map<String, Value>) -> Result<bool, StoreError> {
        let mut guard = self.inner.write();
        if !guard.update::<R>(key, patch)? {
            return Ok(false);
        }
        self.commit(&guard, R::PARTITION, MutationAction::Update, key);
        Ok(true)
    }

    pub fn upsert<R: Upsertable>(&self, key: &str, record: R) -> Result<Upserted, StoreError> {
        let mut guard = self.inner.write();
        let outcome = guard.upsert(key, record)?;
        let action = match outcome {
            Upserted::Inserted => MutationAction::Add,
            Upserted::Merged => MutationAction::Update,
        };
        self.commit(&guard, R::PARTITION, action, key);
        Ok(outcome)
    }

    pub fn delete<R: Mutable>(&self, key: &str) -> bool {
        let mut guard = self.inner.write();
        if !guard.delete::<R>(key) {
            return false;
        }
        self.commit(&guard, R::PARTITION, MutationAction::Delete, key);
        true
    }

    /// Appends an event with a store-assigned id and timestamp.
    pub fn append_event(&self, new: NewEvent) -> Result<Event, StoreError> {
        let mut guard = self.inner.write();
        let event = guard.append_event(new)?;
        self.commit(&guard, PartitionName::Event, MutationAction::Add, &event.id);
        Ok(event)
    }

    /// Read-modify-write of one user's statistics under a single lock.
    /// Only the aggregation step writes statistics.
    pub(crate) fn update_statistics<F>(&self, user_id: &str, apply: F) -> Statistics
    where
        F: FnOnce(Statistics) -> Statistics,
    {
        let mut guard = self.inner.write();
        let current = guard
            .get::<Statistics>(user_id)
            .cloned()
            .unwrap_or_else(|| Statistics::empty(user_id));
        let next = apply(current);
        let existed = guard.put_statistics(next);
        let action = if existed {
            MutationAction::Update
        } else {
            MutationAction::Add
        };
        self.commit(&guard, PartitionName::Statistics, action, user_id);
        guard
            .get::<Statistics>(user_id)
            .cloned()
            .unwrap_or_else(|| Statistics::empty(user_id))
    }

    /// Loads bank questions: originals are inserted or refreshed, derived
    /// questions only fill gaps. Saved locally, not pushed back to the remote.
    pub(crate) fn import_problems(&self, problems: Vec<Problem>) -> usize {
        let mut guard = self.inner.write();
        let mut imported = 0;
        for problem in problems {
            if problem.is_derived() {
                let has_source = problem
                    .source_code
                    .as_deref()
                    .is_some_and(|source| guard.contains::<Problem>(source));
                if guard.contains::<Problem>(&problem.code) || !has_source {
                    continue;
                }
            }
            guard.import_problem(problem);
            imported += 1;
        }
        if imported > 0 {
            guard.mark_updated();
            self.sync.persist_local(guard.snapshot());
            self.notifier.publish(ChangeNotice {
                partition: Some(PartitionName::Problem),
                action: ChangeAction::Import,
                key: None,
                timestamp: Utc::now(),
            });
        }
        imported
    }

    /// Replaces every partition (restore / clear) and saves locally.
    pub(crate) fn replace_all(&self, snapshot: Snapshot, action: ChangeAction) {
        let mut guard = self.inner.write();
        guard.replace(snapshot);
        if action == ChangeAction::Clear {
            self.sync.clear_queue();
        }
        self.sync.persist_local(guard.snapshot());
        self.notifier.publish(ChangeNotice::whole_store(action));
    }

    /// Saves the current state locally without queueing anything.
    pub fn persist_local(&self) -> bool {
        let guard = self.inner.read();
        self.sync.persist_local(guard.snapshot())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().snapshot().clone()
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Local save and queue entry happen while the write lock is still held,
    /// so the saved snapshot is exactly the state this mutation produced.
    fn commit(&self, guard: &PartitionedStore, partition: PartitionName, action: MutationAction, key: &str) {
        let entry = MutationEntry::new(partition, action, key);
        let notice = ChangeNotice::from(&entry);
        self.sync.enqueue(entry, guard.snapshot());
        self.notifier.publish(notice);
    }
}
