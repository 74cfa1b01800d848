// src/sync/queue.rs

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{notify::ChangeAction, store::PartitionName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    Add,
    Update,
    Delete,
}

impl From<MutationAction> for ChangeAction {
    fn from(action: MutationAction) -> Self {
        match action {
            MutationAction::Add => ChangeAction::Add,
            MutationAction::Update => ChangeAction::Update,
            MutationAction::Delete => ChangeAction::Delete,
        }
    }
}

/// `PENDING -> IN_FLIGHT -> { DONE | PENDING (retry) }`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    InFlight,
    Done,
}

/// One recorded mutation waiting for remote sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEntry {
    pub partition: PartitionName,
    pub action: MutationAction,
    pub key: String,
    pub timestamp: DateTime<Utc>,
    pub state: EntryState,
    /// Failed push attempts so far.
    pub attempts: u32,
}

impl MutationEntry {
    pub fn new(partition: PartitionName, action: MutationAction, key: impl Into<String>) -> Self {
        Self {
            partition,
            action,
            key: key.into(),
            timestamp: Utc::now(),
            state: EntryState::Pending,
            attempts: 0,
        }
    }
}

/// FIFO of pending entries plus the entry in flight and the failed entries
/// waiting for the next pass. Owned by the sync engine; never persisted.
#[derive(Debug, Default)]
pub struct MutationQueue {
    pending: VecDeque<MutationEntry>,
    in_flight: Option<MutationEntry>,
    deferred: Vec<MutationEntry>,
}

impl MutationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mut entry: MutationEntry) {
        entry.state = EntryState::Pending;
        self.pending.push_back(entry);
    }

    /// Takes the oldest pending entry and marks it in flight.
    /// At most one entry is in flight; `None` while one still is.
    pub fn begin_next(&mut self) -> Option<MutationEntry> {
        if self.in_flight.is_some() {
            return None;
        }
        let mut entry = self.pending.pop_front()?;
        entry.state = EntryState::InFlight;
        self.in_flight = Some(entry.clone());
        Some(entry)
    }

    /// The remote confirmed the entry in flight.
    pub fn complete(&mut self) -> Option<MutationEntry> {
        let mut entry = self.in_flight.take()?;
        entry.state = EntryState::Done;
        Some(entry)
    }

    /// The push of the entry in flight failed. It waits outside the FIFO
    /// until `requeue_deferred`.
    pub fn fail(&mut self) -> Option<&MutationEntry> {
        let mut entry = self.in_flight.take()?;
        entry.state = EntryState::Pending;
        entry.attempts += 1;
        self.deferred.push(entry);
        self.deferred.last()
    }

    /// Puts failed entries back at the tail, oldest first.
    pub fn requeue_deferred(&mut self) -> usize {
        let count = self.deferred.len();
        for entry in std::mem::take(&mut self.deferred) {
            self.push(entry);
        }
        count
    }

    /// Entries not yet confirmed: pending, in flight, or waiting for a retry.
    pub fn depth(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight.is_some()) + self.deferred.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops pending and deferred entries. The entry in flight still completes.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len() + self.deferred.len();
        self.pending.clear();
        self.deferred.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str) -> MutationEntry {
        MutationEntry::new(PartitionName::Problem, MutationAction::Add, key)
    }

    #[test]
    fn entries_leave_in_fifo_order() {
        let mut queue = MutationQueue::new();
        queue.push(entry("a"));
        queue.push(entry("b"));

        let first = queue.begin_next().unwrap();
        assert_eq!(first.key, "a");
        assert_eq!(first.state, EntryState::InFlight);
        queue.complete();
        assert_eq!(queue.begin_next().unwrap().key, "b");
        queue.complete();
        assert!(queue.begin_next().is_none());
    }

    #[test]
    fn one_entry_in_flight_at_a_time() {
        let mut queue = MutationQueue::new();
        queue.push(entry("a"));
        queue.push(entry("b"));

        assert_eq!(queue.begin_next().unwrap().key, "a");
        assert!(queue.begin_next().is_none());
        assert_eq!(queue.depth(), 2);

        let done = queue.complete().unwrap();
        assert_eq!(done.state, EntryState::Done);
        assert_eq!(queue.begin_next().unwrap().key, "b");
    }

    #[test]
    fn failed_entries_retry_from_the_tail() {
        let mut queue = MutationQueue::new();
        queue.push(entry("a"));
        queue.push(entry("b"));

        queue.begin_next().unwrap();
        assert_eq!(queue.fail().unwrap().attempts, 1);
        assert_eq!(queue.depth(), 2);

        queue.begin_next().unwrap();
        queue.complete();
        assert_eq!(queue.begin_next().map(|e| e.key), None);
        assert_eq!(queue.depth(), 1);

        assert_eq!(queue.requeue_deferred(), 1);
        let retried = queue.begin_next().unwrap();
        assert_eq!(retried.key, "a");
        assert_eq!(retried.attempts, 1);
        assert_eq!(retried.state, EntryState::InFlight);
    }

    #[test]
    fn clear_keeps_the_entry_in_flight() {
        let mut queue = MutationQueue::new();
        queue.push(entry("a"));
        queue.push(entry("b"));
        queue.begin_next().unwrap();

        assert_eq!(queue.clear(), 1);
        assert_eq!(queue.depth(), 1);
        assert!(queue.complete().is_some());
        assert_eq!(queue.depth(), 0);
    }
}
