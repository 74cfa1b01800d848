// src/store/partitions.rs

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use crate::{
    error::StoreError,
    models::{
        event::{Event, EventKind, NewEvent},
        problem::Problem,
        statistics::Statistics,
    },
    store::{
        filter::RecordFilter,
        record::{Insertable, Mutable, Record, Upsertable},
        snapshot::Snapshot,
    },
};

/// Outcome of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Merged,
}

/// The in-memory partitions and the synchronous operations over them.
///
/// Nothing here persists or notifies; `Store` wraps these calls and couples
/// each successful mutation to the sync queue.
#[derive(Debug)]
pub struct PartitionedStore {
    snapshot: Snapshot,
    /// Timestamp of the newest event, used to keep event times strictly increasing.
    last_event_at: Option<DateTime<Utc>>,
}

impl PartitionedStore {
    pub fn new(snapshot: Snapshot) -> Self {
        let last_event_at = snapshot.events.values().map(|e| e.timestamp).max();
        Self {
            snapshot,
            last_event_at,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn get<R: Record>(&self, key: &str) -> Option<&R> {
        R::partition(&self.snapshot).get(key)
    }

    pub fn keys<R: Record>(&self) -> impl Iterator<Item = &str> {
        R::partition(&self.snapshot).keys().map(String::as_str)
    }

    pub fn contains<R: Record>(&self, key: &str) -> bool {
        R::partition(&self.snapshot).contains_key(key)
    }

    /// Records matching `filter`, in key order.
    pub fn list<R: Record>(&self, filter: &RecordFilter) -> Vec<R> {
        R::partition(&self.snapshot)
            .values()
            .filter(|record| filter.matches(*record))
            .cloned()
            .collect()
    }

    pub fn count<R: Record>(&self) -> usize {
        R::partition(&self.snapshot).len()
    }

    /// Inserts `record` under `key`. Returns `Ok(false)` without touching the
    /// existing record when the key is taken.
    pub fn add<R: Insertable>(&mut self, key: &str, record: R) -> Result<bool, StoreError> {
        if record.key() != key {
            return Err(StoreError::MalformedInput(format!(
                "{} record keyed {} cannot be added under {}",
                R::PARTITION,
                record.key(),
                key
            )));
        }
        if self.contains::<R>(key) {
            return Ok(false);
        }
        record.check_schema().map_err(StoreError::MalformedInput)?;
        record
            .check_references(&self.snapshot)
            .map_err(StoreError::MalformedInput)?;

        R::partition_mut(&mut self.snapshot).insert(key.to_string(), record);
        self.mark_updated();
        Ok(true)
    }

    /// Shallow-merges `patch` into the record under `key`.
    /// Returns `Ok(false)` when the key is absent.
    pub fn update<R: Mutable>(&mut self, key: &str, patch: &Map<String, Value>) -> Result<bool, StoreError> {
        let Some(existing) = self.get::<R>(key) else {
            return Ok(false);
        };
        let mut merged: R = merge_patch(existing, patch)?;
        if merged.key() != key {
            return Err(StoreError::MalformedInput(format!(
                "update of {} {} would change its key to {}",
                R::PARTITION,
                key,
                merged.key()
            )));
        }
        merged.check_schema().map_err(StoreError::MalformedInput)?;
        let now = Utc::now();
        merged.touch(now);

        R::partition_mut(&mut self.snapshot).insert(key.to_string(), merged);
        self.mark_updated();
        Ok(true)
    }

    /// Merges `record` into an existing entry or inserts it.
    pub fn upsert<R: Upsertable>(&mut self, key: &str, record: R) -> Result<Upserted, StoreError> {
        if record.key() != key {
            return Err(StoreError::MalformedInput(format!(
                "{} record keyed {} cannot be saved under {}",
                R::PARTITION,
                record.key(),
                key
            )));
        }
        let now = Utc::now();
        let (mut next, outcome) = match self.get::<R>(key) {
            Some(existing) => {
                let Value::Object(patch) = serde_json::to_value(&record)? else {
                    return Err(StoreError::MalformedInput(format!(
                        "{} record does not serialize to an object",
                        R::PARTITION
                    )));
                };
                (merge_patch::<R>(existing, &patch)?, Upserted::Merged)
            }
            None => (record, Upserted::Inserted),
        };
        next.check_schema().map_err(StoreError::MalformedInput)?;
        next.touch(now);

        R::partition_mut(&mut self.snapshot).insert(key.to_string(), next);
        self.mark_updated();
        Ok(outcome)
    }

    /// Removes the record under `key`. Returns `false` when it was absent.
    pub fn delete<R: Mutable>(&mut self, key: &str) -> bool {
        let removed = R::partition_mut(&mut self.snapshot).remove(key).is_some();
        if removed {
            self.mark_updated();
        }
        removed
    }

    /// Builds the event with a fresh id and a timestamp strictly after the
    /// previous one, then appends it.
    pub(crate) fn append_event(&mut self, new: NewEvent) -> Result<Event, StoreError> {
        let timestamp = self.next_event_time();
        let id = format!(
            "event_{}_{}",
            timestamp.timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..9]
        );
        let event = Event {
            id: id.clone(),
            kind: EventKind::from(new.kind),
            user_id: new.user_id,
            payload: new.payload,
            timestamp,
        };
        event.check_schema().map_err(StoreError::MalformedInput)?;
        if self.contains::<Event>(&id) {
            return Err(StoreError::MalformedInput(format!("event id {} already in use", id)));
        }
        self.snapshot.events.insert(id, event.clone());
        self.mark_updated();
        self.last_event_at = Some(timestamp);
        Ok(event)
    }

    /// Writes a statistics entry. Reserved for the aggregation step.
    pub(crate) fn put_statistics(&mut self, mut stats: Statistics) -> bool {
        stats.recompute_accuracy();
        stats.touch(Utc::now());
        let existed = self
            .snapshot
            .statistics
            .insert(stats.user_id.clone(), stats)
            .is_some();
        self.mark_updated();
        existed
    }

    /// Swaps in a whole snapshot (restore / clear).
    pub(crate) fn replace(&mut self, snapshot: Snapshot) {
        self.last_event_at = snapshot.events.values().map(|e| e.timestamp).max();
        self.snapshot = snapshot;
        self.mark_updated();
    }

    /// Insert-or-refresh used by the initial bank import. Overwrites: the bank
    /// is canonical for originals.
    pub(crate) fn import_problem(&mut self, problem: Problem) {
        self.snapshot.problems.insert(problem.code.clone(), problem);
    }

    pub(crate) fn mark_updated(&mut self) {
        self.snapshot.metadata.last_updated = Utc::now();
    }

    fn next_event_time(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.last_event_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        }
    }
}

/// Shallow merge: top-level fields of `patch` replace those of `existing`.
/// The merged value must still be a valid record.
fn merge_patch<R: Record>(existing: &R, patch: &Map<String, Value>) -> Result<R, StoreError> {
    let mut value = serde_json::to_value(existing)?;
    let Value::Object(fields) = &mut value else {
        return Err(StoreError::MalformedInput(format!(
            "{} record does not serialize to an object",
            R::PARTITION
        )));
    };
    for (field, v) in patch {
        fields.insert(field.clone(), v.clone());
    }
    serde_json::from_value(value)
        .map_err(|e| StoreError::MalformedInput(format!("invalid {} patch: {}", R::PARTITION, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{problem::QuestionKind, user::User};
    use serde_json::json;

    fn problem(code: &str, answer: &str) -> Problem {
        serde_json::from_value(json!({"QCODE": code, "QUESTION": "2+2=?", "ANSWER": answer})).unwrap()
    }

    fn patch(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("patch must be an object"),
        }
    }

    fn store() -> PartitionedStore {
        PartitionedStore::new(Snapshot::new(Utc::now()))
    }

    #[test]
    fn test_add_rejects_duplicates_and_keeps_original() {
        let mut s = store();
        assert!(s.add("Q1", problem("Q1", "4")).unwrap());
        assert!(!s.add("Q1", problem("Q1", "5")).unwrap());
        assert_eq!(s.get::<Problem>("Q1").unwrap().answer, "4");
    }

    #[test]
    fn test_add_rejects_key_mismatch() {
        let mut s = store();
        assert!(matches!(
            s.add("Q2", problem("Q1", "4")),
            Err(StoreError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_derived_requires_existing_source() {
        let mut s = store();
        let mut variant = problem("Q1-B1", "O");
        variant.kind = QuestionKind::Derived;
        variant.source_code = Some("Q1".into());
        assert!(s.add("Q1-B1", variant.clone()).is_err());

        s.add("Q1", problem("Q1", "4")).unwrap();
        assert!(s.add("Q1-B1", variant).unwrap());
    }

    #[test]
    fn test_update_merges_and_is_idempotent() {
        let mut s = store();
        s.add("Q1", problem("Q1", "4")).unwrap();
        let p = patch(json!({"ANSWER": "5", "LAYER1": "관계법령"}));
        assert!(s.update::<Problem>("Q1", &p).unwrap());
        let once = s.get::<Problem>("Q1").cloned().unwrap();
        assert!(s.update::<Problem>("Q1", &p).unwrap());
        assert_eq!(s.get::<Problem>("Q1"), Some(&once));
        assert_eq!(once.answer, "5");
        assert_eq!(once.question, "2+2=?");
    }

    #[test]
    fn test_update_missing_and_bad_patches() {
        let mut s = store();
        assert!(!s.update::<Problem>("MISSING", &patch(json!({"ANSWER": "5"}))).unwrap());

        s.add("Q1", problem("Q1", "4")).unwrap();
        assert!(s.update::<Problem>("Q1", &patch(json!({"QCODE": "Q2"}))).is_err());
        assert!(s.update::<Problem>("Q1", &patch(json!({"ANSWER": 5}))).is_err());
        assert_eq!(s.get::<Problem>("Q1").unwrap().answer, "4");
    }

    #[test]
    fn test_upsert_merges_profile_fields() {
        let mut s = store();
        let first = User::new("u1", patch(json!({"name": "kim", "level": "free"})));
        assert_eq!(s.upsert("u1", first).unwrap(), Upserted::Inserted);

        let second = User::new("u1", patch(json!({"level": "premium"})));
        assert_eq!(s.upsert("u1", second).unwrap(), Upserted::Merged);

        let user = s.get::<User>("u1").unwrap();
        assert_eq!(user.profile["name"], "kim");
        assert_eq!(user.profile["level"], "premium");
    }

    #[test]
    fn test_delete_then_get() {
        let mut s = store();
        s.add("Q1", problem("Q1", "4")).unwrap();
        assert!(s.delete::<Problem>("Q1"));
        assert!(s.get::<Problem>("Q1").is_none());
        assert!(!s.delete::<Problem>("Q1"));
    }

    #[test]
    fn test_event_times_strictly_increase() {
        let mut s = store();
        let a = s.append_event(NewEvent::new("login", "u1", Map::new())).unwrap();
        let b = s.append_event(NewEvent::new("login", "u1", Map::new())).unwrap();
        assert!(b.timestamp > a.timestamp);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("event_"));
    }
}
