// src/store/record.rs

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    models::{event::Event, problem::Problem, statistics::Statistics, user::User},
    store::snapshot::Snapshot,
};

/// The four independent collections held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PartitionName {
    Problem,
    User,
    Event,
    Statistics,
}

impl PartitionName {
    pub const ALL: [PartitionName; 4] = [
        PartitionName::Problem,
        PartitionName::User,
        PartitionName::Event,
        PartitionName::Statistics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionName::Problem => "Problem",
            PartitionName::User => "User",
            PartitionName::Event => "Event",
            PartitionName::Statistics => "Statistics",
        }
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value that lives in one partition of the store.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const PARTITION: PartitionName;

    /// The key this record must be stored under.
    fn key(&self) -> &str;

    fn partition(snapshot: &Snapshot) -> &BTreeMap<String, Self>;

    fn partition_mut(snapshot: &mut Snapshot) -> &mut BTreeMap<String, Self>;

    /// Shape checks that need nothing but the record. Run on every write and
    /// on every record read back from storage.
    fn check_schema(&self) -> Result<(), String> {
        Ok(())
    }

    /// Checks against the rest of the store, run only when the record is created.
    fn check_references(&self, _snapshot: &Snapshot) -> Result<(), String> {
        Ok(())
    }

    /// Stamps the last-modified field, for records that have one.
    fn touch(&mut self, _now: DateTime<Utc>) {}
}

/// Records consumers may create with `add`.
pub trait Insertable: Record {}

/// Records consumers may `update` and `delete`.
pub trait Mutable: Record {}

/// Records with merge-or-insert semantics.
pub trait Upsertable: Mutable {}

impl Record for Problem {
    const PARTITION: PartitionName = PartitionName::Problem;

    fn key(&self) -> &str {
        &self.code
    }

    fn partition(snapshot: &Snapshot) -> &BTreeMap<String, Self> {
        &snapshot.problems
    }

    fn partition_mut(snapshot: &mut Snapshot) -> &mut BTreeMap<String, Self> {
        &mut snapshot.problems
    }

    fn check_schema(&self) -> Result<(), String> {
        Problem::check_schema(self)
    }

    fn check_references(&self, snapshot: &Snapshot) -> Result<(), String> {
        match &self.source_code {
            Some(source) if self.is_derived() && !snapshot.problems.contains_key(source) => Err(
                format!("source question {} of {} does not exist", source, self.code),
            ),
            _ => Ok(()),
        }
    }
}

impl Insertable for Problem {}
impl Mutable for Problem {}

impl Record for User {
    const PARTITION: PartitionName = PartitionName::User;

    fn key(&self) -> &str {
        &self.id
    }

    fn partition(snapshot: &Snapshot) -> &BTreeMap<String, Self> {
        &snapshot.users
    }

    fn partition_mut(snapshot: &mut Snapshot) -> &mut BTreeMap<String, Self> {
        &mut snapshot.users
    }

    fn check_schema(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("user id is empty".to_string());
        }
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_modified = now;
    }
}

impl Insertable for User {}
impl Mutable for User {}
impl Upsertable for User {}

impl Record for Event {
    const PARTITION: PartitionName = PartitionName::Event;

    fn key(&self) -> &str {
        &self.id
    }

    fn partition(snapshot: &Snapshot) -> &BTreeMap<String, Self> {
        &snapshot.events
    }

    fn partition_mut(snapshot: &mut Snapshot) -> &mut BTreeMap<String, Self> {
        &mut snapshot.events
    }

    fn check_schema(&self) -> Result<(), String> {
        if self.id.is_empty() || self.user_id.is_empty() || self.kind.as_str().is_empty() {
            return Err(format!("event {:?} is missing id, type or userId", self.id));
        }
        if let Some(key) = Event::reserved_payload_key(&self.payload) {
            return Err(format!("event payload may not set {:?}", key));
        }
        Ok(())
    }
}

// No capability markers: events are appended through `append_event` only,
// never added under a caller-chosen key, updated or deleted.

impl Record for Statistics {
    const PARTITION: PartitionName = PartitionName::Statistics;

    fn key(&self) -> &str {
        &self.user_id
    }

    fn partition(snapshot: &Snapshot) -> &BTreeMap<String, Self> {
        &snapshot.statistics
    }

    fn partition_mut(snapshot: &mut Snapshot) -> &mut BTreeMap<String, Self> {
        &mut snapshot.statistics
    }

    fn check_schema(&self) -> Result<(), String> {
        if self.correct_answers.checked_add(self.wrong_answers) != Some(self.total_questions) {
            return Err(format!(
                "statistics for {}: {} correct + {} wrong != {} total",
                self.user_id, self.correct_answers, self.wrong_answers, self.total_questions
            ));
        }
        Ok(())
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = Some(now);
    }
}
