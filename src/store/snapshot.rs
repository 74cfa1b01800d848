// src/store/snapshot.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    models::{event::Event, problem::Problem, statistics::Statistics, user::User},
    store::record::Record,
};

pub const SCHEMA_VERSION: &str = "GEP V1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: String,
    pub created_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl SnapshotMetadata {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            created_date: now,
            last_updated: now,
        }
    }
}

/// All four partitions plus metadata. This is both the in-memory layout of
/// the store and the unit written to local storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "Problem", default)]
    pub problems: BTreeMap<String, Problem>,

    #[serde(rename = "User", default)]
    pub users: BTreeMap<String, User>,

    #[serde(rename = "Event", default)]
    pub events: BTreeMap<String, Event>,

    #[serde(rename = "Statistics", default)]
    pub statistics: BTreeMap<String, Statistics>,

    pub metadata: SnapshotMetadata,
}

/// Outcome of reading a stored snapshot record by record.
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub snapshot: Snapshot,
    pub rejected: usize,
}

impl Snapshot {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            problems: BTreeMap::new(),
            users: BTreeMap::new(),
            events: BTreeMap::new(),
            statistics: BTreeMap::new(),
            metadata: SnapshotMetadata::new(now),
        }
    }

    pub fn len(&self) -> usize {
        self.problems.len() + self.users.len() + self.events.len() + self.statistics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parses a stored snapshot, validating every record on its own.
    ///
    /// Records that do not deserialize, fail their schema check, or sit under
    /// a key different from their own are dropped and counted. Only a
    /// document that is not a JSON object at all is an error.
    pub fn from_json_lenient(raw: &str) -> Result<LoadedSnapshot, serde_json::Error> {
        Self::from_value_lenient(serde_json::from_str(raw)?)
    }

    /// Same as [`Snapshot::from_json_lenient`], over an already parsed document.
    pub fn from_value_lenient(value: Value) -> Result<LoadedSnapshot, serde_json::Error> {
        let Value::Object(mut root) = value else {
            return Err(serde::de::Error::custom("snapshot is not a JSON object"));
        };

        let now = Utc::now();
        let metadata = root
            .remove("metadata")
            .and_then(|m| serde_json::from_value::<SnapshotMetadata>(m).ok())
            .unwrap_or_else(|| SnapshotMetadata::new(now));

        let mut rejected = 0;
        let snapshot = Snapshot {
            problems: load_partition(root.remove("Problem"), &mut rejected),
            users: load_partition(root.remove("User"), &mut rejected),
            events: load_partition(root.remove("Event"), &mut rejected),
            statistics: load_partition(root.remove("Statistics"), &mut rejected),
            metadata,
        };
        Ok(LoadedSnapshot {
            snapshot: snapshot.with_derived_fields(),
            rejected,
        })
    }

    /// Runs the load-time record checks over a snapshot built elsewhere,
    /// e.g. a backup handed in by a caller.
    pub fn validated(self) -> LoadedSnapshot {
        let mut rejected = 0;
        let snapshot = Snapshot {
            problems: retain_valid(self.problems, &mut rejected),
            users: retain_valid(self.users, &mut rejected),
            events: retain_valid(self.events, &mut rejected),
            statistics: retain_valid(self.statistics, &mut rejected),
            metadata: self.metadata,
        };
        LoadedSnapshot {
            snapshot: snapshot.with_derived_fields(),
            rejected,
        }
    }

    // Accuracy is derived; never trust a stored value over the counts.
    fn with_derived_fields(mut self) -> Self {
        for stats in self.statistics.values_mut() {
            stats.recompute_accuracy();
        }
        self
    }
}

fn check_record<R: Record>(key: &str, record: &R) -> Result<(), String> {
    record.check_schema()?;
    if record.key() != key {
        return Err(format!("stored under {} but keyed {}", key, record.key()));
    }
    Ok(())
}

fn retain_valid<R: Record>(partition: BTreeMap<String, R>, rejected: &mut usize) -> BTreeMap<String, R> {
    partition
        .into_iter()
        .filter(|(key, record)| match check_record(key, record) {
            Ok(()) => true,
            Err(reason) => {
                tracing::error!("Dropping malformed {} record {}: {}", R::PARTITION, key, reason);
                *rejected += 1;
                false
            }
        })
        .collect()
}

fn load_partition<R: Record>(raw: Option<Value>, rejected: &mut usize) -> BTreeMap<String, R> {
    let mut partition = BTreeMap::new();
    let Some(raw) = raw else {
        return partition;
    };
    let Value::Object(entries) = raw else {
        tracing::error!("Stored {} partition is not an object; dropping it", R::PARTITION);
        *rejected += 1;
        return partition;
    };

    for (key, value) in entries {
        let parsed = serde_json::from_value::<R>(value)
            .map_err(|e| e.to_string())
            .and_then(|record| check_record(&key, &record).map(|_| record));
        match parsed {
            Ok(record) => {
                partition.insert(key, record);
            }
            Err(reason) => {
                tracing::error!("Dropping malformed {} record {}: {}", R::PARTITION, key, reason);
                *rejected += 1;
            }
        }
    }
    partition
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_load_drops_only_bad_records() {
        let raw = json!({
            "Problem": {
                "Q1": {"QCODE": "Q1", "QUESTION": "2+2=?", "ANSWER": "4"},
                "Q2": {"QCODE": "Q2"},
                "Q3": {"QCODE": "Q9", "QUESTION": "q", "ANSWER": "1"}
            },
            "User": {"u1": {"id": "u1", "name": "kim"}},
            "Event": {},
            "Statistics": {
                "u1": {
                    "userId": "u1", "totalQuestions": 2, "correctAnswers": 1,
                    "wrongAnswers": 1, "accuracy": 99.0
                }
            },
            "metadata": {
                "version": "GEP V1.0",
                "created_date": "2025-08-26T00:00:00Z",
                "last_updated": "2025-08-26T00:00:00Z"
            }
        })
        .to_string();

        let loaded = Snapshot::from_json_lenient(&raw).unwrap();
        assert_eq!(loaded.rejected, 2);
        assert!(loaded.snapshot.problems.contains_key("Q1"));
        assert_eq!(loaded.snapshot.users["u1"].profile["name"], "kim");
        assert_eq!(loaded.snapshot.statistics["u1"].accuracy, 50.0);
    }

    #[test]
    fn test_validated_drops_misfiled_records_and_fixes_accuracy() {
        let mut snapshot = Snapshot::new(Utc::now());
        let problem: Problem =
            serde_json::from_value(json!({"QCODE": "Q9", "QUESTION": "q", "ANSWER": "1"})).unwrap();
        snapshot.problems.insert("WRONGKEY".to_string(), problem.clone());
        snapshot.problems.insert("Q9".to_string(), problem);
        let mut stats = Statistics::empty("u1");
        stats.total_questions = 2;
        stats.correct_answers = 1;
        stats.wrong_answers = 1;
        stats.accuracy = 99.0;
        snapshot.statistics.insert("u1".to_string(), stats);

        let loaded = snapshot.validated();
        assert_eq!(loaded.rejected, 1);
        assert!(!loaded.snapshot.problems.contains_key("WRONGKEY"));
        assert!(loaded.snapshot.problems.contains_key("Q9"));
        assert_eq!(loaded.snapshot.statistics["u1"].accuracy, 50.0);
    }

    #[test]
    fn test_overflowing_counts_are_rejected() {
        let raw = json!({
            "Statistics": {
                "u1": {
                    "userId": "u1", "totalQuestions": 0,
                    "correctAnswers": u64::MAX, "wrongAnswers": 1, "accuracy": 0.0
                }
            }
        })
        .to_string();
        let loaded = Snapshot::from_json_lenient(&raw).unwrap();
        assert_eq!(loaded.rejected, 1);
        assert!(loaded.snapshot.statistics.is_empty());
    }

    #[test]
    fn test_non_object_is_an_error() {
        assert!(Snapshot::from_json_lenient("[1,2,3]").is_err());
        assert!(Snapshot::from_json_lenient("not json").is_err());
    }

    #[test]
    fn test_missing_partitions_load_empty() {
        let loaded = Snapshot::from_json_lenient("{}").unwrap();
        assert!(loaded.snapshot.is_empty());
        assert_eq!(loaded.snapshot.metadata.version, SCHEMA_VERSION);
    }
}
