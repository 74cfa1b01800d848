// src/store/filter.rs

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Exact-match filter: every clause must equal the record's field of the
/// same (serialized) name. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    clauses: BTreeMap<String, Value>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches<R: Serialize>(&self, record: &R) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        let Ok(Value::Object(fields)) = serde_json::to_value(record) else {
            return false;
        };
        self.clauses
            .iter()
            .all(|(field, expected)| fields.get(field) == Some(expected))
    }
}

impl FromIterator<(String, Value)> for RecordFilter {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            clauses: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_filter_matches_everything() {
        assert!(RecordFilter::new().matches(&json!({"a": 1})));
    }

    #[test]
    fn clauses_are_anded() {
        let record = json!({"LAYER1": "관계법령", "EROUND": 20});
        let hit = RecordFilter::new().with("LAYER1", "관계법령").with("EROUND", 20);
        let miss = RecordFilter::new().with("LAYER1", "관계법령").with("EROUND", 21);
        assert!(hit.matches(&record));
        assert!(!miss.matches(&record));
    }

    #[test]
    fn absent_field_never_matches() {
        let record = json!({"LAYER1": "관계법령"});
        assert!(!RecordFilter::new().with("LAYER2", "보험").matches(&record));
    }
}
