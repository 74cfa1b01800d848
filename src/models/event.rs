// src/models/event.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use validator::Validate;

/// What an event records. Only quiz results feed the statistics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    QuizResult,
    Other(String),
}

impl EventKind {
    pub const QUIZ_RESULT: &'static str = "quiz_result";

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::QuizResult => Self::QUIZ_RESULT,
            EventKind::Other(kind) => kind,
        }
    }

    pub fn is_quiz_result(&self) -> bool {
        matches!(self, EventKind::QuizResult)
    }
}

impl From<String> for EventKind {
    fn from(kind: String) -> Self {
        if kind == Self::QUIZ_RESULT {
            EventKind::QuizResult
        } else {
            EventKind::Other(kind)
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::QuizResult => EventKind::QUIZ_RESULT.to_string(),
            EventKind::Other(kind) => kind,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable fact in the append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: EventKind,

    #[serde(rename = "userId")]
    pub user_id: String,

    /// Kind-specific fields, stored next to the envelope fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,

    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Envelope fields a payload may not carry.
    pub const RESERVED_KEYS: [&'static str; 4] = ["id", "type", "userId", "timestamp"];

    /// The first payload key that would shadow an envelope field when serialized.
    pub fn reserved_payload_key(payload: &Map<String, Value>) -> Option<&'static str> {
        Self::RESERVED_KEYS
            .into_iter()
            .find(|key| payload.contains_key(*key))
    }
}

/// DTO for appending an event. `id` and `timestamp` are assigned by the store.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewEvent {
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 64, message = "event type is required"))]
    pub kind: String,

    #[serde(rename = "userId")]
    #[validate(length(min = 1, max = 128, message = "userId is required"))]
    pub user_id: String,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl NewEvent {
    pub fn new(kind: impl Into<String>, user_id: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            user_id: user_id.into(),
            payload,
        }
    }
}

/// The fields of a quiz-result payload the aggregation reads.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizOutcome {
    #[serde(default)]
    pub qcode: Option<String>,
    pub is_correct: bool,
    #[serde(default)]
    pub study_time: Option<u64>,
}

impl QuizOutcome {
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(payload.clone()))
    }
}

/// DTO for one answered question, as submitted by the quiz page.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuizResultRequest {
    /// Defaults to `"guest"` when absent.
    #[serde(default)]
    pub user_id: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub qcode: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub user_answer: Option<String>,
    #[serde(default)]
    pub correct_answer: Option<String>,
    pub is_correct: bool,
    #[serde(default)]
    pub study_time: Option<u64>,
}

impl QuizResultRequest {
    pub const GUEST: &'static str = "guest";

    pub fn new(user_id: impl Into<String>, qcode: impl Into<String>, is_correct: bool) -> Self {
        Self {
            user_id: Some(user_id.into()),
            qcode: qcode.into(),
            question: None,
            user_answer: None,
            correct_answer: None,
            is_correct,
            study_time: None,
        }
    }

    pub fn into_event(self) -> NewEvent {
        let user_id = self
            .user_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Self::GUEST.to_string());
        let payload = json!({
            "qcode": self.qcode,
            "question": self.question,
            "userAnswer": self.user_answer,
            "correctAnswer": self.correct_answer,
            "isCorrect": self.is_correct,
            "studyTime": self.study_time.unwrap_or(0),
        });
        let payload = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        NewEvent::new(EventKind::QUIZ_RESULT, user_id, payload)
    }
}

/// Filter for the event log. Dates are inclusive.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl EventFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn in_range(&self, at: DateTime<Utc>) -> bool {
        self.start_date.is_none_or(|start| at >= start) && self.end_date.is_none_or(|end| at <= end)
    }
}
