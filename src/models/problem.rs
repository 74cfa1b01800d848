// src/models/problem.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;
use validator::Validate;

use crate::{
    store::RecordFilter,
    utils::{html::clean_question_text, qcode::is_valid_qcode},
};

/// Whether a question comes from the bank or was written as a variant of one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionKind {
    /// Past exam question imported from the question bank.
    #[default]
    #[serde(rename = "A")]
    Original,
    /// True/false variant authored from another question.
    #[serde(rename = "B")]
    Derived,
}

/// A single exam question, keyed by its QCODE.
///
/// Field names follow the question-bank JSON so bank files, snapshots and the
/// derived-question document share one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Problem {
    #[serde(rename = "QCODE")]
    #[validate(custom(function = validate_qcode))]
    pub code: String,

    /// Exam type (e.g. "손해사정사").
    #[serde(rename = "ETITLE", default)]
    pub exam_title: String,

    /// Subject class within the exam.
    #[serde(rename = "ECLASS", default)]
    pub subject_class: String,

    /// Exam round. The bank stores it as a float; it is floored on load.
    #[serde(rename = "EROUND", default, deserialize_with = "deserialize_round")]
    pub round: u32,

    /// Topic layer (e.g. "관계법령", "손보1부").
    #[serde(rename = "LAYER1", default)]
    pub layer1: String,

    #[serde(rename = "LAYER2", default, skip_serializing_if = "Option::is_none")]
    pub layer2: Option<String>,

    /// Question number within the round.
    #[serde(
        rename = "QNUMBER",
        alias = "QNUM",
        default,
        deserialize_with = "deserialize_question_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub number: Option<u32>,

    #[serde(rename = "QUESTION")]
    #[validate(length(min = 1, max = 5000), custom(function = validate_question_text))]
    pub question: String,

    /// Correct answer token ("1".."4" for choice questions, "O"/"X" for variants).
    #[serde(rename = "ANSWER")]
    #[validate(length(min = 1, max = 100))]
    pub answer: String,

    #[serde(rename = "QTYPE", default)]
    pub kind: QuestionKind,

    /// Code of the question this one was derived from.
    #[serde(rename = "SOURCE_QCODE", default, skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,

    #[serde(rename = "PARENT_INFO", default, skip_serializing_if = "Option::is_none")]
    pub parent_info: Option<String>,

    #[serde(rename = "CREATED_DATE", default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,
}

fn validate_qcode(code: &str) -> Result<(), validator::ValidationError> {
    if !is_valid_qcode(code) {
        return Err(validator::ValidationError::new("invalid_qcode"));
    }
    Ok(())
}

// Text that sanitizes to nothing would be rejected by the document server.
fn validate_question_text(text: &str) -> Result<(), validator::ValidationError> {
    if clean_question_text(text).is_empty() {
        return Err(validator::ValidationError::new("empty_question_text"));
    }
    Ok(())
}

fn deserialize_round<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        value => number_from_value(&value)
            .ok_or_else(|| de::Error::custom(format!("invalid EROUND: {}", value))),
    }
}

fn deserialize_question_number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        value => number_from_value(&value)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid QNUMBER: {}", value))),
    }
}

/// Accepts `23`, `23.0`, `23.5` (floored) and `"23"`.
fn number_from_value(value: &Value) -> Option<u32> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if raw.is_finite() && raw >= 0.0 && raw <= u32::MAX as f64 {
        Some(raw.floor() as u32)
    } else {
        None
    }
}

impl Problem {
    pub fn is_derived(&self) -> bool {
        self.kind == QuestionKind::Derived
    }

    /// Field-level validation plus the lineage rule: a derived question must
    /// name its source.
    pub fn check_schema(&self) -> Result<(), String> {
        self.validate().map_err(|e| e.to_string())?;
        match (&self.kind, &self.source_code) {
            (QuestionKind::Derived, None) => {
                Err(format!("derived question {} has no SOURCE_QCODE", self.code))
            }
            (QuestionKind::Derived, Some(source)) if source.is_empty() => {
                Err(format!("derived question {} has an empty SOURCE_QCODE", self.code))
            }
            _ => Ok(()),
        }
    }

    /// Human label of where this question sits in the bank,
    /// e.g. `"20회 관계법령 7번"`.
    pub fn parent_label(&self) -> String {
        match self.number {
            Some(n) => format!("{}회 {} {}번", self.round, self.layer1, n),
            None => format!("{}회 {}", self.round, self.layer1),
        }
    }

    /// Builds a derived variant of `self` under `code`.
    pub fn derive(&self, code: String, question: String, answer: String, now: DateTime<Utc>) -> Problem {
        Problem {
            code,
            exam_title: self.exam_title.clone(),
            subject_class: self.subject_class.clone(),
            round: self.round,
            layer1: self.layer1.clone(),
            layer2: self.layer2.clone(),
            number: self.number,
            question,
            answer,
            kind: QuestionKind::Derived,
            source_code: Some(self.code.clone()),
            parent_info: Some(self.parent_label()),
            created_date: Some(now),
        }
    }
}

/// Parses raw bank records one by one, dropping the ones that fail schema
/// checks. Returns the accepted problems and the number rejected.
pub fn parse_problems(values: Vec<Value>) -> (Vec<Problem>, usize) {
    let mut accepted = Vec::with_capacity(values.len());
    let mut rejected = 0;
    for value in values {
        let parsed = serde_json::from_value::<Problem>(value)
            .map_err(|e| e.to_string())
            .and_then(|p| p.check_schema().map(|_| p));
        match parsed {
            Ok(problem) => accepted.push(problem),
            Err(reason) => {
                tracing::warn!("Rejected malformed question record: {}", reason);
                rejected += 1;
            }
        }
    }
    (accepted, rejected)
}

/// Exact-match filter over the bank's label fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionFilter {
    #[serde(rename = "ETITLE")]
    pub exam_title: Option<String>,
    #[serde(rename = "ECLASS")]
    pub subject_class: Option<String>,
    #[serde(rename = "LAYER1")]
    pub layer1: Option<String>,
    #[serde(rename = "QTYPE")]
    pub kind: Option<QuestionKind>,
    #[serde(rename = "EROUND")]
    pub round: Option<u32>,
}

impl QuestionFilter {
    pub fn to_record_filter(&self) -> RecordFilter {
        let mut filter = RecordFilter::new();
        if let Some(v) = &self.exam_title {
            filter = filter.with("ETITLE", v.as_str());
        }
        if let Some(v) = &self.subject_class {
            filter = filter.with("ECLASS", v.as_str());
        }
        if let Some(v) = &self.layer1 {
            filter = filter.with("LAYER1", v.as_str());
        }
        if let Some(kind) = self.kind {
            filter = filter.with(
                "QTYPE",
                match kind {
                    QuestionKind::Original => "A",
                    QuestionKind::Derived => "B",
                },
            );
        }
        if let Some(round) = self.round {
            filter = filter.with("EROUND", round);
        }
        filter
    }
}

/// DTO for authoring a variant of an existing question.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DeriveQuestionRequest {
    #[validate(length(min = 1, max = 100))]
    pub source_code: String,
    #[validate(length(min = 1, max = 5000))]
    pub question: String,
    #[validate(length(min = 1, max = 100))]
    pub answer: String,
}
