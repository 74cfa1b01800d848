// src/models/document.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::problem::Problem;

pub const DERIVED_DOCUMENT_VERSION: &str = "QManager Questions V1.0";

/// Master question bank as served by the bank endpoint.
/// Records stay raw so each one can be validated on its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionBank {
    #[serde(default)]
    pub questions: Vec<Value>,
}

/// Header of the derived-question document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default = "default_version")]
    pub version: String,
    /// Calendar date the document was first written (`YYYY-MM-DD`).
    #[serde(default)]
    pub created_date: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub total_questions: usize,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

fn default_version() -> String {
    DERIVED_DOCUMENT_VERSION.to_string()
}

impl DocumentMetadata {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            version: default_version(),
            created_date: now.format("%Y-%m-%d").to_string(),
            description: "Derived true/false questions authored from the question bank".to_string(),
            total_questions: 0,
            last_update: Some(now),
        }
    }
}

/// The derived-question document: `{ metadata, questions }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDocument {
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub questions: Vec<Problem>,
}

impl QuestionDocument {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            metadata: DocumentMetadata::new(now),
            questions: Vec::new(),
        }
    }

    /// Replaces the question list and refreshes the header counters.
    pub fn with_questions(mut self, questions: Vec<Problem>, now: DateTime<Utc>) -> Self {
        self.metadata.total_questions = questions.len();
        self.metadata.last_update = Some(now);
        self.questions = questions;
        self
    }
}

/// Reply of the derived-question save endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_questions: Option<usize>,
}

/// Reply of the archive endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveResponse {
    pub success: bool,
    pub filename: String,
    pub total_questions: usize,
    pub upload_time: DateTime<Utc>,
}
