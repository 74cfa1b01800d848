// src/documents.rs

//! File-backed JSON documents served by the question-bank server.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    error::AppError,
    models::{
        document::{ArchiveResponse, DocumentMetadata, QuestionBank, QuestionDocument},
        problem::Problem,
    },
    utils::html::clean_question_text,
};

pub const BANK_FILE: &str = "gep_master_v1.0.json";
pub const DERIVED_FILE: &str = "derived_questions.json";
pub const ARCHIVE_DIR: &str = "archive";

/// Body of a derived-document save. Questions stay raw so each one can be
/// checked and reported on its own.
#[derive(Debug, Deserialize)]
pub struct DerivedUpload {
    #[serde(default)]
    pub metadata: Option<DocumentMetadata>,
    #[serde(default)]
    pub questions: Vec<Value>,
}

pub struct DocumentStore {
    data_dir: PathBuf,
    // Serializes read-modify-write cycles on the derived document.
    write_lock: Mutex<()>,
}

impl DocumentStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// The master bank, or an empty one when the file does not exist.
    pub async fn load_bank(&self) -> Result<QuestionBank, AppError> {
        Ok(read_json::<QuestionBank>(&self.path(BANK_FILE))
            .await?
            .unwrap_or_default())
    }

    /// The derived document, or a fresh header with no questions.
    pub async fn load_derived(&self) -> Result<QuestionDocument, AppError> {
        let now = Utc::now();
        Ok(read_json::<QuestionDocument>(&self.path(DERIVED_FILE))
            .await?
            .unwrap_or_else(|| QuestionDocument::empty(now)))
    }

    /// Replaces the derived document.
    ///
    /// * Every question must be a valid derived question.
    /// * Codes must be unique within the upload (409 otherwise).
    /// * Question text is sanitized before it is stored.
    /// * `total_questions` and `last_update` are recomputed.
    pub async fn save_derived(&self, upload: DerivedUpload) -> Result<QuestionDocument, AppError> {
        let questions = check_upload(upload.questions)?;

        let _guard = self.write_lock.lock().await;
        let existing = self.load_derived().await?;
        let now = Utc::now();

        let mut metadata = upload.metadata.unwrap_or(existing.metadata);
        if metadata.created_date.is_empty() {
            metadata.created_date = now.format("%Y-%m-%d").to_string();
        }
        let document = QuestionDocument {
            metadata,
            questions: Vec::new(),
        }
        .with_questions(questions, now);

        write_json(&self.path(DERIVED_FILE), &document).await?;
        tracing::info!("Derived document saved: {} questions", document.questions.len());
        Ok(document)
    }

    /// Writes a timestamped copy of the derived document under `archive/`.
    pub async fn archive_derived(&self) -> Result<ArchiveResponse, AppError> {
        let _guard = self.write_lock.lock().await;
        let document: Option<QuestionDocument> = read_json(&self.path(DERIVED_FILE)).await?;
        let Some(document) = document else {
            return Err(AppError::BadRequest("no derived questions to archive".to_string()));
        };

        let now = Utc::now();
        let filename = archive_file_name(now);
        let dir = self.path(ARCHIVE_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        write_json(&dir.join(&filename), &document).await?;
        tracing::info!("Derived document archived as {}", filename);

        Ok(ArchiveResponse {
            success: true,
            filename,
            total_questions: document.questions.len(),
            upload_time: now,
        })
    }
}

pub fn archive_file_name(at: DateTime<Utc>) -> String {
    format!("derived_questions_{}.json", at.format("%Y-%m-%d_%H%M%S"))
}

fn check_upload(raw: Vec<Value>) -> Result<Vec<Problem>, AppError> {
    let mut seen = HashSet::new();
    let mut questions = Vec::with_capacity(raw.len());
    for (index, value) in raw.into_iter().enumerate() {
        let mut problem: Problem = serde_json::from_value(value)
            .map_err(|e| AppError::BadRequest(format!("question #{}: {}", index, e)))?;
        problem.question = clean_question_text(&problem.question);
        problem
            .check_schema()
            .map_err(|e| AppError::BadRequest(format!("question #{}: {}", index, e)))?;
        if !problem.is_derived() {
            return Err(AppError::BadRequest(format!(
                "question {} is not a derived question",
                problem.code
            )));
        }
        if !seen.insert(problem.code.clone()) {
            return Err(AppError::Conflict(format!("duplicate QCODE {}", problem.code)));
        }
        questions.push(problem);
    }
    Ok(questions)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, AppError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&raw).map(Some).map_err(|e| {
        tracing::error!("Failed to parse {}: {:?}", path.display(), e);
        AppError::InternalServerError(format!("{} is not valid JSON", path.display()))
    })
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_vec_pretty(value)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, raw).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
