// src/handlers/questions.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    documents::{DerivedUpload, DocumentStore},
    error::AppError,
    models::document::{QuestionBank, SaveResponse},
};

/// Optional narrowing of the master bank.
#[derive(Debug, Default, Deserialize)]
pub struct BankParams {
    pub layer: Option<String>,
    pub round: Option<u32>,
    pub q: Option<String>,
}

/// Returns the master question bank, optionally filtered by topic layer,
/// round and a case-insensitive keyword over code and question text.
pub async fn get_question_bank(
    State(documents): State<Arc<DocumentStore>>,
    Query(params): Query<BankParams>,
) -> Result<impl IntoResponse, AppError> {
    let bank = documents.load_bank().await?;
    let keyword = params.q.as_deref().map(str::to_lowercase);

    let questions = bank
        .questions
        .into_iter()
        .filter(|q| {
            params.layer.as_deref().is_none_or(|layer| q["LAYER1"] == layer)
                && params.round.is_none_or(|round| round_of(q) == Some(round))
                && keyword.as_deref().is_none_or(|k| {
                    text_field(q, "QCODE").contains(k) || text_field(q, "QUESTION").contains(k)
                })
        })
        .collect();

    Ok(Json(QuestionBank { questions }))
}

fn round_of(question: &Value) -> Option<u32> {
    match &question["EROUND"] {
        Value::Number(n) => n.as_f64().map(|f| f.floor() as u32),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.floor() as u32),
        _ => None,
    }
}

fn text_field(question: &Value, field: &str) -> String {
    question[field].as_str().unwrap_or_default().to_lowercase()
}

/// Returns the derived-question document, with a default header when
/// nothing has been saved yet.
pub async fn get_derived_questions(
    State(documents): State<Arc<DocumentStore>>,
) -> Result<impl IntoResponse, AppError> {
    let document = documents.load_derived().await?;
    Ok(Json(document))
}

/// Replaces the derived-question document.
pub async fn save_derived_questions(
    State(documents): State<Arc<DocumentStore>>,
    Json(upload): Json<DerivedUpload>,
) -> Result<impl IntoResponse, AppError> {
    let document = documents.save_derived(upload).await?;
    let total = document.questions.len();

    Ok((
        StatusCode::OK,
        Json(SaveResponse {
            success: true,
            message: Some(format!("{} derived questions saved", total)),
            error: None,
            total_questions: Some(total),
        }),
    ))
}

/// Writes a timestamped copy of the derived-question document.
pub async fn archive_derived_questions(
    State(documents): State<Arc<DocumentStore>>,
) -> Result<impl IntoResponse, AppError> {
    let archived = documents.archive_derived().await?;
    Ok((StatusCode::CREATED, Json(archived)))
}
