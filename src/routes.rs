// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers::questions, state::AppState};

/// Assembles the document server router.
///
/// * Question bank and derived-question routes under `/api`.
/// * Global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}: {}", origin, e);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let question_routes = Router::new()
        .route("/questions", get(questions::get_question_bank))
        .route(
            "/derived-questions",
            get(questions::get_derived_questions).post(questions::save_derived_questions),
        )
        .route(
            "/derived-questions/archive",
            post(questions::archive_derived_questions),
        );

    Router::new()
        .nest("/api", question_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
