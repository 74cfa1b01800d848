// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{config::Config, documents::DocumentStore};

#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<DocumentStore>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            documents: Arc::new(DocumentStore::new(config.data_dir.clone())),
            config,
        }
    }
}

impl FromRef<AppState> for Arc<DocumentStore> {
    fn from_ref(state: &AppState) -> Self {
        state.documents.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
