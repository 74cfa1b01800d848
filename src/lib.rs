// src/lib.rs

pub mod aggregation;
pub mod config;
pub mod documents;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod routes;
pub mod state;
pub mod store;
pub mod sync;
pub mod utils;

// Re-export specific items for convenience if needed
pub use manager::DataManager;
pub use routes::create_router;
