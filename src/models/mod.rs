// src/models/mod.rs

pub mod document;
pub mod event;
pub mod problem;
pub mod statistics;
pub mod user;
