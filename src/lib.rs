//! Personalized news ranking: feeds are ingested on a schedule, articles
//! and user preferences are embedded into a shared vector space, and each
//! user gets articles ordered by their strongest matching interest.

pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod models;
pub mod ranking;
pub mod scheduler;
pub mod services;

pub use app::App;
pub use config::Config;
pub use error::{AppError, Result};
