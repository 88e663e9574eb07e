use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Article already exists: {0}")]
    DuplicateArticle(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Embedding failed: {0}")]
    Encoding(String),

    #[error("Fetching {source_name} failed: {reason}")]
    Fetch { source_name: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] tokio_rusqlite::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AppError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Storage failures are the only errors allowed to abort a whole
    /// ingestion run or ranking request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Storage(_) | AppError::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
