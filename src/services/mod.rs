mod content_fetcher;

use async_trait::async_trait;

use crate::error::Result;

pub use content_fetcher::{extract_content, ContentFetcher};

/// Retrieves the readable body of an article page.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// `Ok(None)` when the page could not be turned into useful text.
    async fn fetch_content(&self, article_url: &str) -> Result<Option<String>>;
}
