mod fetcher;
mod normalize;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::SourceConfig;
use crate::error::Result;

pub use fetcher::{parse_feed, FeedFetcher};
pub use normalize::{canonical_url, clean_text};

/// One entry as delivered by a feed, before normalization.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_name: String,
    pub category: Option<String>,
}

/// Anything that can produce the current items of a configured source.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_source(&self, source: &SourceConfig) -> Result<Vec<RawItem>>;
}
