//! Fetch → normalize → dedup → persist → embed, across every configured source.
//!
//! Item-level problems (a dead feed, a malformed link, an embedding timeout)
//! are recorded in the [`IngestReport`] and never abort the run. Only a
//! storage failure propagates.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::config::{IngestionConfig, SourceConfig};
use crate::db::ArticleStore;
use crate::embedding::VectorCodec;
use crate::error::{AppError, Result};
use crate::feed::{canonical_url, FeedSource, RawItem};
use crate::models::{Article, NewArticle};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceReport {
    pub fetched: usize,
    pub new_articles: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: BTreeMap<String, SourceReport>,
    pub new_articles: usize,
    pub embedded: usize,
    pub embedding_failures: usize,
    pub backfilled: usize,
    pub purged: u64,
    pub total_articles: u64,
}

impl IngestReport {
    /// Source name → new articles inserted this run.
    pub fn new_counts(&self) -> BTreeMap<String, usize> {
        self.sources
            .iter()
            .map(|(name, report)| (name.clone(), report.new_articles))
            .collect()
    }

    pub fn failed_sources(&self) -> Vec<(&str, &str)> {
        self.sources
            .iter()
            .filter_map(|(name, report)| {
                report
                    .error
                    .as_deref()
                    .map(|reason| (name.as_str(), reason))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbedOutcome {
    pub embedded: usize,
    pub failed: usize,
}

pub struct IngestionPipeline {
    articles: Arc<dyn ArticleStore>,
    codec: Arc<VectorCodec>,
    fetcher: Arc<dyn FeedSource>,
    sources: Vec<SourceConfig>,
    settings: IngestionConfig,
}

impl IngestionPipeline {
    pub fn new(
        articles: Arc<dyn ArticleStore>,
        codec: Arc<VectorCodec>,
        fetcher: Arc<dyn FeedSource>,
        sources: Vec<SourceConfig>,
        settings: IngestionConfig,
    ) -> Self {
        Self {
            articles,
            codec,
            fetcher,
            sources,
            settings,
        }
    }

    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    /// One full ingestion run over all sources.
    pub async fn run(&self) -> Result<IngestReport> {
        let started_at = Utc::now();
        tracing::info!("Starting ingestion run over {} sources", self.sources.len());

        let purged = if self.settings.retention_days > 0 {
            let cutoff = started_at - chrono::Duration::days(self.settings.retention_days as i64);
            let purged = self.articles.purge_older_than(cutoff).await?;
            if purged > 0 {
                tracing::info!(
                    "Purged {} articles older than {} days",
                    purged,
                    self.settings.retention_days
                );
            }
            purged
        } else {
            0
        };

        let backfill = self.backfill(self.settings.backfill_limit).await?;

        let fetched = self.fetch_all().await;

        let mut sources = BTreeMap::new();
        let mut to_embed = Vec::new();
        for (source, result) in fetched {
            let mut report = SourceReport::default();
            match result {
                Ok(items) => {
                    report.fetched = items.len();
                    for item in items {
                        match self.store_item(item, started_at).await {
                            Ok(Some(article)) => {
                                report.new_articles += 1;
                                to_embed.push(article);
                            }
                            Ok(None) => report.duplicates += 1,
                            Err(e) if e.is_fatal() => return Err(e),
                            Err(e) => {
                                tracing::debug!("Skipping item from {}: {}", source.name, e);
                                report.skipped += 1;
                            }
                        }
                    }
                    tracing::info!(
                        "Found {} new articles from {}",
                        report.new_articles,
                        source.name
                    );
                }
                Err(e) => {
                    tracing::warn!("Error fetching {}: {}", source.name, e);
                    report.error = Some(e.to_string());
                }
            }
            sources.insert(source.name.clone(), report);
        }

        let new_articles = to_embed.len();
        let embedding = self.embed_articles(to_embed).await?;
        let total_articles = self.articles.count().await?;

        let report = IngestReport {
            started_at,
            finished_at: Utc::now(),
            sources,
            new_articles,
            embedded: embedding.embedded + backfill.embedded,
            embedding_failures: embedding.failed + backfill.failed,
            backfilled: backfill.embedded,
            purged,
            total_articles,
        };

        tracing::info!(
            "Ingestion completed: {} new articles, {} embedded, {} failed sources, {} total",
            report.new_articles,
            report.embedded,
            report.failed_sources().len(),
            report.total_articles
        );
        Ok(report)
    }

    /// Embeds up to `limit` articles that were stored without an embedding.
    pub async fn backfill(&self, limit: usize) -> Result<EmbedOutcome> {
        if limit == 0 {
            return Ok(EmbedOutcome::default());
        }
        let pending = self.articles.pending_embeddings(limit).await?;
        if pending.is_empty() {
            return Ok(EmbedOutcome::default());
        }
        tracing::info!("Backfilling embeddings for {} articles", pending.len());
        self.embed_articles(pending).await
    }

    /// Fetches every source concurrently, each bounded by the fetch timeout.
    /// Results come back in configuration order.
    async fn fetch_all(&self) -> Vec<(SourceConfig, Result<Vec<RawItem>>)> {
        let timeout = self.settings.fetch_timeout();
        let fetcher = self.fetcher.clone();
        let mut results: Vec<_> = stream::iter(self.sources.iter().cloned().enumerate())
            .map(move |(index, source)| {
                let fetcher = fetcher.clone();
                async move {
                    let result = fetch_with_timeout(fetcher.as_ref(), &source, timeout).await;
                    (index, source, result)
                }
            })
            .buffer_unordered(self.settings.fetch_concurrency.max(1))
            .collect()
            .await;

        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, source, result)| (source, result))
            .collect()
    }

    /// Persists one item. `Ok(None)` means the URL is already in the corpus.
    async fn store_item(&self, item: RawItem, now: DateTime<Utc>) -> Result<Option<Article>> {
        let url = canonical_url(&item.link)?;
        if self.articles.exists(&url).await? {
            return Ok(None);
        }

        let article = NewArticle {
            url,
            title: item.title,
            description: item.summary,
            content: None,
            source: item.source_name,
            category: item.category,
            published_at: item.published_at.unwrap_or(now),
        };

        // The unique key is the real gate; exists() only saves work.
        match self.articles.insert(article).await {
            Ok(stored) => Ok(Some(stored)),
            Err(AppError::DuplicateArticle(url)) => {
                tracing::debug!("Article already stored: {}", url);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Embeds and attaches vectors on a bounded worker pool. Encoding
    /// failures leave the article for a later backfill.
    async fn embed_articles(&self, articles: Vec<Article>) -> Result<EmbedOutcome> {
        let results: Vec<Result<bool>> = stream::iter(articles)
            .map(|article| async move {
                match self.codec.embed(&article.embedding_text()).await {
                    Ok(vector) => {
                        self.articles.attach_embedding(&article.url, vector).await?;
                        Ok(true)
                    }
                    Err(e) => {
                        tracing::warn!("Failed to embed {}: {}", article.url, e);
                        Ok(false)
                    }
                }
            })
            .buffer_unordered(self.settings.embed_workers.max(1))
            .collect()
            .await;

        let mut outcome = EmbedOutcome::default();
        for result in results {
            match result {
                Ok(true) => outcome.embedded += 1,
                Ok(false) => outcome.failed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Failed to store embedding: {}", e);
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }
}

async fn fetch_with_timeout(
    fetcher: &dyn FeedSource,
    source: &SourceConfig,
    timeout: Duration,
) -> Result<Vec<RawItem>> {
    match tokio::time::timeout(timeout, fetcher.fetch_source(source)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(timeout)),
    }
}
