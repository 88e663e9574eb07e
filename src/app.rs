//! The operations a front end (CLI, HTTP layer) calls.
//!
//! `App` owns the repository, the codec and the long-lived services and
//! hands out user-scoped operations. User ids come from the caller's auth
//! layer and are only checked for existence here.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::db::{ArticleStore, InteractionLog, PreferenceStore, Repository, UserStore};
use crate::embedding::{CacheStats, VectorCodec};
use crate::error::{AppError, Result};
use crate::feed::{canonical_url, FeedFetcher, FeedSource};
use crate::ingest::{EmbedOutcome, IngestionPipeline};
use crate::models::{
    ActionKind, Article, DeletionStats, HistoryEntry, Interaction, NewUser, Preference,
    PreferenceUpdate, Recommendation, User, DEFAULT_WEIGHT,
};
use crate::ranking::RankingEngine;
use crate::scheduler::{Scheduler, SchedulerStatus, TriggerOutcome};
use crate::services::{ContentFetcher, ContentSource};

/// Upper bound for every list a caller can request.
pub const MAX_LIMIT: usize = 100;

pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIMIT)
}

pub struct App {
    repository: Arc<Repository>,
    codec: Arc<VectorCodec>,
    pipeline: Arc<IngestionPipeline>,
    ranking: RankingEngine,
    scheduler: Scheduler,
    content: Arc<dyn ContentSource>,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        if let Some(parent) = Path::new(&config.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let repository = Arc::new(Repository::open(&config.db_path).await?);
        let codec = Arc::new(VectorCodec::from_config(&config.embedding)?);
        let fetcher = Arc::new(FeedFetcher::new(config.ingestion.fetch_timeout())?);
        let content = Arc::new(ContentFetcher::new(config.ingestion.fetch_timeout())?);

        tracing::info!(
            "Opened {} with embedding model {}",
            config.db_path,
            codec.model_name()
        );
        Ok(Self::with_components(repository, codec, fetcher, content, config))
    }

    /// Wires an `App` from already-built parts.
    pub fn with_components(
        repository: Arc<Repository>,
        codec: Arc<VectorCodec>,
        fetcher: Arc<dyn FeedSource>,
        content: Arc<dyn ContentSource>,
        config: &Config,
    ) -> Self {
        let pipeline = Arc::new(IngestionPipeline::new(
            repository.clone(),
            codec.clone(),
            fetcher,
            config.sources.clone(),
            config.ingestion.clone(),
        ));
        let ranking = RankingEngine::new(
            repository.clone(),
            repository.clone(),
            repository.clone(),
            codec.clone(),
            config.ranking.clone(),
        );
        let scheduler = Scheduler::new(pipeline.clone(), &config.ingestion);

        Self {
            repository,
            codec,
            pipeline,
            ranking,
            scheduler,
            content,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    async fn ensure_user(&self, user_id: i64) -> Result<User> {
        self.repository
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user", user_id))
    }

    // Recommendations

    pub async fn get_recommendations(
        &self,
        user_id: i64,
        limit: usize,
    ) -> Result<Vec<Recommendation>> {
        self.ensure_user(user_id).await?;
        self.ranking.recommend(user_id, clamp_limit(limit)).await
    }

    /// Newest articles, not personalized.
    pub async fn get_latest_articles(&self, limit: usize) -> Result<Vec<Article>> {
        self.repository.latest(clamp_limit(limit)).await
    }

    /// Newest articles from one source.
    pub async fn get_articles_by_source(&self, source: &str, limit: usize) -> Result<Vec<Article>> {
        let source = source.trim();
        if source.is_empty() {
            return Err(AppError::Validation("source must not be empty".to_string()));
        }
        self.repository.by_source(source, clamp_limit(limit)).await
    }

    /// Articles whose title or description mentions `keyword`, newest first.
    pub async fn search_articles(&self, keyword: &str, limit: usize) -> Result<Vec<Article>> {
        self.repository.search(keyword, clamp_limit(limit)).await
    }

    pub async fn record_interaction(
        &self,
        user_id: i64,
        article_url: &str,
        action: ActionKind,
    ) -> Result<Interaction> {
        self.ensure_user(user_id).await?;
        let url = canonical_url(article_url)?;
        if !self.repository.exists(&url).await? {
            return Err(AppError::not_found("article", url));
        }
        let interaction = self
            .repository
            .append(user_id, &url, action, Utc::now())
            .await?;
        tracing::debug!("User {} {} {}", user_id, action, url);
        Ok(interaction)
    }

    pub async fn reading_history(&self, user_id: i64, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.ensure_user(user_id).await?;
        self.repository.history(user_id, clamp_limit(limit)).await
    }

    // Preferences

    /// Adds a preference and embeds it right away. If embedding fails the
    /// preference is stored without a vector and embedded at ranking time.
    pub async fn add_preference(
        &self,
        user_id: i64,
        description: &str,
        weight: Option<f32>,
    ) -> Result<Preference> {
        let description = Preference::validate_description(description)?;
        let weight = Preference::validate_weight(weight.unwrap_or(DEFAULT_WEIGHT))?;
        self.ensure_user(user_id).await?;

        let embedding = self.embed_preference(&description).await?;
        self.repository
            .add_preference(user_id, description, weight, embedding)
            .await
    }

    pub async fn update_preference(
        &self,
        user_id: i64,
        preference_id: i64,
        update: PreferenceUpdate,
    ) -> Result<Preference> {
        let update = PreferenceUpdate {
            description: update
                .description
                .as_deref()
                .map(Preference::validate_description)
                .transpose()?,
            weight: update.weight.map(Preference::validate_weight).transpose()?,
        };

        let mut preference = self
            .repository
            .update_preference(user_id, preference_id, update)
            .await?;

        if preference.embedding.is_none() {
            if let Some(vector) = self.embed_preference(&preference.description).await? {
                let stored = self
                    .repository
                    .set_preference_embedding(
                        user_id,
                        preference_id,
                        &preference.description,
                        vector.clone(),
                    )
                    .await?;
                if stored {
                    preference.embedding = Some(vector);
                }
            }
        }
        Ok(preference)
    }

    pub async fn remove_preference(&self, user_id: i64, preference_id: i64) -> Result<()> {
        self.repository
            .remove_preference(user_id, preference_id)
            .await
    }

    pub async fn list_preferences(&self, user_id: i64) -> Result<Vec<Preference>> {
        self.ensure_user(user_id).await?;
        self.repository.list_preferences(user_id).await
    }

    pub async fn clear_preferences(&self, user_id: i64) -> Result<u64> {
        self.ensure_user(user_id).await?;
        self.repository.clear_preferences(user_id).await
    }

    async fn embed_preference(&self, description: &str) -> Result<Option<Vec<f32>>> {
        match self.codec.embed(description).await {
            Ok(vector) => Ok(Some(vector)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!("Deferring preference embedding: {}", e);
                Ok(None)
            }
        }
    }

    // Users

    pub async fn register_user(
        &self,
        username: &str,
        credential: &str,
        email: Option<&str>,
    ) -> Result<User> {
        self.repository
            .create_user(NewUser {
                username: username.to_string(),
                credential: credential.to_string(),
                email: email.map(str::to_string),
            })
            .await
    }

    pub async fn delete_user(&self, user_id: i64) -> Result<DeletionStats> {
        let stats = self.repository.delete_user(user_id).await?;
        tracing::info!(
            "Deleted user {} with {} preferences and {} interactions",
            user_id,
            stats.preferences,
            stats.interactions
        );
        Ok(stats)
    }

    /// What [`App::delete_user`] would remove, without removing it.
    pub async fn deletion_preview(&self, user_id: i64) -> Result<DeletionStats> {
        self.ensure_user(user_id).await?;
        self.repository.deletion_stats(user_id).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.repository.list_users().await
    }

    pub async fn find_user(&self, username: &str) -> Result<Option<User>> {
        self.repository.find_user(username).await
    }

    // Articles

    /// Full text of an article, fetched from the page on first request.
    pub async fn article_content(&self, article_url: &str) -> Result<Option<String>> {
        let url = canonical_url(article_url)?;
        let article = self
            .repository
            .get(&url)
            .await?
            .ok_or_else(|| AppError::not_found("article", &url))?;

        if let Some(content) = article.content {
            return Ok(Some(content));
        }

        let content = self.content.fetch_content(&url).await?;
        if let Some(text) = &content {
            self.repository.set_content(&url, text.clone()).await?;
        }
        Ok(content)
    }

    pub async fn article_count(&self) -> Result<u64> {
        self.repository.count().await
    }

    pub async fn purge_older_than_days(&self, days: u32) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let purged = self.repository.purge_older_than(cutoff).await?;
        tracing::info!("Purged {} articles older than {} days", purged, days);
        Ok(purged)
    }

    // Ingestion

    pub async fn trigger_ingestion(&self) -> Result<TriggerOutcome> {
        self.scheduler.trigger().await
    }

    pub async fn backfill(&self, limit: usize) -> Result<EmbedOutcome> {
        self.pipeline.backfill(limit).await
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.codec.stats()
    }
}
