#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use newsrank::config::{
    Config, EmbeddingConfig, IngestionConfig, RankingConfig, SourceConfig,
};
use newsrank::db::{ArticleStore, Repository};
use newsrank::embedding::{EmbeddingProvider, VectorCodec, EMBEDDING_DIM};
use newsrank::feed::{FeedSource, RawItem};
use newsrank::models::{Article, NewArticle};
use newsrank::services::ContentSource;
use newsrank::{App, AppError, Result};

/// Topic words mapped to their own axis. Text mentioning none of them
/// lands on the last axis.
pub const TOPICS: [&str; 5] = ["football", "election", "climate", "markets", "space"];

/// Deterministic provider: one axis per topic word found in the text.
#[derive(Default)]
pub struct TopicEmbedder {
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl TopicEmbedder {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    fn model_name(&self) -> &str {
        "topic-stub"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Encoding("provider unavailable".to_string()));
        }
        let text = text.to_lowercase();
        let mut vector = vec![0.0; EMBEDDING_DIM];
        for (axis, topic) in TOPICS.iter().enumerate() {
            if text.contains(topic) {
                vector[axis] = 1.0;
            }
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[EMBEDDING_DIM - 1] = 1.0;
        }
        Ok(vector)
    }
}

pub enum FeedBehavior {
    Items(Vec<RawItem>),
    Fail,
    Hang,
}

/// Feed source whose per-source responses are set by the test.
#[derive(Default)]
pub struct StubFeeds {
    behaviors: Mutex<HashMap<String, FeedBehavior>>,
}

impl StubFeeds {
    pub fn set(&self, source: &str, behavior: FeedBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(source.to_string(), behavior);
    }
}

#[async_trait]
impl FeedSource for StubFeeds {
    async fn fetch_source(&self, source: &SourceConfig) -> Result<Vec<RawItem>> {
        let hang = {
            let behaviors = self.behaviors.lock().unwrap();
            match behaviors.get(&source.name) {
                Some(FeedBehavior::Items(items)) => return Ok(items.clone()),
                Some(FeedBehavior::Fail) => {
                    return Err(AppError::Fetch {
                        source_name: source.name.clone(),
                        reason: "HTTP 503 Service Unavailable".to_string(),
                    })
                }
                Some(FeedBehavior::Hang) => true,
                None => false,
            }
        };

        if hang {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok(Vec::new())
    }
}

/// Content source that serves a fixed body and counts requests.
#[derive(Default)]
pub struct StubContent {
    pub requests: AtomicUsize,
}

#[async_trait]
impl ContentSource for StubContent {
    async fn fetch_content(&self, article_url: &str) -> Result<Option<String>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("Full text of {}", article_url)))
    }
}

pub struct Harness {
    pub app: App,
    pub repo: Arc<Repository>,
    pub embedder: Arc<TopicEmbedder>,
    pub feeds: Arc<StubFeeds>,
    pub content: Arc<StubContent>,
}

pub fn test_config(sources: &[&str]) -> Config {
    Config {
        db_path: ":memory:".to_string(),
        ingestion: IngestionConfig {
            fetch_timeout_secs: 1,
            fetch_concurrency: 4,
            embed_workers: 2,
            ..IngestionConfig::default()
        },
        ranking: RankingConfig::default(),
        embedding: EmbeddingConfig::default(),
        sources: sources
            .iter()
            .map(|name| SourceConfig::new(*name, format!("https://{}.example/rss", name)))
            .collect(),
    }
}

pub async fn harness(sources: &[&str]) -> Harness {
    harness_with(test_config(sources)).await
}

pub async fn harness_with(config: Config) -> Harness {
    let repo = Arc::new(Repository::open_in_memory().await.unwrap());
    let embedder = Arc::new(TopicEmbedder::default());
    let codec = Arc::new(VectorCodec::new(
        embedder.clone(),
        Duration::from_secs(5),
        1_000,
    ));
    let feeds = Arc::new(StubFeeds::default());
    let content = Arc::new(StubContent::default());

    let app = App::with_components(
        repo.clone(),
        codec,
        feeds.clone(),
        content.clone(),
        &config,
    );

    Harness {
        app,
        repo,
        embedder,
        feeds,
        content,
    }
}

pub fn item(source: &str, title: &str, link: &str, published_at: DateTime<Utc>) -> RawItem {
    RawItem {
        title: title.to_string(),
        link: link.to_string(),
        summary: format!("{} summary", title),
        published_at: Some(published_at),
        source_name: source.to_string(),
        category: None,
    }
}

pub fn axis(components: &[(usize, f32)]) -> Vec<f32> {
    let mut vector = vec![0.0; EMBEDDING_DIM];
    for &(index, value) in components {
        vector[index] = value;
    }
    vector
}

/// Stores an article directly, optionally with a hand-made embedding.
pub async fn seed_article(
    repo: &Repository,
    url: &str,
    published_at: DateTime<Utc>,
    embedding: Option<Vec<f32>>,
) -> Article {
    let article = repo
        .insert(NewArticle {
            url: url.to_string(),
            title: format!("Story at {}", url),
            description: "Seeded".to_string(),
            content: None,
            source: "Seed".to_string(),
            category: None,
            published_at,
        })
        .await
        .unwrap();
    if let Some(vector) = embedding {
        repo.attach_embedding(url, vector).await.unwrap();
    }
    article
}
