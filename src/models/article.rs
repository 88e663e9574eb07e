use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A stored article. `url` is the canonical URL and never changes after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub url: String,
    pub title: String,
    pub description: String,
    pub content: Option<String>,
    pub source: String,
    pub category: Option<String>,
    pub published_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub content_hash: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Article {
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.description, self.category.as_deref())
    }
}

/// An article ready for insertion, URL already normalized.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub description: String,
    pub content: Option<String>,
    pub source: String,
    pub category: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl NewArticle {
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.description, self.category.as_deref())
    }

    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.embedding_text().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Text fed to the embedding model for an article.
pub fn embedding_text(title: &str, description: &str, category: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(3);
    for part in [title.trim(), description.trim()] {
        if !part.is_empty() {
            parts.push(part.to_string());
        }
    }
    if let Some(category) = category.map(str::trim).filter(|c| !c.is_empty()) {
        parts.push(format!("Category: {}", category));
    }
    parts.join(" ")
}

/// One ranked result. `score` is the cosine similarity of the best-matching
/// preference, before any feedback penalty; `0.0` for unpersonalized results.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub article: Article,
    pub score: f32,
    pub matched_preference: Option<i64>,
    pub previously_seen: bool,
}
