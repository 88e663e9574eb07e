//! Store contracts and their SQLite implementation.
//!
//! The ranking and ingestion code only sees the traits below; [`Repository`]
//! satisfies all of them over a single SQLite connection.

mod repository;
mod schema;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    ActionKind, Article, DeletionStats, HistoryEntry, Interaction, NewArticle, NewUser,
    Preference, PreferenceUpdate, User,
};

pub use repository::Repository;

#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn exists(&self, url: &str) -> Result<bool>;

    /// Inserts without an embedding. The unique key on `url` is the dedup
    /// gate: a second insert of the same URL fails with `DuplicateArticle`.
    async fn insert(&self, article: NewArticle) -> Result<Article>;

    /// Idempotent, last write wins. `NotFound` for unknown URLs.
    async fn attach_embedding(&self, url: &str, vector: Vec<f32>) -> Result<()>;

    /// Embedded articles published at or after `since`, newest first.
    async fn list_candidates(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Article>>;

    /// All articles, newest first, embedded or not.
    async fn latest(&self, limit: usize) -> Result<Vec<Article>>;

    async fn get(&self, url: &str) -> Result<Option<Article>>;

    /// Articles whose title or description contains `keyword`
    /// (case-insensitive), newest first.
    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<Article>>;

    /// Articles from one source, newest first.
    async fn by_source(&self, source: &str, limit: usize) -> Result<Vec<Article>>;

    /// Articles still waiting for an embedding, oldest ingestion first.
    async fn pending_embeddings(&self, limit: usize) -> Result<Vec<Article>>;

    async fn set_content(&self, url: &str, content: String) -> Result<()>;

    async fn count(&self) -> Result<u64>;

    /// Administrative purge of articles published before `cutoff`.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn add_preference(
        &self,
        user_id: i64,
        description: String,
        weight: f32,
        embedding: Option<Vec<f32>>,
    ) -> Result<Preference>;

    /// Newest first.
    async fn list_preferences(&self, user_id: i64) -> Result<Vec<Preference>>;

    async fn get_preference(&self, user_id: i64, preference_id: i64) -> Result<Preference>;

    /// Changing the description clears the stored embedding in the same write.
    async fn update_preference(
        &self,
        user_id: i64,
        preference_id: i64,
        update: PreferenceUpdate,
    ) -> Result<Preference>;

    /// Stores `vector` only if the description is still `description`.
    /// Returns false when the preference changed or vanished meanwhile.
    async fn set_preference_embedding(
        &self,
        user_id: i64,
        preference_id: i64,
        description: &str,
        vector: Vec<f32>,
    ) -> Result<bool>;

    async fn remove_preference(&self, user_id: i64, preference_id: i64) -> Result<()>;

    async fn clear_preferences(&self, user_id: i64) -> Result<u64>;
}

#[async_trait]
pub trait InteractionLog: Send + Sync {
    /// Append-only; duplicates are allowed.
    async fn append(
        &self,
        user_id: i64,
        article_url: &str,
        action: ActionKind,
        occurred_at: DateTime<Utc>,
    ) -> Result<Interaction>;

    /// Interactions at or after `since`, newest first.
    async fn recent_for(&self, user_id: i64, since: DateTime<Utc>) -> Result<Vec<Interaction>>;

    async fn history(&self, user_id: i64, limit: usize) -> Result<Vec<HistoryEntry>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User>;

    async fn get_user(&self, user_id: i64) -> Result<Option<User>>;

    async fn find_user(&self, username: &str) -> Result<Option<User>>;

    async fn list_users(&self) -> Result<Vec<User>>;

    async fn deletion_stats(&self, user_id: i64) -> Result<DeletionStats>;

    /// Removes the user, its preferences and its interactions in one transaction.
    async fn delete_user(&self, user_id: i64) -> Result<DeletionStats>;
}
