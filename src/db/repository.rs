use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use super::schema::SCHEMA;
use super::{ArticleStore, InteractionLog, PreferenceStore, UserStore};
use crate::embedding::{blob_to_vec, check_dimension, vec_to_blob, EMBEDDING_DIM};
use crate::error::{AppError, Result};
use crate::models::{
    ActionKind, Article, DeletionStats, HistoryEntry, Interaction, NewArticle, NewUser,
    Preference, PreferenceUpdate, User,
};

const ARTICLE_COLUMNS: &str = "url, title, description, content, source, category, \
     published_at, ingested_at, content_hash, embedding";

const PREFERENCE_COLUMNS: &str = "id, user_id, description, weight, embedding, created_at";

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

// Article operations

#[async_trait]
impl ArticleStore for Repository {
    async fn exists(&self, url: &str) -> Result<bool> {
        let url = url.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM articles WHERE url = ?1",
                    params![url],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    async fn insert(&self, article: NewArticle) -> Result<Article> {
        let stored = Article {
            content_hash: article.content_hash(),
            url: article.url,
            title: article.title,
            description: article.description,
            content: article.content,
            source: article.source,
            category: article.category,
            published_at: article.published_at,
            ingested_at: Utc::now(),
            embedding: None,
        };

        let row = stored.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT INTO articles (url, title, description, content, source, category,
                                             published_at, ingested_at, content_hash)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                       ON CONFLICT(url) DO NOTHING"#,
                    params![
                        row.url,
                        row.title,
                        row.description,
                        row.content,
                        row.source,
                        row.category,
                        format_ts(&row.published_at),
                        format_ts(&row.ingested_at),
                        row.content_hash,
                    ],
                )?;
                Ok(changed == 1)
            })
            .await?;

        if !inserted {
            return Err(AppError::DuplicateArticle(stored.url));
        }
        Ok(stored)
    }

    async fn attach_embedding(&self, url: &str, vector: Vec<f32>) -> Result<()> {
        check_dimension(&vector)?;
        let url = url.to_string();
        let blob = vec_to_blob(&vector);
        let key = url.clone();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE articles SET embedding = ?1, embedded_at = ?2 WHERE url = ?3",
                    params![blob, format_ts(&Utc::now()), key],
                )?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            return Err(AppError::not_found("article", url));
        }
        Ok(())
    }

    async fn list_candidates(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Article>> {
        let since = format_ts(&since);
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM articles
                     WHERE embedding IS NOT NULL AND published_at >= ?1
                     ORDER BY published_at DESC, url ASC
                     LIMIT ?2",
                    ARTICLE_COLUMNS
                ))?;
                let articles = stmt
                    .query_map(params![since, limit as i64], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    async fn latest(&self, limit: usize) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM articles ORDER BY published_at DESC, url ASC LIMIT ?1",
                    ARTICLE_COLUMNS
                ))?;
                let articles = stmt
                    .query_map(params![limit as i64], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    async fn get(&self, url: &str) -> Result<Option<Article>> {
        let url = url.to_string();
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM articles WHERE url = ?1",
                    ARTICLE_COLUMNS
                ))?;
                let article = stmt
                    .query_row(params![url], article_from_row)
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    async fn search(&self, keyword: &str, limit: usize) -> Result<Vec<Article>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(AppError::Validation("search keyword must not be empty".to_string()));
        }
        let pattern = format!("%{}%", escape_like(keyword));
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {} FROM articles
                       WHERE title LIKE ?1 ESCAPE '\' OR description LIKE ?1 ESCAPE '\'
                       ORDER BY published_at DESC, url ASC
                       LIMIT ?2"#,
                    ARTICLE_COLUMNS
                ))?;
                let articles = stmt
                    .query_map(params![pattern, limit as i64], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    async fn by_source(&self, source: &str, limit: usize) -> Result<Vec<Article>> {
        let source = source.to_string();
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM articles
                     WHERE source = ?1
                     ORDER BY published_at DESC, url ASC
                     LIMIT ?2",
                    ARTICLE_COLUMNS
                ))?;
                let articles = stmt
                    .query_map(params![source, limit as i64], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    async fn pending_embeddings(&self, limit: usize) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM articles
                     WHERE embedding IS NULL
                     ORDER BY ingested_at ASC, url ASC
                     LIMIT ?1",
                    ARTICLE_COLUMNS
                ))?;
                let articles = stmt
                    .query_map(params![limit as i64], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    async fn set_content(&self, url: &str, content: String) -> Result<()> {
        let key = url.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE articles SET content = ?1 WHERE url = ?2",
                    params![content, key],
                )?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            return Err(AppError::not_found("article", url));
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count as u64)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let cutoff = format_ts(&cutoff);
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM articles WHERE published_at < ?1", params![cutoff])?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted as u64)
    }
}

// Preference operations

#[async_trait]
impl PreferenceStore for Repository {
    async fn add_preference(
        &self,
        user_id: i64,
        description: String,
        weight: f32,
        embedding: Option<Vec<f32>>,
    ) -> Result<Preference> {
        let description = Preference::validate_description(&description)?;
        let weight = Preference::validate_weight(weight)?;
        if let Some(vector) = &embedding {
            check_dimension(vector)?;
        }

        let blob = embedding.as_deref().map(vec_to_blob);
        let created_at = Utc::now();
        let text = description.clone();
        let id = self
            .conn
            .call(move |conn| {
                let user_exists: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM users WHERE id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )?;
                if user_exists == 0 {
                    return Ok(None);
                }
                let now = format_ts(&created_at);
                conn.execute(
                    r#"INSERT INTO preferences (user_id, description, weight, embedding, created_at, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?5)"#,
                    params![user_id, text, weight, blob, now],
                )?;
                Ok(Some(conn.last_insert_rowid()))
            })
            .await?;

        let id = id.ok_or_else(|| AppError::not_found("user", user_id))?;
        Ok(Preference {
            id,
            user_id,
            description,
            weight,
            embedding,
            created_at,
        })
    }

    async fn list_preferences(&self, user_id: i64) -> Result<Vec<Preference>> {
        let preferences = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM preferences WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
                    PREFERENCE_COLUMNS
                ))?;
                let preferences = stmt
                    .query_map(params![user_id], preference_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(preferences)
            })
            .await?;
        Ok(preferences)
    }

    async fn get_preference(&self, user_id: i64, preference_id: i64) -> Result<Preference> {
        let preference = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM preferences WHERE id = ?1 AND user_id = ?2",
                    PREFERENCE_COLUMNS
                ))?;
                let preference = stmt
                    .query_row(params![preference_id, user_id], preference_from_row)
                    .optional()?;
                Ok(preference)
            })
            .await?;
        preference.ok_or_else(|| AppError::not_found("preference", preference_id))
    }

    async fn update_preference(
        &self,
        user_id: i64,
        preference_id: i64,
        update: PreferenceUpdate,
    ) -> Result<Preference> {
        let description = update
            .description
            .as_deref()
            .map(Preference::validate_description)
            .transpose()?;
        let weight = update.weight.map(Preference::validate_weight).transpose()?;

        let updated = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let current: Option<(String, f32)> = tx
                    .query_row(
                        "SELECT description, weight FROM preferences WHERE id = ?1 AND user_id = ?2",
                        params![preference_id, user_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let Some((current_description, current_weight)) = current else {
                    return Ok(None);
                };

                let now = format_ts(&Utc::now());
                let new_weight = weight.unwrap_or(current_weight);
                match description {
                    Some(text) if text != current_description => {
                        tx.execute(
                            r#"UPDATE preferences
                               SET description = ?1, weight = ?2, embedding = NULL, updated_at = ?3
                               WHERE id = ?4"#,
                            params![text, new_weight, now, preference_id],
                        )?;
                    }
                    _ => {
                        tx.execute(
                            "UPDATE preferences SET weight = ?1, updated_at = ?2 WHERE id = ?3",
                            params![new_weight, now, preference_id],
                        )?;
                    }
                }

                let preference = tx.query_row(
                    &format!(
                        "SELECT {} FROM preferences WHERE id = ?1",
                        PREFERENCE_COLUMNS
                    ),
                    params![preference_id],
                    preference_from_row,
                )?;
                tx.commit()?;
                Ok(Some(preference))
            })
            .await?;

        updated.ok_or_else(|| AppError::not_found("preference", preference_id))
    }

    async fn set_preference_embedding(
        &self,
        user_id: i64,
        preference_id: i64,
        description: &str,
        vector: Vec<f32>,
    ) -> Result<bool> {
        check_dimension(&vector)?;
        let blob = vec_to_blob(&vector);
        let description = description.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"UPDATE preferences SET embedding = ?1
                       WHERE id = ?2 AND user_id = ?3 AND description = ?4"#,
                    params![blob, preference_id, user_id, description],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed == 1)
    }

    async fn remove_preference(&self, user_id: i64, preference_id: i64) -> Result<()> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "DELETE FROM preferences WHERE id = ?1 AND user_id = ?2",
                    params![preference_id, user_id],
                )?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            return Err(AppError::not_found("preference", preference_id));
        }
        Ok(())
    }

    async fn clear_preferences(&self, user_id: i64) -> Result<u64> {
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM preferences WHERE user_id = ?1", params![user_id])?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted as u64)
    }
}

// Interaction log

#[async_trait]
impl InteractionLog for Repository {
    async fn append(
        &self,
        user_id: i64,
        article_url: &str,
        action: ActionKind,
        occurred_at: DateTime<Utc>,
    ) -> Result<Interaction> {
        let url = article_url.to_string();
        let appended = self
            .conn
            .call(move |conn| {
                let user_exists: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM users WHERE id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )?;
                if user_exists == 0 {
                    return Ok(false);
                }
                conn.execute(
                    "INSERT INTO interactions (user_id, article_url, action, occurred_at) VALUES (?1, ?2, ?3, ?4)",
                    params![user_id, url, action.as_str(), format_ts(&occurred_at)],
                )?;
                Ok(true)
            })
            .await?;

        if !appended {
            return Err(AppError::not_found("user", user_id));
        }
        Ok(Interaction {
            user_id,
            article_url: article_url.to_string(),
            action,
            occurred_at,
        })
    }

    async fn recent_for(&self, user_id: i64, since: DateTime<Utc>) -> Result<Vec<Interaction>> {
        let since = format_ts(&since);
        let interactions = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT user_id, article_url, action, occurred_at FROM interactions
                       WHERE user_id = ?1 AND occurred_at >= ?2
                       ORDER BY occurred_at DESC, id DESC"#,
                )?;
                let interactions = stmt
                    .query_map(params![user_id, since], |row| {
                        Ok(Interaction {
                            user_id: row.get(0)?,
                            article_url: row.get(1)?,
                            action: action_column(row, 2)?,
                            occurred_at: ts_column(row, 3)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(interactions)
            })
            .await?;
        Ok(interactions)
    }

    async fn history(&self, user_id: i64, limit: usize) -> Result<Vec<HistoryEntry>> {
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT i.article_url, a.title, a.source, i.action, i.occurred_at
                       FROM interactions i
                       LEFT JOIN articles a ON a.url = i.article_url
                       WHERE i.user_id = ?1
                       ORDER BY i.occurred_at DESC, i.id DESC
                       LIMIT ?2"#,
                )?;
                let entries = stmt
                    .query_map(params![user_id, limit as i64], |row| {
                        Ok(HistoryEntry {
                            article_url: row.get(0)?,
                            title: row.get(1)?,
                            source: row.get(2)?,
                            action: action_column(row, 3)?,
                            occurred_at: ts_column(row, 4)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }
}

// User operations

#[async_trait]
impl UserStore for Repository {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let username = user.username.trim().to_string();
        if username.is_empty() {
            return Err(AppError::Validation("username must not be empty".to_string()));
        }
        let email = user
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        let created_at = Utc::now();

        let (name, mail) = (username.clone(), email.clone());
        let id = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT INTO users (username, credential, email, created_at)
                       VALUES (?1, ?2, ?3, ?4)
                       ON CONFLICT(username) DO NOTHING"#,
                    params![name, user.credential, mail, format_ts(&created_at)],
                )?;
                Ok((changed == 1).then(|| conn.last_insert_rowid()))
            })
            .await?;

        let id = id.ok_or_else(|| {
            AppError::Validation(format!("username '{}' already exists", username))
        })?;
        Ok(User {
            id,
            username,
            email,
            created_at,
        })
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT id, username, email, created_at FROM users WHERE id = ?1",
                        params![user_id],
                        user_from_row,
                    )
                    .optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>> {
        let username = username.trim().to_string();
        let user = self
            .conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT id, username, email, created_at FROM users WHERE username = ?1",
                        params![username],
                        user_from_row,
                    )
                    .optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let users = self
            .conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare("SELECT id, username, email, created_at FROM users ORDER BY username")?;
                let users = stmt
                    .query_map([], user_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(users)
            })
            .await?;
        Ok(users)
    }

    async fn deletion_stats(&self, user_id: i64) -> Result<DeletionStats> {
        let stats = self
            .conn
            .call(move |conn| {
                let preferences: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM preferences WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )?;
                let interactions: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM interactions WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )?;
                Ok(DeletionStats {
                    preferences: preferences as u64,
                    interactions: interactions as u64,
                })
            })
            .await?;
        Ok(stats)
    }

    async fn delete_user(&self, user_id: i64) -> Result<DeletionStats> {
        let stats = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let exists: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM users WHERE id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )?;
                if exists == 0 {
                    return Ok(None);
                }

                let interactions =
                    tx.execute("DELETE FROM interactions WHERE user_id = ?1", params![user_id])?;
                let preferences =
                    tx.execute("DELETE FROM preferences WHERE user_id = ?1", params![user_id])?;
                tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
                tx.commit()?;

                Ok(Some(DeletionStats {
                    preferences: preferences as u64,
                    interactions: interactions as u64,
                }))
            })
            .await?;

        stats.ok_or_else(|| AppError::not_found("user", user_id))
    }
}

/// Fixed-width UTC timestamps so that text order equals time order.
// `%` and `_` in a user keyword match literally.
fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn format_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn ts_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp '{}'", raw).into(),
        )
    })
}

fn action_column(row: &Row, idx: usize) -> rusqlite::Result<ActionKind> {
    let raw: String = row.get(idx)?;
    raw.parse::<ActionKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.to_string().into())
    })
}

/// A stored vector of the wrong size is treated as missing.
fn embedding_column(row: &Row, idx: usize, key: &str) -> rusqlite::Result<Option<Vec<f32>>> {
    let blob: Option<Vec<u8>> = row.get(idx)?;
    Ok(blob.and_then(|bytes| {
        let vector = blob_to_vec(&bytes);
        if vector.len() == EMBEDDING_DIM {
            Some(vector)
        } else {
            tracing::warn!(
                "Ignoring corrupt embedding for {}: {} dimensions",
                key,
                vector.len()
            );
            None
        }
    }))
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    let url: String = row.get(0)?;
    let embedding = embedding_column(row, 9, &url)?;
    Ok(Article {
        title: row.get(1)?,
        description: row.get(2)?,
        content: row.get(3)?,
        source: row.get(4)?,
        category: row.get(5)?,
        published_at: ts_column(row, 6)?,
        ingested_at: ts_column(row, 7)?,
        content_hash: row.get(8)?,
        embedding,
        url,
    })
}

fn preference_from_row(row: &Row) -> rusqlite::Result<Preference> {
    let id: i64 = row.get(0)?;
    Ok(Preference {
        id,
        user_id: row.get(1)?,
        description: row.get(2)?,
        weight: row.get(3)?,
        embedding: embedding_column(row, 4, &format!("preference {}", id))?,
        created_at: ts_column(row, 5)?,
    })
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        created_at: ts_column(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_article(url: &str, published_at: DateTime<Utc>) -> NewArticle {
        NewArticle {
            url: url.to_string(),
            title: format!("Title for {}", url),
            description: "Description".to_string(),
            content: None,
            source: "Test".to_string(),
            category: None,
            published_at,
        }
    }

    fn vector(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[axis] = 1.0;
        v
    }

    async fn user(repo: &Repository, name: &str) -> User {
        repo.create_user(NewUser {
            username: name.to_string(),
            credential: "opaque".to_string(),
            email: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn second_insert_of_same_url_is_duplicate() {
        let repo = Repository::open_in_memory().await.unwrap();
        let now = Utc::now();
        repo.insert(new_article("https://a.example/1", now)).await.unwrap();

        let err = repo
            .insert(new_article("https://a.example/1", now))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateArticle(_)));
        assert_eq!(repo.count().await.unwrap(), 1);
        assert!(repo.exists("https://a.example/1").await.unwrap());
        assert!(!repo.exists("https://a.example/2").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_inserts_of_one_url_store_one_row() {
        let repo = Repository::open_in_memory().await.unwrap();
        let article = new_article("https://a.example/race", Utc::now());

        let (first, second) = tokio::join!(repo.insert(article.clone()), repo.insert(article));

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(AppError::DuplicateArticle(_))))
                .count(),
            1
        );
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn search_matches_title_or_description() {
        let repo = Repository::open_in_memory().await.unwrap();
        let now = Utc::now();
        let mut older = new_article("https://a.example/older", now - Duration::hours(2));
        older.title = "Central bank raises rates".to_string();
        let mut newer = new_article("https://a.example/newer", now - Duration::hours(1));
        newer.description = "Markets react to the central BANK decision".to_string();
        let mut literal = new_article("https://a.example/literal", now);
        literal.title = "Turnout hits 100% in village".to_string();
        repo.insert(older).await.unwrap();
        repo.insert(newer).await.unwrap();
        repo.insert(literal).await.unwrap();
        repo.insert(new_article("https://a.example/other", now)).await.unwrap();

        let found = repo.search("central bank", 10).await.unwrap();
        let urls: Vec<_> = found.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.example/newer", "https://a.example/older"]);

        assert_eq!(repo.search("central bank", 1).await.unwrap().len(), 1);
        let percent = repo.search("100%", 10).await.unwrap();
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].url, "https://a.example/literal");
        assert_eq!(repo.search("%", 10).await.unwrap().len(), 1);
        assert!(matches!(
            repo.search("  ", 10).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn by_source_lists_one_feed_newest_first() {
        let repo = Repository::open_in_memory().await.unwrap();
        let now = Utc::now();
        for (url, source, hours) in [
            ("https://a.example/1", "BBC News", 3),
            ("https://a.example/2", "NPR News", 2),
            ("https://a.example/3", "BBC News", 1),
        ] {
            let mut article = new_article(url, now - Duration::hours(hours));
            article.source = source.to_string();
            repo.insert(article).await.unwrap();
        }

        let bbc = repo.by_source("BBC News", 10).await.unwrap();
        let urls: Vec<_> = bbc.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.example/3", "https://a.example/1"]);
        assert!(repo.by_source("Unknown", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn attach_embedding_validates_and_finds_row() {
        let repo = Repository::open_in_memory().await.unwrap();
        repo.insert(new_article("https://a.example/1", Utc::now()))
            .await
            .unwrap();

        assert!(matches!(
            repo.attach_embedding("https://a.example/1", vec![1.0; 3]).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            repo.attach_embedding("https://a.example/missing", vector(0)).await,
            Err(AppError::NotFound { .. })
        ));

        repo.attach_embedding("https://a.example/1", vector(0))
            .await
            .unwrap();
        repo.attach_embedding("https://a.example/1", vector(1))
            .await
            .unwrap();
        let stored = repo.get("https://a.example/1").await.unwrap().unwrap();
        assert_eq!(stored.embedding, Some(vector(1)));
    }

    #[tokio::test]
    async fn candidates_exclude_unembedded_and_old_articles() {
        let repo = Repository::open_in_memory().await.unwrap();
        let now = Utc::now();
        repo.insert(new_article("https://a.example/new", now)).await.unwrap();
        repo.insert(new_article("https://a.example/older", now - Duration::hours(1)))
            .await
            .unwrap();
        repo.insert(new_article("https://a.example/bare", now)).await.unwrap();
        repo.insert(new_article("https://a.example/ancient", now - Duration::days(30)))
            .await
            .unwrap();
        for url in [
            "https://a.example/new",
            "https://a.example/older",
            "https://a.example/ancient",
        ] {
            repo.attach_embedding(url, vector(0)).await.unwrap();
        }

        let candidates = repo
            .list_candidates(now - Duration::days(3), 10)
            .await
            .unwrap();
        let urls: Vec<_> = candidates.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.example/new", "https://a.example/older"]);

        let pending = repo.pending_embeddings(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].url, "https://a.example/bare");

        assert_eq!(repo.latest(10).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn purge_removes_old_articles() {
        let repo = Repository::open_in_memory().await.unwrap();
        let now = Utc::now();
        repo.insert(new_article("https://a.example/new", now)).await.unwrap();
        repo.insert(new_article("https://a.example/old", now - Duration::days(5)))
            .await
            .unwrap();

        let purged = repo.purge_older_than(now - Duration::days(3)).await.unwrap();
        assert_eq!(purged, 1);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn editing_description_clears_embedding() {
        let repo = Repository::open_in_memory().await.unwrap();
        let alice = user(&repo, "alice").await;
        let pref = repo
            .add_preference(alice.id, "space exploration".into(), 1.0, Some(vector(2)))
            .await
            .unwrap();

        let reweighted = repo
            .update_preference(
                alice.id,
                pref.id,
                PreferenceUpdate {
                    description: None,
                    weight: Some(2.0),
                },
            )
            .await
            .unwrap();
        assert_eq!(reweighted.weight, 2.0);
        assert_eq!(reweighted.embedding, Some(vector(2)));

        let edited = repo
            .update_preference(
                alice.id,
                pref.id,
                PreferenceUpdate {
                    description: Some("ocean science".into()),
                    weight: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.description, "ocean science");
        assert_eq!(edited.weight, 2.0);
        assert!(edited.embedding.is_none());
    }

    #[tokio::test]
    async fn stale_embedding_write_is_refused() {
        let repo = Repository::open_in_memory().await.unwrap();
        let alice = user(&repo, "alice").await;
        let pref = repo
            .add_preference(alice.id, "space".into(), 1.0, None)
            .await
            .unwrap();
        repo.update_preference(
            alice.id,
            pref.id,
            PreferenceUpdate {
                description: Some("ocean".into()),
                weight: None,
            },
        )
        .await
        .unwrap();

        let applied = repo
            .set_preference_embedding(alice.id, pref.id, "space", vector(3))
            .await
            .unwrap();
        assert!(!applied);
        let applied = repo
            .set_preference_embedding(alice.id, pref.id, "ocean", vector(4))
            .await
            .unwrap();
        assert!(applied);
    }

    #[tokio::test]
    async fn preferences_are_scoped_to_owner() {
        let repo = Repository::open_in_memory().await.unwrap();
        let alice = user(&repo, "alice").await;
        let bob = user(&repo, "bob").await;
        let pref = repo
            .add_preference(alice.id, "chess".into(), 1.0, None)
            .await
            .unwrap();

        assert!(matches!(
            repo.remove_preference(bob.id, pref.id).await,
            Err(AppError::NotFound { .. })
        ));
        assert!(matches!(
            repo.add_preference(9999, "chess".into(), 1.0, None).await,
            Err(AppError::NotFound { .. })
        ));
        repo.remove_preference(alice.id, pref.id).await.unwrap();
        assert!(repo.list_preferences(alice.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let repo = Repository::open_in_memory().await.unwrap();
        user(&repo, "alice").await;
        let err = repo
            .create_user(NewUser {
                username: " alice ".into(),
                credential: "x".into(),
                email: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn interactions_keep_duplicates_and_order() {
        let repo = Repository::open_in_memory().await.unwrap();
        let alice = user(&repo, "alice").await;
        let now = Utc::now();
        let url = "https://a.example/1";

        repo.append(alice.id, url, ActionKind::Viewed, now - Duration::hours(2))
            .await
            .unwrap();
        repo.append(alice.id, url, ActionKind::Clicked, now - Duration::hours(1))
            .await
            .unwrap();
        repo.append(alice.id, url, ActionKind::Clicked, now - Duration::hours(1))
            .await
            .unwrap();
        repo.append(alice.id, url, ActionKind::Viewed, now - Duration::days(30))
            .await
            .unwrap();

        let recent = repo
            .recent_for(alice.id, now - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].action, ActionKind::Clicked);
        assert_eq!(recent[2].action, ActionKind::Viewed);

        let history = repo.history(alice.id, 10).await.unwrap();
        assert_eq!(history.len(), 4);
        assert!(history[0].title.is_none());
    }

    #[test]
    fn timestamps_sort_as_text() {
        let early = Utc::now();
        let late = early + Duration::nanoseconds(1);
        assert!(format_ts(&early) < format_ts(&late));
        assert_eq!(format_ts(&early).len(), format_ts(&late).len());
        assert_eq!(parse_datetime(&format_ts(&early)), Some(early));
    }
}
