//! Text-to-vector encoding.
//!
//! [`VectorCodec`] wraps an [`EmbeddingProvider`] with a content-hash keyed
//! cache, a per-call timeout and the process-wide dimension check. Every
//! vector that reaches a store has exactly [`EMBEDDING_DIM`] components.

mod hashing;
mod http;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::{AppError, Result};

pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;

/// Dimension of every stored embedding. Changing it requires a full re-embed.
pub const EMBEDDING_DIM: usize = 384;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Computes the embedding for non-empty, trimmed text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new()?)),
        "http" => Ok(Arc::new(HttpEmbedder::new(config)?)),
        other => Err(AppError::Config(format!(
            "unknown embedding provider '{}'",
            other
        ))),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

pub struct VectorCodec {
    provider: Arc<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, Arc<Vec<f32>>>>,
    capacity: usize,
    timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl VectorCodec {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, timeout: Duration, capacity: usize) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
            capacity,
            timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let provider = create_provider(config)?;
        Ok(Self::new(provider, config.timeout(), config.cache_capacity))
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embeds `text`. Empty or whitespace-only text is an [`AppError::Encoding`],
    /// never a zero vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Encoding("cannot embed empty text".to_string()));
        }

        let key = content_hash(text);
        if let Some(vector) = self.cached(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(vector.as_ref().clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let vector = match tokio::time::timeout(self.timeout, self.provider.embed(text)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AppError::Encoding(format!(
                    "{} timed out after {:?}",
                    self.provider.model_name(),
                    self.timeout
                )))
            }
        };

        if vector.len() != EMBEDDING_DIM {
            return Err(AppError::Encoding(format!(
                "{} returned {} dimensions, expected {}",
                self.provider.model_name(),
                vector.len(),
                EMBEDDING_DIM
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(AppError::Encoding(format!(
                "{} returned non-finite components",
                self.provider.model_name()
            )));
        }

        self.remember(key, &vector);
        Ok(vector)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.read().unwrap_or_else(|e| e.into_inner()).len(),
        }
    }

    fn cached(&self, key: &str) -> Option<Arc<Vec<f32>>> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        cache.get(key).cloned()
    }

    fn remember(&self, key: String, vector: &[f32]) {
        if self.capacity == 0 {
            return;
        }
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= self.capacity && !cache.contains_key(&key) {
            // Simple bound: start over rather than track recency.
            cache.clear();
        }
        cache.insert(key, Arc::new(vector.to_vec()));
    }
}

/// SHA-256 hex digest of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Rejects vectors that would corrupt the corpus. Stores call this on every write.
pub fn check_dimension(vector: &[f32]) -> Result<()> {
    if vector.len() != EMBEDDING_DIM {
        return Err(AppError::Validation(format!(
            "embedding has {} dimensions, expected {}",
            vector.len(),
            EMBEDDING_DIM
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(AppError::Validation(
            "embedding contains non-finite components".to_string(),
        ));
    }
    Ok(())
}

/// Little-endian `f32` encoding used for BLOB columns.
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty, mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0)
}
