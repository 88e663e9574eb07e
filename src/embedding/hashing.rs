use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::{EmbeddingProvider, EMBEDDING_DIM};
use crate::error::{AppError, Result};

const TOKEN_PATTERN: &str = r"[\p{L}\p{N}]+";
const BIGRAM_WEIGHT: f32 = 0.5;

/// Offline embedder: signed feature hashing of lowercase word unigrams and
/// bigrams, L2-normalized. Deterministic across processes and platforms.
pub struct HashingEmbedder {
    tokens: Regex,
}

impl HashingEmbedder {
    pub fn new() -> Result<Self> {
        let tokens = Regex::new(TOKEN_PATTERN).map_err(|e| AppError::Config(e.to_string()))?;
        Ok(Self { tokens })
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        self.tokens
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }
}

fn bucket(feature: &str) -> (usize, f32) {
    let digest = Sha256::digest(feature.as_bytes());
    let mut index_bytes = [0u8; 8];
    index_bytes.copy_from_slice(&digest[..8]);
    let index = (u64::from_le_bytes(index_bytes) % EMBEDDING_DIM as u64) as usize;
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    (index, sign)
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        "feature-hashing-384"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self.tokenize(text);
        if tokens.is_empty() {
            return Err(AppError::Encoding(format!(
                "no words to embed in '{}'",
                text
            )));
        }

        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        for token in &tokens {
            let (index, sign) = bucket(token);
            vector[index] += sign;
        }
        for pair in tokens.windows(2) {
            let (index, sign) = bucket(&format!("{} {}", pair[0], pair[1]));
            vector[index] += sign * BIGRAM_WEIGHT;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm < f32::EPSILON {
            // Every feature cancelled out; fall back to the first token alone.
            let (index, sign) = bucket(&tokens[0]);
            vector.iter_mut().for_each(|v| *v = 0.0);
            vector[index] = sign;
            return Ok(vector);
        }
        vector.iter_mut().for_each(|v| *v /= norm);
        Ok(vector)
    }
}
