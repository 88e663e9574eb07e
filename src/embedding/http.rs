use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{AppError, Result};

const API_KEY_ENV: &str = "NEWSRANK_EMBEDDING_API_KEY";

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible `POST {endpoint}/embeddings` API.
pub struct HttpEmbedder {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| AppError::Config("embedding.endpoint is required".to_string()))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| AppError::Config("embedding.model is required".to_string()))?;

        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(10))
            .user_agent("newsrank/1.0")
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/embeddings", endpoint.trim_end_matches('/')),
            model,
            api_key: config
                .api_key
                .clone()
                .or_else(|| std::env::var(API_KEY_ENV).ok()),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Encoding(format!("embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Encoding(format!(
                "embedding API returned HTTP {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::Encoding(format!("invalid embedding response: {}", e)))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::Encoding("embedding response had no data".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_embeddings_url() {
        let config = EmbeddingConfig {
            provider: "http".to_string(),
            model: Some("all-minilm".to_string()),
            endpoint: Some("http://localhost:11434/v1/".to_string()),
            api_key: Some("secret".to_string()),
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::new(&config).unwrap();
        assert_eq!(embedder.url, "http://localhost:11434/v1/embeddings");
        assert_eq!(embedder.model_name(), "all-minilm");
        assert_eq!(embedder.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn requires_endpoint() {
        let config = EmbeddingConfig {
            provider: "http".to_string(),
            model: Some("all-minilm".to_string()),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(HttpEmbedder::new(&config), Err(AppError::Config(_))));
    }
}
