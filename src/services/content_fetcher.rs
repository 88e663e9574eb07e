use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use url::Url;

use super::ContentSource;
use crate::error::Result;

const USER_AGENT_STRING: &str = "Mozilla/5.0 (compatible; newsrank/1.0)";

/// Pages that render to less text than this are treated as paywalls or
/// script shells.
const MIN_CONTENT_CHARS: usize = 200;

pub struct ContentFetcher {
    client: Client,
}

impl ContentFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Fetch the article page and extract its text
    pub async fn fetch_full_content(&self, article_url: &str) -> Result<Option<String>> {
        let url = match Url::parse(article_url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => u,
            _ => return Ok(None),
        };

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
        headers.insert(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));

        let response = self.client.get(url).headers(headers).send().await?;

        if !response.status().is_success() {
            tracing::debug!("Failed to fetch {}: {}", article_url, response.status());
            return Ok(None);
        }

        let html = response.text().await?;
        Ok(extract_content(&html))
    }
}

#[async_trait]
impl ContentSource for ContentFetcher {
    async fn fetch_content(&self, article_url: &str) -> Result<Option<String>> {
        self.fetch_full_content(article_url).await
    }
}

/// Readable text from an HTML page, or `None` if too little survives.
pub fn extract_content(html: &str) -> Option<String> {
    let text = match html2text::from_read(html.as_bytes(), 80) {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!("Failed to convert HTML to text: {}", e);
            return None;
        }
    };

    let cleaned: String = text
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if cleaned.chars().count() > MIN_CONTENT_CHARS {
        Some(cleaned)
    } else {
        tracing::debug!("Extracted content too short ({} chars)", cleaned.len());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_paragraph_text() {
        let body = "The central bank held rates steady on Thursday. ".repeat(8);
        let html = format!(
            "<html><head><title>x</title></head><body><article><p>{}</p>\n\n<p>Second paragraph.</p></article></body></html>",
            body
        );
        let content = extract_content(&html).unwrap();
        assert!(content.contains("central bank held rates steady"));
        assert!(content.contains("Second paragraph."));
        assert!(!content.contains("<p>"));
        assert!(content.lines().all(|l| !l.trim().is_empty()));
    }

    #[test]
    fn short_pages_yield_nothing() {
        assert!(extract_content("<html><body><p>Subscribe to continue reading</p></body></html>").is_none());
    }

    #[tokio::test]
    async fn non_http_urls_are_ignored() {
        let fetcher = ContentFetcher::new(Duration::from_secs(1)).unwrap();
        assert!(fetcher.fetch_full_content("ftp://news.example/a").await.unwrap().is_none());
        assert!(fetcher.fetch_full_content("not a url").await.unwrap().is_none());
    }
}
