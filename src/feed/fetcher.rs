use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser;
use reqwest::Client;

use super::normalize::clean_text;
use super::{FeedSource, RawItem};
use crate::config::SourceConfig;
use crate::error::{AppError, Result};

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("newsrank/1.0 (RSS Feed Reader)")
            .build()?;

        Ok(Self { client })
    }

    async fn download(&self, source: &SourceConfig) -> Result<Vec<u8>> {
        let response = self.client.get(&source.url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Fetch {
                source_name: source.name.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch_source(&self, source: &SourceConfig) -> Result<Vec<RawItem>> {
        let bytes = self.download(source).await?;
        let items = parse_feed(&bytes, source)?;
        tracing::debug!("Fetched {} items from {}", items.len(), source.name);
        Ok(items)
    }
}

/// Parses RSS/Atom bytes into raw items tagged with the source's name.
/// Entries without a title or link are dropped.
pub fn parse_feed(bytes: &[u8], source: &SourceConfig) -> Result<Vec<RawItem>> {
    let feed = parser::parse(bytes)?;

    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let title = entry
                .title
                .map(|t| clean_text(&t.content))
                .unwrap_or_default();
            let link = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .unwrap_or_default();
            if title.is_empty() || link.is_empty() {
                return None;
            }

            // Prefer the summary, fall back to the content body
            let summary_html = entry
                .summary
                .as_ref()
                .map(|s| s.content.clone())
                .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
                .unwrap_or_default();

            let category = entry
                .categories
                .first()
                .map(|c| c.term.trim().to_string())
                .filter(|c| !c.is_empty())
                .or_else(|| source.category.clone());

            Some(RawItem {
                title,
                link,
                summary: clean_text(&summary_html),
                published_at: entry.published.or(entry.updated),
                source_name: source.name.clone(),
                category,
            })
        })
        .collect();

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example World</title>
    <link>https://news.example.com</link>
    <description>World news</description>
    <item>
      <title>Summit ends with climate deal</title>
      <link>https://news.example.com/world/summit?utm_source=rss</link>
      <description>&lt;p&gt;Leaders &lt;b&gt;agree&lt;/b&gt; on targets&lt;/p&gt;</description>
      <category>Politics</category>
      <pubDate>Tue, 10 Jun 2025 04:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Undated story</title>
      <link>https://news.example.com/undated</link>
      <description>No date here</description>
    </item>
    <item>
      <title></title>
      <link>https://news.example.com/untitled</link>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_rss_items() {
        let mut source = SourceConfig::new("Example", "https://news.example.com/rss");
        source.category = Some("World".to_string());

        let items = parse_feed(RSS.as_bytes(), &source).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.title, "Summit ends with climate deal");
        assert_eq!(first.source_name, "Example");
        assert_eq!(first.category.as_deref(), Some("Politics"));
        assert!(first.summary.contains("agree"));
        assert!(!first.summary.contains('<'));
        assert!(first.published_at.is_some());

        let second = &items[1];
        assert_eq!(second.category.as_deref(), Some("World"));
        assert!(second.published_at.is_none());
        assert_eq!(second.summary, "No date here");
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let source = SourceConfig::new("Broken", "https://broken.example/rss");
        assert!(matches!(
            parse_feed(b"definitely not xml", &source),
            Err(AppError::FeedParse(_))
        ));
    }
}
