use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub ranking: RankingConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
}

/// One feed the ingestion pipeline pulls from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
}

impl SourceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            category: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_true")]
    pub run_on_start: bool,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_embed_workers")]
    pub embed_workers: usize,
    #[serde(default = "default_backfill_limit")]
    pub backfill_limit: usize,
    /// Articles published more than this many days ago are purged before
    /// each run. `0` keeps everything.
    #[serde(default)]
    pub retention_days: u32,
    #[serde(default = "default_manual_trigger_timeout_secs")]
    pub manual_trigger_timeout_secs: u64,
}

impl IngestionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn manual_trigger_timeout(&self) -> Duration {
        Duration::from_secs(self.manual_trigger_timeout_secs)
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            run_on_start: true,
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetch_concurrency: default_fetch_concurrency(),
            embed_workers: default_embed_workers(),
            backfill_limit: default_backfill_limit(),
            retention_days: 0,
            manual_trigger_timeout_secs: default_manual_trigger_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Only articles published within this many hours are scored.
    #[serde(default = "default_candidate_window_hours")]
    pub candidate_window_hours: u64,
    /// Hard cap on how many candidates one ranking pass scores.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    /// Multiplier applied to articles the user already viewed or clicked.
    #[serde(default = "default_seen_penalty")]
    pub seen_penalty: f32,
    #[serde(default = "default_feedback_window_hours")]
    pub feedback_window_hours: u64,
    #[serde(default = "default_dismiss_cooldown_hours")]
    pub dismiss_cooldown_hours: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl RankingConfig {
    pub fn candidate_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.candidate_window_hours as i64)
    }

    pub fn feedback_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.feedback_window_hours as i64)
    }

    pub fn dismiss_cooldown(&self) -> chrono::Duration {
        chrono::Duration::hours(self.dismiss_cooldown_hours as i64)
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            candidate_window_hours: default_candidate_window_hours(),
            candidate_limit: default_candidate_limit(),
            seen_penalty: default_seen_penalty(),
            feedback_window_hours: default_feedback_window_hours(),
            dismiss_cooldown_hours: default_dismiss_cooldown_hours(),
            max_results: default_max_results(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// `hashing` (offline, default) or `http` (OpenAI-compatible endpoint).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            endpoint: None,
            api_key: None,
            timeout_secs: default_embed_timeout_secs(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("newsrank");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("news.db").to_string_lossy().to_string()
}

fn default_true() -> bool {
    true
}

fn default_interval_minutes() -> u64 {
    120
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_fetch_concurrency() -> usize {
    5
}

fn default_embed_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_backfill_limit() -> usize {
    500
}

fn default_manual_trigger_timeout_secs() -> u64 {
    600
}

fn default_candidate_window_hours() -> u64 {
    72
}

fn default_candidate_limit() -> usize {
    200
}

fn default_seen_penalty() -> f32 {
    0.3
}

fn default_feedback_window_hours() -> u64 {
    168
}

fn default_dismiss_cooldown_hours() -> u64 {
    168
}

fn default_max_results() -> usize {
    100
}

fn default_provider() -> String {
    "hashing".to_string()
}

fn default_embed_timeout_secs() -> u64 {
    30
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_sources() -> Vec<SourceConfig> {
    [
        ("BBC News", "http://feeds.bbci.co.uk/news/rss.xml"),
        ("NPR", "https://feeds.npr.org/1001/rss.xml"),
        ("The Guardian", "https://www.theguardian.com/world/rss"),
        ("The Guardian US", "https://www.theguardian.com/world/usa/rss"),
        (
            "New York Times World",
            "https://rss.nytimes.com/services/xml/rss/nyt/World.xml",
        ),
        ("CNN World", "http://rss.cnn.com/rss/edition_world.rss"),
        (
            "ABC News International",
            "https://abcnews.go.com/abcnews/internationalheadlines",
        ),
        ("South China Morning Post", "https://www.scmp.com/rss/91/feed"),
    ]
    .into_iter()
    .map(|(name, url)| SourceConfig::new(name, url))
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            ingestion: IngestionConfig::default(),
            ranking: RankingConfig::default(),
            embedding: EmbeddingConfig::default(),
            sources: default_sources(),
        }
    }
}

impl Config {
    /// Loads the config at `path`, or the default location. A missing file
    /// is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("newsrank")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingestion.interval_minutes == 0 {
            return Err(AppError::Config(
                "ingestion.interval_minutes must be > 0".to_string(),
            ));
        }
        if self.ingestion.fetch_concurrency == 0 || self.ingestion.embed_workers == 0 {
            return Err(AppError::Config(
                "ingestion.fetch_concurrency and ingestion.embed_workers must be > 0".to_string(),
            ));
        }
        let zero_durations = [
            ("ingestion.fetch_timeout_secs", self.ingestion.fetch_timeout_secs),
            (
                "ingestion.manual_trigger_timeout_secs",
                self.ingestion.manual_trigger_timeout_secs,
            ),
            ("embedding.timeout_secs", self.embedding.timeout_secs),
            ("ranking.candidate_window_hours", self.ranking.candidate_window_hours),
        ];
        if let Some((key, _)) = zero_durations.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Config(format!("{} must be > 0", key)));
        }
        if !(self.ranking.seen_penalty > 0.0 && self.ranking.seen_penalty <= 1.0) {
            return Err(AppError::Config(
                "ranking.seen_penalty must be in (0.0, 1.0]".to_string(),
            ));
        }
        if self.ranking.candidate_limit == 0 || self.ranking.max_results == 0 {
            return Err(AppError::Config(
                "ranking.candidate_limit and ranking.max_results must be > 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "source with url '{}' has an empty name",
                    source.url
                )));
            }
            if !seen.insert(source.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
        }

        match self.embedding.provider.as_str() {
            "hashing" => {}
            "http" => {
                if self.embedding.endpoint.is_none() || self.embedding.model.is_none() {
                    return Err(AppError::Config(
                        "embedding.endpoint and embedding.model are required for the http provider"
                            .to_string(),
                    ));
                }
            }
            other => {
                return Err(AppError::Config(format!(
                    "unknown embedding provider '{}', expected hashing or http",
                    other
                )))
            }
        }

        Ok(())
    }
}
