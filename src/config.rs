use anyhow::{Context, Result};
use nostr_core::{normalize_author, ContentType, DateRange, PostQuery};
use post_store::CacheConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Author keys, hex or npub.
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,
    #[serde(default = "default_posts_per_page")]
    pub posts_per_page: usize,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default = "default_related_posts_count")]
    pub related_posts_count: usize,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    /// Show only this author's posts (hex or npub).
    #[serde(default)]
    pub selected_author: Option<String>,
    #[serde(default = "default_history_path")]
    pub history_path: String,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            authors: Vec::new(),
            relays: default_relays(),
            posts_per_page: default_posts_per_page(),
            content_type: ContentType::default(),
            related_posts_count: default_related_posts_count(),
            query_timeout_secs: default_query_timeout_secs(),
            date_range: None,
            selected_author: None,
            history_path: default_history_path(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_relays() -> Vec<String> {
    vec![
        "wss://relay.damus.io".to_string(),
        "wss://nos.lol".to_string(),
    ]
}

fn default_posts_per_page() -> usize {
    10
}

fn default_related_posts_count() -> usize {
    3
}

fn default_query_timeout_secs() -> u64 {
    10
}

fn default_history_path() -> String {
    "~/.nostr-blog/history.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        let content = fs::read_to_string(expanded_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).with_context(|| "Failed to parse TOML config")?;
        config.expand_paths();
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.authors.iter().all(|a| a.trim().is_empty()) {
            anyhow::bail!("At least one author key is required");
        }

        if self.relays.is_empty() {
            anyhow::bail!("At least one relay URL is required");
        }
        for relay in &self.relays {
            if !relay.starts_with("wss://") && !relay.starts_with("ws://") {
                anyhow::bail!("Relay URL must start with ws:// or wss://: {}", relay);
            }
        }

        if self.posts_per_page == 0 {
            anyhow::bail!("posts_per_page must be greater than zero");
        }
        if self.related_posts_count == 0 {
            anyhow::bail!("related_posts_count must be greater than zero");
        }

        if let Some(DateRange {
            since: Some(since),
            until: Some(until),
        }) = self.date_range
        {
            if since > until {
                anyhow::bail!("date_range.since ({since}) is after date_range.until ({until})");
            }
        }

        Ok(())
    }

    pub fn expand_paths(&mut self) {
        self.cache.db_path = shellexpand::tilde(&self.cache.db_path).to_string();
        self.history_path = shellexpand::tilde(&self.history_path).to_string();
    }

    /// Hex author keys, deduplicated, in config order.
    pub fn author_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::with_capacity(self.authors.len());
        for author in self.authors.iter().filter(|a| !a.trim().is_empty()) {
            let key = normalize_author(author);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// The feed query this config describes.
    pub fn feed_query(&self) -> PostQuery {
        PostQuery::new(self.author_keys(), self.posts_per_page)
            .content_type(self.content_type)
            .date_range(self.date_range)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.cache.db_path)
    }

    pub fn history_path(&self) -> PathBuf {
        PathBuf::from(&self.history_path)
    }
}
