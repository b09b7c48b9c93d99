//! Cache configuration.

use serde::{Deserialize, Serialize};

/// Local cache settings, the `[cache]` table of the app config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Post freshness window.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_profile_ttl_seconds")]
    pub profile_ttl_seconds: u64,
    /// Newest posts kept per author; 0 disables the cap.
    #[serde(default = "default_max_posts_per_author")]
    pub max_posts_per_author: usize,
    #[serde(default = "default_true")]
    pub background_refresh: bool,
    /// Database file. `~` is expanded by the caller.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_true() -> bool {
    true
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_profile_ttl_seconds() -> u64 {
    86400
}

fn default_max_posts_per_author() -> usize {
    100
}

fn default_db_path() -> String {
    "~/.nostr-blog/cache.db".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            ttl_seconds: default_ttl_seconds(),
            profile_ttl_seconds: default_profile_ttl_seconds(),
            max_posts_per_author: default_max_posts_per_author(),
            background_refresh: default_true(),
            db_path: default_db_path(),
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}
