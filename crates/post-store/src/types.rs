//! Cached record shapes.

use nostr_core::{AuthorProfile, Post};
use serde::{Deserialize, Serialize};

/// A post as stored, with its cache identity and write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPost {
    pub post: Post,
    pub cache_key: String,
    pub cached_at: i64,
    /// `d` tag, replaceable kinds only.
    pub identifier_tag: Option<String>,
}

impl CachedPost {
    pub fn new(post: Post, cached_at: i64) -> Self {
        Self {
            cache_key: post.cache_key(),
            identifier_tag: post.identifier().map(str::to_string),
            post,
            cached_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedProfile {
    pub author: String,
    pub profile: AuthorProfile,
    pub cached_at: i64,
}

/// Options for [`crate::LocalCache::get_by_authors`]. Empty `kinds` means any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheQuery {
    pub kinds: Vec<u16>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<usize>,
}

impl CacheQuery {
    pub fn matches(&self, post: &Post) -> bool {
        let ts = post.effective_timestamp();
        (self.kinds.is_empty() || self.kinds.contains(&post.kind))
            && self.since.is_none_or(|s| ts >= s)
            && self.until.is_none_or(|u| ts <= u)
    }
}

/// How many posts a live fetch for a query key returned, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMark {
    pub key: String,
    pub count: usize,
    pub cached_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub post_count: usize,
    pub profile_count: usize,
    pub oldest_cached_at: Option<i64>,
    pub newest_cached_at: Option<i64>,
}

/// Rows removed by one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub posts: usize,
    pub profiles: usize,
    pub marks: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.posts + self.profiles + self.marks
    }
}
