//! Local storage for nostr-blog.
//!
//! A SQLite cache of reconciled posts and author profiles with per-row TTL
//! freshness, the related-post ranker, and the read history it consults.

pub mod cache;
pub mod config;
pub mod history;
pub mod ranking;
pub mod types;

pub use cache::LocalCache;
pub use config::CacheConfig;
pub use history::{ReadHistory, MAX_READ_HISTORY};
pub use ranking::RelatedRanker;
pub use types::{CacheQuery, CacheStats, CachedPost, CachedProfile, QueryMark, SweepReport};
