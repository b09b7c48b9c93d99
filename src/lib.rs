//! nostr-blog: a cache-aware reader for Nostr articles and notes.
//!
//! [`feed::FeedOrchestrator`] ties the relay gateway, profile resolution and
//! reconciliation from `nostr-core` to the SQLite cache in `post-store`.

pub mod config;
pub mod display;
pub mod feed;

pub use config::{Config, LoggingConfig};
pub use feed::{FeedOrchestrator, FetchOutcome, FetchState, RefreshCallback, RefreshHandle};
