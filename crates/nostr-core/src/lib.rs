//! Nostr read path for nostr-blog
//!
//! Reference codec (NIP-19), relay fan-out queries, author profile
//! resolution, and reconciliation of raw events into canonical posts.

pub mod codec;
pub mod profiles;
pub mod reconcile;
pub mod relay;
pub mod types;

pub use codec::{
    decode, encode, is_hex_id, normalize_author, AddressPointer, DecodeError, EventPointer,
    Pointer, ProfilePointer, MAX_RELAY_HINTS,
};
pub use profiles::{AuthorProfile, ProfileResolver, ProfileStore};
pub use reconcile::{derive_summary, derive_title, fallback_name, EventReconciler};
pub use relay::{
    FetchError, MemoryRelaySource, NostrRelaySource, RecordFilter, RelayQueryGateway, RelaySource,
};
pub use types::{
    is_addressable, replaceable_key, ContentType, DateRange, Post, PostQuery, RawRecord,
    KIND_ARTICLE, KIND_METADATA, KIND_NOTE,
};

// Re-export nostr-sdk for convenience
pub use nostr_sdk;
