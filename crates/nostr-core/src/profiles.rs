//! Author metadata (kind 0) resolution with an expiring in-process memo.

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::relay::{RecordFilter, RelaySource};
use crate::types::KIND_METADATA;

const DEFAULT_MEMO_SIZE: usize = 1000;
const ANONYMOUS: &str = "Anonymous";
// Upper bound keeps `now + ttl` inside chrono's range.
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3600;

/// Kind-0 author metadata. `handle` is the NIP-05 identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, rename = "nip05", skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
}

impl AuthorProfile {
    pub fn from_content(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Priority: display_name > name > "Anonymous".
    pub fn display_name(&self) -> &str {
        [&self.display_name, &self.name]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or(ANONYMOUS)
    }
}

/// Persistent backing for resolved profiles. Implementations swallow their
/// own storage errors; a miss is always acceptable.
pub trait ProfileStore: Send + Sync {
    /// Fresh profiles for the given authors. Absent or stale authors are omitted.
    fn load_profiles(&self, authors: &[String]) -> HashMap<String, AuthorProfile>;
    fn store_profiles(&self, profiles: &HashMap<String, AuthorProfile>);
}

#[derive(Debug, Clone)]
struct MemoEntry {
    profile: AuthorProfile,
    expires_at: DateTime<Utc>,
}

/// Resolves author metadata: memo, then store, then relays.
///
/// Owned by whoever drives fetching; the memo lives as long as the resolver.
/// Concurrent calls for the same unresolved author may both hit the network.
pub struct ProfileResolver {
    source: Arc<dyn RelaySource>,
    store: Option<Arc<dyn ProfileStore>>,
    memo: Mutex<LruCache<String, MemoEntry>>,
    ttl: Duration,
}

impl ProfileResolver {
    pub fn new(source: Arc<dyn RelaySource>, ttl_secs: u64) -> Self {
        Self::with_capacity(source, ttl_secs, DEFAULT_MEMO_SIZE)
    }

    pub fn with_capacity(source: Arc<dyn RelaySource>, ttl_secs: u64, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            source,
            store: None,
            memo: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Memoized profile, if still fresh.
    pub fn get(&self, author: &str) -> Option<AuthorProfile> {
        let mut memo = self.memo.lock();
        match memo.get(author) {
            Some(entry) if Utc::now() < entry.expires_at => Some(entry.profile.clone()),
            Some(_) => {
                memo.pop(author);
                None
            }
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.memo.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.lock().is_empty()
    }

    pub fn clear(&self) {
        self.memo.lock().clear();
    }

    fn remember(&self, author: &str, profile: AuthorProfile) {
        self.memo.lock().put(
            author.to_string(),
            MemoEntry {
                profile,
                expires_at: Utc::now() + self.ttl,
            },
        );
    }

    /// Resolve every author it can. Authors with no parsable metadata are
    /// absent from the result; a relay failure only loses the missing ones.
    pub async fn resolve(
        &self,
        relays: &[String],
        authors: &[String],
    ) -> HashMap<String, AuthorProfile> {
        let mut resolved = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        for author in authors {
            if resolved.contains_key(author) || missing.contains(author) {
                continue;
            }
            match self.get(author) {
                Some(profile) => {
                    resolved.insert(author.clone(), profile);
                }
                None => missing.push(author.clone()),
            }
        }

        if !missing.is_empty() {
            if let Some(store) = &self.store {
                let stored = store.load_profiles(&missing);
                for (author, profile) in stored {
                    self.remember(&author, profile.clone());
                    resolved.insert(author, profile);
                }
                missing.retain(|a| !resolved.contains_key(a));
            }
        }

        if missing.is_empty() {
            return resolved;
        }

        let filter = RecordFilter::new()
            .authors(missing.iter().cloned())
            .kinds([KIND_METADATA]);
        let records = match self.source.query(relays, &filter).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to fetch profiles for {} author(s): {e}", missing.len());
                return resolved;
            }
        };

        let mut newest: HashMap<String, (i64, AuthorProfile)> = HashMap::new();
        for record in records {
            if record.kind != KIND_METADATA || !missing.contains(&record.pubkey) {
                continue;
            }
            let profile = match AuthorProfile::from_content(&record.content) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Failed to parse profile for {}: {e}", record.pubkey);
                    continue;
                }
            };
            let newer = newest
                .get(&record.pubkey)
                .is_none_or(|(ts, _)| record.created_at > *ts);
            if newer {
                newest.insert(record.pubkey.clone(), (record.created_at, profile));
            }
        }

        let fetched: HashMap<String, AuthorProfile> =
            newest.into_iter().map(|(k, (_, p))| (k, p)).collect();
        debug!(
            requested = missing.len(),
            found = fetched.len(),
            "resolved profiles from relays"
        );
        if let Some(store) = &self.store {
            if !fetched.is_empty() {
                store.store_profiles(&fetched);
            }
        }
        for (author, profile) in fetched {
            self.remember(&author, profile.clone());
            resolved.insert(author, profile);
        }
        resolved
    }
}
