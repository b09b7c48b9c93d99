//! Raw records to canonical posts.
//!
//! Replaceable records collapse to the version with the greatest `created_at`
//! per (author, kind, `d`). Publish dates only order the output; they never
//! decide which version wins.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::codec::{self, AddressPointer, EventPointer, Pointer};
use crate::profiles::AuthorProfile;
use crate::types::{first_tag_value, is_addressable, Post, RawRecord, KIND_METADATA};

const TITLE_CHARS: usize = 50;
const SUMMARY_CHARS: usize = 200;
const ELLIPSIS: &str = "...";
const UNTITLED: &str = "Untitled Post";

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)https?://\S+").unwrap());
static REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(nostr:)?(naddr1|note1|npub1|nevent1|nprofile1|nrelay1)\S+").unwrap()
});
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#[ \t]+(.+)$").unwrap());

/// Builds posts from raw records. Relay hints are embedded in canonical refs.
#[derive(Debug, Clone, Default)]
pub struct EventReconciler {
    relay_hints: Vec<String>,
}

impl EventReconciler {
    pub fn new(relay_hints: Vec<String>) -> Self {
        Self { relay_hints }
    }

    /// Deduplicate replaceable records, convert, and sort newest first by
    /// effective timestamp. Equal timestamps keep input order.
    pub fn reconcile(
        &self,
        records: Vec<RawRecord>,
        profiles: &HashMap<String, AuthorProfile>,
    ) -> Vec<Post> {
        let total = records.len();

        // Index of the winning record per replaceable identity.
        let mut winners: HashMap<(String, u16, String), usize> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            if !is_addressable(record.kind) {
                continue;
            }
            let Some(d) = record.identifier() else {
                debug!(id = %record.id, "dropping replaceable record without d tag");
                continue;
            };
            let key = (record.pubkey.clone(), record.kind, d.to_string());
            let newer = winners
                .get(&key)
                .is_none_or(|&best| record.created_at > records[best].created_at);
            if newer {
                winners.insert(key, idx);
            } else {
                debug!(id = %record.id, "skipping older version");
            }
        }

        let mut posts: Vec<Post> = records
            .iter()
            .enumerate()
            .filter(|(idx, record)| {
                if record.kind == KIND_METADATA {
                    return false;
                }
                if !is_addressable(record.kind) {
                    return true;
                }
                record.identifier().is_some_and(|d| {
                    winners.get(&(record.pubkey.clone(), record.kind, d.to_string())) == Some(idx)
                })
            })
            .map(|(_, record)| self.to_post(record, profiles.get(&record.pubkey)))
            .collect();

        posts.sort_by(|a, b| b.effective_timestamp().cmp(&a.effective_timestamp()));
        debug!(records = total, posts = posts.len(), "reconciled");
        posts
    }

    /// Convert one record. No deduplication.
    pub fn to_post(&self, record: &RawRecord, profile: Option<&AuthorProfile>) -> Post {
        let tag = |key: &str| first_tag_value(&record.tags, key).map(str::to_string);

        let title = tag("title")
            .filter(|t| !t.trim().is_empty())
            .or_else(|| derive_title(record.kind, &record.content));
        let summary = tag("summary")
            .filter(|s| !s.trim().is_empty())
            .or_else(|| derive_summary(&record.content));

        let (author_name, author_avatar, author_handle) = match profile {
            Some(p) => (p.display_name().to_string(), p.picture.clone(), p.handle.clone()),
            None => (fallback_name(&record.pubkey), None, None),
        };

        Post {
            id: record.id.clone(),
            kind: record.kind,
            author: record.pubkey.clone(),
            created_at: record.created_at,
            published_at: record.published_at(),
            content: record.content.clone(),
            tags: record.tags.clone(),
            title,
            summary,
            image: tag("image"),
            canonical_ref: self.canonical_ref(record),
            author_name,
            author_avatar,
            author_handle,
        }
    }

    fn canonical_ref(&self, record: &RawRecord) -> Option<String> {
        let relays = self.relay_hints.clone();
        let pointer = match record.identifier() {
            Some(d) => Pointer::Address(AddressPointer {
                kind: record.kind,
                author: record.pubkey.clone(),
                identifier: d.to_string(),
                relays,
            }),
            None => Pointer::Event(EventPointer {
                id: record.id.clone(),
                author: Some(record.pubkey.clone()),
                kind: None,
                relays,
            }),
        };
        match codec::encode(&pointer) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!(id = %record.id, "Failed to encode reference: {e}");
                None
            }
        }
    }
}

/// First markdown heading for replaceable kinds, first line otherwise.
pub fn derive_title(kind: u16, content: &str) -> Option<String> {
    if is_addressable(kind) {
        let heading = HEADING_RE
            .captures(content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|h| !h.is_empty());
        return Some(heading.unwrap_or_else(|| UNTITLED.to_string()));
    }
    let first_line = content.lines().next().unwrap_or_default();
    if first_line.is_empty() {
        return None;
    }
    Some(truncate(first_line, TITLE_CHARS))
}

/// Content with links and nostr references removed, whitespace collapsed.
pub fn derive_summary(content: &str) -> Option<String> {
    let cleaned = URL_RE.replace_all(content, "");
    let cleaned = REF_RE.replace_all(&cleaned, "");
    let cleaned = WS_RE.replace_all(&cleaned, " ");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(truncate(cleaned, SUMMARY_CHARS))
    }
}

/// Shortened key shown when an author has no profile.
pub fn fallback_name(author: &str) -> String {
    let short: String = author.chars().take(8).collect();
    format!("{short}{ELLIPSIS}")
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &s[..cut]),
        None => s.to_string(),
    }
}
