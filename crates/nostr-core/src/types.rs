//! Domain types shared by the relay gateway, the reconciler and the cache.

use nostr_sdk::Event;
use serde::{Deserialize, Serialize};

/// Author metadata (NIP-01 kind 0).
pub const KIND_METADATA: u16 = 0;
/// Short text note (NIP-01 kind 1).
pub const KIND_NOTE: u16 = 1;
/// Long-form article (NIP-23 kind 30023).
pub const KIND_ARTICLE: u16 = 30023;

/// Kinds in this range are replaceable per (author, kind, `d` tag).
pub fn is_addressable(kind: u16) -> bool {
    (30_000..40_000).contains(&kind)
}

/// A record as received from a relay, before reconciliation.
///
/// Tags keep their raw positional layout (`["d", "slug"]`, `["title", "..."]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u16,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub content: String,
}

impl RawRecord {
    /// First value of the first tag named `key`.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        first_tag_value(&self.tags, key)
    }

    /// `d` tag for addressable kinds.
    pub fn identifier(&self) -> Option<&str> {
        if is_addressable(self.kind) {
            self.tag_value("d")
        } else {
            None
        }
    }

    /// Author-declared publish time, if it parses.
    pub fn published_at(&self) -> Option<i64> {
        self.tag_value("published_at")
            .and_then(|v| v.trim().parse::<i64>().ok())
    }

    /// `published_at` if present, else `created_at`. Display ordering only.
    pub fn effective_timestamp(&self) -> i64 {
        self.published_at().unwrap_or(self.created_at)
    }
}

impl From<&Event> for RawRecord {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.to_hex(),
            pubkey: event.pubkey.to_hex(),
            created_at: event.created_at.as_secs() as i64,
            kind: event.kind.as_u16(),
            tags: event.tags.iter().map(|t| t.as_slice().to_vec()).collect(),
            content: event.content.clone(),
        }
    }
}

pub(crate) fn first_tag_value<'a>(tags: &'a [Vec<String>], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.first().map(String::as_str) == Some(key))
        .and_then(|t| t.get(1))
        .map(String::as_str)
}

/// A canonical, reconciled post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub kind: u16,
    pub author: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<i64>,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// NIP-19 reference (`naddr` for articles, `nevent` otherwise).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_ref: Option<String>,
    pub author_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_handle: Option<String>,
}

impl Post {
    pub fn effective_timestamp(&self) -> i64 {
        self.published_at.unwrap_or(self.created_at)
    }

    pub fn is_replaceable(&self) -> bool {
        is_addressable(self.kind)
    }

    /// `d` tag, present only for replaceable kinds.
    pub fn identifier(&self) -> Option<&str> {
        if self.is_replaceable() {
            first_tag_value(&self.tags, "d")
        } else {
            None
        }
    }

    /// `kind:author:d` for replaceable posts, the raw id otherwise.
    pub fn cache_key(&self) -> String {
        match self.identifier() {
            Some(d) => replaceable_key(self.kind, &self.author, d),
            None if self.is_replaceable() => replaceable_key(self.kind, &self.author, ""),
            None => self.id.clone(),
        }
    }
}

/// NIP-01 coordinate string for a replaceable identity.
pub fn replaceable_key(kind: u16, author: &str, identifier: &str) -> String {
    format!("{kind}:{author}:{identifier}")
}

/// Which kinds a feed query covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    #[default]
    All,
    LongForm,
    ShortForm,
}

impl ContentType {
    pub fn kinds(&self) -> Vec<u16> {
        match self {
            ContentType::All => vec![KIND_ARTICLE, KIND_NOTE],
            ContentType::LongForm => vec![KIND_ARTICLE],
            ContentType::ShortForm => vec![KIND_NOTE],
        }
    }

    pub fn accepts(&self, kind: u16) -> bool {
        match self {
            ContentType::All => true,
            ContentType::LongForm => kind == KIND_ARTICLE,
            ContentType::ShortForm => kind == KIND_NOTE,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentType::All => write!(f, "all"),
            ContentType::LongForm => write!(f, "long-form"),
            ContentType::ShortForm => write!(f, "short-form"),
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(ContentType::All),
            "long-form" => Ok(ContentType::LongForm),
            "short-form" => Ok(ContentType::ShortForm),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// Inclusive unix-seconds window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
}

impl DateRange {
    pub fn contains(&self, ts: i64) -> bool {
        self.since.is_none_or(|s| ts >= s) && self.until.is_none_or(|u| ts <= u)
    }

    pub fn is_empty(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }
}

/// A feed query: who, how many, what kinds, which window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostQuery {
    pub authors: Vec<String>,
    pub limit: usize,
    pub content_type: ContentType,
    pub date_range: Option<DateRange>,
}

impl PostQuery {
    pub fn new(authors: Vec<String>, limit: usize) -> Self {
        Self {
            authors,
            limit,
            content_type: ContentType::All,
            date_range: None,
        }
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn date_range(mut self, range: Option<DateRange>) -> Self {
        self.date_range = range.filter(|r| !r.is_empty());
        self
    }

    /// Stable identity of the query: sorted author set, content type, window.
    pub fn key(&self) -> String {
        let mut authors = self.authors.clone();
        authors.sort();
        authors.dedup();
        let range = self.date_range.unwrap_or_default();
        format!(
            "{}|{}|{}..{}",
            authors.join(","),
            self.content_type,
            range.since.map(|s| s.to_string()).unwrap_or_default(),
            range.until.map(|u| u.to_string()).unwrap_or_default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: u16, tags: Vec<Vec<&str>>) -> RawRecord {
        RawRecord {
            id: "id".into(),
            pubkey: "pk".into(),
            created_at: 100,
            kind,
            tags: tags
                .into_iter()
                .map(|t| t.into_iter().map(String::from).collect())
                .collect(),
            content: String::new(),
        }
    }

    #[test]
    fn first_tag_occurrence_wins() {
        let r = record(KIND_ARTICLE, vec![vec!["title", "one"], vec!["title", "two"]]);
        assert_eq!(r.tag_value("title"), Some("one"));
    }

    #[test]
    fn effective_timestamp_prefers_published_at() {
        let r = record(KIND_NOTE, vec![vec!["published_at", "42"]]);
        assert_eq!(r.effective_timestamp(), 42);
        let r = record(KIND_NOTE, vec![vec!["published_at", "soon"]]);
        assert_eq!(r.effective_timestamp(), 100);
    }

    #[test]
    fn identifier_only_for_addressable_kinds() {
        let r = record(KIND_NOTE, vec![vec!["d", "x"]]);
        assert_eq!(r.identifier(), None);
        let r = record(KIND_ARTICLE, vec![vec!["d", "x"]]);
        assert_eq!(r.identifier(), Some("x"));
    }

    #[test]
    fn cache_key_by_identity() {
        let post = |kind, tags: Vec<Vec<String>>| Post {
            id: "abc".into(),
            kind,
            author: "pk".into(),
            created_at: 1,
            published_at: None,
            content: String::new(),
            tags,
            title: None,
            summary: None,
            image: None,
            canonical_ref: None,
            author_name: String::new(),
            author_avatar: None,
            author_handle: None,
        };
        let d = vec![vec!["d".to_string(), "slug".to_string()]];
        assert_eq!(post(KIND_ARTICLE, d.clone()).cache_key(), "30023:pk:slug");
        assert_eq!(post(KIND_NOTE, d).cache_key(), "abc");
    }

    #[test]
    fn query_key_ignores_author_order() {
        let a = PostQuery::new(vec!["b".into(), "a".into()], 10);
        let b = PostQuery::new(vec!["a".into(), "b".into()], 20);
        assert_eq!(a.key(), b.key());
        let c = a.clone().content_type(ContentType::LongForm);
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn date_range_is_inclusive() {
        let range = DateRange {
            since: Some(10),
            until: Some(20),
        };
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(9));
        assert!(!range.contains(21));
    }
}
