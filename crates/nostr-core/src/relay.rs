//! Relay access: a pluggable record source and the fan-out query gateway.

use async_trait::async_trait;
use futures_util::future::join_all;
use nostr_sdk::{Client, EventId, Filter, Kind, PublicKey, Timestamp};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{DateRange, PostQuery, RawRecord};

/// Fetch failed. Callers may retry; nothing here retries on its own.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("no relays to query")]
    NoRelays,
    #[error("invalid author key: {0}")]
    InvalidAuthor(String),
    #[error("invalid event id: {0}")]
    InvalidId(String),
    #[error("relay error: {0}")]
    Relay(String),
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

/// Relay-agnostic filter. Keys and ids are hex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub ids: Vec<String>,
    pub authors: Vec<String>,
    pub kinds: Vec<u16>,
    /// `#d` values.
    pub identifiers: Vec<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I: IntoIterator<Item = String>>(mut self, ids: I) -> Self {
        self.ids.extend(ids);
        self
    }

    pub fn authors<I: IntoIterator<Item = String>>(mut self, authors: I) -> Self {
        self.authors.extend(authors);
        self
    }

    pub fn kinds<I: IntoIterator<Item = u16>>(mut self, kinds: I) -> Self {
        self.kinds.extend(kinds);
        self
    }

    pub fn identifier(mut self, d: impl Into<String>) -> Self {
        self.identifiers.push(d.into());
        self
    }

    pub fn since(mut self, since: Option<i64>) -> Self {
        self.since = since;
        self
    }

    pub fn until(mut self, until: Option<i64>) -> Self {
        self.until = until;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Feed filter for a post query.
    pub fn for_query(query: &PostQuery) -> Self {
        let range = query.date_range.unwrap_or_default();
        Self::new()
            .authors(query.authors.iter().cloned())
            .kinds(query.content_type.kinds())
            .since(range.since)
            .until(range.until)
            .limit(query.limit)
    }

    fn date_range(&self) -> DateRange {
        DateRange {
            since: self.since,
            until: self.until,
        }
    }

    /// Relay-side semantics: `since`/`until` apply to `created_at`.
    pub fn matches(&self, record: &RawRecord) -> bool {
        (self.ids.is_empty() || self.ids.contains(&record.id))
            && (self.authors.is_empty() || self.authors.contains(&record.pubkey))
            && (self.kinds.is_empty() || self.kinds.contains(&record.kind))
            && (self.identifiers.is_empty()
                || record
                    .tag_value("d")
                    .is_some_and(|d| self.identifiers.iter().any(|i| i == d)))
            && self.date_range().contains(record.created_at)
    }

    /// Build the nostr-sdk filter. Fails on keys or ids that are not hex.
    pub fn to_filter(&self) -> Result<Filter, FetchError> {
        let mut filter = Filter::new();
        if !self.ids.is_empty() {
            let ids = self
                .ids
                .iter()
                .map(|id| EventId::from_hex(id).map_err(|_| FetchError::InvalidId(id.clone())))
                .collect::<Result<Vec<_>, _>>()?;
            filter = filter.ids(ids);
        }
        if !self.authors.is_empty() {
            let authors = self
                .authors
                .iter()
                .map(|a| PublicKey::from_hex(a).map_err(|_| FetchError::InvalidAuthor(a.clone())))
                .collect::<Result<Vec<_>, _>>()?;
            filter = filter.authors(authors);
        }
        if !self.kinds.is_empty() {
            filter = filter.kinds(self.kinds.iter().map(|k| Kind::from(*k)));
        }
        if !self.identifiers.is_empty() {
            filter = filter.identifiers(self.identifiers.clone());
        }
        if let Some(since) = self.since {
            filter = filter.since(Timestamp::from(since.max(0) as u64));
        }
        if let Some(until) = self.until {
            filter = filter.until(Timestamp::from(until.max(0) as u64));
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        Ok(filter)
    }
}

/// Anything that can answer a filter against a set of relays.
#[async_trait]
pub trait RelaySource: Send + Sync {
    async fn query(&self, relays: &[String], filter: &RecordFilter)
        -> Result<Vec<RawRecord>, FetchError>;
}

/// nostr-sdk backed source. Read-only: the client carries no signer.
pub struct NostrRelaySource {
    client: Client,
    timeout: Duration,
    added: Mutex<HashSet<String>>,
}

impl NostrRelaySource {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::default(),
            timeout,
            added: Mutex::new(HashSet::new()),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn ensure_relays(&self, relays: &[String]) -> Vec<String> {
        let mut usable = Vec::with_capacity(relays.len());
        let mut fresh = 0;
        for url in relays {
            if self.added.lock().contains(url) {
                usable.push(url.clone());
                continue;
            }
            match self.client.add_relay(url.as_str()).await {
                Ok(_) => {
                    self.added.lock().insert(url.clone());
                    usable.push(url.clone());
                    fresh += 1;
                }
                Err(e) => warn!(relay = %url, "Failed to add relay: {e}"),
            }
        }
        if fresh > 0 {
            self.client.connect().await;
            info!("Relay client connected to {fresh} new relay(s)");
        }
        usable
    }
}

#[async_trait]
impl RelaySource for NostrRelaySource {
    async fn query(
        &self,
        relays: &[String],
        filter: &RecordFilter,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let nostr_filter = filter.to_filter()?;
        let usable = self.ensure_relays(relays).await;
        if usable.is_empty() {
            return Err(FetchError::NoRelays);
        }

        let events = tokio::time::timeout(
            self.timeout + Duration::from_secs(1),
            self.client
                .fetch_events_from(usable.iter().map(String::as_str), nostr_filter, self.timeout),
        )
        .await
        .map_err(|_| FetchError::Timeout(self.timeout))?
        .map_err(|e| FetchError::Relay(e.to_string()))?;

        let mut seen = HashSet::new();
        let records: Vec<RawRecord> = events
            .into_iter()
            .filter(|e| seen.insert(e.id))
            .map(|e| RawRecord::from(&e))
            .collect();
        debug!(count = records.len(), relays = usable.len(), "fetched records");
        Ok(records)
    }
}

/// In-process source over a fixed record set. Applies [`RecordFilter::matches`]
/// and returns newest-first up to the limit, like a well-behaved relay.
#[derive(Default)]
pub struct MemoryRelaySource {
    records: Mutex<Vec<RawRecord>>,
    queries: Mutex<Vec<(Vec<String>, RecordFilter)>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryRelaySource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    pub fn push(&self, record: RawRecord) {
        self.records.lock().push(record);
    }

    /// Queries that mention `author` fail with a relay error.
    pub fn fail_author(&self, author: &str) {
        self.failing.lock().insert(author.to_string());
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }

    /// Every query seen so far, with the relays it was sent to.
    pub fn queries(&self) -> Vec<(Vec<String>, RecordFilter)> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl RelaySource for MemoryRelaySource {
    async fn query(
        &self,
        relays: &[String],
        filter: &RecordFilter,
    ) -> Result<Vec<RawRecord>, FetchError> {
        self.queries.lock().push((relays.to_vec(), filter.clone()));
        if relays.is_empty() {
            return Err(FetchError::NoRelays);
        }
        if let Some(author) = filter
            .authors
            .iter()
            .find(|a| self.failing.lock().contains(*a))
        {
            return Err(FetchError::Relay(format!("unreachable for {author}")));
        }
        let mut out: Vec<RawRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}

/// Fans a filter out over the configured relays.
#[derive(Clone)]
pub struct RelayQueryGateway {
    source: Arc<dyn RelaySource>,
    relays: Vec<String>,
}

impl RelayQueryGateway {
    pub fn new(source: Arc<dyn RelaySource>, relays: Vec<String>) -> Self {
        Self { source, relays }
    }

    pub fn relays(&self) -> &[String] {
        &self.relays
    }

    pub fn source(&self) -> Arc<dyn RelaySource> {
        Arc::clone(&self.source)
    }

    /// Relay hints from a reference win over the configured set for that lookup.
    pub fn relays_for(&self, hints: &[String]) -> Vec<String> {
        if hints.is_empty() {
            self.relays.clone()
        } else {
            hints.to_vec()
        }
    }

    /// Query `relays`. With several authors, each gets its own sub-query
    /// limited to `ceil(limit / authors)` so no single author fills the window.
    /// Records outside `[since, until]` by effective timestamp are dropped.
    pub async fn query(
        &self,
        relays: &[String],
        filter: &RecordFilter,
    ) -> Result<Vec<RawRecord>, FetchError> {
        if relays.is_empty() {
            return Err(FetchError::NoRelays);
        }

        let records = if filter.authors.len() > 1 {
            let per_author = filter.limit.map(|l| l.div_ceil(filter.authors.len()));
            let branches = filter.authors.iter().map(|author| {
                let mut sub = filter.clone();
                sub.authors = vec![author.clone()];
                sub.limit = per_author;
                async move { (author, self.source.query(relays, &sub).await) }
            });

            let mut merged = Vec::new();
            let mut first_err = None;
            let mut succeeded = 0usize;
            for (author, result) in join_all(branches).await {
                match result {
                    Ok(records) => {
                        succeeded += 1;
                        merged.extend(records);
                    }
                    Err(e) => {
                        warn!(author = %author, "author query failed: {e}");
                        first_err.get_or_insert(e);
                    }
                }
            }
            match first_err {
                Some(e) if succeeded == 0 => return Err(e),
                _ => merged,
            }
        } else {
            self.source.query(relays, filter).await?
        };

        let range = filter.date_range();
        if range.is_empty() {
            return Ok(records);
        }
        let before = records.len();
        let kept: Vec<RawRecord> = records
            .into_iter()
            .filter(|r| {
                let keep = range.contains(r.effective_timestamp());
                if !keep {
                    debug!(id = %r.id, ts = r.effective_timestamp(), "dropping record outside date range");
                }
                keep
            })
            .collect();
        if kept.len() < before {
            debug!(dropped = before - kept.len(), "client-side date filter");
        }
        Ok(kept)
    }

    /// Feed query against the configured relays.
    pub async fn query_posts(&self, query: &PostQuery) -> Result<Vec<RawRecord>, FetchError> {
        self.query(&self.relays, &RecordFilter::for_query(query)).await
    }

    /// Newest version of an addressable record.
    pub async fn fetch_by_address(
        &self,
        relays: &[String],
        kind: u16,
        author: &str,
        identifier: &str,
    ) -> Result<Option<RawRecord>, FetchError> {
        let filter = RecordFilter::new()
            .kinds([kind])
            .authors([author.to_string()])
            .identifier(identifier);
        let records = self.source.query(relays, &filter).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.tag_value("d") == Some(identifier))
            .reduce(|best, r| if r.created_at > best.created_at { r } else { best }))
    }

    pub async fn fetch_by_id(
        &self,
        relays: &[String],
        id: &str,
        author: Option<&str>,
    ) -> Result<Option<RawRecord>, FetchError> {
        let filter = RecordFilter::new()
            .ids([id.to_string()])
            .authors(author.map(str::to_string))
            .limit(1);
        let records = self.source.query(relays, &filter).await?;
        Ok(records.into_iter().find(|r| r.id == id))
    }
}
