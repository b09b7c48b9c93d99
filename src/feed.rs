//! Cache-aware feed fetching: stale-while-revalidate reads, background
//! refresh, and duplicate-free pagination.
//!
//! Every foreground `fetch_with_cache` and every `refresh_in_background`
//! takes a new generation number. A background refresh that finishes after a
//! newer generation started drops its result: no cache write, no callback.

use anyhow::{Context, Result};
use nostr_core::{
    decode, is_hex_id, normalize_author, EventReconciler, Pointer, Post, PostQuery,
    ProfileResolver, ProfileStore, RawRecord, RelayQueryGateway, RelaySource,
};
use parking_lot::Mutex;
use post_store::{CacheQuery, LocalCache};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-query-key lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchState {
    #[default]
    Idle,
    Fetching,
    ServedFresh,
    ServedStaleRefreshing,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub posts: Vec<Post>,
    pub from_cache: bool,
}

/// Receives the posts of a completed background refresh.
pub type RefreshCallback = Box<dyn FnOnce(Vec<Post>) + Send + 'static>;

/// A running background refresh.
pub struct RefreshHandle {
    generation: u64,
    task: JoinHandle<bool>,
}

impl RefreshHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// True if the refresh completed and its result was applied.
    pub async fn join(self) -> bool {
        self.task.await.unwrap_or(false)
    }
}

struct Inner {
    gateway: RelayQueryGateway,
    profiles: ProfileResolver,
    reconciler: EventReconciler,
    cache: Arc<LocalCache>,
    generation: AtomicU64,
    exhausted: Mutex<HashSet<String>>,
    states: Mutex<HashMap<String, FetchState>>,
    selected_author: Mutex<Option<String>>,
}

/// Feed orchestrator. Cheap to clone; clones share caches and state.
#[derive(Clone)]
pub struct FeedOrchestrator {
    inner: Arc<Inner>,
}

impl FeedOrchestrator {
    pub fn new(source: Arc<dyn RelaySource>, relays: Vec<String>, cache: Arc<LocalCache>) -> Self {
        let store: Arc<dyn ProfileStore> = cache.clone();
        let profiles = ProfileResolver::new(Arc::clone(&source), cache.config().profile_ttl_seconds)
            .with_store(store);
        Self {
            inner: Arc::new(Inner {
                reconciler: EventReconciler::new(relays.clone()),
                gateway: RelayQueryGateway::new(source, relays),
                profiles,
                cache,
                generation: AtomicU64::new(0),
                exhausted: Mutex::new(HashSet::new()),
                states: Mutex::new(HashMap::new()),
                selected_author: Mutex::new(None),
            }),
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.inner.cache
    }

    pub fn gateway(&self) -> &RelayQueryGateway {
        &self.inner.gateway
    }

    pub fn profiles(&self) -> &ProfileResolver {
        &self.inner.profiles
    }

    /// Show only posts by this author. Applied after fetching; the cache
    /// still holds every author's posts.
    pub fn set_selected_author(&self, author: Option<&str>) {
        *self.inner.selected_author.lock() = author.map(normalize_author);
    }

    pub fn state(&self, query: &PostQuery) -> FetchState {
        let key = normalized(query).key();
        self.inner.states.lock().get(&key).copied().unwrap_or_default()
    }

    /// False once a page for this query came back short.
    pub fn has_more(&self, query: &PostQuery) -> bool {
        !self.inner.exhausted.lock().contains(&normalized(query).key())
    }

    pub fn current_generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Live fetch. The cache is neither read nor written.
    pub async fn fetch_posts(&self, query: &PostQuery) -> Result<Vec<Post>> {
        let posts = self.inner.live_fetch(&normalized(query)).await?;
        Ok(self.inner.select(posts))
    }

    /// Serve from cache when it covers the query, otherwise fetch live and
    /// cache the result.
    pub async fn fetch_with_cache(&self, query: &PostQuery) -> Result<FetchOutcome> {
        let query = normalized(query);
        let key = query.key();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.exhausted.lock().remove(&key);
        self.inner.set_state(&key, FetchState::Fetching);

        if let Some(cached) = self.inner.cached_answer(&query) {
            debug!(key = %key, count = cached.len(), "serving feed from cache");
            if cached.len() < query.limit {
                self.inner.exhausted.lock().insert(key.clone());
            }
            self.inner.set_state(&key, FetchState::ServedFresh);
            return Ok(FetchOutcome {
                posts: self.inner.select(cached),
                from_cache: true,
            });
        }

        let posts = match self.inner.live_fetch(&query).await {
            Ok(posts) => posts,
            Err(e) => {
                self.inner.set_state(&key, FetchState::Failed);
                return Err(e);
            }
        };
        self.inner.store(&key, &posts);
        if posts.len() < query.limit {
            self.inner.exhausted.lock().insert(key.clone());
        }
        self.inner.set_state(&key, FetchState::ServedFresh);
        info!(key = %key, count = posts.len(), "fetched feed from relays");
        Ok(FetchOutcome {
            posts: self.inner.select(posts),
            from_cache: false,
        })
    }

    /// Re-fetch `query` without blocking the caller. `on_complete` gets the
    /// fresh posts unless a newer fetch started in the meantime.
    ///
    /// Returns `None` when the cache or background refresh is disabled.
    pub fn refresh_in_background(
        &self,
        query: &PostQuery,
        on_complete: RefreshCallback,
    ) -> Option<RefreshHandle> {
        if !self.inner.cache.is_enabled() || !self.inner.cache.config().background_refresh {
            return None;
        }
        let query = normalized(query);
        let key = query.key();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.set_state(&key, FetchState::ServedStaleRefreshing);

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let result = inner.live_fetch(&query).await;
            if inner.generation.load(Ordering::SeqCst) != generation {
                debug!(key = %key, generation, "discarding superseded refresh");
                let mut states = inner.states.lock();
                if states.get(&key) == Some(&FetchState::ServedStaleRefreshing) {
                    states.insert(key, FetchState::ServedFresh);
                }
                return false;
            }
            match result {
                Ok(posts) => {
                    inner.store(&key, &posts);
                    inner.set_state(&key, FetchState::ServedFresh);
                    debug!(key = %key, count = posts.len(), "background refresh complete");
                    on_complete(inner.select(posts));
                    true
                }
                Err(e) => {
                    warn!(key = %key, "Background refresh failed: {e:#}");
                    inner.set_state(&key, FetchState::Failed);
                    false
                }
            }
        });
        Some(RefreshHandle { generation, task })
    }

    /// Fetch the page before the oldest held post and append posts not
    /// already held. Returns how many were appended.
    pub async fn load_more(&self, query: &PostQuery, held: &mut Vec<Post>) -> Result<usize> {
        let query = normalized(query);
        let key = query.key();
        if self.inner.exhausted.lock().contains(&key) {
            return Ok(0);
        }
        let Some(oldest) = held.iter().map(Post::effective_timestamp).min() else {
            return Ok(0);
        };

        let mut range = query.date_range.unwrap_or_default();
        let until = oldest - 1;
        range.until = Some(range.until.map_or(until, |u| u.min(until)));
        let page = query.clone().date_range(Some(range));

        let posts = self.inner.live_fetch(&page).await?;
        if posts.len() < query.limit {
            self.inner.exhausted.lock().insert(key.clone());
        }
        self.inner.save_posts(&posts);

        let mut seen: HashSet<String> = held.iter().map(|p| p.id.clone()).collect();
        let before = held.len();
        for post in self.inner.select(posts) {
            if seen.insert(post.id.clone()) {
                held.push(post);
            }
        }
        let appended = held.len() - before;
        debug!(key = %key, until, appended, "loaded more posts");
        Ok(appended)
    }

    /// Look up one post by NIP-19 reference or hex id, cache first.
    /// Undecodable references and author references resolve to `None`.
    pub async fn fetch_post_by_id(&self, reference: &str) -> Result<Option<Post>> {
        let reference = reference.trim();
        let pointer = if is_hex_id(reference) {
            Pointer::Id(reference.to_lowercase())
        } else {
            match decode(reference) {
                Ok(pointer) => pointer,
                Err(e) => {
                    warn!("Cannot decode reference {reference}: {e}");
                    return Ok(None);
                }
            }
        };

        let inner = &self.inner;
        let record = match &pointer {
            Pointer::Address(a) => {
                match inner
                    .cache
                    .get_by_replaceable_identity(a.kind, &a.author, &a.identifier)
                {
                    Ok(Some(cached)) => return Ok(Some(cached.post)),
                    Ok(None) => {}
                    Err(e) => warn!("Cache lookup failed: {e}"),
                }
                let relays = inner.gateway.relays_for(&a.relays);
                inner
                    .gateway
                    .fetch_by_address(&relays, a.kind, &a.author, &a.identifier)
                    .await
                    .context("Failed to fetch post by address")?
            }
            Pointer::Event(e) => {
                if let Some(post) = inner.cached_by_id(&e.id) {
                    return Ok(Some(post));
                }
                let relays = inner.gateway.relays_for(&e.relays);
                inner
                    .gateway
                    .fetch_by_id(&relays, &e.id, e.author.as_deref())
                    .await
                    .context("Failed to fetch post by id")?
            }
            Pointer::Id(id) => {
                if let Some(post) = inner.cached_by_id(id) {
                    return Ok(Some(post));
                }
                inner
                    .gateway
                    .fetch_by_id(inner.gateway.relays(), id, None)
                    .await
                    .context("Failed to fetch post by id")?
            }
            Pointer::Author(_) => {
                debug!("author reference does not name a post");
                return Ok(None);
            }
        };

        let Some(record) = record else {
            return Ok(None);
        };
        let post = inner.to_post(record, pointer.relays()).await;
        inner.save_posts(std::slice::from_ref(&post));
        Ok(Some(post))
    }
}

impl Inner {
    fn set_state(&self, key: &str, state: FetchState) {
        self.states.lock().insert(key.to_string(), state);
    }

    fn select(&self, posts: Vec<Post>) -> Vec<Post> {
        match self.selected_author.lock().as_deref() {
            Some(author) => posts.into_iter().filter(|p| p.author == author).collect(),
            None => posts,
        }
    }

    /// Cached posts if they answer the query. A fresh mark must show the query
    /// was fetched live before; rows cached by other queries (another author
    /// set, say) never count on their own. The cache must still hold what that
    /// fetch returned, up to `limit`.
    fn cached_answer(&self, query: &PostQuery) -> Option<Vec<Post>> {
        if !self.cache.is_enabled() {
            return None;
        }
        let mark = match self.cache.query_mark(&query.key()) {
            Ok(Some(mark)) => mark,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache read failed: {e}");
                return None;
            }
        };
        let range = query.date_range.unwrap_or_default();
        let options = CacheQuery {
            kinds: query.content_type.kinds(),
            since: range.since,
            until: range.until,
            limit: Some(query.limit),
        };
        let cached = match self.cache.get_by_authors(&query.authors, &options) {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Cache read failed: {e}");
                return None;
            }
        };
        (cached.len() >= mark.count.min(query.limit))
            .then(|| cached.into_iter().map(|c| c.post).collect())
    }

    fn cached_by_id(&self, id: &str) -> Option<Post> {
        match self.cache.get_by_id(id) {
            Ok(found) => found.map(|c| c.post),
            Err(e) => {
                warn!("Cache lookup failed: {e}");
                None
            }
        }
    }

    async fn live_fetch(&self, query: &PostQuery) -> Result<Vec<Post>> {
        let records = self
            .gateway
            .query_posts(query)
            .await
            .context("Failed to fetch posts")?;
        let mut authors: Vec<String> = records.iter().map(|r| r.pubkey.clone()).collect();
        authors.sort();
        authors.dedup();
        let profiles = self.profiles.resolve(self.gateway.relays(), &authors).await;
        Ok(self.reconciler.reconcile(records, &profiles))
    }

    async fn to_post(&self, record: RawRecord, hints: &[String]) -> Post {
        let relays = self.gateway.relays_for(hints);
        let profiles = self
            .profiles
            .resolve(&relays, std::slice::from_ref(&record.pubkey))
            .await;
        self.reconciler
            .to_post(&record, profiles.get(&record.pubkey))
    }

    fn save_posts(&self, posts: &[Post]) {
        if let Err(e) = self.cache.save(posts) {
            warn!("Failed to cache posts: {e}");
        }
    }

    fn store(&self, key: &str, posts: &[Post]) {
        self.save_posts(posts);
        if let Err(e) = self.cache.mark_query(key, posts.len()) {
            warn!("Failed to record query mark: {e}");
        }
    }
}

fn normalized(query: &PostQuery) -> PostQuery {
    let mut query = query.clone();
    query.authors = query.authors.iter().map(|a| normalize_author(a)).collect();
    query
}
