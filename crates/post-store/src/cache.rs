//! Persistent post and profile cache backed by SQLite.
//!
//! Freshness is per row: a row is served only while `cached_at > now - ttl`.
//! Every public operation degrades to a no-op returning empty results when the
//! cache is disabled, either by config or because storage failed at init.
//!
//! The connection sits behind a `parking_lot::Mutex` and is never held across
//! an `.await`.

use crate::config::CacheConfig;
use crate::types::{CacheQuery, CacheStats, CachedPost, CachedProfile, QueryMark, SweepReport};
use nostr_core::{replaceable_key, AuthorProfile, Post, ProfileStore};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

const WRITE_PROBE_KEY: &str = "__write_test__";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS posts (
        cache_key    TEXT PRIMARY KEY,
        id           TEXT NOT NULL,
        pubkey       TEXT NOT NULL,
        kind         INTEGER NOT NULL,
        created_at   INTEGER NOT NULL,
        effective_at INTEGER NOT NULL,
        d_tag        TEXT,
        cached_at    INTEGER NOT NULL,
        post_json    TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_posts_id ON posts(id);
    CREATE INDEX IF NOT EXISTS idx_posts_pubkey ON posts(pubkey);
    CREATE INDEX IF NOT EXISTS idx_posts_kind ON posts(kind);
    CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
    CREATE INDEX IF NOT EXISTS idx_posts_cached_at ON posts(cached_at);
    CREATE INDEX IF NOT EXISTS idx_posts_pubkey_kind ON posts(pubkey, kind);

    CREATE TABLE IF NOT EXISTS profiles (
        pubkey       TEXT PRIMARY KEY,
        profile_json TEXT NOT NULL,
        cached_at    INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_profiles_cached_at ON profiles(cached_at);

    CREATE TABLE IF NOT EXISTS query_marks (
        query_key  TEXT PRIMARY KEY,
        post_count INTEGER NOT NULL,
        cached_at  INTEGER NOT NULL
    );";

/// Local post/profile cache.
pub struct LocalCache {
    /// `None` for an in-memory database.
    path: Option<PathBuf>,
    config: CacheConfig,
    /// `None` while disabled.
    conn: Arc<Mutex<Option<Connection>>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
    /// Set once recovery has failed; the cache then stays disabled.
    failed: AtomicBool,
}

impl LocalCache {
    /// File-backed cache. Nothing is opened until [`LocalCache::init`].
    pub fn new(path: impl Into<PathBuf>, config: CacheConfig) -> Self {
        Self {
            path: Some(path.into()),
            config,
            conn: Arc::new(Mutex::new(None)),
            sweep: Mutex::new(None),
            failed: AtomicBool::new(false),
        }
    }

    pub fn in_memory(config: CacheConfig) -> Self {
        Self {
            path: None,
            config,
            conn: Arc::new(Mutex::new(None)),
            sweep: Mutex::new(None),
            failed: AtomicBool::new(false),
        }
    }

    /// A cache that stays disabled.
    pub fn disabled() -> Self {
        Self::in_memory(CacheConfig::disabled())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Open the store and prove it accepts writes. On failure the store is
    /// deleted and recreated once; if that fails too the cache stays disabled
    /// for the lifetime of this value. On success an expiry sweep is started in the background.
    pub async fn init(&self) -> bool {
        if !self.config.enabled {
            log::info!("Post cache disabled by config");
            return false;
        }
        if self.failed.load(Ordering::SeqCst) {
            return false;
        }
        if self.is_enabled() {
            return true;
        }

        let conn = match open_verified(self.path.as_deref()) {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("Post cache init failed, recreating store: {e}");
                self.destroy_files();
                match open_verified(self.path.as_deref()) {
                    Ok(conn) => conn,
                    Err(e) => {
                        log::error!("Post cache unavailable, continuing without cache: {e}");
                        self.failed.store(true, Ordering::SeqCst);
                        return false;
                    }
                }
            }
        };
        *self.conn.lock() = Some(conn);
        log::info!(
            "Post cache ready at {}",
            self.path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".into())
        );

        let conn = Arc::clone(&self.conn);
        let (post_ttl, profile_ttl) = (self.config.ttl_seconds, self.config.profile_ttl_seconds);
        let handle = tokio::spawn(async move {
            run_sweep(&conn, post_ttl, profile_ttl);
        });
        *self.sweep.lock() = Some(handle);
        true
    }

    /// Wait for the post-init sweep, if one was started.
    pub async fn wait_for_sweep(&self) {
        let handle = self.sweep.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("Cache sweep task failed: {e}");
            }
        }
    }

    /// Drop the connection. The cache is disabled afterwards.
    pub fn close(&self) {
        if self.conn.lock().take().is_some() {
            log::debug!("Post cache closed");
        }
    }

    fn destroy_files(&self) {
        let Some(path) = &self.path else { return };
        let mut targets = vec![path.clone()];
        for suffix in ["-wal", "-shm"] {
            let mut name = path.as_os_str().to_owned();
            name.push(suffix);
            targets.push(PathBuf::from(name));
        }
        for target in targets {
            if let Err(e) = std::fs::remove_file(&target) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to remove {}: {e}", target.display());
                }
            }
        }
    }

    fn post_cutoff(&self) -> i64 {
        now_secs() - ttl_i64(self.config.ttl_seconds)
    }

    fn profile_cutoff(&self) -> i64 {
        now_secs() - ttl_i64(self.config.profile_ttl_seconds)
    }

    /// Fresh posts by the given authors, newest effective timestamp first.
    pub fn get_by_authors(
        &self,
        authors: &[String],
        query: &CacheQuery,
    ) -> SqlResult<Vec<CachedPost>> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(Vec::new());
        };
        let cutoff = self.post_cutoff();

        let mut stmt = conn.prepare_cached(
            "SELECT post_json, cached_at FROM posts WHERE pubkey = ?1 AND cached_at > ?2",
        )?;
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for author in authors {
            if !seen.insert(author.as_str()) {
                continue;
            }
            let rows = stmt.query_map(params![author, cutoff], row_to_cached_post)?;
            for row in rows {
                if let Some(cached) = row? {
                    if query.matches(&cached.post) {
                        out.push(cached);
                    }
                }
            }
        }

        out.sort_by(|a, b| {
            b.post
                .effective_timestamp()
                .cmp(&a.post.effective_timestamp())
        });
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Fresh post by raw event id.
    pub fn get_by_id(&self, id: &str) -> SqlResult<Option<CachedPost>> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(None);
        };
        let found = conn
            .query_row(
                "SELECT post_json, cached_at FROM posts
                 WHERE id = ?1 AND cached_at > ?2 LIMIT 1",
                params![id, self.post_cutoff()],
                row_to_cached_post,
            )
            .optional()?;
        Ok(found.flatten())
    }

    /// Fresh post by (kind, author, `d`).
    pub fn get_by_replaceable_identity(
        &self,
        kind: u16,
        author: &str,
        identifier: &str,
    ) -> SqlResult<Option<CachedPost>> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(None);
        };
        let found = conn
            .query_row(
                "SELECT post_json, cached_at FROM posts
                 WHERE cache_key = ?1 AND cached_at > ?2",
                params![replaceable_key(kind, author, identifier), self.post_cutoff()],
                row_to_cached_post,
            )
            .optional()?;
        Ok(found.flatten())
    }

    /// Write posts in one transaction. A replaceable post never overwrites a
    /// cached version with an equal or newer `created_at`; an equal version
    /// only has its freshness renewed. Returns the number of rows written.
    pub fn save(&self, posts: &[Post]) -> SqlResult<usize> {
        let mut guard = self.conn.lock();
        let Some(conn) = guard.as_mut() else {
            return Ok(0);
        };
        let now = now_secs();
        let tx = conn.transaction()?;
        let mut written = 0;
        let mut touched: HashSet<&str> = HashSet::new();

        for post in posts {
            let cache_key = post.cache_key();
            if post.is_replaceable() {
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT created_at FROM posts WHERE cache_key = ?1",
                        params![cache_key],
                        |row| row.get(0),
                    )
                    .optional()?;
                match existing {
                    Some(cached) if cached > post.created_at => {
                        log::debug!("Skipping older version of {cache_key}");
                        continue;
                    }
                    Some(cached) if cached == post.created_at => {
                        tx.execute(
                            "UPDATE posts SET cached_at = ?2 WHERE cache_key = ?1",
                            params![cache_key, now],
                        )?;
                        continue;
                    }
                    _ => {}
                }
            }

            let json = serde_json::to_string(post)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            tx.execute(
                "INSERT OR REPLACE INTO posts
                    (cache_key, id, pubkey, kind, created_at, effective_at, d_tag, cached_at, post_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    cache_key,
                    post.id,
                    post.author,
                    post.kind,
                    post.created_at,
                    post.effective_timestamp(),
                    post.identifier(),
                    now,
                    json,
                ],
            )?;
            touched.insert(post.author.as_str());
            written += 1;
        }

        if self.config.max_posts_per_author > 0 {
            let cap = i64::try_from(self.config.max_posts_per_author).unwrap_or(i64::MAX);
            for author in &touched {
                let trimmed = tx.execute(
                    "DELETE FROM posts WHERE pubkey = ?1 AND cache_key NOT IN (
                        SELECT cache_key FROM posts WHERE pubkey = ?1
                        ORDER BY created_at DESC LIMIT ?2
                     )",
                    params![author, cap],
                )?;
                if trimmed > 0 {
                    log::debug!("Trimmed {trimmed} cached post(s) for {author}");
                }
            }
        }

        tx.commit()?;
        log::debug!("Cached {written} of {} post(s)", posts.len());
        Ok(written)
    }

    /// Fresh profiles for the given authors.
    pub fn get_profiles(&self, authors: &[String]) -> SqlResult<HashMap<String, CachedProfile>> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(HashMap::new());
        };
        let cutoff = self.profile_cutoff();
        let mut stmt = conn.prepare_cached(
            "SELECT profile_json, cached_at FROM profiles WHERE pubkey = ?1 AND cached_at > ?2",
        )?;
        let mut out = HashMap::new();
        for author in authors {
            let row: Option<(String, i64)> = stmt
                .query_row(params![author, cutoff], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?;
            let Some((json, cached_at)) = row else { continue };
            match serde_json::from_str::<AuthorProfile>(&json) {
                Ok(profile) => {
                    out.insert(
                        author.clone(),
                        CachedProfile {
                            author: author.clone(),
                            profile,
                            cached_at,
                        },
                    );
                }
                Err(e) => log::warn!("Skipping unreadable cached profile for {author}: {e}"),
            }
        }
        Ok(out)
    }

    pub fn save_profiles(&self, profiles: &HashMap<String, AuthorProfile>) -> SqlResult<usize> {
        let mut guard = self.conn.lock();
        let Some(conn) = guard.as_mut() else {
            return Ok(0);
        };
        let now = now_secs();
        let tx = conn.transaction()?;
        for (author, profile) in profiles {
            let json = serde_json::to_string(profile)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            tx.execute(
                "INSERT OR REPLACE INTO profiles (pubkey, profile_json, cached_at)
                 VALUES (?1, ?2, ?3)",
                params![author, json, now],
            )?;
        }
        tx.commit()?;
        Ok(profiles.len())
    }

    /// Record how many posts a live fetch for `key` produced.
    pub fn mark_query(&self, key: &str, count: usize) -> SqlResult<()> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(());
        };
        conn.execute(
            "INSERT OR REPLACE INTO query_marks (query_key, post_count, cached_at)
             VALUES (?1, ?2, ?3)",
            params![key, i64::try_from(count).unwrap_or(i64::MAX), now_secs()],
        )?;
        Ok(())
    }

    /// Fresh mark for `key`. Marks share the post TTL.
    pub fn query_mark(&self, key: &str) -> SqlResult<Option<QueryMark>> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(None);
        };
        conn.query_row(
            "SELECT post_count, cached_at FROM query_marks
             WHERE query_key = ?1 AND cached_at > ?2",
            params![key, self.post_cutoff()],
            |row| {
                Ok(QueryMark {
                    key: key.to_string(),
                    count: usize::try_from(row.get::<_, i64>(0)?).unwrap_or(0),
                    cached_at: row.get(1)?,
                })
            },
        )
        .optional()
    }

    /// Delete every row past its TTL.
    pub fn sweep_expired(&self) -> SqlResult<SweepReport> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(SweepReport::default());
        };
        sweep(conn, self.config.ttl_seconds, self.config.profile_ttl_seconds)
    }

    /// Remove all posts, profiles and query marks.
    pub fn clear(&self) -> SqlResult<()> {
        let mut guard = self.conn.lock();
        let Some(conn) = guard.as_mut() else {
            return Ok(());
        };
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM posts", [])?;
        tx.execute("DELETE FROM profiles", [])?;
        tx.execute("DELETE FROM query_marks", [])?;
        tx.commit()?;
        log::info!("Post cache cleared");
        Ok(())
    }

    pub fn stats(&self) -> SqlResult<CacheStats> {
        let guard = self.conn.lock();
        let Some(conn) = guard.as_ref() else {
            return Ok(CacheStats::default());
        };
        let (post_count, oldest, newest): (i64, Option<i64>, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), MIN(cached_at), MAX(cached_at) FROM posts",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let profile_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))?;
        Ok(CacheStats {
            post_count: usize::try_from(post_count).unwrap_or(0),
            profile_count: usize::try_from(profile_count).unwrap_or(0),
            oldest_cached_at: oldest,
            newest_cached_at: newest,
        })
    }
}

impl ProfileStore for LocalCache {
    fn load_profiles(&self, authors: &[String]) -> HashMap<String, AuthorProfile> {
        match self.get_profiles(authors) {
            Ok(found) => found.into_iter().map(|(k, v)| (k, v.profile)).collect(),
            Err(e) => {
                log::warn!("Cached profile lookup failed: {e}");
                HashMap::new()
            }
        }
    }

    fn store_profiles(&self, profiles: &HashMap<String, AuthorProfile>) {
        if let Err(e) = self.save_profiles(profiles) {
            log::warn!("Failed to cache profiles: {e}");
        }
    }
}

fn open_verified(path: Option<&Path>) -> SqlResult<Connection> {
    let mut conn = match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    log::debug!("Could not create {}: {e}", parent.display());
                }
            }
            Connection::open(path)?
        }
        None => Connection::open_in_memory()?,
    };
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    conn.execute_batch(SCHEMA)?;
    verify_write(&mut conn)?;
    Ok(conn)
}

/// Throwaway insert+delete. Storage that opens but rejects writes fails here.
fn verify_write(conn: &mut Connection) -> SqlResult<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT OR REPLACE INTO posts
            (cache_key, id, pubkey, kind, created_at, effective_at, d_tag, cached_at, post_json)
         VALUES (?1, ?1, '', 0, 0, 0, NULL, 0, '{}')",
        params![WRITE_PROBE_KEY],
    )?;
    tx.execute(
        "DELETE FROM posts WHERE cache_key = ?1",
        params![WRITE_PROBE_KEY],
    )?;
    tx.commit()
}

fn run_sweep(conn: &Mutex<Option<Connection>>, post_ttl: u64, profile_ttl: u64) {
    let guard = conn.lock();
    let Some(conn) = guard.as_ref() else { return };
    match sweep(conn, post_ttl, profile_ttl) {
        Ok(report) if report.total() > 0 => log::info!(
            "Cache sweep removed {} post(s), {} profile(s), {} query mark(s)",
            report.posts,
            report.profiles,
            report.marks
        ),
        Ok(_) => log::debug!("Cache sweep found nothing to remove"),
        Err(e) => log::warn!("Cache sweep failed: {e}"),
    }
}

fn sweep(conn: &Connection, post_ttl: u64, profile_ttl: u64) -> SqlResult<SweepReport> {
    let now = now_secs();
    let post_cutoff = now - ttl_i64(post_ttl);
    let profile_cutoff = now - ttl_i64(profile_ttl);
    Ok(SweepReport {
        posts: conn.execute(
            "DELETE FROM posts WHERE cached_at <= ?1",
            params![post_cutoff],
        )?,
        profiles: conn.execute(
            "DELETE FROM profiles WHERE cached_at <= ?1",
            params![profile_cutoff],
        )?,
        marks: conn.execute(
            "DELETE FROM query_marks WHERE cached_at <= ?1",
            params![post_cutoff],
        )?,
    })
}

/// Undecodable rows map to `None` and are skipped by callers.
fn row_to_cached_post(row: &Row<'_>) -> SqlResult<Option<CachedPost>> {
    let json: String = row.get(0)?;
    let cached_at: i64 = row.get(1)?;
    match serde_json::from_str::<Post>(&json) {
        Ok(post) => Ok(Some(CachedPost::new(post, cached_at))),
        Err(e) => {
            log::warn!("Skipping unreadable cached post: {e}");
            Ok(None)
        }
    }
}

fn ttl_i64(ttl: u64) -> i64 {
    i64::try_from(ttl).unwrap_or(i64::MAX / 2)
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_core::{KIND_ARTICLE, KIND_NOTE};

    fn post(id: &str, author: &str, kind: u16, created_at: i64) -> Post {
        Post {
            id: id.into(),
            kind,
            author: author.into(),
            created_at,
            published_at: None,
            content: format!("content of {id}"),
            tags: vec![],
            title: None,
            summary: None,
            image: None,
            canonical_ref: None,
            author_name: author.into(),
            author_avatar: None,
            author_handle: None,
        }
    }

    fn article(id: &str, author: &str, d: &str, created_at: i64) -> Post {
        let mut p = post(id, author, KIND_ARTICLE, created_at);
        p.tags.push(vec!["d".into(), d.into()]);
        p
    }

    async fn cache_with(config: CacheConfig) -> LocalCache {
        let cache = LocalCache::in_memory(config);
        assert!(cache.init().await);
        cache.wait_for_sweep().await;
        cache
    }

    async fn cache() -> LocalCache {
        cache_with(CacheConfig::default()).await
    }

    #[tokio::test]
    async fn save_and_read_back() {
        let cache = cache().await;
        cache
            .save(&[post("n1", "alice", KIND_NOTE, 10), article("a1", "alice", "x", 20)])
            .unwrap();

        let got = cache.get_by_id("n1").unwrap().unwrap();
        assert_eq!(got.post.id, "n1");
        assert_eq!(got.cache_key, "n1");
        assert_eq!(got.identifier_tag, None);

        let got = cache
            .get_by_replaceable_identity(KIND_ARTICLE, "alice", "x")
            .unwrap()
            .unwrap();
        assert_eq!(got.post.id, "a1");
        assert_eq!(got.identifier_tag.as_deref(), Some("x"));
        assert!(cache.get_by_id("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn older_version_never_overwrites() {
        let cache = cache().await;
        cache.save(&[article("new", "alice", "x", 200)]).unwrap();
        let written = cache.save(&[article("old", "alice", "x", 100)]).unwrap();
        assert_eq!(written, 0);
        let got = cache
            .get_by_replaceable_identity(KIND_ARTICLE, "alice", "x")
            .unwrap()
            .unwrap();
        assert_eq!(got.post.id, "new");

        cache.save(&[article("newer", "alice", "x", 300)]).unwrap();
        let got = cache
            .get_by_replaceable_identity(KIND_ARTICLE, "alice", "x")
            .unwrap()
            .unwrap();
        assert_eq!(got.post.id, "newer");
    }

    #[tokio::test]
    async fn zero_ttl_makes_everything_stale() {
        let cache = cache_with(CacheConfig {
            ttl_seconds: 0,
            ..Default::default()
        })
        .await;
        cache
            .save(&[
                post("n1", "alice", KIND_NOTE, 10),
                article("a1", "alice", "x", 20),
            ])
            .unwrap();
        assert!(cache.get_by_id("n1").unwrap().is_none());
        assert!(cache.get_by_id("a1").unwrap().is_none());
        assert!(cache
            .get_by_replaceable_identity(KIND_ARTICLE, "alice", "x")
            .unwrap()
            .is_none());
        assert!(cache
            .get_by_authors(&["alice".into()], &CacheQuery::default())
            .unwrap()
            .is_empty());
        assert_eq!(cache.stats().unwrap().post_count, 2);
        assert_eq!(cache.sweep_expired().unwrap().posts, 2);
        assert_eq!(cache.stats().unwrap().post_count, 0);
    }

    #[test]
    fn write_check_catches_rejected_inserts() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        verify_write(&mut conn).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_posts BEFORE INSERT ON posts
             BEGIN SELECT RAISE(ABORT, 'read only'); END;",
        )
        .unwrap();
        assert!(verify_write(&mut conn).is_err());
    }

    #[tokio::test]
    async fn zero_profile_ttl_hides_profiles() {
        let cache = cache_with(CacheConfig {
            profile_ttl_seconds: 0,
            ..Default::default()
        })
        .await;
        let profiles = HashMap::from([(
            "alice".to_string(),
            AuthorProfile {
                name: Some("alice".into()),
                ..Default::default()
            },
        )]);
        assert_eq!(cache.save_profiles(&profiles).unwrap(), 1);
        assert!(cache.get_profiles(&["alice".into()]).unwrap().is_empty());
        assert!(cache.load_profiles(&["alice".into()]).is_empty());
        assert_eq!(cache.stats().unwrap().profile_count, 1);
    }

    #[tokio::test]
    async fn get_by_authors_filters_sorts_and_limits() {
        let cache = cache().await;
        let mut backdated = post("b", "bob", KIND_NOTE, 500);
        backdated.published_at = Some(5);
        cache
            .save(&[
                post("a1", "alice", KIND_NOTE, 30),
                article("a2", "alice", "x", 40),
                backdated,
                post("b2", "bob", KIND_NOTE, 20),
                post("c1", "carol", KIND_NOTE, 99),
            ])
            .unwrap();

        let authors = vec!["alice".to_string(), "bob".to_string()];
        let all = cache.get_by_authors(&authors, &CacheQuery::default()).unwrap();
        let ids: Vec<_> = all.iter().map(|c| c.post.id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a1", "b2", "b"]);

        let notes = cache
            .get_by_authors(
                &authors,
                &CacheQuery {
                    kinds: vec![KIND_NOTE],
                    since: Some(10),
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        let ids: Vec<_> = notes.iter().map(|c| c.post.id.as_str()).collect();
        assert_eq!(ids, vec!["a1"]);
    }

    #[tokio::test]
    async fn per_author_cap_keeps_newest() {
        let cache = cache_with(CacheConfig {
            max_posts_per_author: 2,
            ..Default::default()
        })
        .await;
        cache
            .save(&[
                post("n1", "alice", KIND_NOTE, 1),
                post("n2", "alice", KIND_NOTE, 2),
                post("n3", "alice", KIND_NOTE, 3),
                post("m1", "bob", KIND_NOTE, 1),
            ])
            .unwrap();
        assert!(cache.get_by_id("n1").unwrap().is_none());
        assert!(cache.get_by_id("n3").unwrap().is_some());
        assert!(cache.get_by_id("m1").unwrap().is_some());
        assert_eq!(cache.stats().unwrap().post_count, 3);
    }

    #[tokio::test]
    async fn profiles_roundtrip_and_store_trait() {
        let cache = cache().await;
        let mut profiles = HashMap::new();
        profiles.insert(
            "alice".to_string(),
            AuthorProfile {
                name: Some("alice".into()),
                ..Default::default()
            },
        );
        cache.store_profiles(&profiles);
        let loaded = cache.load_profiles(&["alice".into(), "bob".into()]);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["alice"].name.as_deref(), Some("alice"));
        assert_eq!(cache.stats().unwrap().profile_count, 1);
    }

    #[tokio::test]
    async fn query_marks_are_fresh_until_ttl() {
        let cache = cache().await;
        assert!(cache.query_mark("k").unwrap().is_none());
        cache.mark_query("k", 3).unwrap();
        assert_eq!(cache.query_mark("k").unwrap().unwrap().count, 3);

        let stale = cache_with(CacheConfig {
            ttl_seconds: 0,
            ..Default::default()
        })
        .await;
        stale.mark_query("k", 3).unwrap();
        assert!(stale.query_mark("k").unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_empties_everything() {
        let cache = cache().await;
        cache.save(&[post("n1", "alice", KIND_NOTE, 1)]).unwrap();
        cache.mark_query("k", 1).unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.stats().unwrap(), CacheStats::default());
        assert!(cache.query_mark("k").unwrap().is_none());
    }

    #[tokio::test]
    async fn disabled_cache_is_a_no_op() {
        let cache = LocalCache::disabled();
        assert!(!cache.init().await);
        assert!(!cache.is_enabled());
        assert_eq!(cache.save(&[post("n1", "alice", KIND_NOTE, 1)]).unwrap(), 0);
        assert!(cache.get_by_id("n1").unwrap().is_none());
        assert!(cache
            .get_by_authors(&["alice".into()], &CacheQuery::default())
            .unwrap()
            .is_empty());
        assert_eq!(cache.stats().unwrap(), CacheStats::default());
    }

    #[tokio::test]
    async fn close_disables() {
        let cache = cache().await;
        cache.save(&[post("n1", "alice", KIND_NOTE, 1)]).unwrap();
        cache.close();
        assert!(!cache.is_enabled());
        assert!(cache.get_by_id("n1").unwrap().is_none());
    }
}
