//! End-to-end feed tests over a file-backed cache and an in-process relay.

use nostr_blog::{Config, FeedOrchestrator, FetchState};
use nostr_core::nostr_sdk::nips::nip19::ToBech32;
use nostr_core::nostr_sdk::Keys;
use nostr_core::{MemoryRelaySource, RawRecord, KIND_ARTICLE, KIND_METADATA, KIND_NOTE};
use post_store::{LocalCache, ReadHistory, RelatedRanker};
use std::sync::Arc;
use tempfile::TempDir;

fn record(n: u64, author: &str, kind: u16, created_at: i64, tags: Vec<Vec<String>>) -> RawRecord {
    RawRecord {
        id: format!("{n:064x}"),
        pubkey: author.to_string(),
        created_at,
        kind,
        tags,
        content: format!("# Post {n}\n\nBody of post {n}"),
    }
}

fn d_tag(d: &str) -> Vec<Vec<String>> {
    vec![vec!["d".to_string(), d.to_string()]]
}

fn config_for(dir: &TempDir, authors: Vec<String>) -> Config {
    let db = dir.path().join("cache.db");
    let history = dir.path().join("history.json");
    let toml = format!(
        r#"
authors = {authors:?}
relays = ["wss://relay.example.com"]
posts_per_page = 3
history_path = "{}"

[cache]
db_path = "{}"
"#,
        history.display(),
        db.display()
    );
    Config::from_toml(&toml).unwrap()
}

async fn open(config: &Config, source: Arc<MemoryRelaySource>) -> FeedOrchestrator {
    let cache = Arc::new(LocalCache::new(config.db_path(), config.cache.clone()));
    assert!(cache.init().await);
    cache.wait_for_sweep().await;
    FeedOrchestrator::new(source, config.relays.clone(), cache)
}

#[tokio::test]
async fn cached_feed_survives_restart_and_relay_outage() {
    let dir = TempDir::new().unwrap();
    let keys = Keys::generate();
    let author = keys.public_key().to_hex();
    let npub = keys.public_key().to_bech32().unwrap();
    let config = config_for(&dir, vec![npub]);
    config.validate().unwrap();

    let source = Arc::new(MemoryRelaySource::new(vec![
        record(1, &author, KIND_ARTICLE, 100, d_tag("intro")),
        record(2, &author, KIND_ARTICLE, 300, d_tag("intro")),
        record(3, &author, KIND_NOTE, 200, vec![]),
        record(4, &author, KIND_NOTE, 50, vec![]),
        RawRecord {
            id: format!("{:064x}", 99),
            pubkey: author.clone(),
            created_at: 1,
            kind: KIND_METADATA,
            tags: vec![],
            content: r#"{"name":"alice"}"#.to_string(),
        },
    ]));

    let query = config.feed_query();
    let live = {
        let feed = open(&config, Arc::clone(&source)).await;
        let outcome = feed.fetch_with_cache(&query).await.unwrap();
        assert!(!outcome.from_cache);
        feed.cache().close();
        outcome.posts
    };
    assert_eq!(live.len(), 2);
    assert_eq!(live[0].id, format!("{:064x}", 2));
    assert_eq!(live[0].author_name, "alice");
    assert!(live[0].canonical_ref.as_deref().unwrap().starts_with("naddr1"));

    // Relays now unreachable; a fresh process serves from disk.
    source.fail_author(&author);
    let feed = open(&config, Arc::clone(&source)).await;
    let cached = feed.fetch_with_cache(&query).await.unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.posts, live);
    assert_eq!(feed.state(&query), FetchState::ServedFresh);

    let handle = feed
        .refresh_in_background(&query, Box::new(|_: Vec<nostr_core::Post>| {}))
        .unwrap();
    assert!(!handle.join().await);
    assert_eq!(feed.state(&query), FetchState::Failed);

    let by_ref = feed
        .fetch_post_by_id(live[0].canonical_ref.as_deref().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_ref.created_at, 300);
}

#[tokio::test]
async fn related_posts_skip_history() {
    let dir = TempDir::new().unwrap();
    let author = Keys::generate().public_key().to_hex();
    let config = config_for(&dir, vec![author.clone()]);
    let source = Arc::new(MemoryRelaySource::new(
        (1..=3)
            .map(|n| record(n, &author, KIND_NOTE, n as i64 * 10, vec![]))
            .collect(),
    ));
    let feed = open(&config, source).await;
    let pool = feed.fetch_with_cache(&config.feed_query()).await.unwrap().posts;

    let mut history = ReadHistory::load(config.history_path());
    history.mark_read(&pool[1].id).unwrap();
    let reloaded = ReadHistory::load(config.history_path());
    assert!(reloaded.contains(&pool[1].id));

    let related =
        RelatedRanker::seeded(5).select_related(&pool[0], &pool, 1, &reloaded.as_set());
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].id, pool[2].id);
}
