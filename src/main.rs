use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nostr_core::{decode, NostrRelaySource, Post};
use nostr_blog::display::{count_changed, format_date, pointer_detail, post_detail, post_line};
use nostr_blog::{Config, FeedOrchestrator};
use post_store::{CacheConfig, LocalCache, ReadHistory, RelatedRanker};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nostr-blog")]
#[command(about = "Read Nostr articles and notes with a local cache")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "nostr-blog.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List posts from the configured authors
    Feed {
        /// Number of pages to load
        #[arg(long, default_value_t = 1)]
        pages: usize,
        /// Skip the local cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Show one post and related posts
    Post {
        /// naddr, nevent, note or hex event id
        reference: String,
    },
    /// Decode a NIP-19 reference
    Decode { reference: String },
    /// Inspect or maintain the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Test configuration
    Test,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show row counts and age
    Stats,
    /// Delete everything
    Clear,
    /// Delete expired rows
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Decode { reference } = &cli.command {
        let pointer = decode(reference).with_context(|| format!("Cannot decode {reference}"))?;
        println!("{}", pointer_detail(&pointer));
        return Ok(());
    }

    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    init_logging(&config.logging.level)?;

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    match cli.command {
        Commands::Feed { pages, no_cache } => run_feed(&config, pages, no_cache).await,
        Commands::Post { reference } => show_post(&config, &reference).await,
        Commands::Cache { action } => run_cache(&config, action).await,
        Commands::Test => test_config(&config).await,
        Commands::Decode { .. } => Ok(()),
    }
}

async fn open_feed(config: &Config, use_cache: bool) -> FeedOrchestrator {
    let cache_config = if use_cache {
        config.cache.clone()
    } else {
        CacheConfig::disabled()
    };
    let cache = Arc::new(LocalCache::new(config.db_path(), cache_config));
    if use_cache && !cache.init().await {
        tracing::warn!("Continuing without the post cache");
    }
    let source = Arc::new(NostrRelaySource::new(config.query_timeout()));
    let feed = FeedOrchestrator::new(source, config.relays.clone(), cache);
    feed.set_selected_author(config.selected_author.as_deref());
    feed
}

async fn run_feed(config: &Config, pages: usize, no_cache: bool) -> Result<()> {
    let feed = open_feed(config, !no_cache).await;
    let query = config.feed_query();

    let outcome = feed.fetch_with_cache(&query).await?;
    let first_page = outcome.posts.clone();
    let mut posts = outcome.posts;
    for _ in 1..pages.max(1) {
        if !feed.has_more(&query) || feed.load_more(&query, &mut posts).await? == 0 {
            break;
        }
    }

    println!(
        "{} posts ({})",
        posts.len(),
        if outcome.from_cache { "cached" } else { "live" }
    );
    for post in &posts {
        println!("{}", post_line(post));
        if let Some(reference) = &post.canonical_ref {
            println!("    {reference}");
        }
    }
    if !feed.has_more(&query) {
        println!("(end of feed)");
    }

    if outcome.from_cache {
        let (tx, rx) = oneshot::channel();
        let refresh = feed.refresh_in_background(
            &query,
            Box::new(move |fresh: Vec<Post>| {
                let _ = tx.send(fresh);
            }),
        );
        if let Some(handle) = refresh {
            if handle.join().await {
                if let Ok(fresh) = rx.await {
                    match count_changed(&first_page, &fresh) {
                        0 => println!("Cache is up to date"),
                        n => println!("{n} posts changed since the cached copy"),
                    }
                }
            }
        }
    }

    feed.cache().close();
    Ok(())
}

async fn show_post(config: &Config, reference: &str) -> Result<()> {
    let feed = open_feed(config, true).await;
    let Some(post) = feed.fetch_post_by_id(reference).await? else {
        println!("Post not found: {reference}");
        return Ok(());
    };
    println!("{}", post_detail(&post));

    let mut history = ReadHistory::load(config.history_path());
    let pool = match feed.fetch_with_cache(&config.feed_query()).await {
        Ok(outcome) => outcome.posts,
        Err(e) => {
            tracing::warn!("Related posts unavailable: {e:#}");
            Vec::new()
        }
    };
    let related = RelatedRanker::new().select_related(
        &post,
        &pool,
        config.related_posts_count,
        &history.as_set(),
    );
    if !related.is_empty() {
        println!("\nRelated:");
        for p in &related {
            println!("  {}", post_line(p));
        }
    }

    if let Err(e) = history.mark_read(&post.id) {
        tracing::warn!("Failed to update read history: {e}");
    }
    feed.cache().close();
    Ok(())
}

async fn run_cache(config: &Config, action: CacheAction) -> Result<()> {
    let cache = LocalCache::new(config.db_path(), config.cache.clone());
    if !cache.init().await {
        println!("Cache is disabled or unavailable");
        return Ok(());
    }
    cache.wait_for_sweep().await;

    match action {
        CacheAction::Stats => {
            let stats = cache.stats().context("Failed to read cache stats")?;
            println!("Posts:    {}", stats.post_count);
            println!("Profiles: {}", stats.profile_count);
            if let (Some(oldest), Some(newest)) = (stats.oldest_cached_at, stats.newest_cached_at) {
                println!("Cached:   {} .. {}", format_date(oldest), format_date(newest));
            }
        }
        CacheAction::Clear => {
            cache.clear().context("Failed to clear cache")?;
            println!("Cache cleared");
        }
        CacheAction::Sweep => {
            let report = cache.sweep_expired().context("Failed to sweep cache")?;
            println!(
                "Removed {} expired rows ({} posts, {} profiles, {} marks)",
                report.total(),
                report.posts,
                report.profiles,
                report.marks
            );
        }
    }
    cache.close();
    Ok(())
}

async fn test_config(config: &Config) -> Result<()> {
    println!("Testing configuration...");
    println!("✓ Configuration is valid");

    let authors = config.author_keys();
    println!("✓ {} author(s)", authors.len());
    for author in &authors {
        println!("  {author}");
    }
    println!("✓ {} relay(s)", config.relays.len());

    if config.cache.enabled {
        let cache = LocalCache::new(config.db_path(), config.cache.clone());
        if cache.init().await {
            println!("✓ Cache is writable at {}", config.db_path().display());
            cache.close();
        } else {
            println!("⚠ Cache at {} is unusable", config.db_path().display());
            println!("  (This is non-fatal, posts will be fetched live)");
        }
    } else {
        println!("  Cache disabled");
    }

    println!("\nConfiguration test completed successfully!");
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter.to_string())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init()
        .context("Failed to install logger")?;

    Ok(())
}
