//! feedloc - Annotate feed posts with the author's declared location

mod cli;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedloc_core::dom::{shared, FeedBuilder};
use feedloc_core::{
    CacheStore, CookieJar, Document, Enricher, EnricherConfig, EnrichmentScanner, EventBus,
    HttpLocationFetcher, JsonFileKv, KeyValueStore, LocationFetcher, Settings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "feedloc",
    version,
    about = "Annotate social feed posts with the author's declared location",
    long_about = "Looks up the account location of post authors through an authenticated\n\
                  endpoint, caches the answer per handle, and annotates every post next\n\
                  to its timestamp.\n\
                  \n\
                  Examples:\n\
                    feedloc lookup alice                         # One authenticated lookup\n\
                    feedloc cache                                # List cached locations\n\
                    feedloc cache --json                         # Same, as JSON\n\
                    feedloc token                                # Show the stored bearer token\n\
                    feedloc replay feed.json --wait-ms 5000      # Enrich a recorded feed\n\
                    feedloc replay feed.json --html              # Dump the enriched markup\n\
                  \n\
                  Environment Variables:\n\
                    FEEDLOC_CONFIG                   # Config file (TOML)\n\
                    FEEDLOC_STORAGE                  # Storage file (default: cache dir)\n\
                    FEEDLOC_COOKIE                   # Cookie header sent with lookups\n\
                    FEEDLOC_ENDPOINT                 # Override the lookup endpoint\n\
                    FEEDLOC_BOOTSTRAP_MS             # Delay between container checks\n\
                    FEEDLOC_LOG                      # Log filter (default: feedloc=info,feedloc_core=info)"
)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    /// Path to a TOML config file
    #[arg(long, env = "FEEDLOC_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the storage file
    #[arg(long, env = "FEEDLOC_STORAGE")]
    storage: Option<PathBuf>,

    /// Cookie header for authenticated lookups (must include ct0)
    #[arg(long, env = "FEEDLOC_COOKIE", default_value = "", hide_env_values = true)]
    cookie: String,

    /// Disable ANSI colors (log-friendly)
    #[arg(long, env = "FEEDLOC_NO_COLOR")]
    no_color: bool,
}

#[derive(Subcommand)]
enum Mode {
    /// Fetch one handle's location and exit
    Lookup {
        /// Handle without the leading @
        handle: String,
    },
    /// List persisted lookup records
    Cache {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or set the stored bearer token
    Token {
        /// New token value
        value: Option<String>,
    },
    /// Run the enricher over a recorded feed
    Replay {
        /// JSON array of posts: [{"handle": "...", "time": "..."}]
        feed: PathBuf,
        /// How long to wait for lookups before printing
        #[arg(long, default_value = "3000")]
        wait_ms: u64,
        /// Answer lookups from a {"handle": "location"} file instead of the network
        #[arg(long)]
        locations: Option<PathBuf>,
        /// Print the enriched feed markup instead of a table
        #[arg(long)]
        html: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let storage = match cli.storage {
        Some(path) => path,
        None => JsonFileKv::default_path().context("Could not determine storage path")?,
    };
    let kv: Arc<dyn KeyValueStore> = Arc::new(JsonFileKv::new(storage));
    let no_color = cli.no_color;

    match cli.mode {
        Mode::Lookup { handle } => {
            run_lookup(&config, &cli.cookie, &handle).await?;
        }
        Mode::Cache { json } => {
            run_cache(&config, kv, json, no_color).await?;
        }
        Mode::Token { value } => {
            run_token(kv.as_ref(), value)?;
        }
        Mode::Replay {
            feed,
            wait_ms,
            locations,
            html,
        } => {
            let wait = Duration::from_millis(wait_ms);
            let output = ReplayOutput { html, no_color };
            match locations {
                Some(path) => {
                    let fetcher = cli::load_static_fetcher(&path)?;
                    run_replay(config, kv, fetcher, &feed, wait, output).await?;
                }
                None => {
                    let fetcher = http_fetcher(&config, &cli.cookie)?;
                    run_replay(config, kv, fetcher, &feed, wait, output).await?;
                }
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FEEDLOC_LOG")
        .unwrap_or_else(|_| EnvFilter::new("feedloc=info,feedloc_core=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: Option<&Path>) -> Result<EnricherConfig> {
    match path {
        Some(path) => EnricherConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => {
            let mut config = EnricherConfig::default();
            config
                .apply_env_overrides(|key| std::env::var(key).ok())
                .context("Invalid environment override")?;
            Ok(config)
        }
    }
}

fn http_fetcher(config: &EnricherConfig, cookie: &str) -> Result<HttpLocationFetcher> {
    let jar = CookieJar::parse(cookie);
    if jar.is_empty() {
        tracing::warn!("No cookie given, lookups will likely be rejected");
    }
    HttpLocationFetcher::new(config.bridge.clone(), Arc::new(jar))
        .context("Failed to create HTTP client")
}

async fn run_lookup(config: &EnricherConfig, cookie: &str, handle: &str) -> Result<()> {
    let handle = handle.trim_start_matches('@');
    let fetcher = http_fetcher(config, cookie)?;

    let location = fetcher
        .fetch(handle)
        .await
        .with_context(|| format!("Lookup failed for @{}", handle))?;

    if location.is_empty() {
        println!("@{}: (none)", handle);
    } else {
        println!("@{}: {}", handle, location);
    }
    Ok(())
}

async fn run_cache(
    config: &EnricherConfig,
    kv: Arc<dyn KeyValueStore>,
    json: bool,
    no_color: bool,
) -> Result<()> {
    let store = CacheStore::new(kv, config.storage_key.clone(), EventBus::default());
    let records = store.load().await;

    println!("{}", cli::format_cache_table(&records, json, no_color));
    if !json && !records.is_empty() {
        println!("\n{} handles cached", records.len());
    }
    Ok(())
}

fn run_token(kv: &dyn KeyValueStore, value: Option<String>) -> Result<()> {
    let mut settings = Settings::load(kv);

    match value {
        Some(token) => {
            settings.bearer_token = token.trim().to_string();
            settings.save(kv).context("Failed to save settings")?;
            println!("Bearer token saved: {}", cli::mask_token(&settings.bearer_token));
        }
        None if settings.has_token() => {
            println!("Bearer token: {}", cli::mask_token(&settings.bearer_token));
        }
        None => {
            println!("No bearer token set. Use `feedloc token <VALUE>` to store one.");
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct ReplayOutput {
    html: bool,
    no_color: bool,
}

async fn run_replay<F: LocationFetcher>(
    config: EnricherConfig,
    kv: Arc<dyn KeyValueStore>,
    fetcher: F,
    feed: &Path,
    wait: Duration,
    output: ReplayOutput,
) -> Result<()> {
    let content = std::fs::read_to_string(feed)
        .with_context(|| format!("Failed to read feed: {}", feed.display()))?;
    let posts = FeedBuilder::posts_from_json(&content)
        .with_context(|| format!("Invalid feed: {}", feed.display()))?;

    let mut builder = FeedBuilder::new(config.dom.clone());
    let (doc, _) = builder.page(&posts).context("Failed to build feed document")?;
    let doc = shared(doc);
    let scanner = EnrichmentScanner::new(config.dom.clone(), EventBus::default());

    let handle = Enricher::new(config).start(doc.clone(), kv, fetcher).await;
    tokio::time::sleep(wait).await;
    let summary = handle.shutdown().await.context("Enricher task failed")?;

    if output.html {
        let doc = doc.lock();
        println!("{}", doc.outer_html(doc.root()));
        return Ok(());
    }

    let units = cli::collect_units(&doc.lock(), &scanner);
    println!("{}", cli::format_units(&units, output.no_color));
    println!(
        "\n{} posts, {} annotated, {} handles cached, {} still pending",
        summary.report.units_seen,
        summary.report.annotated + summary.fanned_out,
        summary.records.len(),
        summary.records.values().filter(|r| r.is_pending()).count(),
    );
    Ok(())
}
