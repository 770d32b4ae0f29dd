//! # Pulse CLI (`pulse`)
//!
//! The `pulse` binary runs the ingestion pipeline and queries the stored
//! corpus.
//!
//! ## Usage
//!
//! ```bash
//! pulse --config ./config/pulse.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pulse init` | Create the SQLite database and run schema migrations |
//! | `pulse run` | Register configured sources, restore the rest, ingest until Ctrl-C |
//! | `pulse sources` | List persisted sources |
//! | `pulse activities` | List stored activities, oldest first |
//! | `pulse search [QUERY]` | Similarity-ranked or temporal search |
//! | `pulse remove-activity <UID>` | Delete one stored activity |
//! | `pulse remove-source <UID>` | Delete a persisted source so `run` no longer restores it |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest every configured source until interrupted
//! pulse run --config ./config/pulse.toml
//!
//! # Most similar activities from two sources
//! pulse search "borrow checker" --source rss-feed/https://blog.rust-lang.org/feed.xml \
//!     --source hacker-news/top --min-similarity 0.3
//!
//! # Ten newest activities
//! pulse search --order newest --limit 10
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use pulse::config::{self, Config};
use pulse::embedding::create_embedder;
use pulse::models::{DecoratedActivity, SearchOrder};
use pulse::registry::{Registry, SearchQuery};
use pulse::source::build_source;
use pulse::store::{ActivityStore, SourceStore, SqliteStore};
use pulse::summarize::create_summarizer;
use pulse::{db, logging, migrate};

/// Pulse CLI: stream activities from external sources, summarize and embed
/// them, and search what was collected.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pulse.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "pulse",
    about = "Pulse: activity ingestion and similarity search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pulse.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Run the ingestion pipeline until Ctrl-C.
    ///
    /// Registers every `[[sources]]` entry from the configuration, then
    /// restores persisted sources the configuration does not mention, and
    /// streams them through the worker pool. A configured entry overwrites
    /// the persisted source with the same UID.
    Run,

    /// List persisted sources.
    Sources,

    /// List stored activities, oldest first.
    Activities {
        /// Only activities from this source UID.
        #[arg(long)]
        source: Option<String>,
    },

    /// Search stored activities.
    ///
    /// With a query and an embedding provider configured, results are ranked
    /// by similarity. Without either, results are ordered by time.
    Search {
        /// Free-text query.
        query: Option<String>,

        /// Restrict to these source UIDs (repeatable).
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Drop results below this similarity.
        #[arg(long, default_value_t = 0.0)]
        min_similarity: f32,

        /// Maximum number of results (clamped to `search.max_limit`).
        #[arg(long)]
        limit: Option<usize>,

        /// `similarity`, `newest`, or `oldest`.
        #[arg(long, default_value = "similarity")]
        order: SearchOrder,
    },

    /// Delete one stored activity by UID.
    RemoveActivity {
        uid: String,
    },

    /// Delete a persisted source by UID.
    ///
    /// Its stored activities are kept. If it is still listed under
    /// `[[sources]]`, the next `run` registers it again.
    RemoveSource {
        uid: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(cfg.logging.format.as_deref())?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Run => run(&cfg).await?,
        Commands::Sources => {
            let store = SqliteStore::open(&cfg.db.path).await?;
            let records = SourceStore::list(&store).await?;
            if records.is_empty() {
                println!("No sources.");
            } else {
                println!("{:<20} {:<40} NAME", "TYPE", "UID");
                for record in records {
                    println!(
                        "{:<20} {:<40} {}",
                        record.source_type, record.uid, record.name
                    );
                    if !record.url.is_empty() {
                        println!("{:<20} {:<40} {}", "", "", record.url);
                    }
                }
            }
            store.close().await;
        }
        Commands::Activities { source } => {
            let (registry, store) = open_registry(&cfg).await?;
            let rows = match source {
                Some(uid) => registry.activities_by_source(&uid).await?,
                None => registry.activities().await?,
            };
            print_activities(&rows, false);
            registry.shutdown().await;
            store.close().await;
        }
        Commands::Search {
            query,
            sources,
            min_similarity,
            limit,
            order,
        } => {
            let (registry, store) = open_registry(&cfg).await?;
            let rows = registry
                .search(&SearchQuery {
                    text: query,
                    source_uids: sources,
                    min_similarity,
                    limit: limit.unwrap_or(0),
                    order,
                })
                .await?;
            print_activities(&rows, true);
            registry.shutdown().await;
            store.close().await;
        }
        Commands::RemoveActivity { uid } => {
            let store = SqliteStore::open(&cfg.db.path).await?;
            ActivityStore::remove(&store, &uid).await?;
            store.close().await;
            println!("Removed {}.", uid);
        }
        Commands::RemoveSource { uid } => {
            let (registry, store) = open_registry(&cfg).await?;
            let removed = registry.remove(&uid).await;
            registry.shutdown().await;
            store.close().await;
            removed?;
            println!("Removed source {}.", uid);
        }
    }

    Ok(())
}

async fn open_registry(cfg: &Config) -> Result<(Registry, Arc<SqliteStore>)> {
    let store = Arc::new(SqliteStore::open(&cfg.db.path).await?);
    let summarizer = create_summarizer(&cfg.summarizer)?;
    let embedder = create_embedder(&cfg.embedding)?;
    let registry = Registry::new(
        &cfg.pipeline,
        &cfg.search,
        store.clone(),
        summarizer,
        embedder,
    )
    .with_source_store(store.clone());
    Ok((registry, store))
}

async fn run(cfg: &Config) -> Result<()> {
    let (registry, store) = open_registry(cfg).await?;

    for entry in &cfg.sources {
        let source = match entry
            .settings_json()
            .and_then(|settings| build_source(&entry.source_type, settings))
        {
            Ok(source) => source,
            Err(e) => {
                error!(kind = %entry.source_type, error = %format!("{:#}", e), "invalid source");
                continue;
            }
        };
        if let Err(e) = registry.replace(source).await {
            error!(kind = %entry.source_type, error = %e, "failed to add source");
        }
    }

    // Configured sources are already running, so only the rest restore.
    let restored = registry.restore().await?;
    info!(count = restored, "restored persisted sources");

    let active = registry.sources().await.len();
    if active == 0 {
        println!("No sources configured. Add [[sources]] entries to the config.");
    } else {
        println!("Streaming {} source(s). Press Ctrl-C to stop.", active);
        tokio::signal::ctrl_c().await?;
    }

    registry.shutdown().await;
    store.close().await;
    Ok(())
}

fn print_activities(rows: &[DecoratedActivity], ranked: bool) {
    if rows.is_empty() {
        println!("No results.");
        return;
    }

    for (i, row) in rows.iter().enumerate() {
        let a = &row.activity;
        let date = a.created_at().format("%Y-%m-%d %H:%M");
        if ranked {
            println!(
                "{}. [{:.2}] {} / {}",
                i + 1,
                row.similarity,
                a.source_type(),
                a.title()
            );
        } else {
            println!("{} [{}] {}", date, a.source_type(), a.title());
        }
        if ranked {
            println!("    created: {}", date);
        }
        println!("    source: {}", a.source_uid());
        if !a.url().is_empty() {
            println!("    url: {}", a.url());
        }
        if !row.summary.short_summary.is_empty() {
            println!("    summary: \"{}\"", row.summary.short_summary);
        }
        println!("    id: {}", a.uid());
        println!();
    }
}
