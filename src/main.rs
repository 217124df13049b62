//! # cmdex CLI
//!
//! The `cmdex` binary initializes the database, runs sync passes, answers
//! searches and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! cmdex --config ./config/cmdex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cmdex init` | Create the SQLite database and run schema migrations |
//! | `cmdex sync` | Bring the index in line with the relational store |
//! | `cmdex status` | Ledger counts and recent unit failures |
//! | `cmdex search "<query>"` | Hybrid search |
//! | `cmdex stats` | Collection and ledger statistics |
//! | `cmdex serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Full rebuild of the index
//! cmdex sync --reset
//!
//! # v3 commands only, deprecated ones hidden
//! cmdex search "defer button" --version 3 --type command
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cmdex::config;
use cmdex::engine::Engine;
use cmdex::migrate;
use cmdex::models::{EntityType, SearchResult, Version};
use cmdex::query::SearchFilters;
use cmdex::server;
use cmdex::stats;
use cmdex::sync::{SyncOptions, SyncSummary};

/// cmdex: hybrid search and index synchronization for versioned command
/// documentation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cmdex.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cmdex",
    about = "Hybrid semantic search and index synchronization for versioned command documentation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cmdex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Run one sync pass.
    ///
    /// Only units whose content changed since the last pass are embedded
    /// and upserted; units whose source rows disappeared are deleted.
    Sync {
        /// Drop the collection and the sync ledger first and re-index
        /// everything.
        #[arg(long)]
        reset: bool,
    },

    /// Show sync ledger counts and the most recent unit failures.
    Status {
        /// Number of failures to list.
        #[arg(long, default_value_t = 10)]
        failures: usize,
    },

    /// Hybrid (dense + keyword) search.
    Search {
        /// The search query string.
        query: String,

        /// Restrict to one toolkit version (3 or 4).
        #[arg(long)]
        version: Option<u8>,

        /// Include commands flagged deprecated.
        #[arg(long)]
        include_deprecated: bool,

        /// Restrict to entity types (command, parameter, example, doc).
        /// Repeatable.
        #[arg(long = "type")]
        types: Vec<String>,

        /// Return every matching chunk of a documentation section instead
        /// of the best one.
        #[arg(long)]
        all_chunks: bool,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show collection and ledger statistics.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { reset } => {
            let engine = Engine::from_config(&cfg).await?;
            let summary = engine.synchronizer.run(SyncOptions { reset }).await?;
            print_summary(&summary);
        }
        Commands::Status { failures } => {
            let engine = Engine::from_config(&cfg).await?;
            let counts = engine.ledger.status_counts().await?;
            println!(
                "indexed: {}  embedded: {}  pending: {}  failed: {}",
                counts.indexed, counts.embedded, counts.pending, counts.failed
            );
            let failed = engine.ledger.failures(failures).await?;
            if !failed.is_empty() {
                println!();
                println!("Recent failures:");
                for r in failed {
                    println!(
                        "  {} {} ({}): {}",
                        r.last_synced_at.format("%Y-%m-%d %H:%M"),
                        r.entity_key,
                        r.entity_type,
                        r.error_message.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
        Commands::Search {
            query,
            version,
            include_deprecated,
            types,
            all_chunks,
            limit,
            json,
        } => {
            let version = version
                .map(Version::try_from)
                .transpose()
                .map_err(anyhow::Error::msg)?;
            let entity_types = if types.is_empty() {
                None
            } else {
                Some(
                    types
                        .iter()
                        .map(|t| t.parse::<EntityType>())
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(anyhow::Error::msg)?,
                )
            };
            let filters = SearchFilters {
                version,
                include_deprecated,
                entity_types,
                include_all_chunks: all_chunks,
            };

            let engine = Engine::from_config(&cfg).await?;
            let results = engine.query.query(&query, &filters, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
        }
        Commands::Stats => {
            let engine = Engine::from_config(&cfg).await?;
            let report = stats::collect_stats(engine.index.as_ref(), &engine.ledger).await?;
            stats::print_stats(&report, &cfg.index.collection);
        }
        Commands::Serve => {
            let engine = Engine::from_config(&cfg).await?;
            server::run_server(engine).await?;
        }
    }

    Ok(())
}

fn print_summary(summary: &SyncSummary) {
    println!("sync {}", summary.status.as_str());
    println!("  scanned:  {}", summary.scanned);
    println!("  embedded: {}", summary.embedded);
    println!("  upserted: {}", summary.upserted);
    println!("  failed:   {}", summary.failed);
    println!("  deleted:  {}", summary.deleted);
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for (i, r) in results.iter().enumerate() {
        let version = r
            .payload
            .version()
            .map(|v| format!("v{}", v))
            .unwrap_or_else(|| "any".to_string());
        println!(
            "{}. [{:.3}] {} {} ({})",
            i + 1,
            r.fused_score,
            r.entity_type,
            r.payload.title(),
            version
        );
        println!(
            "    dense: {:.3}  keyword: {:.3}  id: {}",
            r.score, r.keyword_score, r.id
        );
        if let Some(m) = &r.enrichment {
            println!("    equivalent: {} (v{})", m.name, m.version);
        }
    }
}
