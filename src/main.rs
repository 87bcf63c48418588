//! # RagVault CLI (`rvault`)
//!
//! The `rvault` binary drives a RagVault database: dataset bookkeeping,
//! deduplicated row ingest, embedding storage, similarity queries and IVF
//! index maintenance.
//!
//! ## Usage
//!
//! ```bash
//! rvault --config ./config/rvault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rvault init` | Create the SQLite database and schema |
//! | `rvault dataset create\|show\|delete` | Dataset lifecycle |
//! | `rvault row add <dataset> <json>` | Ingest one row (idempotent) |
//! | `rvault row sync <dataset> --file rows.json` | Sync a dataset's rows from a file |
//! | `rvault row backfill` | Hash legacy rows |
//! | `rvault doc add\|get\|delete` | Store, print or delete a document |
//! | `rvault query --embedding <json>` | Similarity search |
//! | `rvault index rebuild\|stats` | IVF maintenance |
//! | `rvault stats` | Table counts |
//!
//! ## Examples
//!
//! ```bash
//! rvault init
//! rvault dataset create sales --title "Sales 2024" --url file://sales.csv
//! rvault row add sales '{"region": "EU", "total": 1200}'
//! rvault doc add --content "refund policy" --embedding @policy.json --metadata '{"type":"faq"}'
//! rvault query --embedding @question.json --limit 5 --filter '{"type":"faq"}'
//! ```

use clap::{Parser, Subcommand};
use ragvault::{config, dataset, get, index_cmd, ingest, migrate, search, stats};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// RagVault CLI: vector similarity search with metadata filters and
/// content-hash deduplication.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rvault.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rvault",
    about = "RagVault — vector similarity search with metadata filters and deduplicated ingest",
    version,
    long_about = "RagVault stores embeddings with their content and metadata in SQLite, \
    answers cosine-similarity queries through an inverted-file (IVF) index with JSON \
    containment filters, and ingests structured rows idempotently by content hash."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Idempotent.
    Init,

    /// Manage datasets.
    Dataset {
        #[command(subcommand)]
        action: DatasetAction,
    },

    /// Ingest and maintain structured rows.
    Row {
        #[command(subcommand)]
        action: RowAction,
    },

    /// Store and retrieve documents.
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Find the documents most similar to an embedding.
    Query {
        /// Query embedding as a JSON array, or `@file`.
        #[arg(long)]
        embedding: String,

        /// Maximum number of matches (must be positive). Omit for all.
        #[arg(long, allow_negative_numbers = true)]
        limit: Option<i64>,

        /// Metadata filter as a JSON object, or `@file`.
        #[arg(long)]
        filter: Option<String>,

        /// IVF lists to probe (overrides `[index].probes`).
        #[arg(long)]
        probes: Option<usize>,

        /// Print matches as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Maintain the IVF index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Show database statistics.
    Stats,
}

/// Dataset subcommands.
#[derive(Subcommand)]
enum DatasetAction {
    /// Create a dataset, or update its title and url.
    Create {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    /// Print a dataset with its schema and row count.
    Show { id: String },
    /// Delete a dataset with all its rows and documents.
    Delete { id: String },
}

/// Row subcommands.
#[derive(Subcommand)]
enum RowAction {
    /// Ingest one row. Re-ingesting identical content returns the existing id.
    Add {
        dataset: String,
        /// Row as a JSON object, or `@file`.
        row: String,
    },
    /// Sync a dataset's rows from a JSON array file.
    Sync {
        dataset: String,
        #[arg(long)]
        file: PathBuf,
        /// Replace every row instead of applying the difference.
        #[arg(long)]
        full_refresh: bool,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        url: Option<String>,
    },
    /// Compute hashes for rows stored without one.
    Backfill {
        /// Rows per batch (overrides `[ingest].backfill_batch_size`).
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

/// Document subcommands.
#[derive(Subcommand)]
enum DocAction {
    /// Store a document with a precomputed embedding.
    Add {
        #[arg(long)]
        content: String,
        /// Metadata as a JSON object, or `@file`.
        #[arg(long)]
        metadata: Option<String>,
        /// Embedding as a JSON array, or `@file`.
        #[arg(long)]
        embedding: String,
        /// Owning dataset.
        #[arg(long)]
        dataset: Option<String>,
    },
    /// Print a document as JSON.
    Get { id: String },
    /// Delete a document and drop it from the index.
    Delete { id: String },
}

/// Index subcommands.
#[derive(Subcommand)]
enum IndexAction {
    /// Retrain the IVF centroids from every stored embedding.
    Rebuild,
    /// Show index generation, list sizes and staleness.
    Stats,
}

/// Install the stderr log subscriber. `RUST_LOG` wins over the config level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg.logging.level);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Dataset { action } => match action {
            DatasetAction::Create { id, title, url } => {
                dataset::run_create(&cfg, &id, title, url).await?;
            }
            DatasetAction::Show { id } => {
                dataset::run_show(&cfg, &id).await?;
            }
            DatasetAction::Delete { id } => {
                dataset::run_delete(&cfg, &id).await?;
            }
        },
        Commands::Row { action } => match action {
            RowAction::Add { dataset, row } => {
                ingest::run_row_add(&cfg, &dataset, &row).await?;
            }
            RowAction::Sync {
                dataset,
                file,
                full_refresh,
                title,
                url,
            } => {
                ingest::run_row_sync(&cfg, &dataset, &file, full_refresh, title, url).await?;
            }
            RowAction::Backfill { batch_size } => {
                ingest::run_row_backfill(&cfg, batch_size).await?;
            }
        },
        Commands::Doc { action } => match action {
            DocAction::Add {
                content,
                metadata,
                embedding,
                dataset,
            } => {
                ingest::run_doc_add(&cfg, &content, metadata.as_deref(), &embedding, dataset)
                    .await?;
            }
            DocAction::Get { id } => {
                get::run_get(&cfg, &id).await?;
            }
            DocAction::Delete { id } => {
                ingest::run_doc_delete(&cfg, &id).await?;
            }
        },
        Commands::Query {
            embedding,
            limit,
            filter,
            probes,
            json,
        } => {
            search::run_query(&cfg, &embedding, limit, filter.as_deref(), probes, json).await?;
        }
        Commands::Index { action } => match action {
            IndexAction::Rebuild => {
                index_cmd::run_rebuild(&cfg).await?;
            }
            IndexAction::Stats => {
                index_cmd::run_stats(&cfg).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
