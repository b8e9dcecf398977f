//! # Minbar CLI (`minbar`)
//!
//! The `minbar` binary is the primary interface for the retrieval engine.
//! It provides commands for database initialization, Q&A ingestion,
//! querying, reindexing, and health inspection.
//!
//! ## Usage
//!
//! ```bash
//! minbar --config ./config/minbar.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `minbar init` | Create the SQLite database and run schema migrations |
//! | `minbar ingest <file.jsonl>` | Ingest normalized Q&A records |
//! | `minbar query "<text>"` | Retrieve ranked, attributed answers |
//! | `minbar reindex` | Re-embed all documents and rebuild the index |
//! | `minbar stats` | Print a knowledge base health summary |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! minbar init --config ./config/minbar.toml
//!
//! # Ingest scraped Q&A records
//! minbar ingest fatwas.jsonl --config ./config/minbar.toml
//!
//! # Query in English, top 3 verified answers only
//! minbar query "five pillars of islam" --k 3 --verified-only
//!
//! # Query in Arabic (language is auto-detected when omitted)
//! minbar query "ما هي أركان الإسلام" --language ar
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use minbar::{config, ingest, migrate, query, stats};

/// Minbar CLI — a bilingual Q&A knowledge retrieval engine with semantic
/// search and source attribution.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/minbar.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "minbar",
    about = "Minbar — a bilingual Q&A knowledge retrieval engine",
    version,
    long_about = "Minbar ingests bilingual (Arabic/English) question/answer documents, embeds \
    them with a multilingual sentence-embedding model, and answers free-text queries with \
    ranked, source-attributed, confidence-scored matches."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/minbar.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, document_vectors). Idempotent.
    Init,

    /// Ingest normalized Q&A records from a JSONL file.
    ///
    /// One JSON object per line with `question_text`, `answer_text`,
    /// `source_name`, and optional `language`, `source_url`, `verified`,
    /// `source_priority` fields. Duplicates (same normalized question) are
    /// reported, not re-stored.
    Ingest {
        /// Path to the JSONL file.
        file: PathBuf,
    },

    /// Retrieve ranked answers for a free-text query.
    Query {
        /// The query string.
        query: String,

        /// Query language: `ar` or `en`. Auto-detected when omitted.
        #[arg(long)]
        language: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        k: Option<usize>,

        /// Only return answers verified by moderation.
        #[arg(long)]
        verified_only: bool,

        /// Only return answers from this source.
        #[arg(long)]
        source: Option<String>,
    },

    /// Re-embed all documents and atomically rebuild the vector index.
    ///
    /// Required after switching embedding models. Queries keep being
    /// served from the previous index until the swap.
    Reindex,

    /// Print a knowledge base health summary.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("minbar=info")),
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
        Commands::Ingest { file } => {
            ingest::run_ingest(&cfg, &file).await?;
        }
        Commands::Query {
            query,
            language,
            k,
            verified_only,
            source,
        } => {
            query::run_query(&cfg, &query, language, k, verified_only, source).await?;
        }
        Commands::Reindex => {
            ingest::run_reindex(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
