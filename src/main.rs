//! # Requirement Harness CLI (`rqh`)
//!
//! ## Usage
//!
//! ```bash
//! rqh --config ./config/rqh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rqh init` | Create the SQLite database and project index schema |
//! | `rqh index <catalog.json>` | Embed and index historical projects |
//! | `rqh search "<query>"` | Hybrid search; prints ranked candidates as JSON |
//! | `rqh analyze "<requirement>"` | Run the full analysis pipeline; prints the run as JSON |
//! | `rqh stats` | Print index statistics |
//!
//! Logs go to stderr (filter with `RUST_LOG`); stdout carries only results.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use req_harness::catalog;
use req_harness::config::{self, Config};
use req_harness::db;
use req_harness::documents::FsDocumentStore;
use req_harness::embedding::{self, EmbeddingProvider};
use req_harness::generation;
use req_harness::index::VectorIndex;
use req_harness::migrate;
use req_harness::pipeline::{Pipeline, RunStatus, Services};
use req_harness::search::HybridRetriever;
use req_harness::sqlite_index::SqliteVectorIndex;
use req_harness::stats;

/// Requirement Harness: retrieval-backed requirement analysis.
///
/// All commands accept a `--config` flag pointing to a TOML configuration file.
#[derive(Parser)]
#[command(
    name = "rqh",
    about = "Requirement Harness: analyse new requirements against similar historical projects",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rqh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Embed and index projects from a JSON catalog.
    Index {
        /// Path to the catalog file.
        catalog: PathBuf,

        /// Re-embed every entry, even if its content is unchanged.
        #[arg(long)]
        full: bool,
    },

    /// Find historical projects similar to a query.
    Search {
        query: String,

        /// Number of candidates to return (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Weight of semantic similarity. If only one weight is given the
        /// other is its complement.
        #[arg(long)]
        semantic_weight: Option<f64>,

        /// Weight of lexical overlap.
        #[arg(long)]
        lexical_weight: Option<f64>,
    },

    /// Analyse a requirement end to end.
    Analyze {
        /// Requirement text.
        requirement: String,
    },

    /// Show index statistics.
    Stats,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Resolve CLI weight overrides against the configured defaults.
fn resolve_weights(cfg: &Config, semantic: Option<f64>, lexical: Option<f64>) -> Result<(f64, f64)> {
    let (ws, wl) = match (semantic, lexical) {
        (Some(ws), Some(wl)) => (ws, wl),
        (Some(ws), None) => (ws, 1.0 - ws),
        (None, Some(wl)) => (1.0 - wl, wl),
        (None, None) => (cfg.retrieval.semantic_weight, cfg.retrieval.lexical_weight),
    };
    if !(0.0..=1.0).contains(&ws) || !(0.0..=1.0).contains(&wl) {
        bail!("weights must be in [0.0, 1.0]");
    }
    if (ws + wl - 1.0).abs() > 1e-6 {
        bail!("semantic_weight + lexical_weight must equal 1.0 (got {})", ws + wl);
    }
    Ok((ws, wl))
}

async fn open_retrieval(cfg: &Config) -> Result<(Arc<dyn EmbeddingProvider>, Arc<dyn VectorIndex>, sqlx::SqlitePool)> {
    let embedder: Arc<dyn EmbeddingProvider> = Arc::from(embedding::create_provider(&cfg.embedding)?);
    let pool = db::connect(cfg).await?;
    migrate::apply_schema(&pool).await?;
    let index: Arc<dyn VectorIndex> = Arc::new(SqliteVectorIndex::new(pool.clone()));
    Ok((embedder, index, pool))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { catalog, full } => {
            catalog::run_index(&cfg, &catalog, full).await?;
        }
        Commands::Search {
            query,
            top_k,
            semantic_weight,
            lexical_weight,
        } => {
            let (ws, wl) = resolve_weights(&cfg, semantic_weight, lexical_weight)?;
            let top_k = top_k.unwrap_or(cfg.retrieval.top_k);
            if top_k == 0 {
                bail!("--top-k must be >= 1");
            }
            let (embedder, index, pool) = open_retrieval(&cfg).await?;
            let retriever = HybridRetriever::new(embedder, index, (&cfg.retrieval).into());
            let candidates = retriever.search(&query, top_k, ws, wl).await?;
            println!("{}", serde_json::to_string_pretty(&candidates)?);
            pool.close().await;
        }
        Commands::Analyze { requirement } => {
            let (embedder, index, pool) = open_retrieval(&cfg).await?;
            let services = Services {
                embedder,
                index,
                store: Arc::new(FsDocumentStore::new(cfg.documents.root.clone())),
                generator: Arc::from(generation::create_generator(&cfg.generation)?),
            };
            let pipeline = Pipeline::standard(&cfg, services);
            let run_id = pipeline.start(requirement).await;
            pipeline.run_to_completion(&run_id).await?;
            let state = pipeline.remove(&run_id).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            pool.close().await;
            if state.status == RunStatus::Error {
                let kind = state.error.as_ref().map(|e| e.kind.as_str()).unwrap_or("internal");
                bail!("analysis run {} failed ({})", state.id, kind);
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
