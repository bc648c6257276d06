//! # Folio CLI (`folio`)
//!
//! ## Usage
//!
//! ```bash
//! folio --config ./config/folio.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `folio index` | Load, chunk and index the source directory |
//! | `folio search "<query>"` | Ranked passages for a query |
//! | `folio ask "<question>"` | One-shot answer with sources |
//! | `folio chat` | Terminal conversation |
//! | `folio sources` | PDFs in the source directory and their load status |
//! | `folio serve` | Start the HTTP chat server |
//!
//! `ask`, `chat` and `serve` bring the index up to date first; when nothing
//! changed this costs one directory scan.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use folio::config;
use folio::session::Services;
use folio::{chat, logging, search, server, sources};

/// Folio: ask questions about a folder of PDFs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/folio.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "folio",
    about = "Folio: ask questions about a folder of PDFs",
    version,
    long_about = "Folio extracts text from the PDFs in a source directory, indexes it with \
    embeddings, and answers questions in a multi-turn conversation grounded in the most \
    relevant passages, citing the source documents."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/folio.toml`. A missing file falls back to the
    /// built-in defaults.
    #[arg(long, global = true, default_value = "./config/folio.toml")]
    config: PathBuf,

    /// Log level when `RUST_LOG` is unset (error, warn, info, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Load, chunk and index the source directory.
    ///
    /// Skips all work when the source documents and the embedding model are
    /// unchanged since the last complete build.
    Index {
        /// Discard the existing index and re-embed everything.
        #[arg(long)]
        rebuild: bool,
    },

    /// Retrieve the passages most relevant to a query.
    Search {
        /// The search query string.
        query: String,

        /// Number of passages to return (defaults to `[retrieval].k`).
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Answer one question and exit.
    Ask {
        /// The question.
        question: String,
    },

    /// Interactive conversation on stdin/stdout.
    ///
    /// `exit` or `quit` ends the session; `/reset` clears the history,
    /// `/history` prints it, `/sources` lists indexed documents.
    Chat,

    /// List the PDFs in the source directory and whether they load.
    Sources,

    /// Start the HTTP chat server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve => "info",
        _ => "warn",
    };
    logging::init(cli.log_level.as_deref().unwrap_or(default_level));

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
        config::Config::default()
    };

    // Commands that don't need providers or the index
    if let Commands::Sources = cli.command {
        sources::list_sources(&cfg)?;
        return Ok(());
    }

    let services = Arc::new(Services::from_config(cfg).await?);

    match cli.command {
        Commands::Index { rebuild } => {
            chat::run_index(&services, rebuild).await?;
        }
        Commands::Search { query, k } => {
            search::run_search(&services, &query, k).await?;
        }
        Commands::Ask { question } => {
            chat::run_ask(&services, &question).await?;
        }
        Commands::Chat => {
            chat::run_chat(&services).await?;
        }
        Commands::Serve => {
            chat::ensure_index(&services).await?;
            server::run_server(services).await?;
        }
        Commands::Sources => {}
    }

    Ok(())
}
