//! # Doc Relay CLI (`relay`)
//!
//! Keeps an assistant's vector store in step with a document folder and
//! answers questions against it.
//!
//! ## Usage
//!
//! ```bash
//! relay --config ./config/relay.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `relay init` | Prepare the record store (JSON file or SQLite schema) |
//! | `relay status` | List tracked documents and their index state |
//! | `relay detect` | Show what the next sync would do, persisting nothing |
//! | `relay sync` | Detect changes and upload them to the vector store |
//! | `relay ask --user <id> "<question>"` | Ask one question from the terminal |
//! | `relay serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! relay init --config ./config/relay.toml
//! relay sync --limit 20 --progress human
//! relay ask --user me "When is tuition due?"
//! relay serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use doc_relay::config;
use doc_relay::ingest::{self, PassOptions};
use doc_relay::migrate;
use doc_relay::progress::ProgressMode;
use doc_relay::server;
use doc_relay::session::SessionRegistry;
use doc_relay::status;
use doc_relay::traits;

/// Doc Relay: document folder to assistant vector store synchronization.
#[derive(Parser)]
#[command(
    name = "relay",
    about = "Doc Relay: sync a document folder into an assistant vector store and answer with citations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare the record store.
    ///
    /// Writes an empty record file (JSON backend) or creates the schema
    /// (SQLite backend). Safe to run repeatedly.
    Init,

    /// List tracked documents and whether each is indexed.
    Status,

    /// Detect changes without uploading or saving anything.
    Detect {
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Run one synchronization pass.
    ///
    /// Lists the store, detects new and modified documents, and uploads
    /// each into the vector store, replacing the previous object.
    Sync {
        /// Detect only; same as `relay detect`.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of changed documents to upload in this pass.
        #[arg(long)]
        limit: Option<usize>,

        /// Remove documents missing from the store, overriding `sync.prune_missing`.
        #[arg(long)]
        prune: bool,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Ask a single question.
    Ask {
        /// Session key.
        #[arg(long, default_value = "cli")]
        user: String,

        /// Assistant variant to use instead of `assistants.default`.
        #[arg(long)]
        model: Option<String>,

        question: String,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing() {
    let _ = fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Record store initialized: {}", cfg.records.path.display());
        }
        Commands::Status => {
            status::print_status(&cfg).await?;
        }
        Commands::Detect { progress } => {
            let options = PassOptions {
                dry_run: true,
                ..PassOptions::from_config(&cfg)
            };
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            ingest::run_sync(&cfg, options, reporter.as_ref()).await?;
        }
        Commands::Sync {
            dry_run,
            limit,
            prune,
            progress,
        } => {
            let defaults = PassOptions::from_config(&cfg);
            let options = PassOptions {
                dry_run,
                limit,
                prune: prune || defaults.prune,
                ..defaults
            };
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            let outcome = ingest::run_sync(&cfg, options, reporter.as_ref()).await?;
            if outcome.report.failed > 0 {
                anyhow::bail!("{} document(s) failed to sync", outcome.report.failed);
            }
        }
        Commands::Ask {
            user,
            model,
            question,
        } => {
            let assistant = traits::assistant_from_config(&cfg)?;
            let sessions = SessionRegistry::new(assistant, cfg.assistants.clone());
            if let Some(model) = model {
                sessions.set_variant(&user, &model).await?;
            }
            let answer = sessions.ask(&user, &question).await;
            // Threads are per-process here; clean up before reporting.
            if let Err(e) = sessions.delete_thread(&user).await {
                tracing::warn!("failed to delete thread: {:#}", e);
            }
            let answer = answer?;
            println!("{}", answer.text);
            if !answer.citations.is_empty() {
                println!();
                println!("Sources:");
                for name in &answer.citations {
                    println!("  {}", name);
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
