//! # Docpilot CLI (`docpilot`)
//!
//! ## Usage
//!
//! ```bash
//! docpilot --config ./config/docpilot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docpilot ask "<question>"` | Answer one question and exit |
//! | `docpilot interactive` | Multi-turn session in the terminal |
//! | `docpilot serve` | Start the HTTP server |
//! | `docpilot check` | Validate config and chunk store without calling any model |
//!
//! ## Examples
//!
//! ```bash
//! # One-shot question with sources and escalation details
//! docpilot ask "How do I set up Discord analytics?" --details
//!
//! # Continue a named session across runs (requires [history].dir)
//! docpilot interactive --session alice
//!
//! # Serve the HTTP API on [server].bind
//! docpilot serve --config ./config/docpilot.toml
//! ```

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use docpilot::cli::{self, ReplCommand};
use docpilot::config;
use docpilot::copilot::{load_chunk_store, Copilot};
use docpilot::{logging, server};

/// Docpilot: documentation answers with calibrated confidence and human
/// escalation.
#[derive(Parser)]
#[command(
    name = "docpilot",
    about = "Docpilot: documentation support copilot with calibrated confidence and escalation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docpilot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question.
    Ask {
        /// The question.
        query: String,

        /// Session key; turns accumulate under this key.
        #[arg(long, default_value = "cli")]
        session: String,

        /// Show source URLs and the escalation decision.
        #[arg(long)]
        details: bool,
    },

    /// Start an interactive session.
    Interactive {
        /// Session key; turns accumulate under this key.
        #[arg(long, default_value = "cli")]
        session: String,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Load config and chunk store, print counts, and exit.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Ask {
            query,
            session,
            details,
        } => {
            let copilot = Copilot::from_config(&cfg)?;
            let response = copilot.answer(&query, &session).await?;
            print!("{}", cli::render_answer(&response, copilot.policy(), details));
        }
        Commands::Interactive { session } => {
            let copilot = Copilot::from_config(&cfg)?;
            run_interactive(&copilot, &session).await?;
        }
        Commands::Serve => {
            let copilot = Arc::new(Copilot::from_config(&cfg)?);
            println!("Docpilot server listening on http://{}", cfg.server.bind);
            server::run_server(&cfg.server.bind, copilot).await?;
        }
        Commands::Check => {
            let store = load_chunk_store(&cfg.store.path)?;
            println!(
                "Chunk store: {} ({} chunks, {} dims, model {})",
                cfg.store.path.display(),
                store.len(),
                store.dims(),
                store.model()
            );
            if store.model() != cfg.embedding.model {
                bail!(
                    "embedding.model ({}) does not match chunk store model ({})",
                    cfg.embedding.model,
                    store.model()
                );
            }
            if store.dims() != cfg.embedding.dims {
                bail!(
                    "embedding.dims ({}) does not match chunk store dims ({})",
                    cfg.embedding.dims,
                    store.dims()
                );
            }
            println!("Embedding: {} ({} dims)", cfg.embedding.model, cfg.embedding.dims);
            println!("Generation: {}", cfg.generation.model);
            match &cfg.history.dir {
                Some(dir) => println!("History archive: {}", dir.display()),
                None => println!("History archive: disabled"),
            }
            println!("Configuration OK.");
        }
    }

    Ok(())
}

async fn run_interactive(copilot: &Copilot, session: &str) -> Result<()> {
    print!("{}", cli::render_status(&copilot.status()));
    println!();
    println!("Ask me anything about the product. Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nYou: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match cli::parse_command(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Quit => break,
            ReplCommand::Help => println!("{}", cli::HELP_TEXT),
            ReplCommand::Summary => {
                let summary = copilot.summary(session).await?;
                print!("{}", cli::render_summary(&summary));
            }
            ReplCommand::Escalate => match copilot.escalate(session).await {
                Ok(response) => print!("{}", cli::render_escalation(&response)),
                Err(e) => println!("Error: {}", e),
            },
            ReplCommand::HistoryUsage => {
                println!("Please provide a search term. Example: 'history discord'");
            }
            ReplCommand::History(term) => {
                let matches = copilot.search_history(session, &term).await?;
                print!("{}", cli::render_matches(&term, &matches));
            }
            ReplCommand::Ask(query) => match copilot.answer(&query, session).await {
                Ok(response) => {
                    println!();
                    print!("{}", cli::render_answer(&response, copilot.policy(), false));
                }
                Err(e) => println!("Error: {}", e),
            },
        }
    }

    println!("Goodbye!");
    Ok(())
}
