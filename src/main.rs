//! Binary entry point for engram.
//!
//! Thin shell over the library: parses arguments, builds the orchestrator,
//! dispatches to the command implementations, and maps error kinds onto exit
//! codes (0 success, 1 hard error, 2 not-found).

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// CLI output goes through println
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use engram::cli;
use engram::{AgentMemory, Error, KeyConfig, MemoryConfig};

/// Engram - persistent, searchable episodic memory for autonomous agents.
#[derive(Parser)]
#[command(name = "engram")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base path of the store.
    #[arg(short, long, global = true, default_value = ".engram")]
    path: String,

    /// Agent id (scoping namespace).
    #[arg(short, long, global = true, default_value = "default")]
    agent: String,

    /// Explicit 64-hex encryption key.
    #[arg(long, global = true, value_name = "HEX")]
    key: Option<String>,

    /// Derive the encryption key from a password (salt persisted in the store).
    #[arg(long, global = true, value_name = "PASSWORD", conflicts_with = "key")]
    password: Option<String>,

    /// Enable encryption, resolving the key from ENGRAM_KEY or engram.key.
    #[arg(long, global = true, conflicts_with_all = ["key", "password"])]
    encrypt: bool,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Persist text as one or more episodes.
    Remember {
        /// The text to remember.
        text: String,

        /// Episode type (fact, trade, lesson, ...).
        #[arg(short = 't', long, default_value = "fact")]
        r#type: String,

        /// Comma-separated tags.
        #[arg(long)]
        tags: Option<String>,

        /// Importance in [0, 1].
        #[arg(short, long, default_value = "0.5")]
        importance: f64,

        /// Comma-separated ids this episode supersedes.
        #[arg(long)]
        supersedes: Option<String>,
    },

    /// Search episodes by relevance.
    Recall {
        /// The search query.
        query: String,

        /// Maximum number of results.
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Require all of these comma-separated tags.
        #[arg(long)]
        tags: Option<String>,

        /// Restrict to one episode type.
        #[arg(short = 't', long)]
        r#type: Option<String>,

        /// Rank superseded episodes normally.
        #[arg(long)]
        include_superseded: bool,
    },

    /// List the newest episodes.
    Recent {
        /// Maximum number of episodes.
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Query with a natural-language time window ("what happened yesterday").
    Temporal {
        /// The query.
        query: String,
    },

    /// Build a ranked context block for a query.
    Context {
        /// The query.
        query: String,

        /// Token budget.
        #[arg(short, long, default_value = "800")]
        max_tokens: usize,
    },

    /// Build a relevant + recent context block for prompt injection.
    Inject {
        /// The query.
        query: String,

        /// Token budget.
        #[arg(short, long, default_value = "1000")]
        max_tokens: usize,

        /// Drop episodes carrying any of these comma-separated tags.
        #[arg(long)]
        exclude_tags: Option<String>,

        /// Boost episodes carrying any of these comma-separated tags.
        #[arg(long)]
        priority_tags: Option<String>,
    },

    /// Show store and index statistics.
    Stats,

    /// Apply the retention policy.
    Prune {
        /// Keep at most this many episodes.
        #[arg(long, default_value = "1000")]
        keep: usize,

        /// Age bound in days for the low-importance cut.
        #[arg(long, default_value = "90")]
        max_age_days: f64,

        /// Decayed-importance floor for the age cut.
        #[arg(long, default_value = "0.05")]
        min_importance: f64,
    },

    /// Delete one episode.
    Forget {
        /// The episode id.
        id: String,
    },

    /// Print the supersession chain containing an episode.
    Chain {
        /// Any episode id in the chain.
        id: String,
    },

    /// Summarize the recent window into a summary episode.
    HourlySummary {
        /// Look-back window in hours.
        #[arg(long, default_value = "1")]
        hours: u64,

        /// Mark summarized episodes as superseded.
        #[arg(long)]
        supersede: bool,
    },

    /// Build and anchor a Merkle snapshot of the store.
    Snapshot,

    /// Verify the store against a previously anchored root.
    Verify {
        /// Expected 64-hex Merkle root.
        #[arg(long, value_name = "HEX")]
        root: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    engram::observability::init_logging(cli.verbose);

    let mut config = MemoryConfig::new(&cli.path, &cli.agent);
    if let Some(key) = &cli.key {
        config = config.with_encryption(KeyConfig::RawHex(key.clone()));
    } else if let Some(password) = &cli.password {
        config = config.with_encryption(KeyConfig::Password(password.clone()));
    } else if cli.encrypt || std::env::var(engram::crypto::ENV_KEY).is_ok() {
        config = config.with_encryption(KeyConfig::Resolve);
    }

    let mut memory = AgentMemory::new(config);
    match run(&mut memory, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ Error::NotFound { .. }) => {
            eprintln!("{e}");
            ExitCode::from(2)
        },
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        },
    }
}

fn run(memory: &mut AgentMemory, command: Commands) -> engram::Result<()> {
    match command {
        Commands::Remember {
            text,
            r#type,
            tags,
            importance,
            supersedes,
        } => cli::cmd_remember(
            memory,
            &text,
            &r#type,
            tags.as_deref(),
            importance,
            supersedes.as_deref(),
        ),
        Commands::Recall {
            query,
            limit,
            tags,
            r#type,
            include_superseded,
        } => cli::cmd_recall(
            memory,
            &query,
            limit,
            tags.as_deref(),
            r#type.as_deref(),
            include_superseded,
        ),
        Commands::Recent { limit } => cli::cmd_recent(memory, limit),
        Commands::Temporal { query } => cli::cmd_temporal(memory, &query),
        Commands::Context { query, max_tokens } => cli::cmd_context(memory, &query, max_tokens),
        Commands::Inject {
            query,
            max_tokens,
            exclude_tags,
            priority_tags,
        } => cli::cmd_inject(
            memory,
            &query,
            max_tokens,
            exclude_tags.as_deref(),
            priority_tags.as_deref(),
        ),
        Commands::Stats => cli::cmd_stats(memory),
        Commands::Prune {
            keep,
            max_age_days,
            min_importance,
        } => cli::cmd_prune(memory, keep, max_age_days, min_importance),
        Commands::Forget { id } => cli::cmd_forget(memory, &id),
        Commands::Chain { id } => cli::cmd_chain(memory, &id),
        Commands::HourlySummary { hours, supersede } => {
            cli::cmd_hourly_summary(memory, hours, supersede)
        },
        Commands::Snapshot => cli::cmd_snapshot(memory),
        Commands::Verify { root } => cli::cmd_verify(memory, &root),
    }
}
