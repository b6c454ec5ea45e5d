//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::state::Mode;

/// Conclave: deliberative multi-agent knowledge synthesis.
///
/// Drives a sequence of specialized agents over a local model runtime
/// to turn a free-form brief into a structured artifact.
#[derive(Parser, Debug)]
#[command(name = "conclave")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the deliberation pipeline over a brief.
    #[command(after_help = r#"Examples:
  conclave run "Explain blockchain consensus mechanisms"
  conclave run "CLI todo app in Rust" --mode project
  conclave run "Learn async Rust" --mode learn --timeout-seconds 900
  conclave run "..." --clarify depth=introductory --clarify audience=engineers
  conclave --format json run "..." | jq '.consensus_score'
"#)]
    Run {
        /// The free-form brief to deliberate over.
        brief: String,

        /// Execution mode: research, project, or learn.
        #[arg(short, long, default_value = "research")]
        mode: Mode,

        /// Session identifier used to associate outputs and logs.
        #[arg(long, env = "CONCLAVE_SESSION_ID")]
        session_id: Option<String>,

        /// Overall wall-clock budget for the run, in seconds.
        #[arg(long, default_value = "7200")]
        timeout_seconds: u64,

        /// Answer to a clarifying question, as key=value (repeatable).
        #[arg(long = "clarify", value_name = "KEY=VALUE")]
        clarifications: Vec<String>,

        /// Directory for the web search cache.
        ///
        /// Defaults to `conclave/web-cache` under the platform cache
        /// directory.
        #[arg(long, env = "CONCLAVE_CACHE_DIR")]
        cache_dir: Option<PathBuf>,

        /// Skip best-effort page fetches for web results (snippets only).
        #[arg(long)]
        no_page_fetch: bool,
    },

    /// List the models installed in the runtime.
    Models,
}
