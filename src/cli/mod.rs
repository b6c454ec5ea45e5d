//! CLI layer for conclave.
//!
//! Thin front-end over the pipeline: argument parsing, tracing setup,
//! command execution, and result rendering. The core never depends on
//! anything in this module.

pub mod commands;
pub mod output;
pub mod parser;

pub use commands::execute;
pub use output::OutputFormat;
pub use parser::{Cli, Commands};

use tracing_subscriber::EnvFilter;

/// Initializes the tracing subscriber. Honors `RUST_LOG` when set;
/// otherwise logs this crate at info (or debug with `--verbose`).
/// Diagnostics go to stderr so stdout stays parseable.
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "conclave=debug"
    } else {
        "conclave=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
