//! Binary entry point for the conclave CLI.

use std::process::ExitCode;

use clap::Parser;

use conclave::cli::{self, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    cli::init_tracing(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(%error, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(cli::execute(cli));
    ExitCode::from(code)
}
