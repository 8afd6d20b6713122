use std::process::ExitCode;

use clap::Parser;
use console::style;

use quarry::cli::Cli;

/// Exit code for configuration and bootstrap errors.
const EXIT_SETUP_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.execute().await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("  {} {:#}", style("✗").red().bold(), e);
            ExitCode::from(EXIT_SETUP_ERROR)
        }
    }
}
