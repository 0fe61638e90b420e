//! `trapline` operator CLI entry point

use clap::Parser;
use tracing_subscriber::EnvFilter;

use trapline_cli::commands;
use trapline_cli::{Cli, OutputWriter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout carries command output; logs go to stderr
    let level = cli.log_level.clone().unwrap_or_else(|| "warn".to_owned());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let writer = OutputWriter::new(cli.output);
    if let Err(e) = commands::dispatch(cli, &writer).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
