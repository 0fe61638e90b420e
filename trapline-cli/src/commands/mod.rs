//! Command handlers -- one module per subcommand

pub mod config;
pub mod dlq;
pub mod ingest;
pub mod queue;
pub mod rules;

use crate::cli::{Cli, Commands};
use crate::error::CliError;
use crate::output::OutputWriter;

/// Route a parsed command line to its handler.
pub async fn dispatch(cli: Cli, writer: &OutputWriter) -> Result<(), CliError> {
    let config_path = cli.config.as_path();
    match cli.command {
        Commands::Config(args) => config::execute(args, config_path, writer).await,
        Commands::Rules(args) => rules::execute(args, config_path, writer).await,
        Commands::Queue(args) => queue::execute(args, config_path, writer).await,
        Commands::Dlq(args) => dlq::execute(args, config_path, writer).await,
        Commands::Ingest(args) => ingest::execute(args, config_path, writer).await,
    }
}
