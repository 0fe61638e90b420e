use anyhow::Result;
use clap::Parser;

use trapline_core::config::TraplineConfig;
use trapline_daemon::{DaemonCli, DaemonOptions, Orchestrator, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = TraplineConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;

    // CLI 플래그가 파일과 환경변수보다 우선
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        role = %cli.role,
        "trapline-daemon starting"
    );

    let options = DaemonOptions {
        role: cli.role,
        worker_id: cli.worker_id,
    };
    let mut orchestrator = Orchestrator::build_from_config(config, options)
        .await?
        .with_config_path(cli.config);

    orchestrator.run().await
}
