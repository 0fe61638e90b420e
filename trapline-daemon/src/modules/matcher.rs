//! Rule matching engine module initialization.
//!
//! ```text
//! trapline:ingest --Envelope--> MatchingEngine --alert--> trapline:alerts
//! ```

use std::sync::Arc;

use anyhow::Result;
use trapline_core::config::TraplineConfig;
use trapline_matcher::MatchingEngineBuilder;
use trapline_store::SharedStore;

use super::ModuleHandle;

/// Module name used in logs and health reports.
pub const NAME: &str = "matcher";

/// Build the matching engine.
///
/// Returns `Ok(None)` when `[matcher].enabled` is false. Rule files are read
/// on `start`, not here.
pub fn init<S: SharedStore>(
    config: &TraplineConfig,
    store: Arc<S>,
    worker_id: &str,
) -> Result<Option<ModuleHandle>> {
    if !config.matcher.enabled {
        tracing::info!("matcher disabled in configuration");
        return Ok(None);
    }

    tracing::info!(
        rule_dir = %config.matcher.rule_dir,
        queue = %config.queues.ingest,
        "initializing matcher"
    );

    let engine = MatchingEngineBuilder::new(store)
        .config(config)
        .worker_id(format!("{worker_id}-{NAME}"))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build matcher: {}", e))?;

    Ok(Some(ModuleHandle::new(NAME, true, Box::new(engine))))
}
