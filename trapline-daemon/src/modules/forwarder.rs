//! Forwarder module initialization.
//!
//! ```text
//! trapline:alerts --alert--> Forwarder --POST--> webhook
//! config reload --ForwarderConfig--> watch channel --> Forwarder
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use trapline_core::config::{ForwarderConfig, TraplineConfig};
use trapline_forwarder::ForwarderBuilder;
use trapline_store::SharedStore;

use super::ModuleHandle;

/// Module name used in logs and health reports.
pub const NAME: &str = "forwarder";

/// Build the forwarder with the `reqwest` webhook client.
///
/// Returns `Ok(None)` when `[forwarder].enabled` is false. The token is
/// resolved on `start`; `updates` carries reloaded settings afterwards.
pub fn init<S: SharedStore>(
    config: &TraplineConfig,
    store: Arc<S>,
    worker_id: &str,
    updates: watch::Receiver<ForwarderConfig>,
) -> Result<Option<ModuleHandle>> {
    if !config.forwarder.enabled {
        tracing::info!("forwarder disabled in configuration");
        return Ok(None);
    }

    tracing::info!(
        webhook_url = %config.forwarder.webhook_url,
        queue = %config.queues.alerts,
        "initializing forwarder"
    );

    let forwarder = ForwarderBuilder::new(store)
        .config(config)
        .worker_id(format!("{worker_id}-{NAME}"))
        .updates(updates)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build forwarder: {}", e))?;

    Ok(Some(ModuleHandle::new(NAME, true, Box::new(forwarder))))
}
