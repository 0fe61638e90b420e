//! Configuration hot reload.
//!
//! Re-reads `trapline.toml` every `[general].config_reload_secs` and pushes a
//! changed `[forwarder]` section through a `watch` channel. The forwarder's
//! worker applies it on its next tick. When the token comes from
//! `webhook_token_file`, every tick notifies the forwarder so it re-reads the
//! file and picks up a rotated secret. Everything else in the file (queue
//! names, store backend, matcher settings) is fixed for the process lifetime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use trapline_core::config::{ForwarderConfig, TraplineConfig};

/// Load the config file once and publish the forwarder section if it changed.
///
/// Returns whether the section changed. With `webhook_token_file` set the
/// receivers are notified even when it did not, since the file contents are
/// only read on the forwarder side. An unreadable or invalid file leaves the
/// current value in place.
pub async fn reload_once(
    path: &Path,
    tx: &watch::Sender<ForwarderConfig>,
) -> Result<bool, trapline_core::TraplineError> {
    let config = TraplineConfig::load(path).await?;
    let next = config.forwarder;

    let token_file = !next.webhook_token_file.is_empty();
    let mut changed = false;
    tx.send_if_modified(|current| {
        changed = *current != next;
        if changed || token_file {
            *current = next;
            true
        } else {
            false
        }
    });
    Ok(changed)
}

/// Spawn the periodic reload task.
///
/// The task ends on the shutdown broadcast or when every receiver is gone.
pub fn spawn_config_reload(
    path: PathBuf,
    interval: Duration,
    tx: watch::Sender<ForwarderConfig>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // 첫 tick은 즉시 완료됨
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if tx.is_closed() {
                        tracing::debug!("no forwarder listening for config updates, stopping reload task");
                        break;
                    }
                    match reload_once(&path, &tx).await {
                        Ok(true) => tracing::info!(
                            path = %path.display(),
                            "forwarder settings reloaded"
                        ),
                        Ok(false) => tracing::trace!(path = %path.display(), "config unchanged"),
                        Err(e) => tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "config reload failed, keeping current settings"
                        ),
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("config reload task shutting down");
                    break;
                }
            }
        }
    })
}
