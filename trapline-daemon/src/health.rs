//! Aggregated health reporting.
//!
//! The orchestrator polls each module's `health_check()` on a fixed interval
//! and folds the results into a [`DaemonHealth`]. The daemon is as healthy as
//! its worst enabled module.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use trapline_core::pipeline::HealthStatus;

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone)]
pub struct DaemonHealth {
    /// Worst status among enabled modules.
    pub status: HealthStatus,
    /// Seconds since the orchestrator was built.
    pub uptime_secs: u64,
    /// Per-module reports in registration order.
    pub modules: Vec<ModuleHealth>,
}

impl DaemonHealth {
    /// Ready means every enabled module can take work, possibly degraded.
    pub fn is_ready(&self) -> bool {
        !self.status.is_unhealthy() && self.modules.iter().any(|m| m.enabled)
    }
}

/// Health status for a single module.
#[derive(Debug, Clone)]
pub struct ModuleHealth {
    /// Module name ("matcher", "forwarder").
    pub name: String,
    /// Whether the module runs under the current config and role.
    pub enabled: bool,
    pub status: HealthStatus,
}

/// Fold module statuses into the worst one, joining the reasons.
///
/// Disabled modules are ignored.
pub fn aggregate_status(modules: &[ModuleHealth]) -> HealthStatus {
    let mut degraded = Vec::new();
    let mut unhealthy = Vec::new();

    for module in modules.iter().filter(|m| m.enabled) {
        match &module.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                degraded.push(format!("{}: {}", module.name, reason));
            }
            HealthStatus::Unhealthy(reason) => {
                unhealthy.push(format!("{}: {}", module.name, reason));
            }
        }
    }

    if !unhealthy.is_empty() {
        unhealthy.extend(degraded);
        HealthStatus::Unhealthy(unhealthy.join("; "))
    } else if !degraded.is_empty() {
        HealthStatus::Degraded(degraded.join("; "))
    } else {
        HealthStatus::Healthy
    }
}

/// Short label for logs.
pub fn status_label(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded(_) => "degraded",
        HealthStatus::Unhealthy(_) => "unhealthy",
    }
}
