//! Module registry and initialization.
//!
//! Each trapline module is wrapped as a [`ModuleHandle`] holding a
//! `Box<dyn DynPipeline>`, so the orchestrator can manage modules built over
//! different store backends and clients uniformly.
//!
//! Registration order is start order: the matcher (producer of the alert
//! queue) before the forwarder (its consumer).

pub mod forwarder;
pub mod matcher;

use trapline_core::pipeline::{DynPipeline, HealthStatus};

/// A handle to a registered module.
pub struct ModuleHandle {
    /// Module name for logging and health reporting.
    pub name: String,
    /// Whether the module runs under the current config and role.
    pub enabled: bool,
    pipeline: Box<dyn DynPipeline>,
    started: bool,
}

impl ModuleHandle {
    /// Create a new module handle.
    pub fn new(name: impl Into<String>, enabled: bool, pipeline: Box<dyn DynPipeline>) -> Self {
        Self {
            name: name.into(),
            enabled,
            pipeline,
            started: false,
        }
    }

    /// Whether `start` succeeded and `stop` has not been called since.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Disabled modules always report `Healthy`.
    pub async fn health_check(&self) -> HealthStatus {
        if !self.enabled {
            return HealthStatus::Healthy;
        }
        self.pipeline.health_check().await
    }
}

/// Ordered set of daemon modules.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleHandle>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module. Start order follows registration order.
    pub fn register(&mut self, handle: ModuleHandle) {
        self.modules.push(handle);
    }

    /// Start all enabled modules in registration order.
    ///
    /// On the first failure, modules that already started are stopped again
    /// and the start error is returned.
    pub async fn start_all(&mut self) -> anyhow::Result<()> {
        let mut failure = None;

        for handle in self.modules.iter_mut().filter(|h| h.enabled) {
            tracing::info!(module = %handle.name, "starting module");
            match handle.pipeline.start().await {
                Ok(()) => {
                    handle.started = true;
                    tracing::info!(module = %handle.name, "module started");
                }
                Err(e) => {
                    failure = Some(anyhow::anyhow!(
                        "failed to start module '{}': {}",
                        handle.name,
                        e
                    ));
                    break;
                }
            }
        }

        match failure {
            None => Ok(()),
            Some(err) => {
                tracing::warn!(error = %err, "startup failed, rolling back started modules");
                if let Err(rollback) = self.stop_all().await {
                    tracing::error!(error = %rollback, "rollback after failed startup also failed");
                }
                Err(err)
            }
        }
    }

    /// Stop every started module in registration order.
    ///
    /// Keeps going past failures and reports them together.
    pub async fn stop_all(&mut self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        for handle in self.modules.iter_mut().filter(|h| h.started) {
            tracing::info!(module = %handle.name, "stopping module");
            handle.started = false;
            match handle.pipeline.stop().await {
                Ok(()) => tracing::info!(module = %handle.name, "module stopped"),
                Err(e) => {
                    tracing::error!(module = %handle.name, error = %e, "failed to stop module");
                    errors.push(format!("{}: {}", handle.name, e));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "errors stopping modules: {}",
                errors.join("; ")
            ))
        }
    }

    /// `(name, enabled, status)` for every registered module.
    pub async fn health_statuses(&self) -> Vec<(String, bool, HealthStatus)> {
        let mut statuses = Vec::with_capacity(self.modules.len());
        for handle in &self.modules {
            let status = handle.health_check().await;
            statuses.push((handle.name.clone(), handle.enabled, status));
        }
        statuses
    }

    /// Registered module names in order.
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|h| h.name.as_str()).collect()
    }

    pub fn count(&self) -> usize {
        self.modules.len()
    }

    pub fn enabled_count(&self) -> usize {
        self.modules.iter().filter(|m| m.enabled).count()
    }
}
