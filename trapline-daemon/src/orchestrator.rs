//! Module orchestration -- store selection, module assembly, lifecycle.
//!
//! The [`Orchestrator`] is the central coordinator of `trapline-daemon`.
//! It picks the shared store backend, builds the modules the replica's
//! [`Role`] asks for, starts them in order, reports aggregated health, runs
//! the config reload task, and stops everything on SIGTERM/SIGINT.
//!
//! # Start / Stop Order
//!
//! 1. Matcher (consumes ingest, produces alerts)
//! 2. Forwarder (consumes alerts)
//!
//! Both queues live in the shared store, so nothing is lost between the two
//! stops; whatever a module leaves in its processing list is recovered by
//! its own shutdown or, after a crash, by any replica's janitor.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use trapline_core::config::{ForwarderConfig, TraplineConfig};
use trapline_core::metrics as m;
use trapline_queue::generate_worker_id;
use trapline_store::{MemoryStore, SharedStore};

use crate::cli::Role;
use crate::health::{DaemonHealth, ModuleHealth, aggregate_status, status_label};
use crate::metrics_server;
use crate::modules::{self, ModuleRegistry};
use crate::pid::PidFile;
use crate::reload;

/// Interval between aggregated health reports.
const HEALTH_INTERVAL: Duration = Duration::from_secs(10);

/// Per-replica options that come from the command line rather than the file.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub role: Role,
    /// Base worker identity; `None` falls back to `[worker].worker_id`, then a
    /// generated `{hostname}-{uuid prefix}`.
    pub worker_id: Option<String>,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            role: Role::All,
            worker_id: None,
        }
    }
}

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: TraplineConfig,
    config_path: Option<PathBuf>,
    role: Role,
    worker_id: String,
    modules: ModuleRegistry,
    shutdown_tx: broadcast::Sender<()>,
    forwarder_tx: Option<watch::Sender<ForwarderConfig>>,
    start_time: Instant,
}

impl Orchestrator {
    /// Load `trapline.toml` (with environment overrides) and build.
    ///
    /// The path is remembered for config hot reload.
    pub async fn build(config_path: &Path, options: DaemonOptions) -> Result<Self> {
        let config = TraplineConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        let mut orchestrator = Self::build_from_config(config, options).await?;
        orchestrator.config_path = Some(config_path.to_path_buf());
        Ok(orchestrator)
    }

    /// Build from an already-loaded configuration. Hot reload stays off
    /// unless [`with_config_path`](Self::with_config_path) is called.
    pub async fn build_from_config(config: TraplineConfig, options: DaemonOptions) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let worker_id = options
            .worker_id
            .clone()
            .or_else(|| (!config.worker.worker_id.is_empty()).then(|| config.worker.worker_id.clone()))
            .unwrap_or_else(generate_worker_id);

        let (forwarder_tx, forwarder_rx) = watch::channel(config.forwarder.clone());
        let modules = build_modules(&config, options.role, &worker_id, forwarder_rx).await?;
        if modules.enabled_count() == 0 {
            return Err(anyhow::anyhow!(
                "no modules enabled for role '{}': check [matcher].enabled and [forwarder].enabled",
                options.role
            ));
        }

        let (shutdown_tx, _) = broadcast::channel(4);

        tracing::info!(
            role = %options.role,
            worker_id = %worker_id,
            backend = %config.store.backend,
            modules = ?modules.names(),
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            config_path: None,
            role: options.role,
            worker_id,
            modules,
            shutdown_tx,
            forwarder_tx: Some(forwarder_tx),
            start_time: Instant::now(),
        })
    }

    /// Enable config hot reload from `path`.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Run until SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Start modules, report health until `shutdown` resolves, then stop.
    ///
    /// `shutdown` yields the name of the trigger for logging.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        let _pid_file = if self.config.general.pid_file.is_empty() {
            None
        } else {
            Some(PidFile::create(&self.config.general.pid_file)?)
        };

        self.modules.start_all().await?;
        record_build_info(self.role);

        let mut reload_task = self.spawn_reload();
        let mut ticker = tokio::time::interval(HEALTH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(role = %self.role, worker_id = %self.worker_id, "trapline daemon running");
        let trigger = loop {
            tokio::select! {
                trigger = &mut shutdown => break trigger,
                _ = ticker.tick() => self.report_health().await,
            }
        };

        match &trigger {
            Ok(signal) => tracing::info!(signal, "shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "shutdown signal handling failed, stopping"),
        }

        metrics::gauge!(m::DAEMON_READY).set(0.0);
        let _ = self.shutdown_tx.send(());
        if let Some(task) = reload_task.take() {
            let _ = task.await;
        }

        tracing::info!("stopping all modules");
        self.modules.stop_all().await?;
        tracing::info!("trapline daemon shut down");

        trigger.map(|_| ())
    }

    /// Current aggregated health.
    pub async fn health(&self) -> DaemonHealth {
        let modules: Vec<ModuleHealth> = self
            .modules
            .health_statuses()
            .await
            .into_iter()
            .map(|(name, enabled, status)| ModuleHealth {
                name,
                enabled,
                status,
            })
            .collect();

        DaemonHealth {
            status: aggregate_status(&modules),
            uptime_secs: self.start_time.elapsed().as_secs(),
            modules,
        }
    }

    pub fn config(&self) -> &TraplineConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Base worker identity for this replica.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Registered module names in start order.
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.names()
    }

    async fn report_health(&self) {
        let health = self.health().await;

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(health.uptime_secs as f64);
        metrics::gauge!(m::DAEMON_READY).set(if health.is_ready() { 1.0 } else { 0.0 });

        match &health.status {
            trapline_core::HealthStatus::Healthy => {
                tracing::debug!(uptime_secs = health.uptime_secs, "daemon healthy");
            }
            other => tracing::warn!(
                status = status_label(other),
                detail = ?other,
                uptime_secs = health.uptime_secs,
                "daemon health check"
            ),
        }
    }

    fn spawn_reload(&mut self) -> Option<JoinHandle<()>> {
        let interval_secs = self.config.general.config_reload_secs;
        let path = self.config_path.clone()?;
        if interval_secs == 0 {
            tracing::debug!("config hot reload disabled");
            return None;
        }
        let tx = self.forwarder_tx.take()?;
        if tx.is_closed() {
            // 포워더가 없는 역할
            return None;
        }

        tracing::info!(path = %path.display(), interval_secs, "config hot reload enabled");
        Some(reload::spawn_config_reload(
            path,
            Duration::from_secs(interval_secs),
            tx,
            self.shutdown_tx.subscribe(),
        ))
    }
}

/// Pick the store backend and build the modules on top of it.
async fn build_modules(
    config: &TraplineConfig,
    role: Role,
    worker_id: &str,
    forwarder_rx: watch::Receiver<ForwarderConfig>,
) -> Result<ModuleRegistry> {
    match config.store.backend.as_str() {
        "memory" => {
            tracing::warn!(
                "using in-memory store: state is not shared with other replicas and is lost on exit"
            );
            register_modules(config, Arc::new(MemoryStore::new()), role, worker_id, forwarder_rx)
        }
        "redis" => {
            let store = connect_redis(&config.store.url).await?;
            register_modules(config, store, role, worker_id, forwarder_rx)
        }
        other => Err(anyhow::anyhow!("unknown store backend '{}'", other)),
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str) -> Result<Arc<trapline_store::RedisStore>> {
    let store = trapline_store::RedisStore::connect(url)
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to redis store: {}", e))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_url: &str) -> Result<Arc<MemoryStore>> {
    Err(anyhow::anyhow!(
        "store backend 'redis' requested but trapline-daemon was built without redis support"
    ))
}

/// Register the role's modules over `store`, matcher first.
fn register_modules<S: SharedStore>(
    config: &TraplineConfig,
    store: Arc<S>,
    role: Role,
    worker_id: &str,
    forwarder_rx: watch::Receiver<ForwarderConfig>,
) -> Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();

    if role.runs_matcher() {
        if let Some(handle) = modules::matcher::init(config, Arc::clone(&store), worker_id)? {
            registry.register(handle);
        }
    } else {
        tracing::info!(role = %role, "matcher not run by this role");
    }

    if role.runs_forwarder() {
        if let Some(handle) = modules::forwarder::init(config, store, worker_id, forwarder_rx)? {
            registry.register(handle);
        }
    } else {
        tracing::info!(role = %role, "forwarder not run by this role");
    }

    Ok(registry)
}

/// Wait for SIGTERM or SIGINT and return its name.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

fn record_build_info(role: Role) {
    metrics::gauge!(
        m::DAEMON_BUILD_INFO,
        "version" => env!("CARGO_PKG_VERSION"),
        "role" => role.as_str()
    )
    .set(1.0);
}
