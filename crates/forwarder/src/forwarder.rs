//! 포워더 모듈 -- 알림 큐 워커와 다운스트림 보호 계층의 생명주기를 관리합니다.
//!
//! [`Forwarder`]는 [`Pipeline`]을 구현하며, 시작 시 webhook 토큰을 해석하고
//! 알림 큐(`trapline:alerts`)를 소비하는 워커 하나를 띄웁니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trapline_core::config::{ForwarderConfig, QueueConfig, TraplineConfig, WorkerConfig};
use trapline_core::error::{PipelineError, TraplineError};
use trapline_core::pipeline::{HealthStatus, Pipeline};
use trapline_queue::{
    QueueError, Worker, WorkerSettings, WorkerStats, WorkerStatus, generate_worker_id,
};
use trapline_store::SharedStore;

use crate::client::{HttpWebhookClient, WebhookClient};
use crate::error::ForwarderError;
use crate::processor::ForwardProcessor;
use crate::settings::ForwarderSettings;

/// `start`가 워커 준비를 기다리는 최대 시간
const STARTUP_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
enum ForwarderState {
    Initialized,
    Running,
    Stopped,
}

/// 알림 포워더
pub struct Forwarder<S, C> {
    store: Arc<S>,
    client: Arc<C>,
    config: ForwarderConfig,
    worker: WorkerSettings,
    updates: Option<watch::Receiver<ForwarderConfig>>,
    state: ForwarderState,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<Result<WorkerStats, QueueError>>>,
    status: Option<watch::Receiver<WorkerStatus>>,
}

impl<S: SharedStore, C: WebhookClient> Forwarder<S, C> {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &str {
        match self.state {
            ForwarderState::Initialized => "initialized",
            ForwarderState::Running => "running",
            ForwarderState::Stopped => "stopped",
        }
    }

    /// 워커 ID
    pub fn worker_id(&self) -> &str {
        &self.worker.worker_id
    }

    /// 워커 상태 (실행 중이 아니면 `None`)
    pub fn worker_status(&self) -> Option<WorkerStatus> {
        self.status.as_ref().map(|rx| rx.borrow().clone())
    }

    async fn join_worker(&mut self) -> Option<Result<WorkerStats, QueueError>> {
        let task = self.task.take()?;
        match task.await {
            Ok(result) => Some(result),
            Err(e) => Some(Err(QueueError::Startup(format!("worker task panicked: {e}")))),
        }
    }
}

impl<S: SharedStore, C: WebhookClient> Pipeline for Forwarder<S, C> {
    async fn start(&mut self) -> Result<(), TraplineError> {
        if self.state == ForwarderState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        // 재시작 시에는 마지막으로 받은 설정을 씁니다.
        let config = match &self.updates {
            Some(rx) => rx.borrow().clone(),
            None => self.config.clone(),
        };
        let settings = ForwarderSettings::resolve(&config).await?;
        tracing::info!(
            worker_id = %self.worker.worker_id,
            queue = %self.worker.queue,
            webhook_url = %settings.webhook_url,
            rate_limit = settings.rate_limit,
            rate_window_secs = settings.rate_window.as_secs(),
            "starting forwarder"
        );

        let mut processor =
            ForwardProcessor::new(Arc::clone(&self.store), Arc::clone(&self.client), settings);
        if let Some(rx) = &self.updates {
            let mut rx = rx.clone();
            rx.mark_unchanged();
            processor = processor.with_updates(rx);
        }

        let (worker, mut status) =
            Worker::new(Arc::clone(&self.store), processor, self.worker.clone());
        let cancel = CancellationToken::new();
        self.task = Some(tokio::spawn(worker.run(cancel.clone())));
        self.cancel = Some(cancel);

        let started = tokio::time::timeout(
            STARTUP_WAIT,
            status.wait_for(|s| *s != WorkerStatus::Starting),
        )
        .await
        .map(|changed| changed.map(|current| current.clone()));

        match started {
            Ok(Ok(WorkerStatus::Failed(reason))) => {
                self.cancel = None;
                self.join_worker().await;
                return Err(PipelineError::InitFailed(reason).into());
            }
            Ok(Ok(_)) => {}
            Ok(Err(_)) => {
                self.cancel = None;
                let reason = match self.join_worker().await {
                    Some(Err(e)) => e.to_string(),
                    _ => "forwarder worker exited during startup".to_owned(),
                };
                return Err(PipelineError::InitFailed(reason).into());
            }
            Err(_) => {
                tracing::warn!(
                    worker_id = %self.worker.worker_id,
                    waited_secs = STARTUP_WAIT.as_secs(),
                    "forwarder worker not ready yet, continuing startup"
                );
            }
        }

        self.status = Some(status);
        self.state = ForwarderState::Running;
        tracing::info!(worker_id = %self.worker.worker_id, "forwarder started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TraplineError> {
        if self.state != ForwarderState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!(worker_id = %self.worker.worker_id, "stopping forwarder");
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        let result = self.join_worker().await;
        self.status = None;
        self.state = ForwarderState::Stopped;

        match result {
            Some(Ok(stats)) => {
                tracing::info!(
                    processed = stats.processed,
                    completed = stats.completed,
                    retried = stats.retried,
                    deferred = stats.deferred,
                    dead_lettered = stats.dead_lettered,
                    "forwarder stopped"
                );
                Ok(())
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            ForwarderState::Running => match &self.status {
                Some(rx) => rx.borrow().health(),
                None => HealthStatus::Unhealthy("worker status unavailable".to_owned()),
            },
            ForwarderState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            ForwarderState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 포워더 빌더
pub struct ForwarderBuilder<S> {
    store: Arc<S>,
    worker: WorkerConfig,
    queues: QueueConfig,
    forwarder: ForwarderConfig,
    worker_id: Option<String>,
    updates: Option<watch::Receiver<ForwarderConfig>>,
}

impl<S: SharedStore> ForwarderBuilder<S> {
    /// 새 빌더를 생성합니다.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            worker: WorkerConfig::default(),
            queues: QueueConfig::default(),
            forwarder: ForwarderConfig::default(),
            worker_id: None,
            updates: None,
        }
    }

    /// 통합 설정에서 `[worker]`, `[queues]`, `[forwarder]` 섹션을 가져옵니다.
    pub fn config(mut self, config: &TraplineConfig) -> Self {
        self.worker = config.worker.clone();
        self.queues = config.queues.clone();
        self.forwarder = config.forwarder.clone();
        self
    }

    /// 워커 ID를 지정합니다.
    pub fn worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = Some(id.into());
        self
    }

    /// 설정 핫 리로드 채널을 연결합니다.
    pub fn updates(mut self, updates: watch::Receiver<ForwarderConfig>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// `reqwest` 클라이언트로 빌드합니다.
    pub fn build(self) -> Result<Forwarder<S, HttpWebhookClient>, ForwarderError> {
        let client = HttpWebhookClient::new()?;
        self.build_with(client)
    }

    /// webhook 클라이언트를 직접 지정해 빌드합니다.
    pub fn build_with<C: WebhookClient>(self, client: C) -> Result<Forwarder<S, C>, ForwarderError> {
        ForwarderSettings::without_token(&self.forwarder)?;

        let worker_id = self
            .worker_id
            .or_else(|| (!self.worker.worker_id.is_empty()).then(|| self.worker.worker_id.clone()))
            .unwrap_or_else(generate_worker_id);
        let worker = WorkerSettings::from_config(
            &self.worker,
            worker_id,
            &self.queues.alerts,
            &self.queues.dead_letter,
        );

        Ok(Forwarder {
            store: self.store,
            client: Arc::new(client),
            config: self.forwarder,
            worker,
            updates: self.updates,
            state: ForwarderState::Initialized,
            cancel: None,
            task: None,
            status: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ScriptedWebhookClient;
    use trapline_store::MemoryStore;

    fn builder() -> ForwarderBuilder<MemoryStore> {
        let mut config = TraplineConfig::default();
        config.worker.dequeue_timeout_ms = 10;
        ForwarderBuilder::new(Arc::new(MemoryStore::new()))
            .config(&config)
            .worker_id("test-forwarder")
    }

    #[test]
    fn builder_rejects_invalid_forwarder_config() {
        let mut config = TraplineConfig::default();
        config.forwarder.circuit_threshold = 0;
        let result = ForwarderBuilder::new(Arc::new(MemoryStore::new()))
            .config(&config)
            .build_with(ScriptedWebhookClient::new());
        assert!(matches!(result, Err(ForwarderError::Config { .. })));
    }

    #[tokio::test]
    async fn forwarder_lifecycle() {
        let mut forwarder = builder().build_with(ScriptedWebhookClient::new()).unwrap();
        assert_eq!(forwarder.state_name(), "initialized");
        assert!(forwarder.health_check().await.is_unhealthy());

        forwarder.start().await.unwrap();
        assert_eq!(forwarder.state_name(), "running");
        assert!(forwarder.health_check().await.is_healthy());
        assert!(forwarder.start().await.is_err());

        forwarder.stop().await.unwrap();
        assert_eq!(forwarder.state_name(), "stopped");
        assert!(forwarder.stop().await.is_err());
    }

    #[tokio::test]
    async fn missing_token_file_fails_start() {
        let mut config = TraplineConfig::default();
        config.forwarder.webhook_token_file = "/nonexistent/trapline/token".to_owned();
        let mut forwarder = ForwarderBuilder::new(Arc::new(MemoryStore::new()))
            .config(&config)
            .build_with(ScriptedWebhookClient::new())
            .unwrap();

        let err = forwarder.start().await.unwrap_err();
        assert!(matches!(err, TraplineError::Pipeline(PipelineError::InitFailed(_))));
        assert_eq!(forwarder.state_name(), "initialized");
    }
}
