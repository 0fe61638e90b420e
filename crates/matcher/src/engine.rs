//! 매칭 엔진 모듈 -- 수집 큐 워커 하나와 규칙 캐시의 생명주기를 관리합니다.
//!
//! [`MatchingEngine`]은 core의 [`Pipeline`] trait을 구현하여
//! `trapline-daemon`에서 포워더와 같은 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! ingest queue -> Worker<MatchProcessor> -> audit sink
//!                                       \-> alerts queue
//! rules channel / timer -> RuleCache (ArcSwap)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trapline_core::config::{MatcherConfig, QueueConfig, TraplineConfig, WorkerConfig};
use trapline_core::error::{PipelineError, TraplineError};
use trapline_core::pipeline::{HealthStatus, Pipeline};
use trapline_queue::{
    QueueError, Worker, WorkerSettings, WorkerStats, WorkerStatus, generate_worker_id,
};
use trapline_store::SharedStore;

use crate::audit::{AuditSink, JsonlAuditSink};
use crate::error::MatcherError;
use crate::processor::{MatchProcessor, MatchSettings};
use crate::snapshot::RuleCache;
use crate::source::{DirectoryRuleSource, RuleSource};

/// `start`가 워커 준비를 기다리는 최대 시간
const STARTUP_WAIT: Duration = Duration::from_secs(30);

/// 엔진 실행 상태
#[derive(Debug, Clone, PartialEq, Eq)]
enum EngineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 규칙 매칭 엔진
///
/// # 사용 예시
/// ```ignore
/// let mut engine = MatchingEngineBuilder::new(store)
///     .config(&config)
///     .worker_id("node-a-matcher")
///     .build()?;
/// engine.start().await?;
/// ```
pub struct MatchingEngine<S, R, A> {
    store: Arc<S>,
    source: Arc<R>,
    audit: Arc<A>,
    cache: Arc<RuleCache>,
    worker: WorkerSettings,
    settings: MatchSettings,
    state: EngineState,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<Result<WorkerStats, QueueError>>>,
    status: Option<watch::Receiver<WorkerStatus>>,
}

impl<S, R, A> MatchingEngine<S, R, A>
where
    S: SharedStore,
    R: RuleSource,
    A: AuditSink,
{
    /// 현재 상태 이름
    pub fn state_name(&self) -> &str {
        match self.state {
            EngineState::Initialized => "initialized",
            EngineState::Running => "running",
            EngineState::Stopped => "stopped",
        }
    }

    /// 워커 ID
    pub fn worker_id(&self) -> &str {
        &self.worker.worker_id
    }

    /// 규칙 캐시 (현재 스냅샷 조회용)
    pub fn cache(&self) -> Arc<RuleCache> {
        Arc::clone(&self.cache)
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

impl<S, R, A> Pipeline for MatchingEngine<S, R, A>
where
    S: SharedStore,
    R: RuleSource,
    A: AuditSink,
{
    async fn start(&mut self) -> Result<(), TraplineError> {
        if self.state == EngineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        tracing::info!(
            worker_id = %self.worker.worker_id,
            queue = %self.worker.queue,
            alerts = %self.settings.alerts_queue,
            "starting matching engine"
        );

        let processor = MatchProcessor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.source),
            Arc::clone(&self.audit),
            Arc::clone(&self.cache),
            self.settings.clone(),
        );
        let (worker, mut status) = Worker::new(Arc::clone(&self.store), processor, self.worker.clone());
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
                // 상태 송신측이 사라짐: 워커가 이미 종료됨
                self.cancel = None;
                let reason = match self.join_worker().await {
                    Some(Err(e)) => e.to_string(),
                    _ => "matching worker exited during startup".to_owned(),
                };
                return Err(PipelineError::InitFailed(reason).into());
            }
            Err(_) => {
                tracing::warn!(
                    worker_id = %self.worker.worker_id,
                    waited_secs = STARTUP_WAIT.as_secs(),
                    "matching worker not ready yet, continuing startup"
                );
            }
        }

        self.status = Some(status);
        self.state = EngineState::Running;
        tracing::info!(
            generation = self.cache.load().generation(),
            rules = self.cache.load().active_count(),
            "matching engine started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TraplineError> {
        if self.state != EngineState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!(worker_id = %self.worker.worker_id, "stopping matching engine");

        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        let result = self.join_worker().await;
        self.status = None;
        self.state = EngineState::Stopped;

        match result {
            Some(Ok(stats)) => {
                tracing::info!(
                    processed = stats.processed,
                    completed = stats.completed,
                    retried = stats.retried,
                    dead_lettered = stats.dead_lettered,
                    "matching engine stopped"
                );
                Ok(())
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            EngineState::Running => match &self.status {
                Some(rx) => rx.borrow().health(),
                None => HealthStatus::Unhealthy("worker status unavailable".to_owned()),
            },
            EngineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            EngineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 매칭 엔진 빌더
pub struct MatchingEngineBuilder<S> {
    store: Arc<S>,
    worker: WorkerConfig,
    queues: QueueConfig,
    matcher: MatcherConfig,
    worker_id: Option<String>,
}

impl<S: SharedStore> MatchingEngineBuilder<S> {
    /// 새 빌더를 생성합니다.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            worker: WorkerConfig::default(),
            queues: QueueConfig::default(),
            matcher: MatcherConfig::default(),
            worker_id: None,
        }
    }

    /// 통합 설정에서 `[worker]`, `[queues]`, `[matcher]` 섹션을 가져옵니다.
    pub fn config(mut self, config: &TraplineConfig) -> Self {
        self.worker = config.worker.clone();
        self.queues = config.queues.clone();
        self.matcher = config.matcher.clone();
        self
    }

    /// 워커 ID를 지정합니다. 지정하지 않으면 `[worker].worker_id` 또는 자동 생성 값을 씁니다.
    pub fn worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = Some(id.into());
        self
    }

    /// 디렉토리 규칙 출처와 JSONL 감사 저장소로 엔진을 빌드합니다.
    pub fn build(
        self,
    ) -> Result<MatchingEngine<S, DirectoryRuleSource, JsonlAuditSink>, MatcherError> {
        let source = DirectoryRuleSource::from_config(&self.matcher);
        let audit = JsonlAuditSink::new(&self.matcher.audit_path);
        self.build_with(source, audit)
    }

    /// 규칙 출처와 감사 저장소를 직접 지정해 엔진을 빌드합니다.
    pub fn build_with<R, A>(
        self,
        source: R,
        audit: A,
    ) -> Result<MatchingEngine<S, R, A>, MatcherError>
    where
        R: RuleSource,
        A: AuditSink,
    {
        if self.matcher.unhandled_threshold == 0 {
            return Err(MatcherError::Config {
                field: "unhandled_threshold".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.matcher.unhandled_window_secs == 0 {
            return Err(MatcherError::Config {
                field: "unhandled_window_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        let worker_id = self
            .worker_id
            .or_else(|| (!self.worker.worker_id.is_empty()).then(|| self.worker.worker_id.clone()))
            .unwrap_or_else(generate_worker_id);
        let worker = WorkerSettings::from_config(
            &self.worker,
            worker_id,
            &self.queues.ingest,
            &self.queues.dead_letter,
        );

        Ok(MatchingEngine {
            store: self.store,
            source: Arc::new(source),
            audit: Arc::new(audit),
            cache: Arc::new(RuleCache::new()),
            worker,
            settings: MatchSettings::from_config(&self.matcher, &self.queues),
            state: EngineState::Initialized,
            cancel: None,
            task: None,
            status: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::source::MemoryRuleSource;
    use trapline_store::MemoryStore;

    fn builder() -> MatchingEngineBuilder<MemoryStore> {
        let mut config = TraplineConfig::default();
        config.worker.dequeue_timeout_ms = 10;
        MatchingEngineBuilder::new(Arc::new(MemoryStore::new()))
            .config(&config)
            .worker_id("test-matcher")
    }

    #[test]
    fn builder_creates_engine() {
        let engine = builder()
            .build_with(MemoryRuleSource::default(), MemoryAuditSink::new())
            .unwrap();
        assert_eq!(engine.state_name(), "initialized");
        assert_eq!(engine.worker_id(), "test-matcher");
    }

    #[test]
    fn builder_rejects_zero_threshold() {
        let mut config = TraplineConfig::default();
        config.matcher.unhandled_threshold = 0;
        let result = MatchingEngineBuilder::new(Arc::new(MemoryStore::new()))
            .config(&config)
            .build_with(MemoryRuleSource::default(), MemoryAuditSink::new());
        assert!(matches!(result, Err(MatcherError::Config { .. })));
    }

    #[tokio::test]
    async fn engine_lifecycle() {
        let mut engine = builder()
            .build_with(MemoryRuleSource::default(), MemoryAuditSink::new())
            .unwrap();

        assert!(engine.health_check().await.is_unhealthy());
        assert!(engine.stop().await.is_err());

        engine.start().await.unwrap();
        assert_eq!(engine.state_name(), "running");
        assert!(engine.health_check().await.is_healthy());
        assert_eq!(engine.cache().load().generation(), 1);
        assert!(engine.start().await.is_err());

        engine.stop().await.unwrap();
        assert_eq!(engine.state_name(), "stopped");
        assert!(engine.health_check().await.is_unhealthy());
    }

    #[tokio::test]
    async fn unreadable_rule_dir_fails_start() {
        let mut engine = builder()
            .build_with(
                DirectoryRuleSource::new("/nonexistent/trapline/rules"),
                MemoryAuditSink::new(),
            )
            .unwrap();

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, TraplineError::Pipeline(PipelineError::InitFailed(_))));
        assert_eq!(engine.state_name(), "initialized");
    }
}
