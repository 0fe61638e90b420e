//! 워커 제어 루프
//!
//! 워커 인스턴스 하나는 단일 논리 루프를 돕니다:
//! dequeue(타임아웃) → process → complete / fail → 반복.
//! dequeue 타임아웃이 스케줄링 틱 역할을 하여 지연 항목 승격, 주기적 janitor,
//! 큐 깊이 gauge, processor 틱 작업을 같은 루프에 끼워 넣습니다.
//! heartbeat 갱신만 독립 태스크로 돌고, 실패는 채널로 보고됩니다.
//!
//! # 시작 순서
//! 1. 같은 ID의 이전 인스턴스가 남긴 항목 회수
//! 2. 첫 heartbeat와 레지스트리 등록, heartbeat 태스크 스폰
//!    (이후 갱신마다 재등록)
//! 3. janitor 1회 (죽은 동료의 항목 회수)
//! 4. `Processor::prepare()`
//! 5. `Ready`
//!
//! # 종료 순서
//! cancel 발동 시 새 dequeue를 멈추고, 진행 중인 lease를 정직하게 마무리한 뒤
//! heartbeat 태스크를 멈추고 heartbeat를 지우고, 자기 processing 리스트에
//! 남은 항목을 큐로 되돌리고 레지스트리에서 빠집니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use trapline_core::config::WorkerConfig;
use trapline_core::envelope::{DeadLetterRecord, Envelope};
use trapline_core::metrics as m;
use trapline_core::pipeline::HealthStatus;
use trapline_core::types::{FailureClass, now_millis};
use trapline_store::SharedStore;

use crate::backoff::BackoffPolicy;
use crate::error::QueueError;
use crate::heartbeat::{Heartbeat, HeartbeatReport};
use crate::janitor::Janitor;
use crate::lease::Lease;
use crate::processor::{Outcome, Processor};
use crate::queue::{Disposition, ReliableQueue};

/// 틱마다 승격하는 지연 항목 최대 수
const PROMOTE_BATCH: usize = 256;

/// 이 횟수 이상 연속으로 heartbeat 갱신이 실패하면 Degraded
pub const HEARTBEAT_DEGRADED_AFTER: u32 = 3;

/// 워커 설정
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    /// 워커 ID (인스턴스마다 고유)
    pub worker_id: String,
    /// 원본 큐
    pub queue: String,
    /// dead-letter 큐
    pub dead_letter: String,
    /// heartbeat 갱신 주기
    pub heartbeat_interval: Duration,
    /// dequeue 블로킹 타임아웃 (루프 틱)
    pub dequeue_timeout: Duration,
    /// 최대 재시도 횟수
    pub max_retries: u32,
    /// 재시도 백오프
    pub backoff: BackoffPolicy,
    /// 흐름 제어 재적재 최소 지연
    pub flow_control_delay: Duration,
    /// 주기적 janitor 간격 (`None`이면 시작 시 1회만)
    pub janitor_interval: Option<Duration>,
}

impl WorkerSettings {
    /// `[worker]` 설정과 큐 이름으로 생성합니다.
    pub fn from_config(
        config: &WorkerConfig,
        worker_id: impl Into<String>,
        queue: impl Into<String>,
        dead_letter: impl Into<String>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue: queue.into(),
            dead_letter: dead_letter.into(),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            dequeue_timeout: Duration::from_millis(config.dequeue_timeout_ms),
            max_retries: config.max_retries,
            backoff: BackoffPolicy::from_config(config),
            flow_control_delay: Duration::from_millis(config.flow_control_delay_ms),
            janitor_interval: (config.janitor_interval_secs > 0)
                .then(|| Duration::from_secs(config.janitor_interval_secs)),
        }
    }
}

/// 워커 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    /// 시작 중 (janitor / prepare 전)
    Starting,
    /// 정상 처리 중
    Ready,
    /// 처리는 계속하지만 heartbeat 또는 스토어에 문제가 있음
    Degraded(String),
    /// 정상 종료됨
    Stopped,
    /// 에러로 종료됨
    Failed(String),
}

impl WorkerStatus {
    /// 데몬 health 집계용 변환
    pub fn health(&self) -> HealthStatus {
        match self {
            Self::Ready => HealthStatus::Healthy,
            Self::Starting => HealthStatus::Degraded("worker starting".to_owned()),
            Self::Degraded(reason) => HealthStatus::Degraded(reason.clone()),
            Self::Stopped => HealthStatus::Unhealthy("worker stopped".to_owned()),
            Self::Failed(reason) => HealthStatus::Unhealthy(reason.clone()),
        }
    }

    /// 상태 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Degraded(_) => "degraded",
            Self::Stopped => "stopped",
            Self::Failed(_) => "failed",
        }
    }
}

/// 워커 종료 시 반환하는 처리 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// 처리한 항목 수
    pub processed: u64,
    /// 완료
    pub completed: u64,
    /// 백오프 재시도
    pub retried: u64,
    /// 흐름 제어 재적재
    pub deferred: u64,
    /// dead-letter
    pub dead_lettered: u64,
    /// 해제 시 lease가 이미 회수되어 있던 횟수
    pub lease_lost: u64,
}

/// `{hostname}-{uuid 앞 8자}` 형식의 워커 ID를 생성합니다.
pub fn generate_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_owned())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "trapline".to_owned());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{host}-{}", &suffix[..8])
}

/// 신뢰성 큐 워커
pub struct Worker<S, P> {
    queue: ReliableQueue<S>,
    processor: P,
    settings: WorkerSettings,
    status: watch::Sender<WorkerStatus>,
    stats: WorkerStats,
    heartbeat_failures: u32,
    store_trouble: Option<String>,
    ready: bool,
}

impl<S: SharedStore, P: Processor> Worker<S, P> {
    /// 워커를 생성하고 상태 수신기를 반환합니다.
    pub fn new(
        store: Arc<S>,
        processor: P,
        settings: WorkerSettings,
    ) -> (Self, watch::Receiver<WorkerStatus>) {
        let (status, status_rx) = watch::channel(WorkerStatus::Starting);
        let queue = ReliableQueue::new(
            store,
            settings.queue.clone(),
            settings.dead_letter.clone(),
            settings.worker_id.clone(),
        );
        let worker = Self {
            queue,
            processor,
            settings,
            status,
            stats: WorkerStats::default(),
            heartbeat_failures: 0,
            store_trouble: None,
            ready: false,
        };
        (worker, status_rx)
    }

    /// 워커 설정
    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// `cancel`이 발동될 때까지 루프를 실행합니다.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<WorkerStats, QueueError> {
        tracing::info!(
            worker_id = %self.settings.worker_id,
            queue = %self.settings.queue,
            processor = self.processor.name(),
            "starting queue worker"
        );

        if let Err(e) = self.reclaim_previous_run().await {
            self.status.send_replace(WorkerStatus::Failed(e.to_string()));
            return Err(e);
        }

        let heartbeat = Heartbeat::new(
            Arc::clone(self.queue.store()),
            self.settings.queue.clone(),
            self.settings.worker_id.clone(),
            self.settings.heartbeat_interval,
        );
        if let Err(e) = heartbeat.beat().await {
            let err = QueueError::Startup(format!("initial heartbeat failed: {e}"));
            self.status.send_replace(WorkerStatus::Failed(err.to_string()));
            return Err(err);
        }
        let heartbeat_cancel = cancel.child_token();
        // 이 future가 drop되면(abort 포함) heartbeat도 멈춰야 janitor가 회수할 수 있음
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        let (heartbeat_task, mut reports) = heartbeat.spawn(heartbeat_cancel.clone());

        let result = self.serve(&cancel, &mut reports).await;

        heartbeat_cancel.cancel();
        if let Err(e) = heartbeat_task.await {
            tracing::warn!(error = %e, "heartbeat task ended abnormally");
        }
        self.deregister().await;

        match result {
            Ok(()) => {
                self.status.send_replace(WorkerStatus::Stopped);
                tracing::info!(
                    worker_id = %self.settings.worker_id,
                    processed = self.stats.processed,
                    dead_lettered = self.stats.dead_lettered,
                    "queue worker stopped"
                );
                Ok(self.stats)
            }
            Err(e) => {
                self.status.send_replace(WorkerStatus::Failed(e.to_string()));
                tracing::error!(worker_id = %self.settings.worker_id, error = %e, "queue worker failed");
                Err(e)
            }
        }
    }

    /// 같은 ID의 이전 인스턴스가 남긴 항목을 되돌립니다.
    ///
    /// 레지스트리 등록은 첫 heartbeat가 맡습니다.
    async fn reclaim_previous_run(&self) -> Result<(), QueueError> {
        let store = self.queue.store();
        let (queue, id) = (&self.settings.queue, &self.settings.worker_id);

        store.clear_heartbeat(id).await?;
        if let Some(count) = store.recover(queue, id, now_millis()).await? {
            if count > 0 {
                tracing::info!(worker_id = %id, recovered = count, "returned items left by a previous run");
            }
        }
        Ok(())
    }

    async fn deregister(&self) {
        let store = self.queue.store();
        let (queue, id) = (&self.settings.queue, &self.settings.worker_id);

        if let Err(e) = store.clear_heartbeat(id).await {
            tracing::warn!(worker_id = %id, error = %e, "failed to clear heartbeat");
        }
        match store.recover(queue, id, now_millis()).await {
            Ok(Some(count)) if count > 0 => {
                tracing::info!(worker_id = %id, returned = count, "returned unfinished items to queue");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    worker_id = %id,
                    error = %e,
                    "self-recovery failed, a peer janitor will reclaim the items"
                );
            }
        }
    }

    async fn serve(
        &mut self,
        cancel: &CancellationToken,
        reports: &mut mpsc::Receiver<HeartbeatReport>,
    ) -> Result<(), QueueError> {
        let janitor = Janitor::new(
            Arc::clone(self.queue.store()),
            self.settings.queue.clone(),
            self.settings.worker_id.clone(),
        );
        janitor.run_once().await?;

        self.processor
            .prepare()
            .await
            .map_err(|e| QueueError::Startup(format!("{} not ready: {e}", self.processor.name())))?;

        self.ready = true;
        self.refresh_status();
        tracing::info!(worker_id = %self.settings.worker_id, "queue worker ready");

        let tick = self.settings.dequeue_timeout;
        let mut last_tick: Option<Instant> = None;
        let mut last_janitor = Instant::now();

        loop {
            self.drain_reports(reports);

            if last_tick.is_none_or(|t| t.elapsed() >= tick) {
                self.tick(&janitor, &mut last_janitor).await;
                last_tick = Some(Instant::now());
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.queue.dequeue(tick) => next,
            };

            match next {
                Ok(Some(lease)) => {
                    self.handle(lease).await;
                }
                Ok(None) => {
                    self.clear_store_trouble();
                }
                Err(e) => {
                    tracing::warn!(queue = %self.settings.queue, error = %e, "dequeue failed");
                    self.set_store_trouble(format!("dequeue failed: {e}"));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(tick) => {}
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.settings.worker_id, "queue worker draining");
        Ok(())
    }

    async fn tick(&mut self, janitor: &Janitor<S>, last_janitor: &mut Instant) {
        match self.queue.promote_due(now_millis(), PROMOTE_BATCH).await {
            Ok(0) => {}
            Ok(count) => tracing::debug!(queue = %self.settings.queue, count, "promoted delayed items"),
            Err(e) => tracing::warn!(queue = %self.settings.queue, error = %e, "promote failed"),
        }

        if let Some(interval) = self.settings.janitor_interval {
            if last_janitor.elapsed() >= interval {
                if let Err(e) = janitor.run_once().await {
                    tracing::warn!(queue = %self.settings.queue, error = %e, "periodic janitor failed");
                }
                *last_janitor = Instant::now();
            }
        }

        if let Err(e) = self.queue.record_depths().await {
            tracing::debug!(error = %e, "queue depth probe failed");
        }

        self.processor.on_tick().await;
    }

    async fn handle(&mut self, lease: Lease) {
        self.stats.processed += 1;
        let envelope = match lease.envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    queue = %self.settings.queue,
                    error = %e,
                    "undecodable item, dead-lettering"
                );
                let record = self.dead_letter_record(
                    None,
                    Some(lease.raw().to_owned()),
                    FailureClass::TerminalContent,
                    "malformed_envelope",
                    1,
                    Some(e.to_string()),
                );
                self.settle(&lease, Disposition::DeadLetter(record), "dead_letter")
                    .await;
                self.record_processed("dead_letter", &lease);
                return;
            }
        };

        let correlation_id = envelope.correlation_id().unwrap_or("-").to_owned();
        let outcome = match self.processor.process(&envelope).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    processor = self.processor.name(),
                    error = %e,
                    "processing failed, requeueing"
                );
                Outcome::retry(FailureClass::Unclassified, "unhandled_processing_error", e)
            }
        };

        let (disposition, label) = self.decide(envelope, outcome, &correlation_id);
        match disposition {
            None => {
                match self.queue.complete(&lease).await {
                    Ok(true) => self.stats.completed += 1,
                    Ok(false) => self.stats.lease_lost += 1,
                    Err(e) => self.release_failed(&e),
                }
            }
            Some(disposition) => self.settle(&lease, disposition, label).await,
        }
        self.record_processed(label, &lease);
    }

    /// 처리 결과를 해제 방식으로 번역합니다. `None`은 complete.
    fn decide(
        &mut self,
        envelope: Envelope,
        outcome: Outcome,
        correlation_id: &str,
    ) -> (Option<Disposition>, &'static str) {
        match outcome {
            Outcome::Complete => (None, "complete"),
            Outcome::Retry {
                class,
                reason,
                error,
                min_delay,
                annotations,
            } => {
                let mut envelope = envelope;
                envelope.payload.extend(annotations);
                if envelope.retry_count >= self.settings.max_retries {
                    tracing::warn!(
                        correlation_id = %correlation_id,
                        attempts = envelope.retry_count + 1,
                        reason = %reason,
                        "retries exhausted, dead-lettering"
                    );
                    let attempts = envelope.retry_count.saturating_add(1);
                    let record = self.dead_letter_record(
                        Some(envelope),
                        None,
                        class,
                        &reason,
                        attempts,
                        Some(error),
                    );
                    return (Some(Disposition::DeadLetter(record)), "dead_letter");
                }

                let delay = self
                    .settings
                    .backoff
                    .delay_at_least(envelope.retry_count, min_delay.unwrap_or_default());
                tracing::info!(
                    correlation_id = %correlation_id,
                    retry_count = envelope.retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    class = %class,
                    error = %error,
                    "scheduling retry"
                );
                metrics::counter!(
                    m::WORKER_RETRIES_TOTAL,
                    m::LABEL_QUEUE => self.settings.queue.clone(),
                    m::LABEL_CLASS => class.as_str()
                )
                .increment(1);
                let disposition = Disposition::Requeue {
                    envelope: envelope.next_attempt(),
                    visible_at_ms: Some(now_millis() + delay.as_millis() as u64),
                };
                (Some(disposition), "retry")
            }
            Outcome::Defer { reason, delay } => {
                let delay = delay
                    .max(self.settings.flow_control_delay)
                    .min(self.settings.backoff.max_delay());
                tracing::debug!(
                    correlation_id = %correlation_id,
                    reason = %reason,
                    delay_ms = delay.as_millis() as u64,
                    "deferring item"
                );
                let mut deferred = envelope;
                deferred.shedding_reason = Some(reason);
                let disposition = Disposition::Requeue {
                    envelope: deferred,
                    visible_at_ms: Some(now_millis() + delay.as_millis() as u64),
                };
                (Some(disposition), "defer")
            }
            Outcome::DeadLetter {
                class,
                reason,
                error,
            } => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    class = %class,
                    reason = %reason,
                    error = %error,
                    "dead-lettering item"
                );
                let attempts = envelope.retry_count.saturating_add(1);
                let record = self.dead_letter_record(
                    Some(envelope),
                    None,
                    class,
                    &reason,
                    attempts,
                    Some(error),
                );
                (Some(Disposition::DeadLetter(record)), "dead_letter")
            }
        }
    }

    async fn settle(&mut self, lease: &Lease, disposition: Disposition, label: &'static str) {
        match self.queue.fail(lease, disposition).await {
            Ok(true) => match label {
                "retry" => self.stats.retried += 1,
                "defer" => {
                    self.stats.deferred += 1;
                    metrics::counter!(m::WORKER_DEFERRED_TOTAL, m::LABEL_QUEUE => self.settings.queue.clone())
                        .increment(1);
                }
                _ => {
                    self.stats.dead_lettered += 1;
                    metrics::counter!(m::WORKER_DEAD_LETTERED_TOTAL, m::LABEL_QUEUE => self.settings.queue.clone())
                        .increment(1);
                }
            },
            Ok(false) => self.stats.lease_lost += 1,
            Err(e) => self.release_failed(&e),
        }
    }

    fn release_failed(&mut self, err: &QueueError) {
        // lease는 processing 리스트에 남아 종료 시 자기 회수 또는 janitor가 되돌림
        tracing::error!(
            worker_id = %self.settings.worker_id,
            error = %err,
            "failed to release lease"
        );
        self.set_store_trouble(format!("release failed: {err}"));
    }

    fn record_processed(&self, label: &'static str, lease: &Lease) {
        metrics::counter!(
            m::WORKER_PROCESSED_TOTAL,
            m::LABEL_QUEUE => self.settings.queue.clone(),
            m::LABEL_RESULT => label
        )
        .increment(1);
        metrics::histogram!(
            m::WORKER_PROCESSING_DURATION_SECONDS,
            m::LABEL_QUEUE => self.settings.queue.clone()
        )
        .record(lease.elapsed().as_secs_f64());
    }

    fn dead_letter_record(
        &self,
        envelope: Option<Envelope>,
        raw: Option<String>,
        classification: FailureClass,
        reason: &str,
        attempts: u32,
        last_error: Option<String>,
    ) -> DeadLetterRecord {
        DeadLetterRecord {
            envelope: envelope.map(|mut env| {
                env.poison_reason = Some(reason.to_owned());
                env
            }),
            raw,
            classification,
            reason: reason.to_owned(),
            attempts,
            last_error,
            source_queue: self.settings.queue.clone(),
            worker_id: self.settings.worker_id.clone(),
            failed_at_ms: now_millis(),
        }
    }

    fn drain_reports(&mut self, reports: &mut mpsc::Receiver<HeartbeatReport>) {
        while let Ok(report) = reports.try_recv() {
            match report {
                HeartbeatReport::Failed { consecutive, .. } => self.heartbeat_failures = consecutive,
                HeartbeatReport::Recovered => self.heartbeat_failures = 0,
            }
        }
        self.refresh_status();
    }

    fn set_store_trouble(&mut self, reason: String) {
        self.store_trouble = Some(reason);
        self.refresh_status();
    }

    fn clear_store_trouble(&mut self) {
        if self.store_trouble.take().is_some() {
            self.refresh_status();
        }
    }

    fn refresh_status(&self) {
        if !self.ready {
            return;
        }
        let next = if self.heartbeat_failures >= HEARTBEAT_DEGRADED_AFTER {
            WorkerStatus::Degraded(format!(
                "heartbeat renewal failed {} times in a row",
                self.heartbeat_failures
            ))
        } else if let Some(reason) = &self.store_trouble {
            WorkerStatus::Degraded(reason.clone())
        } else {
            WorkerStatus::Ready
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                tracing::info!(from = current.as_str(), to = next.as_str(), "worker status changed");
                *current = next;
                true
            }
        });
    }
}
