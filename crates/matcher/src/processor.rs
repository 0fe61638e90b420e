//! 매칭 처리기 -- 큐 워커에 끼우는 이벤트별 매칭 로직
//!
//! 한 이벤트의 처리 흐름:
//! 1. 페이로드에서 [`Event`] 추출 (실패 시 `malformed_payload` 즉시 dead-letter)
//! 2. 현재 스냅샷으로 규칙 선택
//! 3. 매칭: 처리 방식에 따라 버림 / 감사 기록 / 감사 기록 + 알림 적재
//! 4. 미매칭: 호스트별 미처리 카운터를 원자적으로 증가, 처음 임계치 도달 시 meta-alert 1건
//!
//! 감사 저장소 장애는 `persistence_unavailable`로 재시도합니다.
//! 발동한 meta-alert를 적재하지 못하면 발동시킨 이벤트를 [`OWED_ALERT_FIELD`]를 붙여
//! 재시도합니다. 카운터는 이미 발동했으므로 재시도는 집계 없이 알림 적재만 이어갑니다.
//! 규칙 재로드는 변경 알림 채널과 주기 타이머 모두 워커 틱에서 같은 경로로 처리합니다.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use trapline_core::config::{MatcherConfig, QueueConfig};
use trapline_core::envelope::Envelope;
use trapline_core::metrics as m;
use trapline_core::types::{FailureClass, now_millis};
use trapline_queue::{Outcome, ProcessError, Processor};
use trapline_store::{SharedStore, ThresholdOutcome};

use crate::alert::AlertPayload;
use crate::audit::{AuditRecord, AuditSink};
use crate::error::MatcherError;
use crate::event::Event;
use crate::rule::types::Handling;
use crate::snapshot::RuleCache;
use crate::source::RuleSource;

/// 미처리 카운터 키 접두사
const UNHANDLED_KEY_PREFIX: &str = "unhandled";

/// 적재하지 못한 meta-alert를 싣고 재시도되는 이벤트의 페이로드 필드
pub const OWED_ALERT_FIELD: &str = "_owed_meta_alert";

/// 구독 재시도 간격 (실패할 때마다 두 배, 상한까지)
const RESUBSCRIBE_MIN: Duration = Duration::from_secs(1);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(60);

/// 매칭 처리 설정
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSettings {
    /// 알림 큐
    pub alerts_queue: String,
    /// 규칙 변경 알림 채널
    pub rules_channel: String,
    /// 주기적 재로드 간격 (`None`이면 알림 채널만)
    pub rule_refresh: Option<Duration>,
    /// 호스트별 미처리 임계치
    pub unhandled_threshold: u64,
    /// 미처리 집계 윈도우
    pub unhandled_window: Duration,
}

impl MatchSettings {
    /// `[matcher]`와 `[queues]` 설정으로 생성합니다.
    pub fn from_config(matcher: &MatcherConfig, queues: &QueueConfig) -> Self {
        Self {
            alerts_queue: queues.alerts.clone(),
            rules_channel: queues.rules_channel.clone(),
            rule_refresh: (matcher.rule_refresh_secs > 0)
                .then(|| Duration::from_secs(matcher.rule_refresh_secs)),
            unhandled_threshold: matcher.unhandled_threshold,
            unhandled_window: Duration::from_secs(matcher.unhandled_window_secs),
        }
    }
}

/// 규칙 매칭 [`Processor`]
pub struct MatchProcessor<S, R, A> {
    store: Arc<S>,
    source: Arc<R>,
    audit: A,
    cache: Arc<RuleCache>,
    settings: MatchSettings,
    notifications: Option<mpsc::Receiver<String>>,
    last_refresh: Instant,
    resubscribe_at: Option<Instant>,
    resubscribe_delay: Duration,
}

impl<S, R, A> MatchProcessor<S, R, A>
where
    S: SharedStore,
    R: RuleSource,
    A: AuditSink,
{
    /// 새 처리기를 생성합니다. 규칙은 `prepare`에서 처음 로드됩니다.
    pub fn new(
        store: Arc<S>,
        source: Arc<R>,
        audit: A,
        cache: Arc<RuleCache>,
        settings: MatchSettings,
    ) -> Self {
        Self {
            store,
            source,
            audit,
            cache,
            settings,
            notifications: None,
            last_refresh: Instant::now(),
            resubscribe_at: None,
            resubscribe_delay: RESUBSCRIBE_MIN,
        }
    }

    async fn subscribe(&mut self) {
        match self.store.subscribe(&self.settings.rules_channel).await {
            Ok(rx) => {
                tracing::debug!(channel = %self.settings.rules_channel, "subscribed to rule changes");
                self.notifications = Some(rx);
                self.resubscribe_at = None;
                self.resubscribe_delay = RESUBSCRIBE_MIN;
            }
            Err(e) => {
                tracing::warn!(
                    channel = %self.settings.rules_channel,
                    error = %e,
                    retry_in_secs = self.resubscribe_delay.as_secs(),
                    "rule change subscription failed, relying on periodic refresh"
                );
                self.resubscribe_at = Some(Instant::now() + self.resubscribe_delay);
                self.resubscribe_delay = self.resubscribe_delay.saturating_mul(2).min(RESUBSCRIBE_MAX);
            }
        }
    }

    async fn reload(&mut self, trigger: &'static str) {
        self.last_refresh = Instant::now();
        if let Err(e) = self.cache.refresh(self.source.as_ref(), trigger).await {
            tracing::warn!(
                trigger,
                error = %e,
                generation = self.cache.load().generation(),
                "rule reload failed, keeping previous snapshot"
            );
        }
    }

    /// 받은 변경 알림이 있는지 확인합니다. 채널이 닫혔으면 다시 구독합니다.
    async fn notified(&mut self) -> bool {
        let mut notified = false;
        let mut closed = false;
        if let Some(rx) = self.notifications.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(_) => notified = true,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }
        } else {
            closed = true;
        }

        if closed {
            self.notifications = None;
            if self.resubscribe_at.is_some_and(|at| Instant::now() < at) {
                return notified;
            }
            self.subscribe().await;
            // 끊긴 동안 놓친 알림이 있을 수 있음
            notified |= self.notifications.is_some();
        }
        notified
    }

    /// 이전 시도에서 발동했지만 적재하지 못한 meta-alert를 적재합니다.
    async fn deliver_owed(&self, owed: &str, envelope: &Envelope) -> Outcome {
        let correlation_id = envelope.correlation_id().unwrap_or("-");
        match self.store.push(&self.settings.alerts_queue, owed).await {
            Ok(()) => {
                tracing::info!(correlation_id, "owed meta-alert enqueued");
                Outcome::Complete
            }
            Err(e) => {
                tracing::warn!(correlation_id, error = %e, "owed meta-alert still not enqueued");
                Outcome::retry(FailureClass::TransientInfrastructure, "store_unavailable", e)
                    .annotate(OWED_ALERT_FIELD, owed)
            }
        }
    }

    async fn push_alert(&self, payload: &AlertPayload) -> Result<(), MatcherError> {
        let encoded = payload.to_envelope()?.encode()?;
        self.store
            .push(&self.settings.alerts_queue, &encoded)
            .await?;
        Ok(())
    }

    async fn handle(&mut self, event: &Event) -> Result<Outcome, ProcessError> {
        let snapshot = self.cache.load();
        let Some(decision) = snapshot.evaluate(event) else {
            return self.handle_unmatched(event).await;
        };

        metrics::counter!(
            m::MATCHER_EVENTS_MATCHED_TOTAL,
            m::LABEL_HANDLING => decision.handling.as_str(),
            m::LABEL_ENVIRONMENT => decision.environment.as_str()
        )
        .increment(1);

        if decision.handling == Handling::Drop {
            tracing::debug!(
                correlation_id = %event.correlation_id,
                rule_id = decision.rule.id,
                environment = %decision.environment,
                "matched event dropped"
            );
            return Ok(Outcome::Complete);
        }

        let now = Utc::now();
        let record = AuditRecord {
            event_timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            rule_id: decision.rule.id,
            correlation_id: event.correlation_id.clone(),
            hostname: event.hostname.clone(),
            handling: decision.handling,
            environment: decision.environment,
            recorded_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        if let Err(e) = self.audit.append(&record).await {
            tracing::warn!(
                correlation_id = %event.correlation_id,
                rule_id = decision.rule.id,
                error = %e,
                "audit write failed"
            );
            return Ok(Outcome::retry(
                FailureClass::TransientInfrastructure,
                "persistence_unavailable",
                e,
            ));
        }

        if decision.handling == Handling::Alert {
            let alert = AlertPayload::rule_match(event, &decision, now);
            if let Err(e) = self.push_alert(&alert).await {
                return Ok(Outcome::retry(
                    FailureClass::TransientInfrastructure,
                    "store_unavailable",
                    e,
                ));
            }
        }

        tracing::debug!(
            correlation_id = %event.correlation_id,
            rule_id = decision.rule.id,
            handling = %decision.handling,
            environment = %decision.environment,
            generation = snapshot.generation(),
            "event matched"
        );
        Ok(Outcome::Complete)
    }

    async fn handle_unmatched(&mut self, event: &Event) -> Result<Outcome, ProcessError> {
        metrics::counter!(m::MATCHER_EVENTS_UNMATCHED_TOTAL).increment(1);

        let key = format!("{UNHANDLED_KEY_PREFIX}:{}", event.host_key());
        let window_ms = self.settings.unhandled_window.as_millis() as u64;
        let outcome = match self
            .store
            .incr_threshold(&key, self.settings.unhandled_threshold, window_ms, now_millis())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                return Ok(Outcome::retry(
                    FailureClass::TransientInfrastructure,
                    "store_unavailable",
                    e,
                ));
            }
        };

        if let ThresholdOutcome::Triggered(count) = outcome {
            let alert = AlertPayload::unhandled(
                &event.hostname,
                count,
                self.settings.unhandled_threshold,
                self.settings.unhandled_window.as_secs(),
                Utc::now(),
            );
            metrics::counter!(m::MATCHER_META_ALERTS_TOTAL).increment(1);
            tracing::info!(
                hostname = %event.hostname,
                count,
                threshold = self.settings.unhandled_threshold,
                "unhandled event threshold reached"
            );

            let encoded = match alert
                .to_envelope()
                .and_then(|env| env.encode().map_err(MatcherError::from))
            {
                Ok(encoded) => encoded,
                Err(e) => {
                    tracing::error!(hostname = %event.hostname, error = %e, "failed to encode meta-alert");
                    return Ok(Outcome::Complete);
                }
            };
            // 카운터는 이미 발동됨: 알림이 큐에 들어갈 때까지 이 이벤트를 완료하지 않음
            if let Err(e) = self.store.push(&self.settings.alerts_queue, &encoded).await {
                tracing::warn!(
                    correlation_id = %event.correlation_id,
                    hostname = %event.hostname,
                    error = %e,
                    "meta-alert enqueue failed, retrying the triggering event"
                );
                return Ok(Outcome::retry(
                    FailureClass::TransientInfrastructure,
                    "store_unavailable",
                    e,
                )
                .annotate(OWED_ALERT_FIELD, encoded));
            }
        } else {
            tracing::trace!(
                correlation_id = %event.correlation_id,
                hostname = %event.hostname,
                count = outcome.count(),
                "event matched no rule"
            );
        }

        Ok(Outcome::Complete)
    }
}

impl<S, R, A> Processor for MatchProcessor<S, R, A>
where
    S: SharedStore,
    R: RuleSource,
    A: AuditSink,
{
    fn name(&self) -> &'static str {
        "matcher"
    }

    async fn prepare(&mut self) -> Result<(), ProcessError> {
        // 구독을 먼저 해야 초기 로드와 첫 알림 사이의 변경을 놓치지 않음
        self.subscribe().await;
        self.last_refresh = Instant::now();
        let snapshot = self
            .cache
            .refresh(self.source.as_ref(), "startup")
            .await
            .map_err(|e| ProcessError::new(format!("initial rule load failed: {e}")))?;
        if snapshot.active_count() == 0 {
            tracing::warn!("no active rules loaded, every event will count as unhandled");
        }
        Ok(())
    }

    async fn process(&mut self, envelope: &Envelope) -> Result<Outcome, ProcessError> {
        if let Some(owed) = envelope.payload.get(OWED_ALERT_FIELD).and_then(Value::as_str) {
            return Ok(self.deliver_owed(owed, envelope).await);
        }

        let event = match Event::from_envelope(envelope) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    correlation_id = envelope.correlation_id().unwrap_or("-"),
                    error = %e,
                    "malformed event"
                );
                return Ok(Outcome::dead_letter(
                    FailureClass::TerminalContent,
                    "malformed_payload",
                    e,
                ));
            }
        };
        if event.correlation_generated {
            tracing::debug!(
                correlation_id = %event.correlation_id,
                hostname = %event.hostname,
                "event had no correlation id, generated one"
            );
        }

        self.handle(&event).await
    }

    async fn on_tick(&mut self) {
        if self.notified().await {
            self.reload("notification").await;
        } else if self
            .settings
            .rule_refresh
            .is_some_and(|every| self.last_refresh.elapsed() >= every)
        {
            self.reload("timer").await;
        }
    }
}
