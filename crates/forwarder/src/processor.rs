//! 전달 처리기 -- 알림 큐 워커에 끼우는 `Forward(envelope)`
//!
//! 한 알림의 처리 순서:
//! 1. 서킷 브레이커 권한 획득 (Open이면 `circuit_open`으로 재적재)
//! 2. 전역 rate limiter 검사 (거부되면 `rate_limited`로 재적재, probe 권한은 반납)
//! 3. webhook 호출 후 결과 분류
//!
//! 1, 2의 재적재는 흐름 제어이므로 `retry_count`를 올리지 않습니다.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use trapline_core::config::ForwarderConfig;
use trapline_core::envelope::Envelope;
use trapline_core::metrics as m;
use trapline_core::types::{FailureClass, now_millis};
use trapline_queue::{Outcome, ProcessError, Processor};
use trapline_store::{CircuitPermit, SharedStore};

use crate::breaker::{BreakerPolicy, CircuitBreaker};
use crate::classify::{Classification, classify};
use crate::client::{WebhookClient, WebhookRequest};
use crate::limiter::RateLimiter;
use crate::settings::ForwarderSettings;

/// 알림 전달 [`Processor`]
pub struct ForwardProcessor<S, C> {
    limiter: RateLimiter<S>,
    breaker: CircuitBreaker<S>,
    client: Arc<C>,
    settings: ForwarderSettings,
    updates: Option<watch::Receiver<ForwarderConfig>>,
}

impl<S: SharedStore, C: WebhookClient> ForwardProcessor<S, C> {
    /// 새 처리기를 생성합니다.
    pub fn new(store: Arc<S>, client: Arc<C>, settings: ForwarderSettings) -> Self {
        Self {
            limiter: RateLimiter::new(Arc::clone(&store)),
            breaker: CircuitBreaker::new(store),
            client,
            settings,
            updates: None,
        }
    }

    /// 설정 핫 리로드 채널을 연결합니다.
    pub fn with_updates(mut self, updates: watch::Receiver<ForwarderConfig>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// 현재 적용 중인 설정
    pub fn settings(&self) -> &ForwarderSettings {
        &self.settings
    }

    fn policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            key: self.settings.circuit_key.clone(),
            threshold: self.settings.circuit_threshold,
            open_for: self.settings.circuit_timeout,
            probe_timeout: self.settings.probe_timeout(),
        }
    }

    async fn apply_updates(&mut self) {
        let Some(updates) = self.updates.as_mut() else {
            return;
        };
        match updates.has_changed() {
            Ok(true) => {}
            Ok(false) => return,
            Err(_) => {
                tracing::debug!("forwarder settings channel closed");
                self.updates = None;
                return;
            }
        }
        let config = updates.borrow_and_update().clone();

        match ForwarderSettings::resolve(&config).await {
            Ok(settings) if settings == self.settings => {}
            Ok(settings) => {
                tracing::info!(
                    webhook_url = %settings.webhook_url,
                    rate_limit = settings.rate_limit,
                    rate_window_secs = settings.rate_window.as_secs(),
                    circuit_threshold = settings.circuit_threshold,
                    circuit_timeout_secs = settings.circuit_timeout.as_secs(),
                    "forwarder settings reloaded"
                );
                self.settings = settings;
            }
            Err(e) => {
                tracing::warn!(error = %e, "rejected forwarder settings update, keeping previous");
            }
        }
    }

    async fn release_probe(&self, policy: &BreakerPolicy) {
        if let Err(e) = self.breaker.release_probe(policy).await {
            tracing::warn!(key = %policy.key, error = %e, "failed to release probe claim");
        }
    }
}

impl<S: SharedStore, C: WebhookClient> Processor for ForwardProcessor<S, C> {
    fn name(&self) -> &'static str {
        "forwarder"
    }

    async fn process(&mut self, envelope: &Envelope) -> Result<Outcome, ProcessError> {
        let body = match serde_json::to_string(&envelope.payload) {
            Ok(body) => body,
            Err(e) => {
                return Ok(Outcome::dead_letter(
                    FailureClass::TerminalContent,
                    "malformed_payload",
                    e,
                ));
            }
        };
        let correlation_id = match envelope.correlation_id() {
            Some(id) => id.to_owned(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                tracing::debug!(correlation_id = %id, "alert without correlation id, generated one");
                id
            }
        };

        let policy = self.policy();
        let now = now_millis();
        let probing = match self.breaker.acquire(&policy, now).await {
            Ok(CircuitPermit::Allow) => false,
            Ok(CircuitPermit::Probe) => true,
            Ok(CircuitPermit::Reject { retry_at_ms }) => {
                metrics::counter!(m::FORWARDER_REQUESTS_TOTAL, m::LABEL_RESULT => "circuit_open")
                    .increment(1);
                return Ok(Outcome::defer(
                    "circuit_open",
                    Duration::from_millis(retry_at_ms.saturating_sub(now)),
                ));
            }
            Err(e) => {
                return Ok(Outcome::retry(
                    FailureClass::TransientInfrastructure,
                    "store_unavailable",
                    e,
                ));
            }
        };

        match self
            .limiter
            .allow(
                &self.settings.rate_limit_key,
                self.settings.rate_limit,
                self.settings.rate_window,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                if probing {
                    self.release_probe(&policy).await;
                }
                metrics::counter!(m::FORWARDER_REQUESTS_TOTAL, m::LABEL_RESULT => "rate_limited")
                    .increment(1);
                return Ok(Outcome::defer("rate_limited", Duration::ZERO));
            }
            Err(e) => {
                if probing {
                    self.release_probe(&policy).await;
                }
                return Ok(Outcome::retry(
                    FailureClass::TransientInfrastructure,
                    "store_unavailable",
                    e,
                ));
            }
        }

        let request = WebhookRequest {
            url: self.settings.webhook_url.clone(),
            token: self.settings.token.clone(),
            correlation_id: correlation_id.clone(),
            body,
            timeout: self.settings.request_timeout,
        };
        let started = Instant::now();
        let result = self.client.send(&request).await;
        metrics::histogram!(m::FORWARDER_REQUEST_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let classification = classify(&result);
        metrics::counter!(m::FORWARDER_REQUESTS_TOTAL, m::LABEL_RESULT => classification.label())
            .increment(1);

        let recorded = if classification.trips_breaker() {
            self.breaker.record_failure(&policy, now_millis()).await
        } else {
            self.breaker.record_success(&policy).await
        };
        if let Err(e) = recorded {
            tracing::warn!(key = %policy.key, error = %e, "failed to record circuit outcome");
        }

        Ok(match classification {
            Classification::Delivered { status } => {
                tracing::debug!(correlation_id = %correlation_id, status, probing, "alert delivered");
                Outcome::Complete
            }
            Classification::Retryable {
                reason,
                error,
                retry_after,
            } => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    reason,
                    error = %error,
                    probing,
                    "webhook delivery failed, will retry"
                );
                Outcome::Retry {
                    class: FailureClass::TransientDownstream,
                    reason: reason.to_owned(),
                    error,
                    min_delay: retry_after,
                    annotations: Default::default(),
                }
            }
            Classification::Terminal { reason, error } => Outcome::dead_letter(
                FailureClass::TerminalContent,
                reason,
                error,
            ),
        })
    }

    async fn on_tick(&mut self) {
        self.apply_updates().await;
        let policy = self.policy();
        if let Err(e) = self.breaker.state(&policy).await {
            tracing::debug!(error = %e, "circuit state refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ScriptedWebhookClient, TransportError, WebhookResponse};
    use trapline_store::{CircuitState, MemoryStore};

    fn config() -> ForwarderConfig {
        ForwarderConfig {
            webhook_url: "http://alerts.example/hook".to_owned(),
            webhook_token: "s3cret".to_owned(),
            rate_limit: 100,
            rate_window_secs: 60,
            circuit_threshold: 2,
            circuit_timeout_secs: 30,
            ..ForwarderConfig::default()
        }
    }

    async fn processor(
        config: &ForwarderConfig,
    ) -> (
        ForwardProcessor<MemoryStore, ScriptedWebhookClient>,
        Arc<MemoryStore>,
        Arc<ScriptedWebhookClient>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(ScriptedWebhookClient::new());
        let settings = ForwarderSettings::resolve(config).await.unwrap();
        let p = ForwardProcessor::new(Arc::clone(&store), Arc::clone(&client), settings);
        (p, store, client)
    }

    fn alert() -> Envelope {
        Envelope::decode(r#"{"kind":"rule_match","correlation_id":"evt-1","rule_id":5}"#).unwrap()
    }

    #[tokio::test]
    async fn delivered_alert_completes_with_headers() {
        let (mut p, _store, client) = processor(&config()).await;

        let outcome = p.process(&alert()).await.unwrap();

        assert_eq!(outcome, Outcome::Complete);
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].correlation_id, "evt-1");
        assert_eq!(requests[0].token.as_deref(), Some("s3cret"));
        let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(body["rule_id"], 5);
    }

    #[tokio::test]
    async fn server_error_retries_with_retry_after_floor() {
        let (mut p, _store, client) = processor(&config()).await;
        client.push(Ok(WebhookResponse {
            status: 503,
            retry_after: Some(Duration::from_secs(7)),
        }));

        let outcome = p.process(&alert()).await.unwrap();

        match outcome {
            Outcome::Retry {
                class, min_delay, ..
            } => {
                assert_eq!(class, FailureClass::TransientDownstream);
                assert_eq!(min_delay, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminal_rejection_dead_letters_without_tripping() {
        let (mut p, store, client) = processor(&config()).await;
        client.set_fallback(Ok(WebhookResponse::status(422)));

        for _ in 0..5 {
            let outcome = p.process(&alert()).await.unwrap();
            assert!(matches!(outcome, Outcome::DeadLetter { ref reason, .. } if reason == "downstream_rejected"));
        }
        let state = store.circuit_state("webhook").await.unwrap();
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failures, 0);
    }

    #[tokio::test]
    async fn open_circuit_defers_without_calling_webhook() {
        let (mut p, _store, client) = processor(&config()).await;
        client.push(Err(TransportError::Timeout));
        client.push(Err(TransportError::Timeout));

        p.process(&alert()).await.unwrap();
        p.process(&alert()).await.unwrap();
        let outcome = p.process(&alert()).await.unwrap();

        match outcome {
            Outcome::Defer { reason, delay } => {
                assert_eq!(reason, "circuit_open");
                assert!(delay > Duration::from_secs(25));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn rate_limited_probe_is_released() {
        let config = ForwarderConfig {
            rate_limit: 1,
            ..config()
        };
        let (mut p, store, client) = processor(&config).await;
        // 서킷을 Open으로 만들고 만료시킨 상태
        store
            .circuit_record_failure("webhook", 1, 0, 0)
            .await
            .unwrap();
        // 윈도우를 미리 채움
        store
            .rate_allow("webhook", 1, 60_000, now_millis(), "pre")
            .await
            .unwrap();

        let outcome = p.process(&alert()).await.unwrap();

        assert!(matches!(outcome, Outcome::Defer { ref reason, .. } if reason == "rate_limited"));
        assert_eq!(client.calls(), 0);
        // 반납된 probe는 다른 호출자가 즉시 얻을 수 있음
        let again = store
            .circuit_acquire("webhook", now_millis(), 10_000)
            .await
            .unwrap();
        assert_eq!(again.permit, CircuitPermit::Probe);
    }

    #[tokio::test]
    async fn settings_update_applies_on_tick() {
        let (tx, rx) = watch::channel(config());
        let (p, _store, client) = processor(&config()).await;
        let mut p = p.with_updates(rx);

        tx.send(ForwarderConfig {
            webhook_url: "http://other.example/hook".to_owned(),
            ..config()
        })
        .unwrap();
        p.on_tick().await;
        p.process(&alert()).await.unwrap();

        assert_eq!(p.settings().webhook_url, "http://other.example/hook");
        assert_eq!(client.requests()[0].url, "http://other.example/hook");
    }

    #[tokio::test]
    async fn invalid_settings_update_keeps_previous() {
        let (tx, rx) = watch::channel(config());
        let (p, _store, _client) = processor(&config()).await;
        let mut p = p.with_updates(rx);

        tx.send(ForwarderConfig {
            rate_limit: 0,
            ..config()
        })
        .unwrap();
        p.on_tick().await;

        assert_eq!(p.settings().rate_limit, 100);
    }
}
