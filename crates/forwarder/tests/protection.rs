//! 다운스트림 보호 계층 통합 테스트: 전역 rate bound, 브레이커 전이, 포워더 전체 흐름

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use trapline_core::config::TraplineConfig;
use trapline_core::envelope::DeadLetterRecord;
use trapline_core::pipeline::Pipeline;
use trapline_core::types::FailureClass;
use trapline_forwarder::{
    BreakerPolicy, CircuitBreaker, ForwarderBuilder, RateLimiter, ScriptedWebhookClient,
    WebhookResponse,
};
use trapline_store::{CircuitPermit, CircuitState, MemoryStore, SharedStore};

const LIMIT: u64 = 10;
const WINDOW_MS: u64 = 1_000;

#[tokio::test]
async fn replicas_never_exceed_global_limit_per_window() {
    // Given: 공유 스토어 하나에 레플리카 5개
    let store = Arc::new(MemoryStore::new());
    let replicas: Vec<RateLimiter<MemoryStore>> =
        (0..5).map(|_| RateLimiter::new(Arc::clone(&store))).collect();
    let mut accepted = Vec::new();

    // When: 3개 윈도우 동안 10ms 간격으로 모든 레플리카가 동시에 두 번씩 요청
    for now in (0..3 * WINDOW_MS).step_by(10) {
        let mut round = JoinSet::new();
        for limiter in &replicas {
            let limiter = limiter.clone();
            round.spawn(async move {
                let mut hits = 0;
                for _ in 0..2 {
                    if limiter
                        .allow_at("hook", LIMIT, Duration::from_millis(WINDOW_MS), now)
                        .await
                        .unwrap()
                    {
                        hits += 1;
                    }
                }
                hits
            });
        }
        while let Some(hits) = round.join_next().await {
            for _ in 0..hits.unwrap() {
                accepted.push(now);
            }
        }
    }

    // Then: 어떤 (t - W, t] 구간에서도 허용 수 <= LIMIT
    for &t in &accepted {
        let in_window = accepted
            .iter()
            .filter(|&&a| a + WINDOW_MS > t && a <= t)
            .count() as u64;
        assert!(in_window <= LIMIT, "window ending at {t} accepted {in_window}");
    }
    assert_eq!(accepted.len() as u64, 3 * LIMIT);
}

#[tokio::test]
async fn exactly_one_probe_among_concurrent_callers() {
    let store = Arc::new(MemoryStore::new());
    let policy = BreakerPolicy {
        key: "hook".to_owned(),
        threshold: 3,
        open_for: Duration::from_secs(5),
        probe_timeout: Duration::from_secs(10),
    };
    let breaker = CircuitBreaker::new(Arc::clone(&store));

    // threshold 연속 실패 -> Open
    for _ in 0..3 {
        breaker.record_failure(&policy, 1_000).await.unwrap();
    }
    assert_eq!(breaker.state(&policy).await.unwrap().state, CircuitState::Open);

    // open_until 이전: 모두 거부
    assert!(matches!(
        breaker.acquire(&policy, 5_999).await.unwrap(),
        CircuitPermit::Reject { .. }
    ));

    // open_until 이후 동시 호출 20개 중 probe는 하나
    let mut callers = JoinSet::new();
    for _ in 0..20 {
        let breaker = breaker.clone();
        let policy = policy.clone();
        callers.spawn(async move { breaker.acquire(&policy, 6_000).await.unwrap() });
    }
    let mut probes = 0;
    while let Some(permit) = callers.join_next().await {
        if permit.unwrap() == CircuitPermit::Probe {
            probes += 1;
        }
    }
    assert_eq!(probes, 1);

    // probe 성공 -> Closed, 카운터 초기화
    breaker.record_success(&policy).await.unwrap();
    let state = breaker.state(&policy).await.unwrap();
    assert_eq!(state.state, CircuitState::Closed);
    assert_eq!(state.failures, 0);
}

fn config() -> TraplineConfig {
    let mut config = TraplineConfig::default();
    config.worker.dequeue_timeout_ms = 10;
    config.worker.backoff_base_ms = 1;
    config.worker.backoff_max_ms = 5;
    config.worker.max_retries = 2;
    config.forwarder.webhook_url = "http://alerts.example/hook".to_owned();
    config
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn forwarder_delivers_alert_queue() {
    let store = Arc::new(MemoryStore::new());
    let config = config();
    let client = Arc::new(ScriptedWebhookClient::new());
    for n in 0..3 {
        let alert = serde_json::json!({ "kind": "rule_match", "correlation_id": format!("evt-{n}") });
        store.push(&config.queues.alerts, &alert.to_string()).await.unwrap();
    }

    let mut forwarder = ForwarderBuilder::new(Arc::clone(&store))
        .config(&config)
        .worker_id("f-1")
        .build_with(Arc::clone(&client))
        .unwrap();
    forwarder.start().await.unwrap();
    wait_until(|| async { client.calls() == 3 }).await;
    forwarder.stop().await.unwrap();

    let ids: Vec<String> = client
        .requests()
        .into_iter()
        .map(|r| r.correlation_id)
        .collect();
    assert_eq!(ids, vec!["evt-0", "evt-1", "evt-2"]);
    assert_eq!(store.len(&config.queues.alerts).await.unwrap(), 0);
    assert_eq!(store.len(&config.queues.dead_letter).await.unwrap(), 0);
}

#[tokio::test]
async fn rejected_alert_is_dead_lettered_with_classification() {
    let store = Arc::new(MemoryStore::new());
    let config = config();
    let client = Arc::new(ScriptedWebhookClient::new());
    client.set_fallback(Ok(WebhookResponse::status(400)));
    store
        .push(&config.queues.alerts, r#"{"kind":"rule_match","correlation_id":"evt-bad"}"#)
        .await
        .unwrap();

    let mut forwarder = ForwarderBuilder::new(Arc::clone(&store))
        .config(&config)
        .worker_id("f-1")
        .build_with(Arc::clone(&client))
        .unwrap();
    forwarder.start().await.unwrap();
    wait_until(|| async { store.len(&config.queues.dead_letter).await.unwrap() == 1 }).await;
    forwarder.stop().await.unwrap();

    let parked = store.range(&config.queues.dead_letter, 0, 10).await.unwrap();
    let record = DeadLetterRecord::decode(&parked[0]).unwrap();
    assert_eq!(record.reason, "downstream_rejected");
    assert_eq!(record.classification, FailureClass::TerminalContent);
    assert_eq!(record.attempts, 1);
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn exhausted_downstream_retries_are_dead_lettered() {
    let store = Arc::new(MemoryStore::new());
    let mut config = config();
    // 브레이커가 재시도를 막지 않도록 임계치를 높게
    config.forwarder.circuit_threshold = 100;
    let client = Arc::new(ScriptedWebhookClient::new());
    client.set_fallback(Ok(WebhookResponse::status(502)));
    store
        .push(&config.queues.alerts, r#"{"kind":"rule_match","correlation_id":"evt-5xx"}"#)
        .await
        .unwrap();

    let mut forwarder = ForwarderBuilder::new(Arc::clone(&store))
        .config(&config)
        .worker_id("f-1")
        .build_with(Arc::clone(&client))
        .unwrap();
    forwarder.start().await.unwrap();
    wait_until(|| async { store.len(&config.queues.dead_letter).await.unwrap() == 1 }).await;
    forwarder.stop().await.unwrap();

    let parked = store.range(&config.queues.dead_letter, 0, 10).await.unwrap();
    let record = DeadLetterRecord::decode(&parked[0]).unwrap();
    assert_eq!(record.reason, "downstream_unavailable");
    assert_eq!(record.classification, FailureClass::TransientDownstream);
    assert_eq!(record.attempts, 3);
    assert_eq!(client.calls(), 3);
}
