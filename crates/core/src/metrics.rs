//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 크레이트는 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `trapline_`
//! - 컴포넌트명: `queue_`, `worker_`, `janitor_`, `matcher_`, `forwarder_`, `circuit_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(trapline_core::metrics::WORKER_PROCESSED_TOTAL, "queue" => "ingest").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 큐 이름 레이블 키
pub const LABEL_QUEUE: &str = "queue";

/// 처리 결과 레이블 키 (complete, retry, defer, dead_letter, fail)
pub const LABEL_RESULT: &str = "result";

/// 실패 분류 레이블 키 (transient_infrastructure, terminal_content, ...)
pub const LABEL_CLASS: &str = "class";

/// 처리 방식 레이블 키 (drop, audit, alert)
pub const LABEL_HANDLING: &str = "handling";

/// 환경 레이블 키 (production, development)
pub const LABEL_ENVIRONMENT: &str = "environment";

/// 서킷 전이 대상 상태 레이블 키 (closed, open, half_open)
pub const LABEL_TO_STATE: &str = "to";

/// 모듈 레이블 키
pub const LABEL_MODULE: &str = "module";

// ─── Queue / Worker 메트릭 ─────────────────────────────────────────

/// Queue: 대기 중인 항목 수 (gauge, label: queue)
pub const QUEUE_DEPTH: &str = "trapline_queue_depth";

/// Queue: 지연 가시성 대기 항목 수 (gauge, label: queue)
pub const QUEUE_DELAYED_DEPTH: &str = "trapline_queue_delayed_depth";

/// Queue: dead-letter 큐 적재 수 (gauge, label: queue)
pub const QUEUE_DEAD_LETTER_DEPTH: &str = "trapline_queue_dead_letter_depth";

/// Worker: 처리 완료 건수 (counter, labels: queue, result)
pub const WORKER_PROCESSED_TOTAL: &str = "trapline_worker_processed_total";

/// Worker: 항목당 처리 시간 (histogram, 초, label: queue)
pub const WORKER_PROCESSING_DURATION_SECONDS: &str =
    "trapline_worker_processing_duration_seconds";

/// Worker: 재시도 스케줄 건수 (counter, labels: queue, class)
pub const WORKER_RETRIES_TOTAL: &str = "trapline_worker_retries_total";

/// Worker: 흐름 제어로 재적재된 건수 (counter, label: queue)
pub const WORKER_DEFERRED_TOTAL: &str = "trapline_worker_deferred_total";

/// Worker: dead-letter로 이동한 건수 (counter, labels: queue, class)
pub const WORKER_DEAD_LETTERED_TOTAL: &str = "trapline_worker_dead_lettered_total";

/// Worker: 이미 회수된 lease를 해제하려 한 건수 (counter, label: queue)
pub const WORKER_LEASE_LOST_TOTAL: &str = "trapline_worker_lease_lost_total";

/// Worker: heartbeat 갱신 실패 횟수 (counter, label: queue)
pub const WORKER_HEARTBEAT_FAILURES_TOTAL: &str = "trapline_worker_heartbeat_failures_total";

/// Janitor: 실행 횟수 (counter, label: queue)
pub const JANITOR_RUNS_TOTAL: &str = "trapline_janitor_runs_total";

/// Janitor: 죽은 워커로부터 회수한 항목 수 (counter, label: queue)
pub const JANITOR_RECOVERED_TOTAL: &str = "trapline_janitor_recovered_total";

// ─── Matcher 메트릭 ─────────────────────────────────────────────────

/// Matcher: 규칙에 매칭된 이벤트 수 (counter, labels: handling, environment)
pub const MATCHER_EVENTS_MATCHED_TOTAL: &str = "trapline_matcher_events_matched_total";

/// Matcher: 어떤 규칙에도 매칭되지 않은 이벤트 수 (counter)
pub const MATCHER_EVENTS_UNMATCHED_TOTAL: &str = "trapline_matcher_events_unmatched_total";

/// Matcher: 발행된 미처리 임계치 메타 알림 수 (counter)
pub const MATCHER_META_ALERTS_TOTAL: &str = "trapline_matcher_meta_alerts_total";

/// Matcher: 현재 스냅샷의 활성 규칙 수 (gauge)
pub const MATCHER_RULES_LOADED: &str = "trapline_matcher_rules_loaded";

/// Matcher: 컴파일 실패로 제외된 규칙 수 (gauge)
pub const MATCHER_RULES_EXCLUDED: &str = "trapline_matcher_rules_excluded";

/// Matcher: 현재 스냅샷 세대 번호 (gauge)
pub const MATCHER_SNAPSHOT_GENERATION: &str = "trapline_matcher_snapshot_generation";

/// Matcher: 규칙 리로드 시도 수 (counter, label: result)
pub const MATCHER_RELOADS_TOTAL: &str = "trapline_matcher_reloads_total";

// ─── Forwarder 메트릭 ───────────────────────────────────────────────

/// Forwarder: webhook 요청 수 (counter, label: result)
pub const FORWARDER_REQUESTS_TOTAL: &str = "trapline_forwarder_requests_total";

/// Forwarder: webhook 요청 지연 시간 (histogram, 초)
pub const FORWARDER_REQUEST_DURATION_SECONDS: &str =
    "trapline_forwarder_request_duration_seconds";

/// Forwarder: rate limiter가 거부한 요청 수 (counter)
pub const FORWARDER_RATE_LIMITED_TOTAL: &str = "trapline_forwarder_rate_limited_total";

/// Circuit: 현재 상태 (gauge, 0 = closed, 1 = half_open, 2 = open)
pub const CIRCUIT_STATE: &str = "trapline_circuit_state";

/// Circuit: 상태 전이 횟수 (counter, label: to)
pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "trapline_circuit_transitions_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "trapline_daemon_uptime_seconds";

/// Daemon: 준비 상태 (gauge, 1 = ready, 0 = not ready)
pub const DAEMON_READY: &str = "trapline_daemon_ready";

/// Daemon: 빌드 정보 (gauge, 항상 1, labels: version, role)
pub const DAEMON_BUILD_INFO: &str = "trapline_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 항목 처리 지연 시간 히스토그램 버킷 (초)
///
/// 100us ~ 10s 범위, 매칭은 ms 이하이고 webhook 호출은 수백 ms까지 분포
pub const PROCESSING_DURATION_BUCKETS: [f64; 10] = [
    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 10.0,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `trapline-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Queue / Worker
    describe_gauge!(QUEUE_DEPTH, "Number of items waiting in a queue");
    describe_gauge!(
        QUEUE_DELAYED_DEPTH,
        "Number of items waiting for their retry visibility time"
    );
    describe_gauge!(
        QUEUE_DEAD_LETTER_DEPTH,
        "Number of records parked in the dead-letter queue"
    );
    describe_counter!(
        WORKER_PROCESSED_TOTAL,
        "Items processed by queue workers, by outcome"
    );
    describe_histogram!(
        WORKER_PROCESSING_DURATION_SECONDS,
        "Per-item processing latency in seconds"
    );
    describe_counter!(WORKER_RETRIES_TOTAL, "Retries scheduled with backoff");
    describe_counter!(
        WORKER_DEFERRED_TOTAL,
        "Items requeued by flow control without consuming a retry"
    );
    describe_counter!(
        WORKER_DEAD_LETTERED_TOTAL,
        "Items moved to the dead-letter queue"
    );
    describe_counter!(
        WORKER_LEASE_LOST_TOTAL,
        "Releases skipped because the lease was already recovered"
    );
    describe_counter!(
        WORKER_HEARTBEAT_FAILURES_TOTAL,
        "Heartbeat renewals that failed"
    );
    describe_counter!(JANITOR_RUNS_TOTAL, "Janitor recovery passes executed");
    describe_counter!(
        JANITOR_RECOVERED_TOTAL,
        "Items recovered from dead workers' processing lists"
    );

    // Matcher
    describe_counter!(
        MATCHER_EVENTS_MATCHED_TOTAL,
        "Events matched by a rule, by handling and environment"
    );
    describe_counter!(
        MATCHER_EVENTS_UNMATCHED_TOTAL,
        "Events that matched no active rule"
    );
    describe_counter!(
        MATCHER_META_ALERTS_TOTAL,
        "Unhandled-threshold meta-alerts emitted"
    );
    describe_gauge!(MATCHER_RULES_LOADED, "Active rules in the current snapshot");
    describe_gauge!(
        MATCHER_RULES_EXCLUDED,
        "Rules excluded from the snapshot because their pattern failed to compile"
    );
    describe_gauge!(
        MATCHER_SNAPSHOT_GENERATION,
        "Generation number of the current rule snapshot"
    );
    describe_counter!(MATCHER_RELOADS_TOTAL, "Rule snapshot reload attempts");

    // Forwarder
    describe_counter!(
        FORWARDER_REQUESTS_TOTAL,
        "Webhook requests issued, by classified outcome"
    );
    describe_histogram!(
        FORWARDER_REQUEST_DURATION_SECONDS,
        "Webhook request latency in seconds"
    );
    describe_counter!(
        FORWARDER_RATE_LIMITED_TOTAL,
        "Deliveries refused by the shared rate limiter"
    );
    describe_gauge!(
        CIRCUIT_STATE,
        "Circuit breaker state (0 = closed, 1 = half-open, 2 = open)"
    );
    describe_counter!(
        CIRCUIT_TRANSITIONS_TOTAL,
        "Circuit breaker state transitions"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Trapline daemon uptime in seconds");
    describe_gauge!(DAEMON_READY, "1 when every enabled module reports ready");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version/role labels)"
    );
}
