//! 워커 프로토콜 통합 테스트: 크래시 회수, 재시도, dead-letter
//!
//! "Stalling" 프로세서는 `seq`가 7의 배수면 terminal, 나머지는 완료로 처리합니다.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trapline_core::config::WorkerConfig;
use trapline_core::envelope::{DeadLetterRecord, Envelope};
use trapline_core::types::{FailureClass, now_millis};
use trapline_queue::{
    Janitor, Outcome, ProcessError, Processor, QueueError, Worker, WorkerSettings, WorkerStats,
    WorkerStatus,
};
use trapline_store::{MemoryStore, SharedStore};

const INGEST: &str = "ingest";
const DLQ: &str = "dlq";

fn settings(worker_id: &str) -> WorkerSettings {
    let config = WorkerConfig {
        dequeue_timeout_ms: 10,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        flow_control_delay_ms: 1,
        max_retries: 3,
        ..WorkerConfig::default()
    };
    WorkerSettings::from_config(&config, worker_id, INGEST, DLQ)
}

/// 처음 `failures`번은 실패, 이후 완료
struct Flaky {
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl Processor for Flaky {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn process(&mut self, _envelope: &Envelope) -> Result<Outcome, ProcessError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(ProcessError::new("boom"))
        } else {
            Ok(Outcome::Complete)
        }
    }
}

async fn run_until<P: Processor + Sync>(
    store: &Arc<MemoryStore>,
    processor: P,
    worker_id: &str,
    done: impl Fn() -> bool,
) -> WorkerStats {
    let (worker, mut status) = Worker::new(Arc::clone(store), processor, settings(worker_id));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(worker.run(cancel.clone()));
    status
        .wait_for(|s| *s == WorkerStatus::Ready)
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();
    handle.await.unwrap().unwrap()
}

const HEARTBEAT: Duration = Duration::from_millis(50);

fn fast_heartbeat(worker_id: &str) -> WorkerSettings {
    let mut s = settings(worker_id);
    s.heartbeat_interval = HEARTBEAT;
    s
}

/// 처리 결과를 seq 단위로 모아 두는 장부
#[derive(Default)]
struct Ledger {
    settled: Mutex<HashSet<u64>>,
    completed: AtomicUsize,
    hung: AtomicUsize,
}

/// `budget`건까지는 `Sorting`처럼 처리하고 그다음 항목에서 멈춤 (`None`이면 멈추지 않음)
struct Stalling {
    budget: Option<usize>,
    ledger: Arc<Ledger>,
}

impl Processor for Stalling {
    fn name(&self) -> &'static str {
        "stalling"
    }

    async fn process(&mut self, envelope: &Envelope) -> Result<Outcome, ProcessError> {
        let seq = envelope
            .payload
            .get("seq")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ProcessError::new("missing seq"))?;

        if let Some(budget) = self.budget.as_mut() {
            if *budget == 0 {
                self.ledger.hung.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<()>().await;
            }
            *budget -= 1;
        }

        self.ledger.settled.lock().unwrap().insert(seq);
        if seq % 7 == 0 {
            return Ok(Outcome::dead_letter(
                FailureClass::TerminalContent,
                "rejected",
                format!("seq {seq}"),
            ));
        }
        self.ledger.completed.fetch_add(1, Ordering::SeqCst);
        Ok(Outcome::Complete)
    }
}

async fn wait_until(what: &str, done: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// 실행 중인 워커 태스크를 죽이고 heartbeat가 끊긴 상태로 만듭니다.
async fn crash(
    store: &MemoryStore,
    worker_id: &str,
    handle: JoinHandle<Result<WorkerStats, QueueError>>,
) {
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    // 워커 future가 drop되면 heartbeat 태스크도 멈춤; 진행 중이던 갱신이 끝날 시간을 줌
    tokio::time::sleep(HEARTBEAT).await;
    store.clear_heartbeat(worker_id).await.unwrap();
}

#[tokio::test]
async fn no_item_is_lost_across_worker_crashes() {
    // Given: 50건 적재
    let store = Arc::new(MemoryStore::new());
    for seq in 1..=50u64 {
        let payload = serde_json::json!({ "seq": seq, "hostname": "h" }).to_string();
        store.push(INGEST, &payload).await.unwrap();
    }
    let ledger = Arc::new(Ledger::default());

    // When: 워커 5개가 차례로 몇 건 처리하다 처리 도중 죽음
    for n in 0..5 {
        let id = format!("crashed-{n}");
        let processor = Stalling {
            budget: Some(4),
            ledger: Arc::clone(&ledger),
        };
        let (worker, mut status) = Worker::new(Arc::clone(&store), processor, fast_heartbeat(&id));
        let handle = tokio::spawn(worker.run(CancellationToken::new()));
        status
            .wait_for(|s| *s == WorkerStatus::Ready)
            .await
            .unwrap();
        wait_until("worker to stall", || ledger.hung.load(Ordering::SeqCst) > n).await;
        assert_eq!(store.processing(INGEST, &id).await.unwrap().len(), 1);

        crash(&store, &id, handle).await;
    }
    assert_eq!(ledger.settled.lock().unwrap().len(), 20);

    // 마지막 워커가 janitor 회수 후 남은 백로그를 모두 처리
    let stats = run_until(
        &store,
        Stalling {
            budget: None,
            ledger: Arc::clone(&ledger),
        },
        "survivor",
        || ledger.settled.lock().unwrap().len() >= 50,
    )
    .await;

    // Then: 완료 + dead-letter = 최초 적재 수, 남은 lease 없음
    let dead = store.len(DLQ).await.unwrap();
    assert_eq!(dead, 7);
    assert_eq!(ledger.completed.load(Ordering::SeqCst) + dead, 50);
    assert_eq!(ledger.settled.lock().unwrap().len(), 50);
    assert_eq!(stats.completed as usize + stats.dead_lettered as usize, 30);
    assert_eq!(store.len(INGEST).await.unwrap(), 0);
    for n in 0..5 {
        assert!(
            store
                .processing(INGEST, &format!("crashed-{n}"))
                .await
                .unwrap()
                .is_empty()
        );
    }
    assert!(store.workers(INGEST).await.unwrap().is_empty());
}

#[tokio::test]
async fn reaped_live_worker_rejoins_registry_and_is_recovered_after_crash() {
    // Given: 실행 중인 워커 "a"의 heartbeat가 잠시 끊긴 사이 동료 janitor가 회수함
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(Ledger::default());
    let processor = Stalling {
        budget: Some(0),
        ledger: Arc::clone(&ledger),
    };
    let (worker, mut status) = Worker::new(Arc::clone(&store), processor, fast_heartbeat("a"));
    let handle = tokio::spawn(worker.run(CancellationToken::new()));
    status
        .wait_for(|s| *s == WorkerStatus::Ready)
        .await
        .unwrap();

    let peer = Janitor::new(Arc::clone(&store), INGEST, "b");
    let mut reaped = Vec::new();
    for _ in 0..20 {
        // 지우는 순간과 janitor 사이에 갱신이 끼어들면 다시 시도
        store.clear_heartbeat("a").await.unwrap();
        reaped = peer.run_once().await.unwrap().reaped;
        if !reaped.is_empty() {
            break;
        }
    }
    assert_eq!(reaped, vec!["a".to_owned()]);

    // When: heartbeat 갱신 후 항목을 처리하던 중 죽음
    for _ in 0..200 {
        let alive = store.heartbeat_alive("a", now_millis()).await.unwrap();
        if alive && store.workers(INGEST).await.unwrap().contains(&"a".to_owned()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(store.workers(INGEST).await.unwrap(), vec!["a".to_owned()]);

    store
        .push(INGEST, r#"{"seq":1,"hostname":"h"}"#)
        .await
        .unwrap();
    wait_until("worker to stall", || ledger.hung.load(Ordering::SeqCst) == 1).await;
    crash(&store, "a", handle).await;

    // Then: 다른 janitor가 "a"의 lease를 큐로 되돌림
    let report = Janitor::new(Arc::clone(&store), INGEST, "c")
        .run_once()
        .await
        .unwrap();
    assert_eq!(report.recovered, 1);
    assert!(store.processing(INGEST, "a").await.unwrap().is_empty());
    assert_eq!(
        store.range(INGEST, 0, 10).await.unwrap(),
        vec![r#"{"seq":1,"hostname":"h"}"#.to_owned()]
    );
}

#[tokio::test]
async fn failing_item_is_retried_with_backoff_then_completed() {
    let store = Arc::new(MemoryStore::new());
    store
        .push(INGEST, r#"{"hostname":"h","message":"m"}"#)
        .await
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let stats = run_until(
        &store,
        Flaky {
            failures: 2,
            calls: Arc::clone(&calls),
        },
        "w",
        || calls.load(Ordering::SeqCst) >= 3,
    )
    .await;

    assert_eq!(stats.retried, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(store.len(DLQ).await.unwrap(), 0);
}

#[tokio::test]
async fn unhandled_errors_dead_letter_after_max_retries() {
    let store = Arc::new(MemoryStore::new());
    store
        .push(INGEST, r#"{"hostname":"h","message":"m","id":"evt-9"}"#)
        .await
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    run_until(
        &store,
        Flaky {
            failures: usize::MAX,
            calls: Arc::clone(&calls),
        },
        "w",
        || calls.load(Ordering::SeqCst) >= 4,
    )
    .await;

    // max_retries = 3: 최초 시도 + 재시도 3회 후 dead-letter
    let parked = store.range(DLQ, 0, 10).await.unwrap();
    assert_eq!(parked.len(), 1);
    let record = DeadLetterRecord::decode(&parked[0]).unwrap();
    assert_eq!(record.reason, "unhandled_processing_error");
    assert_eq!(record.classification, FailureClass::Unclassified);
    assert_eq!(record.attempts, 4);
    assert_eq!(record.last_error.as_deref(), Some("boom"));
    assert_eq!(record.source_queue, INGEST);
    let replay = record.replayable().unwrap();
    assert_eq!(replay.retry_count, 0);
    assert_eq!(replay.correlation_id(), Some("evt-9"));
}

#[tokio::test]
async fn janitor_twice_without_dead_workers_is_noop() {
    let store = Arc::new(MemoryStore::new());
    for item in ["a", "b", "c"] {
        store.push(INGEST, item).await.unwrap();
    }
    let janitor = Janitor::new(Arc::clone(&store), INGEST, "me");

    let first = janitor.run_once().await.unwrap();
    let second = janitor.run_once().await.unwrap();

    assert_eq!(first.recovered, 0);
    assert_eq!(second.recovered, 0);
    assert_eq!(store.range(INGEST, 0, 10).await.unwrap(), vec!["a", "b", "c"]);
}
