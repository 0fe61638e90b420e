//! 공유 스토어 trait: 인스턴스 간 조율의 유일한 지점
//!
//! 모든 연산은 원자적입니다. 큐 워커, rate limiter, 서킷 브레이커, 임계치 집계는
//! 이 인터페이스만을 통해 다른 레플리카와 상태를 공유하므로 백엔드를 교체할 수 있습니다.
//!
//! 시간 의존 연산은 호출자가 `now_ms`(Unix epoch ms)를 넘깁니다.
//!
//! # 시계
//! `MemoryStore`는 모든 만료를 호출자의 `now_ms`로 판정합니다. `RedisStore`는
//! heartbeat(`heartbeat_alive`, `recover`)와 임계치 윈도우(`incr_threshold`)의 만료를
//! 서버 TTL(`PX`/`PEXPIRE`)에 맡기고 이 연산들의 `now_ms`를 무시합니다.
//! 따라서 가짜 시각을 넘겨 만료를 앞당기거나 늦추는 테스트는 메모리 백엔드에서만
//! 성립하며, Redis에서는 실제 경과 시간이 기준입니다.
//! rate window와 서킷 브레이커는 두 백엔드 모두 `now_ms`를 사용합니다.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::types::{CircuitAcquire, CircuitSnapshot, CircuitTransition, Release, ThresholdOutcome};

/// 원자 연산 스토어
///
/// `Send + Sync + 'static` 바운드로 `Arc<S>`를 여러 태스크에서 공유합니다.
pub trait SharedStore: Send + Sync + 'static {
    // ─── 큐 ──────────────────────────────────────────────────────────

    /// 큐 꼬리에 항목을 적재합니다.
    fn push(
        &self,
        queue: &str,
        payload: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 큐 머리의 항목을 워커의 processing 리스트 꼬리로 원자적으로 옮깁니다.
    ///
    /// 최대 `timeout` 동안 대기하며, 만료 시 `None`을 반환합니다.
    fn dequeue(
        &self,
        queue: &str,
        worker_id: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// processing 리스트에서 `payload` 하나를 제거하고, 제거된 경우에만 목적지로 보냅니다.
    ///
    /// 이미 janitor가 회수해 항목이 없으면 `false`를 반환하고 아무것도 적재하지 않습니다.
    fn release(
        &self,
        queue: &str,
        worker_id: &str,
        payload: &str,
        release: Release<'_>,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// 가시화 시각이 지난 지연 항목을 최대 `limit`개까지 큐 꼬리로 옮깁니다.
    fn promote_due(
        &self,
        queue: &str,
        now_ms: u64,
        limit: usize,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// 큐 길이
    fn len(&self, queue: &str) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// 지연 대기 중인 항목 수
    fn delayed_len(&self, queue: &str)
    -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// 큐 항목을 머리부터 `start`..`start + count` 범위로 조회합니다.
    fn range(
        &self,
        queue: &str,
        start: usize,
        count: usize,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// 큐에서 `payload`와 같은 항목 하나를 제거합니다.
    fn remove(
        &self,
        queue: &str,
        payload: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// 큐와 지연 집합을 삭제하고 삭제된 항목 수를 반환합니다.
    fn purge(&self, queue: &str) -> impl Future<Output = Result<usize, StoreError>> + Send;

    // ─── 워커 레지스트리 / heartbeat ─────────────────────────────────

    /// 워커를 큐의 레지스트리에 등록합니다.
    fn register_worker(
        &self,
        queue: &str,
        worker_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 큐에 등록된 워커 ID 목록
    fn workers(&self, queue: &str)
    -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// 워커의 processing 리스트 내용
    fn processing(
        &self,
        queue: &str,
        worker_id: &str,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// heartbeat를 `now_ms + ttl` 만료로 갱신합니다.
    fn set_heartbeat(
        &self,
        worker_id: &str,
        now_ms: u64,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// heartbeat가 살아 있는지 여부
    ///
    /// Redis 백엔드는 `now_ms` 대신 키 TTL로 판정합니다.
    fn heartbeat_alive(
        &self,
        worker_id: &str,
        now_ms: u64,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// heartbeat를 삭제합니다.
    fn clear_heartbeat(&self, worker_id: &str)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// heartbeat가 없는 워커의 processing 리스트를 FIFO 순서로 큐 꼬리에 옮기고,
    /// 리스트 삭제와 레지스트리 해제를 함께 수행합니다.
    ///
    /// heartbeat가 살아 있으면 아무것도 하지 않고 `None`을 반환합니다.
    /// 생존 판정은 [`SharedStore::heartbeat_alive`]와 같은 시계를 따릅니다.
    fn recover(
        &self,
        queue: &str,
        worker_id: &str,
        now_ms: u64,
    ) -> impl Future<Output = Result<Option<usize>, StoreError>> + Send;

    // ─── Rate window ─────────────────────────────────────────────────

    /// 슬라이딩 윈도우 검사 후 여유가 있으면 `member`를 기록하고 `true`를 반환합니다.
    ///
    /// `now_ms - window_ms` 이전 기록은 먼저 제거됩니다. `member`는 호출마다 고유해야 합니다.
    fn rate_allow(
        &self,
        key: &str,
        limit: u64,
        window_ms: u64,
        now_ms: u64,
        member: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    // ─── 임계치 카운터 ───────────────────────────────────────────────

    /// 카운터를 증가시키고, 처음 임계치에 도달하면 발동 플래그를 세웁니다.
    ///
    /// 발동 시 카운터는 플래그로 이름이 바뀌어 새 카운터가 0부터 다시 쌓입니다.
    /// 플래그가 살아 있는 동안(`window_ms`) 재도달은 `Suppressed`입니다.
    /// Redis 백엔드의 윈도우는 `now_ms`가 아니라 서버 TTL로 끝납니다.
    fn incr_threshold(
        &self,
        key: &str,
        threshold: u64,
        window_ms: u64,
        now_ms: u64,
    ) -> impl Future<Output = Result<ThresholdOutcome, StoreError>> + Send;

    // ─── 서킷 브레이커 ───────────────────────────────────────────────

    /// 호출 권한을 얻습니다. Open 만료 후 첫 호출자만 probe를 얻습니다 (compare-and-set).
    ///
    /// probe 권한은 `probe_timeout_ms` 후 만료되어 다른 호출자가 다시 얻을 수 있습니다.
    fn circuit_acquire(
        &self,
        key: &str,
        now_ms: u64,
        probe_timeout_ms: u64,
    ) -> impl Future<Output = Result<CircuitAcquire, StoreError>> + Send;

    /// 성공을 기록합니다. 실패 카운터를 초기화하고 Closed로 전이합니다.
    fn circuit_record_success(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<CircuitTransition, StoreError>> + Send;

    /// 실패를 기록합니다.
    ///
    /// Closed에서 연속 실패가 `threshold`에 도달하거나 Half-Open probe가 실패하면
    /// `open_until = now_ms + open_ms`로 Open 전이합니다.
    fn circuit_record_failure(
        &self,
        key: &str,
        threshold: u32,
        open_ms: u64,
        now_ms: u64,
    ) -> impl Future<Output = Result<CircuitTransition, StoreError>> + Send;

    /// 사용하지 않은 probe 권한을 반납합니다.
    fn circuit_release_probe(&self, key: &str)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// 현재 서킷 상태를 조회합니다.
    fn circuit_state(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<CircuitSnapshot, StoreError>> + Send;

    // ─── Pub/Sub ────────────────────────────────────────────────────

    /// 채널에 메시지를 발행하고 수신자 수를 반환합니다.
    fn publish(
        &self,
        channel: &str,
        message: &str,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// 채널을 구독합니다. 연결이 끊기면 수신 측이 닫힙니다.
    fn subscribe(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<mpsc::Receiver<String>, StoreError>> + Send;
}
