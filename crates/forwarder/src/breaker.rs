//! 공유 서킷 브레이커
//!
//! 상태는 공유 스토어에 있으므로 한 포워더가 관측한 다운스트림 장애가 플릿 전체를 보호합니다.
//!
//! ```text
//! Closed --(연속 실패 >= threshold)--> Open --(open_until 경과, CAS)--> HalfOpen
//!   ^                                   ^                                  |
//!   |                                   +------------(probe 실패)----------+
//!   +---------------------------------(probe 성공)------------------------+
//! ```
//!
//! Half-Open의 probe 권한은 스토어의 compare-and-set으로 한 호출자만 얻으며,
//! `probe_timeout` 후 만료되므로 probe 중 크래시한 인스턴스가 브레이커를 묶어 두지 못합니다.

use std::sync::Arc;
use std::time::Duration;

use trapline_core::metrics as m;
use trapline_store::{
    CircuitPermit, CircuitSnapshot, CircuitState, CircuitTransition, SharedStore, StoreError,
};

/// 브레이커 동작 파라미터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// 공유 서킷 키
    pub key: String,
    /// Open 전이 연속 실패 수
    pub threshold: u32,
    /// Open 유지 시간
    pub open_for: Duration,
    /// probe 권한 만료 시간
    pub probe_timeout: Duration,
}

/// 스토어 기반 서킷 브레이커
pub struct CircuitBreaker<S> {
    store: Arc<S>,
}

impl<S: SharedStore> CircuitBreaker<S> {
    /// 공유 스토어로 생성합니다.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// 호출 권한을 얻습니다.
    pub async fn acquire(
        &self,
        policy: &BreakerPolicy,
        now_ms: u64,
    ) -> Result<CircuitPermit, StoreError> {
        let acquired = self
            .store
            .circuit_acquire(&policy.key, now_ms, policy.probe_timeout.as_millis() as u64)
            .await?;
        observe(&policy.key, acquired.transition);
        if acquired.permit == CircuitPermit::Probe {
            tracing::info!(key = %policy.key, "circuit half-open, probing downstream");
        }
        Ok(acquired.permit)
    }

    /// 다운스트림이 응답했음을 기록합니다 (2xx 또는 terminal 4xx).
    pub async fn record_success(&self, policy: &BreakerPolicy) -> Result<(), StoreError> {
        let transition = self.store.circuit_record_success(&policy.key).await?;
        observe(&policy.key, transition);
        Ok(())
    }

    /// 재시도 가능한 다운스트림 실패를 기록합니다.
    pub async fn record_failure(
        &self,
        policy: &BreakerPolicy,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let transition = self
            .store
            .circuit_record_failure(
                &policy.key,
                policy.threshold,
                policy.open_for.as_millis() as u64,
                now_ms,
            )
            .await?;
        observe(&policy.key, transition);
        Ok(())
    }

    /// 쓰지 않은 probe 권한을 반납합니다.
    pub async fn release_probe(&self, policy: &BreakerPolicy) -> Result<(), StoreError> {
        self.store.circuit_release_probe(&policy.key).await
    }

    /// 현재 상태를 조회하고 gauge를 갱신합니다.
    pub async fn state(&self, policy: &BreakerPolicy) -> Result<CircuitSnapshot, StoreError> {
        let snapshot = self.store.circuit_state(&policy.key).await?;
        metrics::gauge!(m::CIRCUIT_STATE, "key" => policy.key.clone())
            .set(snapshot.state.gauge_value());
        Ok(snapshot)
    }
}

impl<S> Clone for CircuitBreaker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

fn observe(key: &str, transition: CircuitTransition) {
    if !transition.changed() {
        return;
    }
    metrics::gauge!(m::CIRCUIT_STATE, "key" => key.to_owned()).set(transition.to.gauge_value());
    metrics::counter!(m::CIRCUIT_TRANSITIONS_TOTAL, m::LABEL_TO_STATE => transition.to.as_str())
        .increment(1);

    match transition.to {
        CircuitState::Open => {
            tracing::warn!(key, from = %transition.from, "circuit opened");
        }
        CircuitState::Closed => {
            tracing::info!(key, from = %transition.from, "circuit closed");
        }
        CircuitState::HalfOpen => {
            tracing::debug!(key, from = %transition.from, "circuit half-open");
        }
    }
}
