//! 전역 슬라이딩 윈도우 rate limiter
//!
//! 윈도우 기록은 공유 스토어에 있으므로 포워더 레플리카 수와 무관하게
//! 전체 합산 `limit`이 지켜집니다. 검사와 기록은 스토어 안에서 한 번에 일어납니다.

use std::sync::Arc;
use std::time::Duration;

use trapline_core::metrics as m;
use trapline_store::{SharedStore, StoreError};

/// 스토어 기반 rate limiter
pub struct RateLimiter<S> {
    store: Arc<S>,
}

impl<S: SharedStore> RateLimiter<S> {
    /// 공유 스토어로 생성합니다.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// 현재 시각으로 요청 하나를 허용할지 결정합니다.
    pub async fn allow(&self, key: &str, limit: u64, window: Duration) -> Result<bool, StoreError> {
        self.allow_at(key, limit, window, trapline_core::types::now_millis())
            .await
    }

    /// 지정한 시각(ms)으로 결정합니다.
    ///
    /// 기록되는 멤버는 `{now_ms}-{uuid}`로 호출마다 고유합니다.
    pub async fn allow_at(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let member = format!("{now_ms}-{}", uuid::Uuid::new_v4());
        let allowed = self
            .store
            .rate_allow(key, limit, window.as_millis() as u64, now_ms, &member)
            .await?;
        if !allowed {
            metrics::counter!(m::FORWARDER_RATE_LIMITED_TOTAL).increment(1);
            tracing::debug!(key, limit, "rate limit reached");
        }
        Ok(allowed)
    }
}

impl<S> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}
