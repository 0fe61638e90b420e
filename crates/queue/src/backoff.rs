//! 지수 백오프 정책

use std::time::Duration;

use trapline_core::config::WorkerConfig;

/// `delay = min(base × 2^retry_count, max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
}

impl BackoffPolicy {
    /// 새 정책을 생성합니다. `max`가 `base`보다 작으면 `base`로 올립니다.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// 워커 설정에서 생성합니다.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    /// 최대 지연
    pub fn max_delay(&self) -> Duration {
        self.max
    }

    /// `retry_count`번 재시도된 항목의 다음 지연
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// 백오프 지연을 하한(`floor`)까지 올리되 최대 지연을 넘지 않게 합니다.
    pub fn delay_at_least(&self, retry_count: u32, floor: Duration) -> Duration {
        self.delay(retry_count).max(floor).min(self.max)
    }
}
