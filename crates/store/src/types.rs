//! 스토어 연산의 입출력 타입

use std::fmt;

/// lease 해제 시 항목의 목적지
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release<'a> {
    /// 처리 완료: processing 리스트에서 제거만 합니다.
    Drop,
    /// 대상 큐 꼬리에 즉시 적재합니다 (재적재, dead-letter).
    Push {
        /// 대상 큐
        queue: &'a str,
        /// 적재할 (재직렬화된) 항목
        payload: &'a str,
    },
    /// 대상 큐의 지연 집합에 넣고 `visible_at_ms` 이후 꼬리로 이동시킵니다.
    Delay {
        /// 대상 큐
        queue: &'a str,
        /// 적재할 (재직렬화된) 항목
        payload: &'a str,
        /// 가시화 시각 (Unix epoch ms)
        visible_at_ms: u64,
    },
}

/// 임계치 카운터 증가 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOutcome {
    /// 아직 임계치 미만 (현재 카운트)
    Counting(u64),
    /// 이번 증가로 임계치에 처음 도달: 정확히 한 호출자만 관측합니다.
    Triggered(u64),
    /// 임계치에 도달했지만 현재 윈도우에서 이미 발동됨
    Suppressed(u64),
}

impl ThresholdOutcome {
    /// 이번 호출이 발동 주체인지 여부
    pub fn is_triggered(&self) -> bool {
        matches!(self, Self::Triggered(_))
    }

    /// 증가 후 카운트
    pub fn count(&self) -> u64 {
        match self {
            Self::Counting(n) | Self::Triggered(n) | Self::Suppressed(n) => *n,
        }
    }
}

/// 서킷 브레이커 상태
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// 정상 통과
    #[default]
    Closed,
    /// 단락: `open_until`까지 모든 요청 거부
    Open,
    /// 단일 probe 허용
    HalfOpen,
}

impl CircuitState {
    /// 메트릭 gauge 값 (0 = closed, 1 = half_open, 2 = open)
    pub fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }

    /// 스토어 / 레이블 표기
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// 스토어 표기에서 파싱합니다. 알 수 없는 값은 `Closed`로 취급합니다.
    pub fn parse(s: &str) -> Self {
        match s {
            "open" => Self::Open,
            "half_open" => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 서킷 획득 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPermit {
    /// Closed: 호출 허용
    Allow,
    /// Half-Open probe 권한 획득 (이 호출자만 호출 가능)
    Probe,
    /// 거부: `retry_at_ms` 이후 다시 시도
    Reject {
        /// 다음 시도 가능 시각 (Unix epoch ms)
        retry_at_ms: u64,
    },
}

/// 서킷 연산 전후 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitTransition {
    /// 연산 전 상태
    pub from: CircuitState,
    /// 연산 후 상태
    pub to: CircuitState,
}

impl CircuitTransition {
    /// 상태가 바뀌었는지 여부
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// `circuit_acquire` 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitAcquire {
    /// 획득 결과
    pub permit: CircuitPermit,
    /// 획득 과정의 상태 변화 (Open → HalfOpen 등)
    pub transition: CircuitTransition,
}

/// 서킷 상태 조회 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// 현재 상태
    pub state: CircuitState,
    /// 연속 실패 수
    pub failures: u32,
    /// Open 종료 시각 (Unix epoch ms, Closed면 0)
    pub open_until_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_state_roundtrips_through_store_repr() {
        for state in [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen] {
            assert_eq!(CircuitState::parse(state.as_str()), state);
        }
        assert_eq!(CircuitState::parse(""), CircuitState::Closed);
    }

    #[test]
    fn gauge_values_are_ordered_by_severity() {
        assert!(CircuitState::Closed.gauge_value() < CircuitState::HalfOpen.gauge_value());
        assert!(CircuitState::HalfOpen.gauge_value() < CircuitState::Open.gauge_value());
    }

    #[test]
    fn threshold_outcome_accessors() {
        assert!(ThresholdOutcome::Triggered(3).is_triggered());
        assert!(!ThresholdOutcome::Suppressed(4).is_triggered());
        assert_eq!(ThresholdOutcome::Counting(2).count(), 2);
    }
}
