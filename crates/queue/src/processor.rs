//! Processor trait: 워커 루프에 끼우는 항목별 처리 로직
//!
//! 워커는 `process`의 결과([`Outcome`])를 complete / 재시도 / 흐름 제어 재적재 /
//! dead-letter 중 하나로 번역합니다. `Err(ProcessError)`는 분류되지 않은 실패로 보고
//! 백오프 재시도합니다. lease를 조용히 버리는 경로는 없습니다.

use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value};
use trapline_core::envelope::Envelope;
use trapline_core::types::FailureClass;

/// 항목 처리 결과
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 처리 완료
    Complete,
    /// 백오프 후 재시도 (retry_count 증가)
    Retry {
        /// 실패 분류
        class: FailureClass,
        /// 재시도가 소진되면 dead-letter 사유가 되는 짧은 코드
        reason: String,
        /// 에러 상세
        error: String,
        /// 백오프 하한 (예: `Retry-After`)
        min_delay: Option<Duration>,
        /// 재적재(또는 dead-letter)할 페이로드에 덧붙일 필드
        annotations: Map<String, Value>,
    },
    /// 흐름 제어 재적재 (retry_count 유지, 실패로 세지 않음)
    Defer {
        /// `shedding_reason`에 기록할 사유
        reason: String,
        /// 최소 지연
        delay: Duration,
    },
    /// 즉시 dead-letter
    DeadLetter {
        /// 실패 분류
        class: FailureClass,
        /// 사유 코드
        reason: String,
        /// 에러 상세
        error: String,
    },
}

impl Outcome {
    /// 재시도 결과를 만듭니다.
    pub fn retry(class: FailureClass, reason: impl Into<String>, error: impl ToString) -> Self {
        Self::Retry {
            class,
            reason: reason.into(),
            error: error.to_string(),
            min_delay: None,
            annotations: Map::new(),
        }
    }

    /// 재시도 항목의 페이로드에 필드를 덧붙입니다. 재시도가 아니면 그대로 반환합니다.
    ///
    /// 처리 일부가 이미 외부에 반영되어 다음 시도가 나머지만 이어가야 할 때 씁니다.
    pub fn annotate(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Self::Retry { annotations, .. } = &mut self {
            annotations.insert(key.into(), value.into());
        }
        self
    }

    /// 흐름 제어 결과를 만듭니다.
    pub fn defer(reason: impl Into<String>, delay: Duration) -> Self {
        Self::Defer {
            reason: reason.into(),
            delay,
        }
    }

    /// 즉시 dead-letter 결과를 만듭니다.
    pub fn dead_letter(class: FailureClass, reason: impl Into<String>, error: impl ToString) -> Self {
        Self::DeadLetter {
            class,
            reason: reason.into(),
            error: error.to_string(),
        }
    }

    /// 메트릭 레이블용 이름
    pub fn label(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Retry { .. } => "retry",
            Self::Defer { .. } => "defer",
            Self::DeadLetter { .. } => "dead_letter",
        }
    }
}

/// 분류되지 않은 처리 실패
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ProcessError(pub String);

impl ProcessError {
    /// 메시지로 생성합니다.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// 워커가 꺼낸 엔벨로프를 처리하는 로직
///
/// 워커 루프가 단독으로 소유하므로 `&mut self`로 상태를 가질 수 있습니다.
pub trait Processor: Send + 'static {
    /// 로그 / 메트릭용 이름
    fn name(&self) -> &'static str;

    /// 첫 dequeue 전에 한 번 호출됩니다 (예: 규칙 캐시 초기 로드).
    ///
    /// 실패하면 워커는 시작하지 않습니다.
    fn prepare(&mut self) -> impl Future<Output = Result<(), ProcessError>> + Send {
        async { Ok(()) }
    }

    /// 엔벨로프 하나를 처리합니다.
    fn process(
        &mut self,
        envelope: &Envelope,
    ) -> impl Future<Output = Result<Outcome, ProcessError>> + Send;

    /// dequeue 타임아웃 틱마다 호출됩니다 (캐시 / 설정 리로드 등).
    fn on_tick(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }
}
