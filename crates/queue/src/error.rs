//! 큐 워커 에러 타입

use trapline_core::error::{ParseError, PipelineError, TraplineError};
use trapline_store::StoreError;

/// 큐 워커 에러
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// 공유 스토어 연산 실패
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// 엔벨로프 / dead-letter 레코드 직렬화 실패
    #[error("encode: {0}")]
    Encode(#[from] ParseError),

    /// 시작 단계 실패 (heartbeat, 레지스트리 등록, processor 준비)
    #[error("worker startup failed: {0}")]
    Startup(String),
}

impl From<QueueError> for TraplineError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Store(e) => e.into(),
            QueueError::Encode(e) => TraplineError::Parse(e),
            QueueError::Startup(reason) => TraplineError::Pipeline(PipelineError::InitFailed(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_error_maps_to_init_failed() {
        let err: TraplineError = QueueError::Startup("no heartbeat".to_owned()).into();
        assert!(matches!(
            err,
            TraplineError::Pipeline(PipelineError::InitFailed(_))
        ));
    }

    #[test]
    fn store_error_keeps_storage_category() {
        let err: TraplineError = QueueError::Store(StoreError::Connection("down".into())).into();
        assert!(matches!(err, TraplineError::Storage(_)));
    }
}
