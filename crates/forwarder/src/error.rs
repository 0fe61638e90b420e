//! 포워더 에러 타입
//!
//! webhook 호출 실패 자체는 에러가 아니라 [`Classification`](crate::classify::Classification)으로
//! 분류됩니다. 여기의 에러는 설정, 클라이언트 생성, 공유 스토어 실패만 다룹니다.

use trapline_core::error::{PipelineError, TraplineError};
use trapline_store::StoreError;

/// 포워더 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ForwarderError {
    /// 설정 값 오류
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// HTTP 클라이언트 생성 실패
    #[error("http client error: {0}")]
    Client(String),

    /// webhook 토큰 파일 읽기 실패
    #[error("token error: {0}")]
    Token(String),

    /// 공유 스토어 연산 실패
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl From<ForwarderError> for TraplineError {
    fn from(err: ForwarderError) -> Self {
        match err {
            ForwarderError::Store(e) => e.into(),
            other => TraplineError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
