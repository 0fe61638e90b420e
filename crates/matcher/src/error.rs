//! 매칭 엔진 에러 타입
//!
//! [`MatcherError`]는 규칙 로딩, 이벤트 추출, 감사 기록 중 발생하는 에러를 표현합니다.
//! `From<MatcherError> for TraplineError` 변환으로 데몬까지 `?`로 전파됩니다.

use trapline_core::error::{ParseError, PipelineError, TraplineError};
use trapline_store::StoreError;

/// 매칭 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    /// 규칙 파일 / 디렉토리 / dev host 파일 로딩 실패
    #[error("rule load error: {path}: {reason}")]
    RuleLoad {
        /// 파일 또는 디렉토리 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 규칙 유효성 검증 실패
    #[error("rule validation error: rule {rule_id}: {reason}")]
    RuleValidation {
        /// 문제가 된 규칙 ID
        rule_id: u64,
        /// 검증 실패 사유
        reason: String,
    },

    /// 이벤트 페이로드가 매칭에 필요한 형태가 아님
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// 감사 저장소 기록 실패
    #[error("audit sink unavailable: {0}")]
    Audit(String),

    /// 설정 값 오류
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 공유 스토어 연산 실패
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// 알림 엔벨로프 직렬화 실패
    #[error("encode: {0}")]
    Encode(#[from] ParseError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 정규식 컴파일 에러
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<MatcherError> for TraplineError {
    fn from(err: MatcherError) -> Self {
        match err {
            MatcherError::Store(e) => e.into(),
            other => TraplineError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_load_error_display() {
        let err = MatcherError::RuleLoad {
            path: "/etc/trapline/rules/link.yml".to_owned(),
            reason: "invalid YAML".to_owned(),
        };
        assert!(err.to_string().contains("link.yml"));
    }

    #[test]
    fn rule_validation_display_carries_id() {
        let err = MatcherError::RuleValidation {
            rule_id: 42,
            reason: "pattern must not be empty".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("pattern"));
    }

    #[test]
    fn converts_to_trapline_error() {
        let err: TraplineError = MatcherError::Audit("disk full".to_owned()).into();
        assert!(matches!(err, TraplineError::Pipeline(_)));

        let err: TraplineError = MatcherError::Store(StoreError::Connection("down".into())).into();
        assert!(matches!(err, TraplineError::Storage(_)));
    }
}
