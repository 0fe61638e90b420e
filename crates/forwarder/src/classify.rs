//! webhook 결과 분류
//!
//! | 결과 | 분류 | 브레이커 |
//! |------|------|----------|
//! | 2xx | 성공 | 성공 기록 |
//! | 408, 429, 5xx | 재시도 | 실패 기록 |
//! | 타임아웃, 연결 실패 | 재시도 | 실패 기록 |
//! | 그 밖의 4xx | terminal | 성공 기록 (다운스트림은 응답함) |

use std::time::Duration;

use crate::client::{TransportError, WebhookResponse};

/// 분류 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// 전달 완료
    Delivered {
        /// HTTP 상태 코드
        status: u16,
    },
    /// 백오프 후 재시도
    Retryable {
        /// 재시도 소진 시 dead-letter 사유
        reason: &'static str,
        /// 에러 상세
        error: String,
        /// 다운스트림이 요구한 최소 대기 (`Retry-After`)
        retry_after: Option<Duration>,
    },
    /// 재시도 없이 dead-letter
    Terminal {
        /// dead-letter 사유
        reason: &'static str,
        /// 에러 상세
        error: String,
    },
}

impl Classification {
    /// 브레이커에 실패로 기록해야 하는지 여부
    pub fn trips_breaker(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    /// 메트릭 레이블
    pub fn label(&self) -> &'static str {
        match self {
            Self::Delivered { .. } => "delivered",
            Self::Retryable { .. } => "retryable",
            Self::Terminal { .. } => "terminal",
        }
    }
}

/// webhook 호출 결과를 분류합니다.
pub fn classify(result: &Result<WebhookResponse, TransportError>) -> Classification {
    match result {
        Ok(response) => classify_status(response),
        Err(TransportError::Timeout) => Classification::Retryable {
            reason: "downstream_timeout",
            error: "webhook request timed out".to_owned(),
            retry_after: None,
        },
        Err(e) => Classification::Retryable {
            reason: "downstream_unreachable",
            error: e.to_string(),
            retry_after: None,
        },
    }
}

fn classify_status(response: &WebhookResponse) -> Classification {
    let status = response.status;
    match status {
        200..=299 => Classification::Delivered { status },
        429 => Classification::Retryable {
            reason: "downstream_rate_limited",
            error: "webhook returned 429".to_owned(),
            retry_after: response.retry_after,
        },
        408 | 500..=599 => Classification::Retryable {
            reason: "downstream_unavailable",
            error: format!("webhook returned {status}"),
            retry_after: response.retry_after,
        },
        400..=499 => Classification::Terminal {
            reason: "downstream_rejected",
            error: format!("webhook returned {status}"),
        },
        // 1xx / 3xx: 리다이렉트를 따르고도 남은 비정상 응답
        _ => Classification::Retryable {
            reason: "downstream_unexpected_status",
            error: format!("webhook returned {status}"),
            retry_after: None,
        },
    }
}
