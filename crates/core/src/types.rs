//! 도메인 타입: 모듈 간 공유되는 기본 데이터 구조
//!
//! 심각도, 실패 분류, 처리 환경 등 모든 크레이트가 공유하는 작은 값 타입을 정의합니다.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// 심각도 레벨
///
/// `Ord` 구현으로 심각도 비교가 가능합니다 (`Info < Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 정보성 이벤트
    #[default]
    Info,
    /// 낮은 심각도
    Low,
    /// 중간 심각도
    Medium,
    /// 높은 심각도
    High,
    /// 치명적: 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" | "informational" => Some(Self::Info),
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }

    /// 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 처리 실패 분류
///
/// 워커가 재시도, 재적재, dead-letter 중 무엇을 할지 결정하는 기준입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// 공유 스토어, 감사 저장소 등 내부 인프라 일시 장애 (재시도)
    TransientInfrastructure,
    /// 다운스트림 타임아웃 / 5xx / 429 (재시도)
    TransientDownstream,
    /// 내용 자체가 잘못됨 (즉시 dead-letter)
    TerminalContent,
    /// rate limit, 서킷 open 등 흐름 제어 (retry_count 증가 없이 재적재)
    FlowControl,
    /// 분류되지 않은 처리 에러 (일반 실패, 재시도)
    Unclassified,
}

impl FailureClass {
    /// 재시도 없이 바로 dead-letter 해야 하는지 여부
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TerminalContent)
    }

    /// 메트릭 레이블 / 로그에 쓰는 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientInfrastructure => "transient_infrastructure",
            Self::TransientDownstream => "transient_downstream",
            Self::TerminalContent => "terminal_content",
            Self::FlowControl => "flow_control",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 이벤트 발생 호스트의 환경
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// 운영 환경 (기본값)
    #[default]
    Production,
    /// 개발 환경 (dev host 목록에 포함된 호스트)
    Development,
}

impl Environment {
    /// 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 현재 wall clock 시각 (Unix epoch 밀리초)
///
/// 공유 스토어 연산(rate limit, 서킷, 지연 큐)은 모두 호출자가 시각을 넘깁니다.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
