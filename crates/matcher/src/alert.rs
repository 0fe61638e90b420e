//! 알림 생성 -- 매칭 결과와 미처리 임계치 발동을 알림 큐 엔벨로프로 변환합니다.
//!
//! 알림 페이로드는 `kind` 필드로 구분되며, 포워더는 페이로드를 그대로 webhook 본문으로 보냅니다.
//! 상관관계 ID가 최상위 `correlation_id`에 있으므로 포워더 로그와 재처리 도구가 이어서 추적할 수 있습니다.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use trapline_core::envelope::Envelope;
use trapline_core::error::ParseError;
use trapline_core::types::{Environment, Severity};

use crate::error::MatcherError;
use crate::event::Event;
use crate::snapshot::Decision;

/// 알림 큐에 적재되는 페이로드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertPayload {
    /// 규칙 매칭 알림
    RuleMatch(RuleMatchAlert),
    /// 호스트별 미처리 이벤트 임계치 도달 (meta-alert)
    UnhandledThreshold(UnhandledAlert),
}

/// 규칙 매칭 알림
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatchAlert {
    /// 원본 이벤트의 상관관계 ID
    pub correlation_id: String,
    /// 매칭된 규칙 ID
    pub rule_id: u64,
    /// 매칭된 규칙 이름
    pub rule_name: String,
    /// 규칙 심각도
    pub severity: Severity,
    /// 호스트 환경
    pub environment: Environment,
    /// 발생 호스트
    pub hostname: String,
    /// syslog 메시지
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// trap OID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trap_oid: Option<String>,
    /// 규칙 태그
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// 이벤트 발생 시각 (RFC 3339)
    pub event_timestamp: String,
    /// 매칭 시각 (RFC 3339)
    pub matched_at: String,
}

/// 미처리 이벤트 meta-alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnhandledAlert {
    /// meta-alert 자체의 상관관계 ID
    pub correlation_id: String,
    /// 대상 호스트
    pub hostname: String,
    /// 발동 시점 카운트
    pub count: u64,
    /// 임계치
    pub threshold: u64,
    /// 집계 윈도우 (초)
    pub window_secs: u64,
    /// 발동 시각 (RFC 3339)
    pub raised_at: String,
}

impl AlertPayload {
    /// 매칭 결과로 알림을 만듭니다.
    pub fn rule_match(event: &Event, decision: &Decision<'_>, now: DateTime<Utc>) -> Self {
        Self::RuleMatch(RuleMatchAlert {
            correlation_id: event.correlation_id.clone(),
            rule_id: decision.rule.id,
            rule_name: decision.rule.name.clone(),
            severity: decision.rule.severity,
            environment: decision.environment,
            hostname: event.hostname.clone(),
            message: event.message.clone(),
            trap_oid: event.trap_oid.clone(),
            tags: decision.rule.tags.clone(),
            event_timestamp: rfc3339(event.timestamp),
            matched_at: rfc3339(now),
        })
    }

    /// 임계치 발동으로 meta-alert를 만듭니다.
    pub fn unhandled(
        hostname: &str,
        count: u64,
        threshold: u64,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self::UnhandledThreshold(UnhandledAlert {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            hostname: hostname.to_owned(),
            count,
            threshold,
            window_secs,
            raised_at: rfc3339(now),
        })
    }

    /// `kind` 값
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RuleMatch(_) => "rule_match",
            Self::UnhandledThreshold(_) => "unhandled_threshold",
        }
    }

    /// 알림 큐 엔벨로프로 변환합니다 (retry_count = 0).
    pub fn to_envelope(&self) -> Result<Envelope, MatcherError> {
        let value = serde_json::to_value(self)
            .map_err(|e| MatcherError::Encode(ParseError::Envelope(e.to_string())))?;
        Ok(Envelope::from_value(value)?)
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::types::{Handling, HandlingPolicy, MatchKind, MatchSpec, Rule};

    fn decision_rule() -> Rule {
        Rule {
            id: 5,
            name: "link down".to_owned(),
            description: String::new(),
            priority: 1,
            active: true,
            severity: Severity::Critical,
            matcher: MatchSpec {
                kind: MatchKind::Contains,
                pattern: "LINK".to_owned(),
            },
            handling: HandlingPolicy::default(),
            tags: vec!["network".to_owned()],
        }
    }

    #[test]
    fn rule_match_envelope_is_flat_json() {
        let rule = decision_rule();
        let decision = Decision {
            rule: &rule,
            environment: Environment::Production,
            handling: Handling::Alert,
        };
        let mut event = Event::for_test("core-1", Some("LINK-DOWN"), None);
        event.correlation_id = "evt-42".to_owned();

        let envelope = AlertPayload::rule_match(&event, &decision, Utc::now())
            .to_envelope()
            .unwrap();

        assert_eq!(envelope.retry_count, 0);
        assert_eq!(envelope.str_field("kind"), Some("rule_match"));
        assert_eq!(envelope.correlation_id(), Some("evt-42"));
        assert_eq!(envelope.str_field("severity"), Some("critical"));
        assert_eq!(envelope.str_field("environment"), Some("production"));
        assert!(envelope.payload.get("trap_oid").is_none());
    }

    #[test]
    fn unhandled_alert_round_trips_through_envelope() {
        let payload = AlertPayload::unhandled("noisy-1", 100, 100, 300, Utc::now());
        let envelope = payload.to_envelope().unwrap();
        assert_eq!(envelope.str_field("kind"), Some("unhandled_threshold"));
        assert!(envelope.correlation_id().is_some());

        let back: AlertPayload =
            serde_json::from_value(serde_json::Value::Object(envelope.payload)).unwrap();
        assert_eq!(back, payload);
    }
}
