//! 이벤트 추출 -- 엔벨로프 페이로드에서 매칭에 필요한 필드를 꺼냅니다.
//!
//! 필수 필드:
//! - `hostname`: 비어 있지 않은 문자열
//! - `message` 또는 `trap_oid`(별칭 `oid`) 중 하나 이상
//! - `timestamp`: RFC 3339 문자열 또는 Unix epoch 초(숫자)
//!
//! 형식이 맞지 않으면 [`MatcherError::MalformedEvent`]이며, 재시도 없이 dead-letter됩니다.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use trapline_core::envelope::Envelope;

use crate::error::MatcherError;
use crate::rule::types::is_dotted_oid;

/// 매칭 대상 이벤트
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// 발생 호스트
    pub hostname: String,
    /// syslog 메시지
    pub message: Option<String>,
    /// SNMP trap OID (앞의 `.` 제거)
    pub trap_oid: Option<String>,
    /// 이벤트 발생 시각
    pub timestamp: DateTime<Utc>,
    /// 상관관계 ID
    pub correlation_id: String,
    /// 페이로드에 ID가 없어 새로 만든 경우
    pub correlation_generated: bool,
}

impl Event {
    /// 현재 시각과 새 상관관계 ID로 이벤트를 만듭니다 (규칙 시험용).
    pub fn new(
        hostname: impl Into<String>,
        message: Option<String>,
        trap_oid: Option<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            message,
            trap_oid: trap_oid.map(|oid| oid.trim_start_matches('.').to_owned()),
            timestamp: Utc::now(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            correlation_generated: true,
        }
    }

    /// 엔벨로프 페이로드에서 이벤트를 추출합니다.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, MatcherError> {
        let payload = &envelope.payload;

        let hostname = match payload.get("hostname") {
            Some(Value::String(host)) if !host.trim().is_empty() => host.trim().to_owned(),
            Some(Value::String(_)) => return Err(malformed("hostname is empty")),
            Some(_) => return Err(malformed("hostname must be a string")),
            None => return Err(malformed("missing hostname")),
        };

        let message = optional_string(payload.get("message"), "message")?;

        let trap_oid = match optional_string(payload.get("trap_oid"), "trap_oid")? {
            Some(oid) => Some(oid),
            None => optional_string(payload.get("oid"), "oid")?,
        };
        let trap_oid = match trap_oid {
            Some(oid) if is_dotted_oid(&oid) => Some(oid.trim_start_matches('.').to_owned()),
            Some(oid) => return Err(malformed(format!("trap_oid '{oid}' is not a dotted OID"))),
            None => None,
        };

        if message.is_none() && trap_oid.is_none() {
            return Err(malformed("event has neither message nor trap_oid"));
        }

        let timestamp = parse_timestamp(payload.get("timestamp"))?;

        let (correlation_id, correlation_generated) = match envelope.correlation_id() {
            Some(id) if !id.is_empty() => (id.to_owned(), false),
            _ => (uuid::Uuid::new_v4().to_string(), true),
        };

        Ok(Self {
            hostname,
            message,
            trap_oid,
            timestamp,
            correlation_id,
            correlation_generated,
        })
    }

    /// 환경 분류에 쓰는 정규화된 호스트명
    pub fn host_key(&self) -> String {
        self.hostname.to_ascii_lowercase()
    }
}

fn malformed(reason: impl Into<String>) -> MatcherError {
    MatcherError::MalformedEvent(reason.into())
}

fn optional_string(value: Option<&Value>, field: &str) -> Result<Option<String>, MatcherError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(malformed(format!("{field} must be a string"))),
    }
}

fn parse_timestamp(value: Option<&Value>) -> Result<DateTime<Utc>, MatcherError> {
    match value {
        Some(Value::String(text)) => DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| malformed(format!("invalid timestamp '{text}': {e}"))),
        Some(Value::Number(n)) => {
            let parsed = if let Some(secs) = n.as_i64() {
                Utc.timestamp_opt(secs, 0).single()
            } else {
                n.as_f64().and_then(|secs| {
                    let whole = secs.trunc() as i64;
                    let nanos = (secs.fract() * 1e9) as u32;
                    Utc.timestamp_opt(whole, nanos).single()
                })
            };
            parsed.ok_or_else(|| malformed(format!("timestamp {n} is out of range")))
        }
        Some(_) => Err(malformed("timestamp must be RFC 3339 or epoch seconds")),
        None => Err(malformed("missing timestamp")),
    }
}

#[cfg(test)]
impl Event {
    pub(crate) fn for_test(hostname: &str, message: Option<&str>, trap_oid: Option<&str>) -> Self {
        Self::new(
            hostname,
            message.map(str::to_owned),
            trap_oid.map(str::to_owned),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> Result<Event, MatcherError> {
        Event::from_envelope(&Envelope::decode(json).unwrap())
    }

    #[test]
    fn syslog_event_with_rfc3339() {
        let event = decode(
            r#"{"hostname":"web-01","message":"LINK-DOWN eth0","timestamp":"2024-05-01T12:00:00Z","id":"evt-1"}"#,
        )
        .unwrap();
        assert_eq!(event.hostname, "web-01");
        assert_eq!(event.message.as_deref(), Some("LINK-DOWN eth0"));
        assert_eq!(event.timestamp.timestamp(), 1_714_564_800);
        assert_eq!(event.correlation_id, "evt-1");
        assert!(!event.correlation_generated);
    }

    #[test]
    fn trap_event_with_epoch_and_oid_alias() {
        let event =
            decode(r#"{"hostname":"sw-01","oid":".1.3.6.1.4.1.9","timestamp":1714564800}"#)
                .unwrap();
        assert_eq!(event.trap_oid.as_deref(), Some("1.3.6.1.4.1.9"));
        assert!(event.message.is_none());
        assert!(event.correlation_generated);
    }

    #[test]
    fn missing_fields_are_malformed() {
        let cases = [
            r#"{"message":"x","timestamp":1}"#,
            r#"{"hostname":"","message":"x","timestamp":1}"#,
            r#"{"hostname":42,"message":"x","timestamp":1}"#,
            r#"{"hostname":"h","timestamp":1}"#,
            r#"{"hostname":"h","message":"x"}"#,
            r#"{"hostname":"h","message":"x","timestamp":"yesterday"}"#,
            r#"{"hostname":"h","message":["x"],"timestamp":1}"#,
            r#"{"hostname":"h","trap_oid":"not.an.oid","timestamp":1}"#,
        ];
        for case in cases {
            assert!(
                matches!(decode(case), Err(MatcherError::MalformedEvent(_))),
                "{case} should be malformed"
            );
        }
    }

    #[test]
    fn host_key_is_lowercase() {
        let event = Event::for_test("Lab-Router-1", Some("x"), None);
        assert_eq!(event.host_key(), "lab-router-1");
    }
}
