//! 큐 엔벨로프: 큐를 오가는 모든 항목의 직렬화 형식
//!
//! [`Envelope`]는 불투명한 JSON 페이로드에 재시도 횟수와 주석 필드를 덧붙인 것입니다.
//! 페이로드 필드는 최상위로 평탄화(flatten)되므로, 외부 생산자는
//! `{"hostname": "...", "message": "..."}` 같은 평범한 JSON 객체를 그대로 적재할 수 있고
//! `retry_count`가 없으면 0으로 간주됩니다.
//!
//! [`DeadLetterRecord`]는 dead-letter 큐에 적재되는 진단 레코드입니다.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ParseError;
use crate::types::FailureClass;

/// 엔벨로프 최대 직렬화 크기 (1 MiB)
pub const MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

/// 큐 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// 이 항목이 재시도로 다시 적재된 횟수
    #[serde(default)]
    pub retry_count: u32,

    /// 흐름 제어로 재적재된 경우의 사유
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shedding_reason: Option<String>,

    /// dead-letter 처리된 경우의 사유
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poison_reason: Option<String>,

    /// 불투명 페이로드 (최상위 필드로 평탄화)
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// 페이로드로 새 엔벨로프를 만듭니다 (retry_count = 0).
    pub fn new(payload: Map<String, Value>) -> Self {
        Self {
            retry_count: 0,
            shedding_reason: None,
            poison_reason: None,
            payload,
        }
    }

    /// JSON 값에서 엔벨로프를 만듭니다. 객체가 아니면 에러입니다.
    pub fn from_value(value: Value) -> Result<Self, ParseError> {
        match value {
            Value::Object(_) => serde_json::from_value(value)
                .map_err(|e| ParseError::Envelope(e.to_string())),
            other => Err(ParseError::Envelope(format!(
                "expected JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// 큐에서 꺼낸 원시 문자열을 디코딩합니다.
    pub fn decode(raw: &str) -> Result<Self, ParseError> {
        if raw.len() > MAX_ENVELOPE_BYTES {
            return Err(ParseError::TooLarge {
                size: raw.len(),
                max: MAX_ENVELOPE_BYTES,
            });
        }
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ParseError::Envelope(e.to_string()))?;
        Self::from_value(value)
    }

    /// 큐에 적재할 문자열로 인코딩합니다.
    pub fn encode(&self) -> Result<String, ParseError> {
        serde_json::to_string(self).map_err(|e| ParseError::Envelope(e.to_string()))
    }

    /// 페이로드의 문자열 필드를 반환합니다.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    /// 상관관계 ID (`correlation_id`, 없으면 `id`)
    pub fn correlation_id(&self) -> Option<&str> {
        self.str_field("correlation_id")
            .or_else(|| self.str_field("id"))
    }

    /// 재시도 카운터를 1 증가시킨 사본
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.retry_count = next.retry_count.saturating_add(1);
        next.shedding_reason = None;
        next
    }

    /// 운영자 재처리를 위해 재시도 상태를 초기화합니다.
    pub fn reset_for_replay(&mut self) {
        self.retry_count = 0;
        self.shedding_reason = None;
        self.poison_reason = None;
    }
}

/// dead-letter 큐 레코드
///
/// 원본 엔벨로프(디코딩 가능할 때) 또는 원시 문자열과 함께 실패 진단 정보를 담습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// 원본 엔벨로프 (`poison_reason` 포함)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<Envelope>,
    /// 엔벨로프로 디코딩할 수 없었던 원시 항목
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    /// 실패 분류
    pub classification: FailureClass,
    /// 짧은 사유 코드 (`malformed_payload`, `retries_exhausted`, ...)
    pub reason: String,
    /// 시도 횟수
    pub attempts: u32,
    /// 마지막 에러 메시지
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// 항목을 꺼낸 큐
    pub source_queue: String,
    /// 처리한 워커
    pub worker_id: String,
    /// dead-letter 시각 (Unix epoch ms)
    pub failed_at_ms: u64,
}

impl DeadLetterRecord {
    /// 직렬화
    pub fn encode(&self) -> Result<String, ParseError> {
        serde_json::to_string(self).map_err(|e| ParseError::Envelope(e.to_string()))
    }

    /// 역직렬화
    pub fn decode(raw: &str) -> Result<Self, ParseError> {
        serde_json::from_str(raw).map_err(|e| ParseError::Envelope(e.to_string()))
    }

    /// 재처리 가능한 엔벨로프 (retry 상태 초기화)
    ///
    /// 원시 문자열만 남은 레코드는 재처리해도 다시 실패하므로 `None`입니다.
    pub fn replayable(&self) -> Option<Envelope> {
        self.envelope.as_ref().map(|env| {
            let mut env = env.clone();
            env.reset_for_replay();
            env
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
