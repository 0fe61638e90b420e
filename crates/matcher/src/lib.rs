//! trapline-matcher: 규칙 매칭 엔진
//!
//! 수집 큐(`trapline:ingest`)의 syslog / SNMP trap 이벤트를 규칙과 대조해
//! 감사 기록과 알림 큐(`trapline:alerts`) 적재를 수행합니다.
//!
//! # 주요 구성
//! - [`rule`]: YAML 규칙 로딩, 검증, 매칭 전략 (contains / regex / oid_prefix)
//! - [`snapshot`]: 세대 단위 불변 스냅샷과 `ArcSwap` 캐시
//! - [`processor`]: 큐 워커에 끼우는 이벤트별 처리 로직
//! - [`engine`]: [`Pipeline`](trapline_core::pipeline::Pipeline) 구현
//!
//! 규칙 선택은 `(priority, id)`가 가장 작은 활성 매칭 규칙 하나입니다.
//! 매칭되지 않은 이벤트는 호스트별 카운터로 집계되어, 윈도우 안에서 임계치에
//! 처음 도달할 때 meta-alert 정확히 1건을 만듭니다.

pub mod alert;
pub mod audit;
pub mod engine;
pub mod error;
pub mod event;
pub mod processor;
pub mod rule;
pub mod snapshot;
pub mod source;

pub use alert::{AlertPayload, RuleMatchAlert, UnhandledAlert};
pub use audit::{AuditRecord, AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use engine::{MatchingEngine, MatchingEngineBuilder};
pub use error::MatcherError;
pub use event::Event;
pub use processor::{MatchProcessor, MatchSettings, OWED_ALERT_FIELD};
pub use rule::{
    CompiledRule, Handling, HandlingPolicy, LoadedRules, MatchKind, MatchSpec, RejectedFile, Rule,
    RuleLoader,
};
pub use snapshot::{Decision, ExcludedRule, RuleCache, RuleSnapshot};
pub use source::{DirectoryRuleSource, MemoryRuleSource, RuleSource};
