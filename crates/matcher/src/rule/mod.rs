//! 매칭 규칙 -- YAML 규칙 정의, 로딩, 전략별 매칭
//!
//! # 규칙 형식
//! ```yaml
//! id: 1001
//! name: interface down
//! priority: 10
//! severity: high
//! match:
//!   type: contains        # contains | regex | oid_prefix
//!   pattern: "LINK-DOWN"
//! handling:
//!   production: alert     # drop | audit | alert
//!   development: audit
//! ```
//!
//! # 아키텍처
//! - [`loader`]: YAML 파일 / dev host 파일 로딩 및 유효성 검증
//! - [`matcher`]: 전략별 매칭, 우선순위 선택
//! - [`types`]: 규칙 데이터 구조 정의

pub mod loader;
pub mod matcher;
pub mod types;

pub use loader::{LoadedRules, RejectedFile, RuleLoader};
pub use matcher::{CompiledRule, oid_has_prefix, select};
pub use types::{Handling, HandlingPolicy, MatchKind, MatchSpec, Rule};
