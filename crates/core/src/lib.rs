//! # trapline-core
//!
//! Trapline 워크스페이스가 공유하는 기반 크레이트입니다.
//!
//! - [`envelope`]: 큐를 오가는 항목 형식과 dead-letter 레코드
//! - [`config`]: `trapline.toml` 파싱, 환경변수 오버라이드, 검증
//! - [`error`]: 도메인별 에러 계층
//! - [`pipeline`]: 데몬이 관리하는 모듈의 생명주기 trait
//! - [`metrics`]: Prometheus 메트릭 이름과 설명
//! - [`types`]: 심각도, 실패 분류, 환경 등 작은 값 타입

pub mod config;
pub mod envelope;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, ParseError, PipelineError, StorageError, TraplineError};

// 설정
pub use config::TraplineConfig;

// 엔벨로프
pub use envelope::{DeadLetterRecord, Envelope};

// 파이프라인 trait
pub use pipeline::{BoxFuture, DynPipeline, HealthStatus, Pipeline};

// 도메인 타입
pub use types::{Environment, FailureClass, Severity, now_millis};
