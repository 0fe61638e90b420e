//! trapline-store: 레플리카 간 공유 상태
//!
//! 큐 워커, rate limiter, 서킷 브레이커, 임계치 카운터가 공유하는 원자 연산을
//! [`SharedStore`] trait으로 추상화합니다.
//!
//! # 백엔드
//! - [`MemoryStore`]: 단일 프로세스 / 테스트용 인메모리 구현
//! - `RedisStore`: `redis` feature 활성화 시 사용 가능한 다중 레플리카 구현
//!
//! # 키 레이아웃
//! 모든 파생 키는 [`keys`] 모듈이 결정합니다. 큐 이름 자체는 호출자가 설정에서 가져옵니다.

pub mod error;
pub mod keys;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis::RedisStore;
pub use store::SharedStore;
pub use types::{
    CircuitAcquire, CircuitPermit, CircuitSnapshot, CircuitState, CircuitTransition, Release,
    ThresholdOutcome,
};
