//! trapline-queue: 신뢰성 큐 워커 프로토콜
//!
//! 매칭 엔진과 포워더가 공유하는 작업 큐 프로토콜입니다.
//!
//! - **원자적 dequeue**: 항목은 큐에서 빠지는 동시에 워커의 processing 리스트에 들어갑니다.
//! - **조건부 해제**: complete / fail은 lease가 아직 processing 리스트에 있을 때만 효과가 있습니다.
//! - **Heartbeat + Janitor**: heartbeat가 사라진 워커의 processing 리스트는 다른 워커가
//!   시작할 때(또는 주기적으로) 큐 꼬리로 되돌립니다. 중앙 조정자는 없습니다.
//! - **지연 가시성**: 재시도와 흐름 제어 재적재는 지연 집합을 거쳐 `visible_at` 이후에만
//!   다시 꺼낼 수 있으므로, 백오프 중인 항목이 플릿 전체에서 스핀하지 않습니다.
//!
//! 처리 로직은 [`Processor`]로 주입합니다.

pub mod backoff;
pub mod error;
pub mod heartbeat;
pub mod janitor;
pub mod lease;
pub mod processor;
pub mod queue;
pub mod worker;

pub use backoff::BackoffPolicy;
pub use error::QueueError;
pub use heartbeat::{Heartbeat, HeartbeatReport};
pub use janitor::{Janitor, JanitorReport};
pub use lease::Lease;
pub use processor::{Outcome, ProcessError, Processor};
pub use queue::{Disposition, ReliableQueue};
pub use worker::{Worker, WorkerSettings, WorkerStats, WorkerStatus, generate_worker_id};
