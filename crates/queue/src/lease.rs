//! Lease: 워커가 꺼낸 항목에 대한 배타적 점유

use std::time::{Duration, Instant};

use trapline_core::envelope::Envelope;
use trapline_core::error::ParseError;

/// dequeue로 얻은 배타적 점유
///
/// 원시 문자열은 processing 리스트에 있는 값과 바이트 단위로 같아야
/// 해제(`LREM`)가 정확히 그 항목을 제거합니다. 그래서 디코딩 결과와 별도로 보관합니다.
#[derive(Debug, Clone)]
pub struct Lease {
    queue: String,
    worker_id: String,
    raw: String,
    acquired_at: Instant,
}

impl Lease {
    pub(crate) fn new(queue: &str, worker_id: &str, raw: String) -> Self {
        Self {
            queue: queue.to_owned(),
            worker_id: worker_id.to_owned(),
            raw,
            acquired_at: Instant::now(),
        }
    }

    /// 항목을 꺼낸 큐
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// 점유 중인 워커
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// processing 리스트에 있는 원시 항목
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// 항목을 엔벨로프로 디코딩합니다.
    pub fn envelope(&self) -> Result<Envelope, ParseError> {
        Envelope::decode(&self.raw)
    }

    /// 점유 후 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}
