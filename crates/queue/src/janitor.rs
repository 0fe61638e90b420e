//! Janitor: 죽은 워커의 처리 중 항목 회수
//!
//! 큐에 등록된 워커 중 heartbeat가 없는 워커의 processing 리스트를 FIFO 순서로
//! 큐 꼬리에 되돌립니다. heartbeat 확인과 회수는 스토어 안에서 원자적으로 수행되므로
//! 여러 janitor가 동시에 돌아도 항목이 중복되지 않습니다.

use std::sync::Arc;

use trapline_core::metrics as m;
use trapline_core::types::now_millis;
use trapline_store::SharedStore;

use crate::error::QueueError;

/// 한 번의 회수 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JanitorReport {
    /// 검사한 워커 수 (자기 자신 제외)
    pub scanned: usize,
    /// heartbeat가 살아 있어 건너뛴 워커 수
    pub alive: usize,
    /// 회수한(레지스트리에서 제거된) 워커 ID
    pub reaped: Vec<String>,
    /// 큐로 되돌린 항목 수
    pub recovered: usize,
}

/// 큐별 janitor
pub struct Janitor<S> {
    store: Arc<S>,
    queue: String,
    worker_id: String,
}

impl<S: SharedStore> Janitor<S> {
    /// 새 janitor를 생성합니다. `worker_id`는 회수 대상에서 제외됩니다.
    pub fn new(store: Arc<S>, queue: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            store,
            queue: queue.into(),
            worker_id: worker_id.into(),
        }
    }

    /// 회수를 한 번 수행합니다.
    pub async fn run_once(&self) -> Result<JanitorReport, QueueError> {
        let mut report = JanitorReport::default();
        let workers = self.store.workers(&self.queue).await?;

        for peer in workers.iter().filter(|id| **id != self.worker_id) {
            report.scanned += 1;
            match self.store.recover(&self.queue, peer, now_millis()).await? {
                None => report.alive += 1,
                Some(count) => {
                    tracing::info!(
                        queue = %self.queue,
                        dead_worker = %peer,
                        recovered = count,
                        "recovered in-flight items from dead worker"
                    );
                    report.recovered += count;
                    report.reaped.push(peer.clone());
                }
            }
        }

        metrics::counter!(m::JANITOR_RUNS_TOTAL, m::LABEL_QUEUE => self.queue.clone()).increment(1);
        if report.recovered > 0 {
            metrics::counter!(m::JANITOR_RECOVERED_TOTAL, m::LABEL_QUEUE => self.queue.clone())
                .increment(report.recovered as u64);
        }
        tracing::debug!(
            queue = %self.queue,
            scanned = report.scanned,
            alive = report.alive,
            recovered = report.recovered,
            "janitor pass complete"
        );
        Ok(report)
    }
}
