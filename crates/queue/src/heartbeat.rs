//! Heartbeat: 워커 생존 신호
//!
//! 독립 태스크가 `interval`마다 heartbeat를 갱신하고(만료 = 3 × interval),
//! 갱신 실패와 회복을 채널로 워커 루프에 알립니다. 워커 루프는 공유 플래그 대신
//! 이 보고를 받아 자신의 상태를 결정합니다.
//!
//! 갱신마다 큐의 워커 레지스트리에도 다시 등록합니다. heartbeat가 잠시 끊긴 사이
//! 동료 janitor가 이 워커를 회수해 레지스트리에서 뺐더라도, 다음 갱신부터는
//! 다시 janitor의 검사 대상이 됩니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trapline_core::metrics as m;
use trapline_core::types::now_millis;
use trapline_store::{SharedStore, StoreError};

/// heartbeat 만료 시간 배수
pub const TTL_MULTIPLIER: u32 = 3;

/// 보고 채널 버퍼 크기
const REPORT_BUFFER: usize = 16;

/// heartbeat 태스크가 워커 루프에 보내는 보고
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatReport {
    /// 갱신 실패 (연속 실패 횟수 포함)
    Failed {
        /// 연속 실패 횟수
        consecutive: u32,
        /// 마지막 에러
        error: String,
    },
    /// 실패 후 다시 갱신 성공
    Recovered,
}

/// 워커 heartbeat
pub struct Heartbeat<S> {
    store: Arc<S>,
    queue: String,
    worker_id: String,
    interval: Duration,
}

impl<S: SharedStore> Heartbeat<S> {
    /// 새 heartbeat를 생성합니다. `queue`는 갱신 때마다 등록할 레지스트리의 큐입니다.
    pub fn new(
        store: Arc<S>,
        queue: impl Into<String>,
        worker_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            queue: queue.into(),
            worker_id: worker_id.into(),
            interval,
        }
    }

    /// 만료 시간 (3 × interval)
    pub fn ttl(&self) -> Duration {
        self.interval.saturating_mul(TTL_MULTIPLIER)
    }

    /// heartbeat를 한 번 갱신하고 레지스트리에 등록합니다.
    ///
    /// heartbeat를 먼저 세웁니다. 반대 순서면 등록 직후 janitor가 만료된
    /// heartbeat를 보고 다시 레지스트리에서 뺄 수 있습니다.
    pub async fn beat(&self) -> Result<(), StoreError> {
        self.store
            .set_heartbeat(&self.worker_id, now_millis(), self.ttl())
            .await?;
        self.store.register_worker(&self.queue, &self.worker_id).await
    }

    /// 갱신 태스크를 스폰합니다.
    ///
    /// 첫 갱신은 호출자가 `beat()`로 이미 수행했다고 가정하고 `interval` 후부터 시작합니다.
    /// `cancel`이 발동되면 종료합니다 (heartbeat 삭제는 호출자 몫).
    pub fn spawn(self, cancel: CancellationToken) -> (JoinHandle<()>, mpsc::Receiver<HeartbeatReport>) {
        let (tx, rx) = mpsc::channel(REPORT_BUFFER);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + self.interval,
                self.interval,
            );
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut consecutive = 0u32;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match self.beat().await {
                    Ok(()) => {
                        if consecutive > 0 {
                            tracing::info!(worker_id = %self.worker_id, "heartbeat recovered");
                            consecutive = 0;
                            // 수신 측이 닫혔으면 워커가 종료 중
                            let _ = tx.send(HeartbeatReport::Recovered).await;
                        }
                    }
                    Err(e) => {
                        consecutive += 1;
                        metrics::counter!(m::WORKER_HEARTBEAT_FAILURES_TOTAL).increment(1);
                        tracing::warn!(
                            worker_id = %self.worker_id,
                            consecutive,
                            error = %e,
                            "heartbeat renewal failed"
                        );
                        let _ = tx
                            .send(HeartbeatReport::Failed {
                                consecutive,
                                error: e.to_string(),
                            })
                            .await;
                    }
                }
            }
            tracing::debug!(worker_id = %self.worker_id, "heartbeat task stopped");
        });
        (handle, rx)
    }
}
