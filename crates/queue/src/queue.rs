//! 신뢰성 큐: dequeue / complete / fail
//!
//! 모든 해제 연산은 조건부입니다. lease가 이미 janitor에게 회수되었다면
//! 스토어는 아무것도 적재하지 않고 `false`를 반환하며, 이 경우 항목은 큐에
//! 정확히 한 번(회수된 사본) 존재합니다.

use std::sync::Arc;
use std::time::Duration;

use trapline_core::envelope::{DeadLetterRecord, Envelope};
use trapline_core::metrics as m;
use trapline_store::{Release, SharedStore};

use crate::error::QueueError;
use crate::lease::Lease;

/// 실패한 lease의 처리 방식
#[derive(Debug, Clone)]
pub enum Disposition {
    /// 원본 큐로 되돌립니다. `visible_at_ms`가 있으면 그 시각까지 지연 집합에 둡니다.
    Requeue {
        /// 다시 적재할 엔벨로프 (retry_count / shedding_reason 반영 후)
        envelope: Envelope,
        /// 가시화 시각 (Unix epoch ms)
        visible_at_ms: Option<u64>,
    },
    /// dead-letter 큐로 보냅니다.
    DeadLetter(DeadLetterRecord),
}

/// 한 워커가 한 큐에 대해 사용하는 신뢰성 큐 핸들
#[derive(Debug)]
pub struct ReliableQueue<S> {
    store: Arc<S>,
    queue: String,
    dead_letter: String,
    worker_id: String,
}

impl<S: SharedStore> ReliableQueue<S> {
    /// 새 핸들을 생성합니다.
    pub fn new(
        store: Arc<S>,
        queue: impl Into<String>,
        dead_letter: impl Into<String>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            queue: queue.into(),
            dead_letter: dead_letter.into(),
            worker_id: worker_id.into(),
        }
    }

    /// 원본 큐 이름
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// dead-letter 큐 이름
    pub fn dead_letter_queue(&self) -> &str {
        &self.dead_letter
    }

    /// 워커 ID
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// 공유 스토어
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 항목 하나를 원자적으로 꺼내 processing 리스트에 옮깁니다.
    ///
    /// `timeout` 동안 항목이 없으면 `None`을 반환합니다.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<Lease>, QueueError> {
        let item = self
            .store
            .dequeue(&self.queue, &self.worker_id, timeout)
            .await?;
        Ok(item.map(|raw| Lease::new(&self.queue, &self.worker_id, raw)))
    }

    /// 처리 완료된 lease를 제거합니다.
    pub async fn complete(&self, lease: &Lease) -> Result<bool, QueueError> {
        let held = self
            .store
            .release(&self.queue, &self.worker_id, lease.raw(), Release::Drop)
            .await?;
        self.note_lease(held, "complete");
        Ok(held)
    }

    /// 실패한 lease를 재적재하거나 dead-letter 처리합니다.
    pub async fn fail(&self, lease: &Lease, disposition: Disposition) -> Result<bool, QueueError> {
        let held = match disposition {
            Disposition::Requeue {
                envelope,
                visible_at_ms,
            } => {
                let payload = envelope.encode()?;
                let release = match visible_at_ms {
                    Some(visible_at_ms) => Release::Delay {
                        queue: &self.queue,
                        payload: &payload,
                        visible_at_ms,
                    },
                    None => Release::Push {
                        queue: &self.queue,
                        payload: &payload,
                    },
                };
                self.store
                    .release(&self.queue, &self.worker_id, lease.raw(), release)
                    .await?
            }
            Disposition::DeadLetter(record) => {
                let payload = record.encode()?;
                self.store
                    .release(
                        &self.queue,
                        &self.worker_id,
                        lease.raw(),
                        Release::Push {
                            queue: &self.dead_letter,
                            payload: &payload,
                        },
                    )
                    .await?
            }
        };
        self.note_lease(held, "fail");
        Ok(held)
    }

    /// 가시화 시각이 지난 지연 항목을 큐로 옮깁니다.
    pub async fn promote_due(&self, now_ms: u64, limit: usize) -> Result<usize, QueueError> {
        Ok(self.store.promote_due(&self.queue, now_ms, limit).await?)
    }

    /// 큐 깊이 gauge를 갱신합니다.
    pub async fn record_depths(&self) -> Result<(), QueueError> {
        let depth = self.store.len(&self.queue).await?;
        let delayed = self.store.delayed_len(&self.queue).await?;
        let dead = self.store.len(&self.dead_letter).await?;
        metrics::gauge!(m::QUEUE_DEPTH, m::LABEL_QUEUE => self.queue.clone()).set(depth as f64);
        metrics::gauge!(m::QUEUE_DELAYED_DEPTH, m::LABEL_QUEUE => self.queue.clone())
            .set(delayed as f64);
        metrics::gauge!(m::QUEUE_DEAD_LETTER_DEPTH, m::LABEL_QUEUE => self.dead_letter.clone())
            .set(dead as f64);
        Ok(())
    }

    fn note_lease(&self, held: bool, op: &'static str) {
        if !held {
            tracing::warn!(
                queue = %self.queue,
                worker_id = %self.worker_id,
                op,
                "lease lost, item was already recovered by a janitor"
            );
            metrics::counter!(m::WORKER_LEASE_LOST_TOTAL, m::LABEL_QUEUE => self.queue.clone())
                .increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trapline_core::types::FailureClass;
    use trapline_store::MemoryStore;

    fn queue(store: &Arc<MemoryStore>) -> ReliableQueue<MemoryStore> {
        ReliableQueue::new(Arc::clone(store), "in", "dlq", "w1")
    }

    async fn leased(q: &ReliableQueue<MemoryStore>, raw: &str) -> Lease {
        q.store().push(q.queue(), raw).await.unwrap();
        q.dequeue(Duration::from_millis(10)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn complete_removes_lease() {
        let store = Arc::new(MemoryStore::new());
        let q = queue(&store);
        let lease = leased(&q, r#"{"message":"a"}"#).await;

        assert!(q.complete(&lease).await.unwrap());
        assert!(store.processing("in", "w1").await.unwrap().is_empty());
        assert_eq!(store.len("in").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn requeue_writes_reencoded_envelope() {
        let store = Arc::new(MemoryStore::new());
        let q = queue(&store);
        let lease = leased(&q, r#"{"message":"a"}"#).await;
        let next = lease.envelope().unwrap().next_attempt();

        let held = q
            .fail(
                &lease,
                Disposition::Requeue {
                    envelope: next,
                    visible_at_ms: None,
                },
            )
            .await
            .unwrap();

        assert!(held);
        let items = store.range("in", 0, 10).await.unwrap();
        assert_eq!(Envelope::decode(&items[0]).unwrap().retry_count, 1);
    }

    #[tokio::test]
    async fn delayed_requeue_is_invisible_until_due() {
        let store = Arc::new(MemoryStore::new());
        let q = queue(&store);
        let lease = leased(&q, r#"{"message":"a"}"#).await;
        let env = lease.envelope().unwrap();

        q.fail(
            &lease,
            Disposition::Requeue {
                envelope: env,
                visible_at_ms: Some(5_000),
            },
        )
        .await
        .unwrap();

        assert_eq!(store.len("in").await.unwrap(), 0);
        assert_eq!(q.promote_due(4_999, 10).await.unwrap(), 0);
        assert_eq!(q.promote_due(5_000, 10).await.unwrap(), 1);
        assert_eq!(store.len("in").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dead_letter_goes_to_dlq() {
        let store = Arc::new(MemoryStore::new());
        let q = queue(&store);
        let lease = leased(&q, "not json").await;
        let record = DeadLetterRecord {
            envelope: None,
            raw: Some(lease.raw().to_owned()),
            classification: FailureClass::TerminalContent,
            reason: "malformed_envelope".to_owned(),
            attempts: 1,
            last_error: None,
            source_queue: "in".to_owned(),
            worker_id: "w1".to_owned(),
            failed_at_ms: 0,
        };

        assert!(q.fail(&lease, Disposition::DeadLetter(record)).await.unwrap());
        let parked = store.range("dlq", 0, 10).await.unwrap();
        let decoded = DeadLetterRecord::decode(&parked[0]).unwrap();
        assert_eq!(decoded.raw.as_deref(), Some("not json"));
    }

    #[tokio::test]
    async fn completing_a_recovered_lease_reports_loss() {
        let store = Arc::new(MemoryStore::new());
        let q = queue(&store);
        let lease = leased(&q, r#"{"message":"a"}"#).await;
        store.recover("in", "w1", 0).await.unwrap();

        assert!(!q.complete(&lease).await.unwrap());
        assert_eq!(store.len("in").await.unwrap(), 1);
    }
}
