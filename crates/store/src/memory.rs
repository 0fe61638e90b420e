//! In-process 공유 스토어
//!
//! 하나의 mutex 아래에서 모든 연산을 수행하므로 Redis 백엔드와 같은 원자성 계약을 만족합니다.
//! 단일 프로세스 배포(매칭 엔진과 포워더를 한 데몬에서 실행)와 테스트에 사용합니다.
//! 블로킹 dequeue는 `Notify`로 적재 시점에 깨어납니다.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};

use crate::error::StoreError;
use crate::keys;
use crate::store::SharedStore;
use crate::types::{
    CircuitAcquire, CircuitPermit, CircuitSnapshot, CircuitState, CircuitTransition, Release,
    ThresholdOutcome,
};

/// 구독 채널 버퍼 크기
const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug)]
struct DelayedItem {
    visible_at_ms: u64,
    seq: u64,
    payload: String,
}

#[derive(Debug, Clone, Copy)]
struct Expiring {
    value: u64,
    expires_at_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct CircuitRecord {
    state: CircuitState,
    failures: u32,
    open_until_ms: u64,
    probe_until_ms: u64,
}

impl CircuitRecord {
    fn acquire(&mut self, now_ms: u64, probe_timeout_ms: u64) -> CircuitAcquire {
        let from = self.state;
        let permit = match self.state {
            CircuitState::Closed => CircuitPermit::Allow,
            CircuitState::Open if now_ms < self.open_until_ms => CircuitPermit::Reject {
                retry_at_ms: self.open_until_ms,
            },
            CircuitState::Open => {
                self.state = CircuitState::HalfOpen;
                self.probe_until_ms = now_ms + probe_timeout_ms;
                CircuitPermit::Probe
            }
            CircuitState::HalfOpen if self.probe_until_ms > now_ms => CircuitPermit::Reject {
                retry_at_ms: self.probe_until_ms,
            },
            CircuitState::HalfOpen => {
                self.probe_until_ms = now_ms + probe_timeout_ms;
                CircuitPermit::Probe
            }
        };
        CircuitAcquire {
            permit,
            transition: CircuitTransition {
                from,
                to: self.state,
            },
        }
    }

    fn record_success(&mut self) -> CircuitTransition {
        let from = self.state;
        *self = Self::default();
        CircuitTransition {
            from,
            to: self.state,
        }
    }

    fn record_failure(&mut self, threshold: u32, open_ms: u64, now_ms: u64) -> CircuitTransition {
        let from = self.state;
        self.failures = self.failures.saturating_add(1);
        match self.state {
            CircuitState::Closed if self.failures >= threshold => {
                self.state = CircuitState::Open;
                self.open_until_ms = now_ms + open_ms;
            }
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.open_until_ms = now_ms + open_ms;
                self.probe_until_ms = 0;
            }
            _ => {}
        }
        CircuitTransition {
            from,
            to: self.state,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    delayed: HashMap<String, Vec<DelayedItem>>,
    sets: HashMap<String, BTreeSet<String>>,
    heartbeats: HashMap<String, u64>,
    windows: HashMap<String, VecDeque<(u64, String)>>,
    counters: HashMap<String, Expiring>,
    flags: HashMap<String, u64>,
    circuits: HashMap<String, CircuitRecord>,
    seq: u64,
    push_outages: BTreeSet<String>,
    subscribe_outage: bool,
}

impl Inner {
    fn push_tail(&mut self, queue: &str, payload: String) {
        self.lists
            .entry(queue.to_owned())
            .or_default()
            .push_back(payload);
    }

    fn remove_one(&mut self, key: &str, payload: &str) -> bool {
        let Some(list) = self.lists.get_mut(key) else {
            return false;
        };
        let Some(idx) = list.iter().position(|v| v == payload) else {
            return false;
        };
        list.remove(idx);
        if list.is_empty() {
            self.lists.remove(key);
        }
        true
    }
}

/// In-process 공유 스토어
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pushed: Notify,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<String>>>>,
}

impl MemoryStore {
    /// 빈 스토어를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// `queue`로의 push를 연결 에러로 실패시킵니다 (장애 주입).
    pub fn set_push_outage(&self, queue: &str, down: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            if down {
                inner.push_outages.insert(queue.to_owned());
            } else {
                inner.push_outages.remove(queue);
            }
        }
    }

    /// 채널 구독을 연결 에러로 실패시킵니다 (장애 주입).
    pub fn set_subscribe_outage(&self, down: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribe_outage = down;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }

    fn try_move(&self, queue: &str, worker_id: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock()?;
        let item = match inner.lists.get_mut(queue) {
            Some(list) => list.pop_front(),
            None => None,
        };
        if let Some(item) = &item {
            inner.push_tail(&keys::processing(queue, worker_id), item.clone());
        }
        Ok(item)
    }
}

impl SharedStore for MemoryStore {
    async fn push(&self, queue: &str, payload: &str) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.push_outages.contains(queue) {
            return Err(StoreError::Connection(format!("push to {queue} refused")));
        }
        inner.push_tail(queue, payload.to_owned());
        drop(inner);
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn dequeue(
        &self,
        queue: &str,
        worker_id: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_move(queue, worker_id)? {
                return Ok(Some(item));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn release(
        &self,
        queue: &str,
        worker_id: &str,
        payload: &str,
        release: Release<'_>,
    ) -> Result<bool, StoreError> {
        {
            let mut inner = self.lock()?;
            if !inner.remove_one(&keys::processing(queue, worker_id), payload) {
                return Ok(false);
            }
            match release {
                Release::Drop => return Ok(true),
                Release::Push {
                    queue: target,
                    payload: item,
                } => inner.push_tail(target, item.to_owned()),
                Release::Delay {
                    queue: target,
                    payload: item,
                    visible_at_ms,
                } => {
                    inner.seq += 1;
                    let seq = inner.seq;
                    inner
                        .delayed
                        .entry(keys::delayed(target))
                        .or_default()
                        .push(DelayedItem {
                            visible_at_ms,
                            seq,
                            payload: item.to_owned(),
                        });
                    return Ok(true);
                }
            }
        }
        self.pushed.notify_waiters();
        Ok(true)
    }

    async fn promote_due(
        &self,
        queue: &str,
        now_ms: u64,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let moved = {
            let mut inner = self.lock()?;
            let Some(items) = inner.delayed.get_mut(&keys::delayed(queue)) else {
                return Ok(0);
            };
            items.sort_by_key(|item| (item.visible_at_ms, item.seq));
            let due = items
                .iter()
                .take_while(|item| item.visible_at_ms <= now_ms)
                .count()
                .min(limit);
            let moved: Vec<String> = items.drain(..due).map(|item| item.payload).collect();
            if items.is_empty() {
                inner.delayed.remove(&keys::delayed(queue));
            }
            for payload in &moved {
                inner.push_tail(queue, payload.clone());
            }
            moved.len()
        };
        if moved > 0 {
            self.pushed.notify_waiters();
        }
        Ok(moved)
    }

    async fn len(&self, queue: &str) -> Result<usize, StoreError> {
        Ok(self.lock()?.lists.get(queue).map_or(0, VecDeque::len))
    }

    async fn delayed_len(&self, queue: &str) -> Result<usize, StoreError> {
        Ok(self
            .lock()?
            .delayed
            .get(&keys::delayed(queue))
            .map_or(0, Vec::len))
    }

    async fn range(
        &self,
        queue: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()?
            .lists
            .get(queue)
            .map(|list| list.iter().skip(start).take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn remove(&self, queue: &str, payload: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove_one(queue, payload))
    }

    async fn purge(&self, queue: &str) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        let listed = inner.lists.remove(queue).map_or(0, |l| l.len());
        let delayed = inner
            .delayed
            .remove(&keys::delayed(queue))
            .map_or(0, |d| d.len());
        Ok(listed + delayed)
    }

    async fn register_worker(&self, queue: &str, worker_id: &str) -> Result<(), StoreError> {
        self.lock()?
            .sets
            .entry(keys::workers(queue))
            .or_default()
            .insert(worker_id.to_owned());
        Ok(())
    }

    async fn workers(&self, queue: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()?
            .sets
            .get(&keys::workers(queue))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn processing(&self, queue: &str, worker_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()?
            .lists
            .get(&keys::processing(queue, worker_id))
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_heartbeat(
        &self,
        worker_id: &str,
        now_ms: u64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.lock()?.heartbeats.insert(
            keys::heartbeat(worker_id),
            now_ms + ttl.as_millis() as u64,
        );
        Ok(())
    }

    async fn heartbeat_alive(&self, worker_id: &str, now_ms: u64) -> Result<bool, StoreError> {
        Ok(self
            .lock()?
            .heartbeats
            .get(&keys::heartbeat(worker_id))
            .is_some_and(|expires_at| *expires_at > now_ms))
    }

    async fn clear_heartbeat(&self, worker_id: &str) -> Result<(), StoreError> {
        self.lock()?.heartbeats.remove(&keys::heartbeat(worker_id));
        Ok(())
    }

    async fn recover(
        &self,
        queue: &str,
        worker_id: &str,
        now_ms: u64,
    ) -> Result<Option<usize>, StoreError> {
        let recovered = {
            let mut inner = self.lock()?;
            let alive = inner
                .heartbeats
                .get(&keys::heartbeat(worker_id))
                .is_some_and(|expires_at| *expires_at > now_ms);
            if alive {
                return Ok(None);
            }
            let items = inner
                .lists
                .remove(&keys::processing(queue, worker_id))
                .unwrap_or_default();
            let count = items.len();
            if count > 0 {
                inner.lists.entry(queue.to_owned()).or_default().extend(items);
            }
            if let Some(set) = inner.sets.get_mut(&keys::workers(queue)) {
                set.remove(worker_id);
            }
            count
        };
        if recovered > 0 {
            self.pushed.notify_waiters();
        }
        Ok(Some(recovered))
    }

    async fn rate_allow(
        &self,
        key: &str,
        limit: u64,
        window_ms: u64,
        now_ms: u64,
        member: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let window = inner.windows.entry(keys::rate_window(key)).or_default();
        if let Some(cutoff) = now_ms.checked_sub(window_ms) {
            while window.front().is_some_and(|(ts, _)| *ts <= cutoff) {
                window.pop_front();
            }
        }
        if (window.len() as u64) < limit {
            window.push_back((now_ms, member.to_owned()));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn incr_threshold(
        &self,
        key: &str,
        threshold: u64,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<ThresholdOutcome, StoreError> {
        let counter_key = keys::threshold(key);
        let flag_key = keys::threshold_triggered(key);
        let mut inner = self.lock()?;

        if inner
            .counters
            .get(&counter_key)
            .is_some_and(|c| c.expires_at_ms <= now_ms)
        {
            inner.counters.remove(&counter_key);
        }
        if inner.flags.get(&flag_key).is_some_and(|exp| *exp <= now_ms) {
            inner.flags.remove(&flag_key);
        }

        let counter = inner.counters.entry(counter_key.clone()).or_insert(Expiring {
            value: 0,
            expires_at_ms: now_ms + window_ms,
        });
        counter.value += 1;
        let count = counter.value;

        if count < threshold {
            return Ok(ThresholdOutcome::Counting(count));
        }
        if inner.flags.contains_key(&flag_key) {
            return Ok(ThresholdOutcome::Suppressed(count));
        }
        inner.counters.remove(&counter_key);
        inner.flags.insert(flag_key, now_ms + window_ms);
        Ok(ThresholdOutcome::Triggered(count))
    }

    async fn circuit_acquire(
        &self,
        key: &str,
        now_ms: u64,
        probe_timeout_ms: u64,
    ) -> Result<CircuitAcquire, StoreError> {
        Ok(self
            .lock()?
            .circuits
            .entry(keys::circuit(key))
            .or_default()
            .acquire(now_ms, probe_timeout_ms))
    }

    async fn circuit_record_success(&self, key: &str) -> Result<CircuitTransition, StoreError> {
        Ok(self
            .lock()?
            .circuits
            .entry(keys::circuit(key))
            .or_default()
            .record_success())
    }

    async fn circuit_record_failure(
        &self,
        key: &str,
        threshold: u32,
        open_ms: u64,
        now_ms: u64,
    ) -> Result<CircuitTransition, StoreError> {
        Ok(self
            .lock()?
            .circuits
            .entry(keys::circuit(key))
            .or_default()
            .record_failure(threshold, open_ms, now_ms))
    }

    async fn circuit_release_probe(&self, key: &str) -> Result<(), StoreError> {
        if let Some(record) = self.lock()?.circuits.get_mut(&keys::circuit(key)) {
            if record.state == CircuitState::HalfOpen {
                record.probe_until_ms = 0;
            }
        }
        Ok(())
    }

    async fn circuit_state(&self, key: &str) -> Result<CircuitSnapshot, StoreError> {
        let record = self
            .lock()?
            .circuits
            .get(&keys::circuit(key))
            .copied()
            .unwrap_or_default();
        Ok(CircuitSnapshot {
            state: record.state,
            failures: record.failures,
            open_until_ms: record.open_until_ms,
        })
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError> {
        let mut subscribers = self.subscribers.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(senders) = subscribers.get_mut(channel) else {
            return Ok(0);
        };
        senders.retain(|tx| !tx.is_closed());
        let mut delivered = 0;
        for tx in senders.iter() {
            if tx.try_send(message.to_owned()).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, StoreError> {
        if self.lock()?.subscribe_outage {
            return Err(StoreError::Connection(format!("subscribe to {channel} refused")));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .entry(channel.to_owned())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}
