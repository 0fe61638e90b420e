//! Redis 공유 스토어
//!
//! 다중 레플리카 배포용 백엔드입니다. 단일 명령으로 표현되지 않는 원자 연산
//! (조건부 해제, 회수, rate window, 임계치, 서킷)은 Lua 스크립트로 실행합니다.
//!
//! 블로킹 `BLMOVE`는 다른 명령을 막지 않도록 전용 연결 풀에서 실행하고,
//! 나머지 명령은 자동 재연결되는 `ConnectionManager`를 공유합니다.

use std::time::Duration;

use futures::StreamExt;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Client, Script};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::keys;
use crate::store::SharedStore;
use crate::types::{
    CircuitAcquire, CircuitPermit, CircuitSnapshot, CircuitState, CircuitTransition, Release,
    ThresholdOutcome,
};

/// 구독 채널 버퍼 크기
const SUBSCRIBER_BUFFER: usize = 64;

/// 지연 집합 멤버의 고유 접두어 구분자
const DELAY_SEPARATOR: char = '|';

const RELEASE_LUA: &str = r"
local removed = redis.call('LREM', KEYS[1], 1, ARGV[1])
if removed == 0 then return 0 end
if ARGV[2] == 'push' then
  redis.call('RPUSH', KEYS[2], ARGV[3])
elseif ARGV[2] == 'delay' then
  redis.call('ZADD', KEYS[2], ARGV[4], ARGV[3])
end
return 1
";

const PROMOTE_LUA: &str = r"
local items = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, member in ipairs(items) do
  redis.call('ZREM', KEYS[1], member)
  local sep = string.find(member, '|', 1, true)
  redis.call('RPUSH', KEYS[2], string.sub(member, sep + 1))
end
return #items
";

const RECOVER_LUA: &str = r"
if redis.call('EXISTS', KEYS[3]) == 1 then return -1 end
local n = 0
while redis.call('LMOVE', KEYS[1], KEYS[2], 'LEFT', 'RIGHT') do
  n = n + 1
end
redis.call('DEL', KEYS[1])
redis.call('SREM', KEYS[4], ARGV[1])
return n
";

const RATE_ALLOW_LUA: &str = r"
local window = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
if redis.call('ZCARD', KEYS[1]) < tonumber(ARGV[1]) then
  redis.call('ZADD', KEYS[1], now, ARGV[4])
  redis.call('PEXPIRE', KEYS[1], window)
  return 1
end
return 0
";

const THRESHOLD_LUA: &str = r"
local n = redis.call('INCR', KEYS[1])
if n == 1 then redis.call('PEXPIRE', KEYS[1], ARGV[2]) end
if n < tonumber(ARGV[1]) then return {0, n} end
if redis.call('EXISTS', KEYS[2]) == 1 then return {2, n} end
redis.call('RENAME', KEYS[1], KEYS[2])
redis.call('PEXPIRE', KEYS[2], ARGV[2])
return {1, n}
";

const CIRCUIT_ACQUIRE_LUA: &str = r"
local now = tonumber(ARGV[1])
local state = redis.call('HGET', KEYS[1], 'state') or 'closed'
if state == 'closed' then return {'allow', state, state, 0} end
if state == 'open' then
  local open_until = tonumber(redis.call('HGET', KEYS[1], 'open_until') or '0')
  if now < open_until then return {'reject', state, state, open_until} end
  redis.call('HSET', KEYS[1], 'state', 'half_open', 'probe_until', now + tonumber(ARGV[2]))
  return {'probe', 'open', 'half_open', 0}
end
local probe_until = tonumber(redis.call('HGET', KEYS[1], 'probe_until') or '0')
if probe_until > now then return {'reject', state, state, probe_until} end
redis.call('HSET', KEYS[1], 'probe_until', now + tonumber(ARGV[2]))
return {'probe', state, state, 0}
";

const CIRCUIT_SUCCESS_LUA: &str = r"
local prev = redis.call('HGET', KEYS[1], 'state') or 'closed'
redis.call('HSET', KEYS[1], 'state', 'closed', 'failures', 0, 'open_until', 0, 'probe_until', 0)
return prev
";

const CIRCUIT_FAILURE_LUA: &str = r"
local prev = redis.call('HGET', KEYS[1], 'state') or 'closed'
local failures = redis.call('HINCRBY', KEYS[1], 'failures', 1)
local now = tonumber(ARGV[3])
if (prev == 'closed' and failures >= tonumber(ARGV[1])) or prev == 'half_open' then
  redis.call('HSET', KEYS[1], 'state', 'open', 'open_until', now + tonumber(ARGV[2]), 'probe_until', 0)
  return {prev, 'open'}
end
redis.call('HSET', KEYS[1], 'state', prev)
return {prev, prev}
";

const CIRCUIT_RELEASE_LUA: &str = r"
if redis.call('HGET', KEYS[1], 'state') == 'half_open' then
  redis.call('HSET', KEYS[1], 'probe_until', 0)
end
return 1
";

struct Scripts {
    release: Script,
    promote: Script,
    recover: Script,
    rate_allow: Script,
    threshold: Script,
    circuit_acquire: Script,
    circuit_success: Script,
    circuit_failure: Script,
    circuit_release: Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            release: Script::new(RELEASE_LUA),
            promote: Script::new(PROMOTE_LUA),
            recover: Script::new(RECOVER_LUA),
            rate_allow: Script::new(RATE_ALLOW_LUA),
            threshold: Script::new(THRESHOLD_LUA),
            circuit_acquire: Script::new(CIRCUIT_ACQUIRE_LUA),
            circuit_success: Script::new(CIRCUIT_SUCCESS_LUA),
            circuit_failure: Script::new(CIRCUIT_FAILURE_LUA),
            circuit_release: Script::new(CIRCUIT_RELEASE_LUA),
        }
    }
}

/// Redis 공유 스토어
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
    blocking: Mutex<Vec<MultiplexedConnection>>,
    scripts: Scripts,
}

impl RedisStore {
    /// Redis에 연결합니다.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!(url = %redact_url(url), "connected to redis store");
        Ok(Self {
            client,
            conn,
            blocking: Mutex::new(Vec::new()),
            scripts: Scripts::new(),
        })
    }

    async fn blocking_connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let pooled = self.blocking.lock().await.pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => Ok(self.client.get_multiplexed_async_connection().await?),
        }
    }
}

impl SharedStore for RedisStore {
    async fn push(&self, queue: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(queue)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue(
        &self,
        queue: &str,
        worker_id: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.blocking_connection().await?;
        // BLMOVE의 0초 타임아웃은 무한 대기
        let block_secs = timeout.max(Duration::from_millis(1)).as_secs_f64();
        let item: Option<String> = redis::cmd("BLMOVE")
            .arg(queue)
            .arg(keys::processing(queue, worker_id))
            .arg("LEFT")
            .arg("RIGHT")
            .arg(block_secs)
            .query_async(&mut conn)
            .await?;
        self.blocking.lock().await.push(conn);
        Ok(item)
    }

    async fn release(
        &self,
        queue: &str,
        worker_id: &str,
        payload: &str,
        release: Release<'_>,
    ) -> Result<bool, StoreError> {
        let processing = keys::processing(queue, worker_id);
        let (mode, target, item, score) = match release {
            Release::Drop => ("drop", processing.clone(), String::new(), 0),
            Release::Push {
                queue: target,
                payload: item,
            } => ("push", target.to_owned(), item.to_owned(), 0),
            Release::Delay {
                queue: target,
                payload: item,
                visible_at_ms,
            } => (
                "delay",
                keys::delayed(target),
                format!("{}{DELAY_SEPARATOR}{item}", Uuid::new_v4().simple()),
                visible_at_ms,
            ),
        };
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .scripts
            .release
            .key(&processing)
            .key(&target)
            .arg(payload)
            .arg(mode)
            .arg(&item)
            .arg(score)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn promote_due(
        &self,
        queue: &str,
        now_ms: u64,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let moved: usize = self
            .scripts
            .promote
            .key(keys::delayed(queue))
            .key(queue)
            .arg(now_ms)
            .arg(limit)
            .invoke_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn len(&self, queue: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("LLEN").arg(queue).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn delayed_len(&self, queue: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("ZCARD")
            .arg(keys::delayed(queue))
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn range(
        &self,
        queue: &str,
        start: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let items: Vec<String> = redis::cmd("LRANGE")
            .arg(queue)
            .arg(start)
            .arg(start + count - 1)
            .query_async(&mut conn)
            .await?;
        Ok(items)
    }

    async fn remove(&self, queue: &str, payload: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(queue)
            .arg(1)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn purge(&self, queue: &str) -> Result<usize, StoreError> {
        let delayed = keys::delayed(queue);
        let mut conn = self.conn.clone();
        let (listed, parked): (usize, usize) = redis::pipe()
            .atomic()
            .cmd("LLEN")
            .arg(queue)
            .cmd("ZCARD")
            .arg(&delayed)
            .cmd("DEL")
            .arg(queue)
            .arg(&delayed)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(listed + parked)
    }

    async fn register_worker(&self, queue: &str, worker_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("SADD")
            .arg(keys::workers(queue))
            .arg(worker_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn workers(&self, queue: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<String> = redis::cmd("SMEMBERS")
            .arg(keys::workers(queue))
            .query_async(&mut conn)
            .await?;
        ids.sort();
        Ok(ids)
    }

    async fn processing(&self, queue: &str, worker_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let items: Vec<String> = redis::cmd("LRANGE")
            .arg(keys::processing(queue, worker_id))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        Ok(items)
    }

    async fn set_heartbeat(
        &self,
        worker_id: &str,
        now_ms: u64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(keys::heartbeat(worker_id))
            .arg(now_ms)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn heartbeat_alive(&self, worker_id: &str, _now_ms: u64) -> Result<bool, StoreError> {
        // 만료는 Redis TTL이 처리
        let mut conn = self.conn.clone();
        let exists: i64 = redis::cmd("EXISTS")
            .arg(keys::heartbeat(worker_id))
            .query_async(&mut conn)
            .await?;
        Ok(exists == 1)
    }

    async fn clear_heartbeat(&self, worker_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(keys::heartbeat(worker_id))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover(
        &self,
        queue: &str,
        worker_id: &str,
        _now_ms: u64,
    ) -> Result<Option<usize>, StoreError> {
        let mut conn = self.conn.clone();
        let moved: i64 = self
            .scripts
            .recover
            .key(keys::processing(queue, worker_id))
            .key(queue)
            .key(keys::heartbeat(worker_id))
            .key(keys::workers(queue))
            .arg(worker_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(usize::try_from(moved).ok())
    }

    async fn rate_allow(
        &self,
        key: &str,
        limit: u64,
        window_ms: u64,
        now_ms: u64,
        member: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let allowed: i64 = self
            .scripts
            .rate_allow
            .key(keys::rate_window(key))
            .arg(limit)
            .arg(window_ms)
            .arg(now_ms)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;
        Ok(allowed == 1)
    }

    async fn incr_threshold(
        &self,
        key: &str,
        threshold: u64,
        window_ms: u64,
        _now_ms: u64,
    ) -> Result<ThresholdOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let (code, count): (i64, u64) = self
            .scripts
            .threshold
            .key(keys::threshold(key))
            .key(keys::threshold_triggered(key))
            .arg(threshold)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;
        match code {
            0 => Ok(ThresholdOutcome::Counting(count)),
            1 => Ok(ThresholdOutcome::Triggered(count)),
            2 => Ok(ThresholdOutcome::Suppressed(count)),
            other => Err(StoreError::Protocol(format!(
                "unknown threshold outcome code {other}"
            ))),
        }
    }

    async fn circuit_acquire(
        &self,
        key: &str,
        now_ms: u64,
        probe_timeout_ms: u64,
    ) -> Result<CircuitAcquire, StoreError> {
        let mut conn = self.conn.clone();
        let (permit, from, to, retry_at_ms): (String, String, String, u64) = self
            .scripts
            .circuit_acquire
            .key(keys::circuit(key))
            .arg(now_ms)
            .arg(probe_timeout_ms)
            .invoke_async(&mut conn)
            .await?;
        let permit = match permit.as_str() {
            "allow" => CircuitPermit::Allow,
            "probe" => CircuitPermit::Probe,
            "reject" => CircuitPermit::Reject { retry_at_ms },
            other => {
                return Err(StoreError::Protocol(format!(
                    "unknown circuit permit '{other}'"
                )));
            }
        };
        Ok(CircuitAcquire {
            permit,
            transition: CircuitTransition {
                from: CircuitState::parse(&from),
                to: CircuitState::parse(&to),
            },
        })
    }

    async fn circuit_record_success(&self, key: &str) -> Result<CircuitTransition, StoreError> {
        let mut conn = self.conn.clone();
        let previous: String = self
            .scripts
            .circuit_success
            .key(keys::circuit(key))
            .invoke_async(&mut conn)
            .await?;
        Ok(CircuitTransition {
            from: CircuitState::parse(&previous),
            to: CircuitState::Closed,
        })
    }

    async fn circuit_record_failure(
        &self,
        key: &str,
        threshold: u32,
        open_ms: u64,
        now_ms: u64,
    ) -> Result<CircuitTransition, StoreError> {
        let mut conn = self.conn.clone();
        let (from, to): (String, String) = self
            .scripts
            .circuit_failure
            .key(keys::circuit(key))
            .arg(threshold)
            .arg(open_ms)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(CircuitTransition {
            from: CircuitState::parse(&from),
            to: CircuitState::parse(&to),
        })
    }

    async fn circuit_release_probe(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .scripts
            .circuit_release
            .key(keys::circuit(key))
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn circuit_state(&self, key: &str) -> Result<CircuitSnapshot, StoreError> {
        let mut conn = self.conn.clone();
        let (state, failures, open_until_ms): (Option<String>, Option<u32>, Option<u64>) =
            redis::cmd("HMGET")
                .arg(keys::circuit(key))
                .arg("state")
                .arg("failures")
                .arg("open_until")
                .query_async(&mut conn)
                .await?;
        Ok(CircuitSnapshot {
            state: state.as_deref().map_or(CircuitState::Closed, CircuitState::parse),
            failures: failures.unwrap_or(0),
            open_until_ms: open_until_ms.unwrap_or(0),
        })
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let receivers: usize = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(message)
            .query_async(&mut conn)
            .await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<mpsc::Receiver<String>, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let channel = channel.to_owned();
        tokio::spawn(async move {
            let messages = pubsub.into_on_message();
            tokio::pin!(messages);
            while let Some(msg) = messages.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "dropping undecodable notification");
                    }
                }
            }
            tracing::debug!(channel = %channel, "subscription stream ended");
        });
        Ok(rx)
    }
}

/// 로그용으로 URL의 비밀번호를 가립니다.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_url_hides_credentials() {
        assert_eq!(
            redact_url("redis://user:pw@cache:6379/0"),
            "redis://***@cache:6379/0"
        );
        assert_eq!(redact_url("redis://cache:6379"), "redis://cache:6379");
    }

    #[test]
    fn promote_script_uses_delay_separator() {
        assert!(PROMOTE_LUA.contains(&format!("'{DELAY_SEPARATOR}'")));
    }
}
