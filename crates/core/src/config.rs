//! 설정 관리: trapline.toml 파싱 및 런타임 설정
//!
//! [`TraplineConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`TRAPLINE_FORWARDER_RATE_LIMIT=50` 형식)
//! 3. 설정 파일 (`trapline.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), trapline_core::error::TraplineError> {
//! use trapline_core::config::TraplineConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = TraplineConfig::load("trapline.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = TraplineConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, TraplineError};

/// Trapline 통합 설정
///
/// `trapline.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 컴포넌트는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraplineConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 공유 스토어 설정
    #[serde(default)]
    pub store: StoreConfig,
    /// 큐 / 채널 이름
    #[serde(default)]
    pub queues: QueueConfig,
    /// 큐 워커 공통 설정
    #[serde(default)]
    pub worker: WorkerConfig,
    /// 규칙 매칭 엔진 설정
    #[serde(default)]
    pub matcher: MatcherConfig,
    /// 포워더 / 다운스트림 보호 설정
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl TraplineConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TraplineError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, TraplineError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TraplineError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                TraplineError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, TraplineError> {
        toml::from_str(toml_str).map_err(|e| {
            TraplineError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `TRAPLINE_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "TRAPLINE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "TRAPLINE_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "TRAPLINE_GENERAL_PID_FILE");
        override_u64(
            &mut self.general.config_reload_secs,
            "TRAPLINE_GENERAL_CONFIG_RELOAD_SECS",
        );

        // Store
        override_string(&mut self.store.backend, "TRAPLINE_STORE_BACKEND");
        override_string(&mut self.store.url, "TRAPLINE_STORE_URL");

        // Queues
        override_string(&mut self.queues.ingest, "TRAPLINE_QUEUES_INGEST");
        override_string(&mut self.queues.alerts, "TRAPLINE_QUEUES_ALERTS");
        override_string(&mut self.queues.dead_letter, "TRAPLINE_QUEUES_DEAD_LETTER");
        override_string(
            &mut self.queues.rules_channel,
            "TRAPLINE_QUEUES_RULES_CHANNEL",
        );

        // Worker
        override_string(&mut self.worker.worker_id, "TRAPLINE_WORKER_WORKER_ID");
        override_u64(
            &mut self.worker.heartbeat_interval_secs,
            "TRAPLINE_WORKER_HEARTBEAT_INTERVAL_SECS",
        );
        override_u64(
            &mut self.worker.dequeue_timeout_ms,
            "TRAPLINE_WORKER_DEQUEUE_TIMEOUT_MS",
        );
        override_u32(&mut self.worker.max_retries, "TRAPLINE_WORKER_MAX_RETRIES");
        override_u64(
            &mut self.worker.backoff_base_ms,
            "TRAPLINE_WORKER_BACKOFF_BASE_MS",
        );
        override_u64(
            &mut self.worker.backoff_max_ms,
            "TRAPLINE_WORKER_BACKOFF_MAX_MS",
        );
        override_u64(
            &mut self.worker.flow_control_delay_ms,
            "TRAPLINE_WORKER_FLOW_CONTROL_DELAY_MS",
        );
        override_u64(
            &mut self.worker.janitor_interval_secs,
            "TRAPLINE_WORKER_JANITOR_INTERVAL_SECS",
        );

        // Matcher
        override_bool(&mut self.matcher.enabled, "TRAPLINE_MATCHER_ENABLED");
        override_string(&mut self.matcher.rule_dir, "TRAPLINE_MATCHER_RULE_DIR");
        override_string(
            &mut self.matcher.dev_hosts_file,
            "TRAPLINE_MATCHER_DEV_HOSTS_FILE",
        );
        override_csv(&mut self.matcher.dev_hosts, "TRAPLINE_MATCHER_DEV_HOSTS");
        override_u64(
            &mut self.matcher.rule_refresh_secs,
            "TRAPLINE_MATCHER_RULE_REFRESH_SECS",
        );
        override_u64(
            &mut self.matcher.unhandled_threshold,
            "TRAPLINE_MATCHER_UNHANDLED_THRESHOLD",
        );
        override_u64(
            &mut self.matcher.unhandled_window_secs,
            "TRAPLINE_MATCHER_UNHANDLED_WINDOW_SECS",
        );
        override_string(&mut self.matcher.audit_path, "TRAPLINE_MATCHER_AUDIT_PATH");

        // Forwarder
        override_bool(&mut self.forwarder.enabled, "TRAPLINE_FORWARDER_ENABLED");
        override_string(
            &mut self.forwarder.webhook_url,
            "TRAPLINE_FORWARDER_WEBHOOK_URL",
        );
        override_string(
            &mut self.forwarder.webhook_token,
            "TRAPLINE_FORWARDER_WEBHOOK_TOKEN",
        );
        override_string(
            &mut self.forwarder.webhook_token_file,
            "TRAPLINE_FORWARDER_WEBHOOK_TOKEN_FILE",
        );
        override_u64(
            &mut self.forwarder.request_timeout_ms,
            "TRAPLINE_FORWARDER_REQUEST_TIMEOUT_MS",
        );
        override_u64(&mut self.forwarder.rate_limit, "TRAPLINE_FORWARDER_RATE_LIMIT");
        override_u64(
            &mut self.forwarder.rate_window_secs,
            "TRAPLINE_FORWARDER_RATE_WINDOW_SECS",
        );
        override_u32(
            &mut self.forwarder.circuit_threshold,
            "TRAPLINE_FORWARDER_CIRCUIT_THRESHOLD",
        );
        override_u64(
            &mut self.forwarder.circuit_timeout_secs,
            "TRAPLINE_FORWARDER_CIRCUIT_TIMEOUT_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "TRAPLINE_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "TRAPLINE_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "TRAPLINE_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), TraplineError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        let valid_backends = ["memory", "redis"];
        if !valid_backends.contains(&self.store.backend.as_str()) {
            return Err(invalid(
                "store.backend",
                format!("must be one of: {}", valid_backends.join(", ")),
            ));
        }
        if self.store.backend == "redis" && self.store.url.is_empty() {
            return Err(invalid(
                "store.url",
                "url must not be empty when backend is redis".to_owned(),
            ));
        }

        self.queues.validate()?;
        self.worker.validate()?;

        if self.matcher.enabled {
            self.matcher.validate()?;
        }
        if self.forwarder.enabled {
            self.forwarder.validate()?;
        }

        if !self.metrics.endpoint.starts_with('/') {
            return Err(invalid(
                "metrics.endpoint",
                "endpoint must start with '/'".to_owned(),
            ));
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 생성하지 않음)
    pub pid_file: String,
    /// 설정 파일 재로드 주기 (초, 0이면 비활성화)
    pub config_reload_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
            config_reload_secs: 30,
        }
    }
}

/// 공유 스토어 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 백엔드 (memory, redis)
    pub backend: String,
    /// 연결 문자열 (redis 백엔드)
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_owned(),
            url: "redis://127.0.0.1:6379".to_owned(),
        }
    }
}

/// 큐 / 채널 이름
///
/// 프로세스 수명 동안 고정됩니다 (hot reload 대상 아님).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 원시 이벤트 큐
    pub ingest: String,
    /// 알림 큐 (매칭 엔진 → 포워더)
    pub alerts: String,
    /// dead-letter 큐
    pub dead_letter: String,
    /// 규칙 변경 알림 pub/sub 채널
    pub rules_channel: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ingest: "trapline:ingest".to_owned(),
            alerts: "trapline:alerts".to_owned(),
            dead_letter: "trapline:dead_letter".to_owned(),
            rules_channel: "trapline:rules:changed".to_owned(),
        }
    }
}

impl QueueConfig {
    fn validate(&self) -> Result<(), TraplineError> {
        for (field, value) in [
            ("queues.ingest", &self.ingest),
            ("queues.alerts", &self.alerts),
            ("queues.dead_letter", &self.dead_letter),
            ("queues.rules_channel", &self.rules_channel),
        ] {
            if value.is_empty() {
                return Err(invalid(field, "queue name must not be empty".to_owned()));
            }
        }
        if self.ingest == self.alerts
            || self.ingest == self.dead_letter
            || self.alerts == self.dead_letter
        {
            return Err(invalid(
                "queues",
                "ingest, alerts and dead_letter must be distinct".to_owned(),
            ));
        }
        Ok(())
    }
}

/// 큐 워커 공통 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 워커 ID (빈 문자열이면 `{hostname}-{uuid}`로 자동 생성)
    pub worker_id: String,
    /// heartbeat 갱신 주기 (초). 만료 시간은 이 값의 3배
    pub heartbeat_interval_secs: u64,
    /// dequeue 블로킹 타임아웃 (밀리초). 루프의 스케줄링 틱
    pub dequeue_timeout_ms: u64,
    /// 최대 재시도 횟수
    pub max_retries: u32,
    /// 지수 백오프 기준 지연 (밀리초)
    pub backoff_base_ms: u64,
    /// 지수 백오프 최대 지연 (밀리초)
    pub backoff_max_ms: u64,
    /// 흐름 제어 재적재 시 최소 지연 (밀리초)
    pub flow_control_delay_ms: u64,
    /// 주기적 janitor 실행 간격 (초, 0이면 시작 시 1회만)
    pub janitor_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: String::new(),
            heartbeat_interval_secs: 5,
            dequeue_timeout_ms: 1000,
            max_retries: 5,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            flow_control_delay_ms: 1000,
            janitor_interval_secs: 0,
        }
    }
}

impl WorkerConfig {
    fn validate(&self) -> Result<(), TraplineError> {
        if self.heartbeat_interval_secs == 0 {
            return Err(invalid(
                "worker.heartbeat_interval_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.dequeue_timeout_ms == 0 || self.dequeue_timeout_ms > 60_000 {
            return Err(invalid(
                "worker.dequeue_timeout_ms",
                "must be between 1 and 60000".to_owned(),
            ));
        }
        if self.max_retries > 100 {
            return Err(invalid(
                "worker.max_retries",
                "must not exceed 100".to_owned(),
            ));
        }
        if self.backoff_base_ms == 0 {
            return Err(invalid(
                "worker.backoff_base_ms",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(invalid(
                "worker.backoff_max_ms",
                "must be greater than or equal to backoff_base_ms".to_owned(),
            ));
        }
        Ok(())
    }
}

/// 규칙 매칭 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 규칙 YAML 디렉토리
    pub rule_dir: String,
    /// 개발 호스트 목록 파일 (한 줄에 하나, `#` 주석)
    pub dev_hosts_file: String,
    /// 설정 파일에 직접 지정한 개발 호스트
    pub dev_hosts: Vec<String>,
    /// 주기적 규칙 재로드 간격 (초, 0이면 알림 채널만 사용)
    pub rule_refresh_secs: u64,
    /// 호스트별 미처리 이벤트 임계치
    pub unhandled_threshold: u64,
    /// 미처리 이벤트 집계 윈도우 (초)
    pub unhandled_window_secs: u64,
    /// 감사 레코드 JSONL 파일 경로
    pub audit_path: String,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rule_dir: "/etc/trapline/rules".to_owned(),
            dev_hosts_file: String::new(),
            dev_hosts: Vec::new(),
            rule_refresh_secs: 60,
            unhandled_threshold: 100,
            unhandled_window_secs: 300,
            audit_path: "/var/lib/trapline/audit.jsonl".to_owned(),
        }
    }
}

impl MatcherConfig {
    fn validate(&self) -> Result<(), TraplineError> {
        if self.rule_dir.is_empty() {
            return Err(invalid(
                "matcher.rule_dir",
                "must not be empty when matcher is enabled".to_owned(),
            ));
        }
        if self.unhandled_threshold == 0 {
            return Err(invalid(
                "matcher.unhandled_threshold",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.unhandled_window_secs == 0 {
            return Err(invalid(
                "matcher.unhandled_window_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.audit_path.is_empty() {
            return Err(invalid(
                "matcher.audit_path",
                "must not be empty when matcher is enabled".to_owned(),
            ));
        }
        Ok(())
    }
}

/// 포워더 / 다운스트림 보호 설정
///
/// `webhook_*`, rate limit, 서킷 관련 값은 데몬 실행 중 재로드됩니다.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 외부 webhook URL
    pub webhook_url: String,
    /// Bearer 토큰 (빈 문자열이면 인증 헤더 생략)
    pub webhook_token: String,
    /// Bearer 토큰 파일 (설정 시 `webhook_token`보다 우선)
    pub webhook_token_file: String,
    /// webhook 요청 타임아웃 (밀리초)
    pub request_timeout_ms: u64,
    /// 전역 rate limit 키
    pub rate_limit_key: String,
    /// 윈도우당 허용 요청 수 (전체 레플리카 합산)
    pub rate_limit: u64,
    /// rate limit 윈도우 (초)
    pub rate_window_secs: u64,
    /// 공유 서킷 키
    pub circuit_key: String,
    /// Open 전이까지의 연속 실패 수
    pub circuit_threshold: u32,
    /// Open 유지 시간 (초)
    pub circuit_timeout_secs: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            webhook_url: "http://127.0.0.1:8080/alerts".to_owned(),
            webhook_token: String::new(),
            webhook_token_file: String::new(),
            request_timeout_ms: 5000,
            rate_limit_key: "webhook".to_owned(),
            rate_limit: 100,
            rate_window_secs: 60,
            circuit_key: "webhook".to_owned(),
            circuit_threshold: 5,
            circuit_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for ForwarderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwarderConfig")
            .field("enabled", &self.enabled)
            .field("webhook_url", &self.webhook_url)
            .field(
                "webhook_token",
                &if self.webhook_token.is_empty() {
                    ""
                } else {
                    "<redacted>"
                },
            )
            .field("webhook_token_file", &self.webhook_token_file)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("rate_limit_key", &self.rate_limit_key)
            .field("rate_limit", &self.rate_limit)
            .field("rate_window_secs", &self.rate_window_secs)
            .field("circuit_key", &self.circuit_key)
            .field("circuit_threshold", &self.circuit_threshold)
            .field("circuit_timeout_secs", &self.circuit_timeout_secs)
            .finish()
    }
}

impl ForwarderConfig {
    fn validate(&self) -> Result<(), TraplineError> {
        if !(self.webhook_url.starts_with("http://") || self.webhook_url.starts_with("https://"))
        {
            return Err(invalid(
                "forwarder.webhook_url",
                "must be an http:// or https:// URL".to_owned(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid(
                "forwarder.request_timeout_ms",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.rate_limit == 0 {
            return Err(invalid(
                "forwarder.rate_limit",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.rate_window_secs == 0 {
            return Err(invalid(
                "forwarder.rate_window_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.circuit_threshold == 0 {
            return Err(invalid(
                "forwarder.circuit_threshold",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.circuit_timeout_secs == 0 {
            return Err(invalid(
                "forwarder.circuit_timeout_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.rate_limit_key.is_empty() || self.circuit_key.is_empty() {
            return Err(invalid(
                "forwarder.rate_limit_key",
                "rate_limit_key and circuit_key must not be empty".to_owned(),
            ));
        }
        Ok(())
    }

    /// webhook 토큰을 결정합니다.
    ///
    /// `webhook_token_file`이 설정되어 있으면 파일 내용(앞뒤 공백 제거)을,
    /// 아니면 `webhook_token`을 사용합니다. 둘 다 비어 있으면 `None`.
    pub async fn resolve_token(&self) -> Result<Option<String>, TraplineError> {
        if !self.webhook_token_file.is_empty() {
            let content = tokio::fs::read_to_string(&self.webhook_token_file).await?;
            let token = content.trim();
            if token.is_empty() {
                return Err(invalid(
                    "forwarder.webhook_token_file",
                    "token file is empty".to_owned(),
                ));
            }
            return Ok(Some(token.to_owned()));
        }
        if self.webhook_token.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.webhook_token.clone()))
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// scrape 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

fn invalid(field: &str, reason: String) -> TraplineError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = TraplineConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.store.backend, "memory");
        assert_eq!(config.queues.ingest, "trapline:ingest");
        assert_eq!(config.worker.heartbeat_interval_secs, 5);
        assert!(config.matcher.enabled);
        assert!(config.forwarder.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        TraplineConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = TraplineConfig::parse("").unwrap();
        assert_eq!(config.worker.max_retries, 5);
        assert_eq!(config.forwarder.circuit_threshold, 5);
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[worker]
max_retries = 3

[forwarder]
rate_limit = 10
"#;
        let config = TraplineConfig::parse(toml).unwrap();
        assert_eq!(config.worker.max_retries, 3);
        assert_eq!(config.worker.backoff_base_ms, 1000);
        assert_eq!(config.forwarder.rate_limit, 10);
        assert_eq!(config.forwarder.rate_window_secs, 60);
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = TraplineConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            TraplineError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = TraplineConfig::default();
        config.general.log_level = "verbose".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn validate_rejects_unknown_backend() {
        let mut config = TraplineConfig::default();
        config.store.backend = "etcd".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("store.backend"));
    }

    #[test]
    fn validate_rejects_colliding_queue_names() {
        let mut config = TraplineConfig::default();
        config.queues.alerts = config.queues.ingest.clone();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("distinct"));
    }

    #[test]
    fn validate_rejects_backoff_max_below_base() {
        let mut config = TraplineConfig::default();
        config.worker.backoff_base_ms = 5000;
        config.worker.backoff_max_ms = 1000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backoff_max_ms"));
    }

    #[test]
    fn validate_rejects_non_http_webhook_when_enabled() {
        let mut config = TraplineConfig::default();
        config.forwarder.webhook_url = "ftp://example.com".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("webhook_url"));
    }

    #[test]
    fn validate_skips_forwarder_when_disabled() {
        let mut config = TraplineConfig::default();
        config.forwarder.enabled = false;
        config.forwarder.webhook_url = String::new();
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_threshold() {
        let mut config = TraplineConfig::default();
        config.matcher.unhandled_threshold = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unhandled_threshold"));
    }

    #[test]
    fn debug_redacts_webhook_token() {
        let mut config = ForwarderConfig::default();
        config.webhook_token = "s3cr3t".to_owned();
        let printed = format!("{config:?}");
        assert!(!printed.contains("s3cr3t"));
        assert!(printed.contains("<redacted>"));
    }

    #[tokio::test]
    async fn resolve_token_prefers_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "from-file\n").unwrap();

        let mut config = ForwarderConfig::default();
        config.webhook_token = "inline".to_owned();
        config.webhook_token_file = path.display().to_string();
        assert_eq!(
            config.resolve_token().await.unwrap().as_deref(),
            Some("from-file")
        );
    }

    #[tokio::test]
    async fn resolve_token_none_when_unset() {
        let config = ForwarderConfig::default();
        assert!(config.resolve_token().await.unwrap().is_none());
    }

    #[test]
    #[serial]
    fn env_overrides_apply_to_sections() {
        // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
        unsafe {
            std::env::set_var("TRAPLINE_FORWARDER_RATE_LIMIT", "42");
            std::env::set_var("TRAPLINE_MATCHER_DEV_HOSTS", "dev-01, dev-02");
        }
        let mut config = TraplineConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.forwarder.rate_limit, 42);
        assert_eq!(config.matcher.dev_hosts, vec!["dev-01", "dev-02"]);
        unsafe {
            std::env::remove_var("TRAPLINE_FORWARDER_RATE_LIMIT");
            std::env::remove_var("TRAPLINE_MATCHER_DEV_HOSTS");
        }
    }

    #[test]
    #[serial]
    fn env_override_bad_number_keeps_original() {
        // SAFETY: serial 테스트로 실행되므로 환경변수 조작이 안전합니다.
        unsafe { std::env::set_var("TRAPLINE_WORKER_MAX_RETRIES", "lots") };
        let mut config = TraplineConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.worker.max_retries, 5);
        unsafe { std::env::remove_var("TRAPLINE_WORKER_MAX_RETRIES") };
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = TraplineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = TraplineConfig::parse(&toml_str).unwrap();
        assert_eq!(config.worker, parsed.worker);
        assert_eq!(config.forwarder, parsed.forwarder);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = TraplineConfig::from_file("/nonexistent/path/trapline.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TraplineError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
