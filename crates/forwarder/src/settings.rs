//! 포워더 런타임 설정
//!
//! [`ForwarderConfig`]의 파일 표현을 토큰까지 해석한 실행 값으로 바꿉니다.
//! 핫 리로드 시 데몬은 새 `ForwarderConfig`를 watch 채널로 보내고,
//! 포워더 루프가 다음 틱에서 [`ForwarderSettings::resolve`]로 다시 해석해 교체합니다.

use std::fmt;
use std::time::Duration;

use trapline_core::config::ForwarderConfig;

use crate::error::ForwarderError;

/// 해석된 포워더 설정
#[derive(Clone, PartialEq, Eq)]
pub struct ForwarderSettings {
    /// webhook URL
    pub webhook_url: String,
    /// Bearer 토큰
    pub token: Option<String>,
    /// 요청당 타임아웃
    pub request_timeout: Duration,
    /// 전역 rate limit 키
    pub rate_limit_key: String,
    /// 윈도우당 허용 요청 수
    pub rate_limit: u64,
    /// rate limit 윈도우
    pub rate_window: Duration,
    /// 공유 서킷 키
    pub circuit_key: String,
    /// Open 전이 연속 실패 수
    pub circuit_threshold: u32,
    /// Open 유지 시간
    pub circuit_timeout: Duration,
}

impl ForwarderSettings {
    /// 설정을 검증하고 토큰을 해석합니다.
    pub async fn resolve(config: &ForwarderConfig) -> Result<Self, ForwarderError> {
        let settings = Self::without_token(config)?;
        let token = config
            .resolve_token()
            .await
            .map_err(|e| ForwarderError::Token(e.to_string()))?;
        Ok(Self { token, ..settings })
    }

    /// 토큰 없이 설정 값만 검증해 만듭니다.
    pub fn without_token(config: &ForwarderConfig) -> Result<Self, ForwarderError> {
        let positive = |field: &str, value: u64| {
            if value == 0 {
                Err(ForwarderError::Config {
                    field: format!("forwarder.{field}"),
                    reason: "must be greater than 0".to_owned(),
                })
            } else {
                Ok(())
            }
        };
        positive("request_timeout_ms", config.request_timeout_ms)?;
        positive("rate_limit", config.rate_limit)?;
        positive("rate_window_secs", config.rate_window_secs)?;
        positive("circuit_threshold", u64::from(config.circuit_threshold))?;
        positive("circuit_timeout_secs", config.circuit_timeout_secs)?;
        if !(config.webhook_url.starts_with("http://") || config.webhook_url.starts_with("https://"))
        {
            return Err(ForwarderError::Config {
                field: "forwarder.webhook_url".to_owned(),
                reason: "must be an http:// or https:// URL".to_owned(),
            });
        }

        Ok(Self {
            webhook_url: config.webhook_url.clone(),
            token: None,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            rate_limit_key: config.rate_limit_key.clone(),
            rate_limit: config.rate_limit,
            rate_window: Duration::from_secs(config.rate_window_secs),
            circuit_key: config.circuit_key.clone(),
            circuit_threshold: config.circuit_threshold,
            circuit_timeout: Duration::from_secs(config.circuit_timeout_secs),
        })
    }

    /// Half-Open probe 권한 만료 시간 (요청 타임아웃의 2배)
    pub fn probe_timeout(&self) -> Duration {
        self.request_timeout.saturating_mul(2)
    }
}

impl fmt::Debug for ForwarderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwarderSettings")
            .field("webhook_url", &self.webhook_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("rate_limit_key", &self.rate_limit_key)
            .field("rate_limit", &self.rate_limit)
            .field("rate_window", &self.rate_window)
            .field("circuit_key", &self.circuit_key)
            .field("circuit_threshold", &self.circuit_threshold)
            .field("circuit_timeout", &self.circuit_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_uses_inline_token() {
        let config = ForwarderConfig {
            webhook_token: "s3cret".to_owned(),
            request_timeout_ms: 1500,
            ..ForwarderConfig::default()
        };
        let settings = ForwarderSettings::resolve(&config).await.unwrap();
        assert_eq!(settings.token.as_deref(), Some("s3cret"));
        assert_eq!(settings.probe_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn debug_redacts_token() {
        let mut settings = ForwarderSettings::without_token(&ForwarderConfig::default()).unwrap();
        settings.token = Some("s3cret".to_owned());
        let debug = format!("{settings:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let config = ForwarderConfig {
            rate_limit: 0,
            ..ForwarderConfig::default()
        };
        let err = ForwarderSettings::without_token(&config).unwrap_err();
        assert!(err.to_string().contains("forwarder.rate_limit"));
    }

    #[test]
    fn non_http_url_is_rejected() {
        let config = ForwarderConfig {
            webhook_url: "ftp://example.com".to_owned(),
            ..ForwarderConfig::default()
        };
        assert!(ForwarderSettings::without_token(&config).is_err());
    }
}
