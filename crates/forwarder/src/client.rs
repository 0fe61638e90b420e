//! Webhook 클라이언트 추상화
//!
//! 실제 전송은 [`HttpWebhookClient`](reqwest)가, 테스트와 드라이런은
//! [`ScriptedWebhookClient`]가 담당합니다. 포워더는 [`WebhookClient`] trait만 봅니다.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::ForwarderError;

/// 한 번의 webhook 호출
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    /// 대상 URL
    pub url: String,
    /// Bearer 토큰
    pub token: Option<String>,
    /// `X-Correlation-Id` 헤더 값
    pub correlation_id: String,
    /// JSON 본문
    pub body: String,
    /// 요청 타임아웃
    pub timeout: Duration,
}

impl std::fmt::Debug for WebhookRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookRequest")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("correlation_id", &self.correlation_id)
            .field("body_len", &self.body.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// 다운스트림이 돌려준 HTTP 응답 요약
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    /// HTTP 상태 코드
    pub status: u16,
    /// `Retry-After` 헤더 (초 단위만 해석)
    pub retry_after: Option<Duration>,
}

impl WebhookResponse {
    /// 상태 코드만으로 생성합니다.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            retry_after: None,
        }
    }
}

/// 응답을 받지 못한 전송 실패
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// 요청 타임아웃
    #[error("request timed out")]
    Timeout,
    /// 연결 실패
    #[error("connect failed: {0}")]
    Connect(String),
    /// 그 밖의 전송 실패
    #[error("request failed: {0}")]
    Request(String),
}

/// webhook 전송 trait
pub trait WebhookClient: Send + Sync + 'static {
    /// 요청 하나를 보냅니다. HTTP 응답을 받았다면 상태 코드와 무관하게 `Ok`입니다.
    fn send(
        &self,
        request: &WebhookRequest,
    ) -> impl Future<Output = Result<WebhookResponse, TransportError>> + Send;
}

impl<T: WebhookClient> WebhookClient for Arc<T> {
    fn send(
        &self,
        request: &WebhookRequest,
    ) -> impl Future<Output = Result<WebhookResponse, TransportError>> + Send {
        (**self).send(request)
    }
}

/// `reqwest` 기반 webhook 클라이언트 (rustls)
#[derive(Clone)]
pub struct HttpWebhookClient {
    client: reqwest::Client,
}

impl HttpWebhookClient {
    /// 클라이언트를 생성합니다. 타임아웃은 요청마다 지정합니다.
    pub fn new() -> Result<Self, ForwarderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("trapline-forwarder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ForwarderError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

impl WebhookClient for HttpWebhookClient {
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, TransportError> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("X-Correlation-Id", &request.correlation_id)
            .body(request.body.clone());
        if let Some(token) = &request.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Request(e.to_string())
            }
        })?;

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        Ok(WebhookResponse {
            status: response.status().as_u16(),
            retry_after,
        })
    }
}

/// `Retry-After` 값을 초 단위로 해석합니다. HTTP-date 형식은 무시합니다.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// 미리 정한 응답을 순서대로 돌려주는 클라이언트
///
/// 스크립트가 비면 기본 응답(200)을 돌려줍니다. 받은 요청은 모두 기록됩니다.
#[derive(Debug)]
pub struct ScriptedWebhookClient {
    script: Mutex<VecDeque<Result<WebhookResponse, TransportError>>>,
    fallback: Mutex<Result<WebhookResponse, TransportError>>,
    requests: Mutex<Vec<WebhookRequest>>,
}

impl Default for ScriptedWebhookClient {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(WebhookResponse::status(200))),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedWebhookClient {
    /// 항상 200을 돌려주는 클라이언트
    pub fn new() -> Self {
        Self::default()
    }

    /// 다음 응답들을 스크립트 뒤에 추가합니다.
    pub fn push(&self, result: Result<WebhookResponse, TransportError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
    }

    /// 스크립트가 비었을 때의 응답을 바꿉니다.
    pub fn set_fallback(&self, result: Result<WebhookResponse, TransportError>) {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = result;
        }
    }

    /// 지금까지 받은 요청
    pub fn requests(&self) -> Vec<WebhookRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// 지금까지 받은 요청 수
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

impl WebhookClient for ScriptedWebhookClient {
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookResponse, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match scripted {
            Some(result) => result,
            None => self
                .fallback
                .lock()
                .map(|f| f.clone())
                .unwrap_or_else(|_| Err(TransportError::Request("client lock poisoned".to_owned()))),
        }
    }
}
