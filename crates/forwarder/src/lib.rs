//! trapline-forwarder: 다운스트림 보호 계층과 알림 포워더
//!
//! 알림 큐를 소비해 외부 AIOps webhook으로 전달합니다. 레플리카가 몇 개든
//! 다운스트림이 받는 부하는 공유 스토어의 두 원자 연산으로 묶입니다.
//!
//! - [`RateLimiter`]: 전역 슬라이딩 윈도우 (검사와 기록이 한 연산)
//! - [`CircuitBreaker`]: 공유 Closed / Open / Half-Open 상태, CAS 단일 probe
//! - [`classify`]: 응답을 성공 / 재시도 / terminal로 분류
//! - [`ForwardProcessor`]: 위 셋을 조합한 `Forward(envelope)`
//! - [`Forwarder`]: [`Pipeline`](trapline_core::pipeline::Pipeline) 구현

pub mod breaker;
pub mod classify;
pub mod client;
pub mod error;
pub mod forwarder;
pub mod limiter;
pub mod processor;
pub mod settings;

pub use breaker::{BreakerPolicy, CircuitBreaker};
pub use classify::{Classification, classify};
pub use client::{
    HttpWebhookClient, ScriptedWebhookClient, TransportError, WebhookClient, WebhookRequest,
    WebhookResponse,
};
pub use error::ForwarderError;
pub use forwarder::{Forwarder, ForwarderBuilder};
pub use limiter::RateLimiter;
pub use processor::ForwardProcessor;
pub use settings::ForwarderSettings;
