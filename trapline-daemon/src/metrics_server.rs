//! Prometheus metrics HTTP server.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`.
//! The processing latency histograms get explicit buckets so that both
//! sub-millisecond rule matching and slow webhook calls stay visible.

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use trapline_core::config::MetricsConfig;
use trapline_core::metrics as m;

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call once per process; a second install fails.
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is served",
            config.endpoint
        ));
    }

    let addr = listen_addr(config)?;
    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(m::WORKER_PROCESSING_DURATION_SECONDS.to_owned()),
            &m::PROCESSING_DURATION_BUCKETS,
        )
        .and_then(|builder| {
            builder.set_buckets_for_metric(
                Matcher::Full(m::FORWARDER_REQUEST_DURATION_SECONDS.to_owned()),
                &m::PROCESSING_DURATION_BUCKETS,
            )
        })
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    m::describe_all();

    tracing::info!(listen_addr = %addr, "prometheus metrics endpoint active");
    Ok(())
}

/// Parse `listen_addr:port` into a socket address.
pub fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_addr_combines_host_and_port() {
        let config = MetricsConfig {
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            ..MetricsConfig::default()
        };
        assert_eq!(listen_addr(&config).unwrap().port(), 9100);
    }

    #[test]
    fn bad_host_is_rejected() {
        let config = MetricsConfig {
            listen_addr: "not a host".to_owned(),
            ..MetricsConfig::default()
        };
        assert!(listen_addr(&config).is_err());
    }

    #[test]
    fn custom_endpoint_is_rejected_before_binding() {
        let config = MetricsConfig {
            endpoint: "/stats".to_owned(),
            ..MetricsConfig::default()
        };
        let err = install_metrics_recorder(&config).unwrap_err();
        assert!(err.to_string().contains("/stats"));
    }
}
