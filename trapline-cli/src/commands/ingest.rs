//! `trapline ingest` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use trapline_core::config::TraplineConfig;
use trapline_core::envelope::Envelope;
use trapline_matcher::Event;
use trapline_store::SharedStore;

use crate::cli::IngestArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::store;

/// Execute the `ingest` command.
pub async fn execute(
    args: IngestArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = TraplineConfig::load(config_path).await?;
    let envelope = build_envelope(&args)?;
    let store = store::connect(&config).await?;
    let report = enqueue(&store, &config.queues.ingest, &envelope).await?;
    writer.render(&report)
}

/// Build an ingest envelope and check it the way a matcher would decode it.
pub fn build_envelope(args: &IngestArgs) -> Result<Envelope, CliError> {
    let mut payload = Map::new();
    payload.insert("hostname".to_owned(), Value::String(args.host.clone()));
    if let Some(message) = &args.message {
        payload.insert("message".to_owned(), Value::String(message.clone()));
    }
    if let Some(oid) = &args.oid {
        payload.insert("trap_oid".to_owned(), Value::String(oid.clone()));
    }
    payload.insert(
        "timestamp".to_owned(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    payload.insert(
        "correlation_id".to_owned(),
        Value::String(uuid::Uuid::new_v4().to_string()),
    );

    let envelope = Envelope::new(payload);
    Event::from_envelope(&envelope)?;
    Ok(envelope)
}

pub async fn enqueue<S: SharedStore>(
    store: &S,
    queue: &str,
    envelope: &Envelope,
) -> Result<IngestReport, CliError> {
    store.push(queue, &envelope.encode()?).await?;
    let correlation_id = envelope.correlation_id().unwrap_or_default().to_owned();
    info!(queue, correlation_id = %correlation_id, "enqueued event");

    Ok(IngestReport {
        queue: queue.to_owned(),
        correlation_id,
        depth: store.len(queue).await?,
    })
}

#[derive(Serialize)]
pub struct IngestReport {
    pub queue: String,
    pub correlation_id: String,
    pub depth: usize,
}

impl Render for IngestReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            w,
            "Enqueued {} on {} (depth {})",
            self.correlation_id, self.queue, self.depth
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(message: Option<&str>, oid: Option<&str>) -> IngestArgs {
        IngestArgs {
            host: "core-sw-01".to_owned(),
            message: message.map(str::to_owned),
            oid: oid.map(str::to_owned),
        }
    }

    #[test]
    fn syslog_envelope_has_tracing_fields() {
        let env = build_envelope(&args(Some("LINK_DOWN on ge-0/0/1"), None)).unwrap();
        assert_eq!(env.retry_count, 0);
        assert_eq!(env.str_field("hostname"), Some("core-sw-01"));
        assert!(env.correlation_id().is_some());
        assert!(env.str_field("timestamp").is_some());
        assert!(env.str_field("trap_oid").is_none());
    }

    #[test]
    fn trap_envelope_uses_trap_oid_field() {
        let env = build_envelope(&args(None, Some("1.3.6.1.6.3.1.1.5.3"))).unwrap();
        assert_eq!(env.str_field("trap_oid"), Some("1.3.6.1.6.3.1.1.5.3"));
    }

    #[test]
    fn malformed_oid_is_refused_before_enqueue() {
        let err = build_envelope(&args(None, Some("not-an-oid"))).unwrap_err();
        assert!(matches!(err, CliError::Rule(_)));
    }
}
