//! `trapline dlq` command handler
//!
//! Records that decode to a [`DeadLetterRecord`] with an envelope can be
//! replayed onto their source queue. Raw records stay in the dead-letter
//! queue until purged.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use trapline_core::config::TraplineConfig;
use trapline_core::envelope::DeadLetterRecord;
use trapline_store::SharedStore;

use crate::cli::{DlqAction, DlqArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::store;

/// Execute the `dlq` command.
pub async fn execute(
    args: DlqArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = TraplineConfig::load(config_path).await?;

    // purge without --yes must fail before any connection attempt
    if let DlqAction::Purge { yes: false } = args.action {
        return Err(CliError::Command(
            "refusing to purge the dead-letter queue without --yes".to_owned(),
        ));
    }

    let store = store::connect(&config).await?;
    let queue = config.queues.dead_letter.as_str();

    match args.action {
        DlqAction::List { limit } => writer.render(&list(&store, queue, limit).await?),
        DlqAction::Replay { limit } => writer.render(&replay(&store, queue, limit).await?),
        DlqAction::Purge { yes } => writer.render(&purge(&store, queue, yes).await?),
    }
}

/// The first `limit` records, oldest first.
pub async fn list<S: SharedStore>(
    store: &S,
    queue: &str,
    limit: usize,
) -> Result<DlqListReport, CliError> {
    let total = store.len(queue).await?;
    let entries = store
        .range(queue, 0, limit)
        .await?
        .into_iter()
        .map(|raw| match DeadLetterRecord::decode(&raw) {
            Ok(record) => DlqEntry::from_record(&record),
            Err(e) => DlqEntry::undecodable(raw, e.to_string()),
        })
        .collect();

    Ok(DlqListReport {
        queue: queue.to_owned(),
        total,
        entries,
    })
}

/// Move up to `limit` replayable records back to their source queues with
/// retry state reset.
///
/// Each record is pushed before it is removed, so a crash in between leaves a
/// duplicate rather than a lost item.
pub async fn replay<S: SharedStore>(
    store: &S,
    queue: &str,
    limit: usize,
) -> Result<DlqReplayReport, CliError> {
    let mut replayed = 0;
    let mut skipped = 0;

    for raw in store.range(queue, 0, limit).await? {
        let record = match DeadLetterRecord::decode(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping undecodable dead-letter record");
                skipped += 1;
                continue;
            }
        };
        let Some(envelope) = record.replayable() else {
            skipped += 1;
            continue;
        };

        store.push(&record.source_queue, &envelope.encode()?).await?;
        if store.remove(queue, &raw).await? {
            replayed += 1;
            info!(
                source_queue = %record.source_queue,
                reason = %record.reason,
                "replayed dead-letter record"
            );
        } else {
            // another replay got there first; our push is the duplicate
            warn!(source_queue = %record.source_queue, "dead-letter record vanished during replay");
        }
    }

    Ok(DlqReplayReport {
        queue: queue.to_owned(),
        replayed,
        skipped,
    })
}

pub async fn purge<S: SharedStore>(
    store: &S,
    queue: &str,
    confirmed: bool,
) -> Result<DlqPurgeReport, CliError> {
    if !confirmed {
        return Err(CliError::Command(
            "refusing to purge the dead-letter queue without --yes".to_owned(),
        ));
    }
    let removed = store.purge(queue).await?;
    info!(queue, removed, "purged dead-letter queue");
    Ok(DlqPurgeReport {
        queue: queue.to_owned(),
        removed,
    })
}

#[derive(Serialize)]
pub struct DlqListReport {
    pub queue: String,
    pub total: usize,
    pub entries: Vec<DlqEntry>,
}

#[derive(Serialize)]
pub struct DlqEntry {
    pub source_queue: Option<String>,
    pub classification: Option<String>,
    pub reason: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub correlation_id: Option<String>,
    pub failed_at_ms: u64,
    pub replayable: bool,
}

impl DlqEntry {
    fn from_record(record: &DeadLetterRecord) -> Self {
        Self {
            source_queue: Some(record.source_queue.clone()),
            classification: Some(record.classification.as_str().to_owned()),
            reason: record.reason.clone(),
            attempts: record.attempts,
            last_error: record.last_error.clone(),
            correlation_id: record
                .envelope
                .as_ref()
                .and_then(|env| env.correlation_id())
                .map(str::to_owned),
            failed_at_ms: record.failed_at_ms,
            replayable: record.envelope.is_some(),
        }
    }

    fn undecodable(raw: String, error: String) -> Self {
        Self {
            source_queue: None,
            classification: None,
            reason: format!("undecodable record ({error})"),
            attempts: 0,
            last_error: Some(raw),
            correlation_id: None,
            failed_at_ms: 0,
            replayable: false,
        }
    }
}

impl Render for DlqListReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Dead letters in {} ({} total, showing {})",
            self.queue.bold(),
            self.total,
            self.entries.len()
        )?;
        for e in &self.entries {
            let class = e.classification.as_deref().unwrap_or("-");
            let replay = if e.replayable {
                "replayable".green()
            } else {
                "raw".yellow()
            };
            writeln!(
                w,
                "  [{}] {} {} attempts={} source={} id={}",
                replay,
                e.reason.red(),
                class,
                e.attempts,
                e.source_queue.as_deref().unwrap_or("-"),
                e.correlation_id.as_deref().unwrap_or("-"),
            )?;
            if let Some(err) = &e.last_error {
                writeln!(w, "      {}", err.dimmed())?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
pub struct DlqReplayReport {
    pub queue: String,
    pub replayed: usize,
    pub skipped: usize,
}

impl Render for DlqReplayReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            w,
            "Replayed {} record(s) from {} ({} skipped)",
            self.replayed, self.queue, self.skipped
        )
    }
}

#[derive(Serialize)]
pub struct DlqPurgeReport {
    pub queue: String,
    pub removed: usize,
}

impl Render for DlqPurgeReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(w, "Purged {} record(s) from {}", self.removed, self.queue)
    }
}
