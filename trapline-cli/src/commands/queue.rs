//! `trapline queue` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use trapline_core::config::TraplineConfig;
use trapline_core::now_millis;
use trapline_store::SharedStore;

use crate::cli::{QueueAction, QueueArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::store;

/// Execute the `queue` command.
pub async fn execute(
    args: QueueArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = TraplineConfig::load(config_path).await?;
    match args.action {
        QueueAction::Status => {
            let store = store::connect(&config).await?;
            let report = status(&store, &config).await?;
            writer.render(&report)
        }
    }
}

/// Depths, registered workers and breaker state from the shared store.
pub async fn status<S: SharedStore>(
    store: &S,
    config: &TraplineConfig,
) -> Result<QueueStatusReport, CliError> {
    let now_ms = now_millis();
    let q = &config.queues;

    let mut queues = Vec::with_capacity(3);
    for name in [&q.ingest, &q.alerts, &q.dead_letter] {
        queues.push(QueueDepth {
            name: name.clone(),
            ready: store.len(name).await?,
            delayed: store.delayed_len(name).await?,
        });
    }

    let mut workers = Vec::new();
    for queue in [&q.ingest, &q.alerts] {
        for worker_id in store.workers(queue).await? {
            let alive = store.heartbeat_alive(&worker_id, now_ms).await?;
            let in_flight = store.processing(queue, &worker_id).await?.len();
            workers.push(WorkerStatus {
                queue: queue.clone(),
                worker_id,
                alive,
                in_flight,
            });
        }
    }

    let circuit = store.circuit_state(&config.forwarder.circuit_key).await?;
    let open_remaining_ms = circuit.open_until_ms.saturating_sub(now_ms);

    Ok(QueueStatusReport {
        queues,
        workers,
        circuit: CircuitStatus {
            key: config.forwarder.circuit_key.clone(),
            state: circuit.state.as_str().to_owned(),
            failures: circuit.failures,
            open_remaining_ms,
        },
    })
}

#[derive(Serialize)]
pub struct QueueStatusReport {
    pub queues: Vec<QueueDepth>,
    pub workers: Vec<WorkerStatus>,
    pub circuit: CircuitStatus,
}

#[derive(Serialize)]
pub struct QueueDepth {
    pub name: String,
    pub ready: usize,
    pub delayed: usize,
}

#[derive(Serialize)]
pub struct WorkerStatus {
    pub queue: String,
    pub worker_id: String,
    pub alive: bool,
    pub in_flight: usize,
}

#[derive(Serialize)]
pub struct CircuitStatus {
    pub key: String,
    pub state: String,
    pub failures: u32,
    pub open_remaining_ms: u64,
}

impl Render for QueueStatusReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "{}", "Queues".bold())?;
        for q in &self.queues {
            writeln!(
                w,
                "  {:<28} ready: {:<8} delayed: {}",
                q.name, q.ready, q.delayed
            )?;
        }

        writeln!(w)?;
        writeln!(w, "{}", "Workers".bold())?;
        if self.workers.is_empty() {
            writeln!(w, "  (none registered)")?;
        }
        for worker in &self.workers {
            let state = if worker.alive {
                "alive".green()
            } else {
                "stale".red()
            };
            writeln!(
                w,
                "  {:<36} {:<8} in-flight: {:<5} queue: {}",
                worker.worker_id, state, worker.in_flight, worker.queue
            )?;
        }

        writeln!(w)?;
        let state = match self.circuit.state.as_str() {
            "closed" => self.circuit.state.green(),
            "half_open" => self.circuit.state.yellow(),
            _ => self.circuit.state.red(),
        };
        write!(
            w,
            "{} {}: {} (failures: {})",
            "Circuit".bold(),
            self.circuit.key,
            state,
            self.circuit.failures
        )?;
        if self.circuit.open_remaining_ms > 0 {
            write!(w, ", reopens in {} ms", self.circuit.open_remaining_ms)?;
        }
        writeln!(w)
    }
}
