//! CLI argument parsing using clap derive API
//!
//! Purely declarative: no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Trapline -- syslog/SNMP alert pipeline operator tool.
///
/// Use `trapline <COMMAND> --help` for subcommand details.
#[derive(Parser, Debug)]
#[command(name = "trapline", version, about, long_about = None)]
pub struct Cli {
    /// Path to the trapline.toml configuration file.
    #[arg(short, long, default_value = "/etc/trapline/trapline.toml", global = true)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage configuration.
    Config(ConfigArgs),

    /// Validate, inspect, and test matching rules.
    Rules(RulesArgs),

    /// Inspect queue depths, workers, and the circuit breaker.
    Queue(QueueArgs),

    /// Inspect and remediate the dead-letter queue.
    Dlq(DlqArgs),

    /// Push a test event onto the ingest queue.
    Ingest(IngestArgs),
}

// ---- config ----

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only one section (general, store, queues, worker, matcher, forwarder, metrics).
        #[arg(long)]
        section: Option<String>,
    },
}

// ---- rules ----

#[derive(Args, Debug)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub action: RulesAction,
}

#[derive(Subcommand, Debug)]
pub enum RulesAction {
    /// Parse and compile every rule file in a directory.
    Validate {
        /// Rule directory (default: `[matcher].rule_dir`).
        path: Option<PathBuf>,
    },
    /// List rules in evaluation order.
    List {
        /// Include inactive rules.
        #[arg(long)]
        all: bool,
    },
    /// Show which rule an event would hit and how it would be handled.
    Test(RuleTestArgs),
    /// Ask running matchers to rebuild their rule snapshot now.
    Reload,
}

#[derive(Args, Debug)]
pub struct RuleTestArgs {
    /// Originating hostname.
    #[arg(long)]
    pub host: String,

    /// Syslog message text.
    #[arg(long, required_unless_present = "oid")]
    pub message: Option<String>,

    /// SNMP trap OID.
    #[arg(long)]
    pub oid: Option<String>,
}

// ---- queue ----

#[derive(Args, Debug)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub action: QueueAction,
}

#[derive(Subcommand, Debug)]
pub enum QueueAction {
    /// Depths, registered workers, heartbeat liveness, circuit state.
    Status,
}

// ---- dlq ----

#[derive(Args, Debug)]
pub struct DlqArgs {
    #[command(subcommand)]
    pub action: DlqAction,
}

#[derive(Subcommand, Debug)]
pub enum DlqAction {
    /// List dead-letter records, oldest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Re-enqueue records to their source queue with retry state reset.
    Replay {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Delete every dead-letter record.
    Purge {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },
}

// ---- ingest ----

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Originating hostname.
    #[arg(long)]
    pub host: String,

    /// Syslog message text.
    #[arg(long, required_unless_present = "oid")]
    pub message: Option<String>,

    /// SNMP trap OID.
    #[arg(long)]
    pub oid: Option<String>,
}
