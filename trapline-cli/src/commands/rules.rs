//! `trapline rules` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use trapline_core::config::TraplineConfig;
use trapline_matcher::{DirectoryRuleSource, Event, RuleLoader, RuleSnapshot, RuleSource};
use trapline_store::SharedStore;

use crate::cli::{RuleTestArgs, RulesAction, RulesArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};
use crate::store;

/// Execute the `rules` command.
pub async fn execute(
    args: RulesArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = TraplineConfig::load(config_path).await?;

    match args.action {
        RulesAction::Validate { path } => {
            let dir = path.unwrap_or_else(|| config.matcher.rule_dir.clone().into());
            let report = validate_dir(&dir).await?;
            writer.render(&report)?;
            if report.invalid > 0 {
                return Err(CliError::Rule(format!("{} invalid rules", report.invalid)));
            }
            Ok(())
        }
        RulesAction::List { all } => {
            let snapshot = load_snapshot(&config).await?;
            writer.render(&list_report(&snapshot, all))
        }
        RulesAction::Test(test) => {
            let snapshot = load_snapshot(&config).await?;
            writer.render(&test_report(&snapshot, &test))
        }
        RulesAction::Reload => {
            let store = store::connect(&config).await?;
            let report = reload(&store, &config).await?;
            writer.render(&report)
        }
    }
}

/// Parse and compile every rule file under `dir`.
///
/// Files that fail to parse and rules whose pattern fails to compile both
/// count as invalid.
pub async fn validate_dir(dir: &Path) -> Result<RuleValidationReport, CliError> {
    info!(path = %dir.display(), "validating rules");

    let loaded = RuleLoader::load_directory(dir).await?;
    let mut errors: Vec<RuleError> = loaded
        .rejected
        .iter()
        .map(|r| RuleError {
            source: r.path.clone(),
            error: r.reason.clone(),
        })
        .collect();

    let snapshot = RuleSnapshot::build(0, loaded.rules, Vec::new());
    errors.extend(snapshot.excluded().iter().map(|e| RuleError {
        source: format!("rule {}", e.rule_id),
        error: e.reason.clone(),
    }));

    Ok(RuleValidationReport {
        path: dir.display().to_string(),
        valid: snapshot.rules().len(),
        invalid: errors.len(),
        errors,
    })
}

/// Build a snapshot the same way a matcher would from `[matcher]`.
pub async fn load_snapshot(config: &TraplineConfig) -> Result<RuleSnapshot, CliError> {
    let source = DirectoryRuleSource::from_config(&config.matcher);
    let loaded = source.load_rules().await?;
    for rejected in &loaded.rejected {
        tracing::warn!(path = %rejected.path, reason = %rejected.reason, "skipping rule file");
    }
    let dev_hosts = source.load_dev_hosts().await?;
    Ok(RuleSnapshot::build(1, loaded.rules, dev_hosts))
}

pub fn list_report(snapshot: &RuleSnapshot, include_inactive: bool) -> RuleListReport {
    let rules: Vec<RuleEntry> = snapshot
        .rules()
        .iter()
        .map(|compiled| compiled.rule())
        .filter(|rule| include_inactive || rule.active)
        .map(|rule| RuleEntry {
            id: rule.id,
            name: rule.name.clone(),
            priority: rule.priority,
            active: rule.active,
            severity: rule.severity.as_str().to_owned(),
            match_type: rule.matcher.kind.as_str().to_owned(),
            pattern: rule.matcher.pattern.clone(),
            production: rule.handling.production.as_str().to_owned(),
            development: rule.handling.development.as_str().to_owned(),
        })
        .collect();

    RuleListReport {
        total: rules.len(),
        excluded: snapshot.excluded().len(),
        dev_hosts: snapshot.dev_host_count(),
        rules,
    }
}

pub fn test_report(snapshot: &RuleSnapshot, args: &RuleTestArgs) -> RuleTestReport {
    let event = Event::new(args.host.clone(), args.message.clone(), args.oid.clone());
    let environment = snapshot.environment(&event.hostname).as_str().to_owned();

    match snapshot.evaluate(&event) {
        Some(decision) => RuleTestReport {
            hostname: event.hostname,
            environment,
            matched: true,
            rule_id: Some(decision.rule.id),
            rule_name: Some(decision.rule.name.clone()),
            handling: decision.handling.as_str().to_owned(),
        },
        None => RuleTestReport {
            hostname: event.hostname,
            environment,
            matched: false,
            rule_id: None,
            rule_name: None,
            handling: "unhandled".to_owned(),
        },
    }
}

/// Publish a change notification on the rules channel.
pub async fn reload<S: SharedStore>(
    store: &S,
    config: &TraplineConfig,
) -> Result<ReloadReport, CliError> {
    let channel = config.queues.rules_channel.clone();
    let receivers = store.publish(&channel, "reload").await?;
    info!(channel = %channel, receivers, "published rule reload");
    Ok(ReloadReport { channel, receivers })
}

#[derive(Serialize)]
pub struct RuleValidationReport {
    pub path: String,
    pub valid: usize,
    pub invalid: usize,
    pub errors: Vec<RuleError>,
}

#[derive(Serialize)]
pub struct RuleError {
    pub source: String,
    pub error: String,
}

impl Render for RuleValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Rule Validation: {}", self.path.bold())?;
        let invalid = if self.invalid > 0 {
            self.invalid.to_string().red()
        } else {
            self.invalid.to_string().normal()
        };
        writeln!(
            w,
            "  Rules: {} valid, {} invalid",
            self.valid.to_string().green(),
            invalid
        )?;

        if !self.errors.is_empty() {
            writeln!(w)?;
            writeln!(w, "Errors:")?;
            for e in &self.errors {
                writeln!(w, "  {}: {}", e.source.red(), e.error)?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
pub struct RuleListReport {
    pub total: usize,
    pub excluded: usize,
    pub dev_hosts: usize,
    pub rules: Vec<RuleEntry>,
}

#[derive(Serialize)]
pub struct RuleEntry {
    pub id: u64,
    pub name: String,
    pub priority: u32,
    pub active: bool,
    pub severity: String,
    pub match_type: String,
    pub pattern: String,
    pub production: String,
    pub development: String,
}

impl Render for RuleListReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Rules ({} listed, {} excluded, {} dev hosts)",
            self.total.to_string().bold(),
            self.excluded,
            self.dev_hosts
        )?;
        writeln!(w)?;
        writeln!(
            w,
            "{:<8} {:<6} {:<28} {:<9} {:<11} {:<12} Pattern",
            "ID", "Prio", "Name", "Severity", "Type", "Prod/Dev"
        )?;
        writeln!(w, "{}", "-".repeat(96))?;

        for r in &self.rules {
            let name = if r.active {
                r.name.normal()
            } else {
                format!("{} (inactive)", r.name).dimmed()
            };
            writeln!(
                w,
                "{:<8} {:<6} {:<28} {:<9} {:<11} {:<12} {}",
                r.id,
                r.priority,
                name,
                r.severity,
                r.match_type,
                format!("{}/{}", r.production, r.development),
                r.pattern
            )?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
pub struct RuleTestReport {
    pub hostname: String,
    pub environment: String,
    pub matched: bool,
    pub rule_id: Option<u64>,
    pub rule_name: Option<String>,
    pub handling: String,
}

impl Render for RuleTestReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Host: {} ({})", self.hostname.bold(), self.environment)?;
        match (self.rule_id, &self.rule_name) {
            (Some(id), Some(name)) => {
                writeln!(w, "  Matched: rule {} \"{}\"", id.to_string().green(), name)?;
                writeln!(w, "  Handling: {}", self.handling.bold())?;
            }
            _ => {
                writeln!(w, "  Matched: {}", "none".yellow())?;
                writeln!(w, "  Handling: counted toward the unhandled threshold")?;
            }
        }
        Ok(())
    }
}

#[derive(Serialize)]
pub struct ReloadReport {
    pub channel: String,
    pub receivers: usize,
}

impl Render for ReloadReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            w,
            "Reload published on {} ({} matcher subscriptions notified)",
            self.channel, self.receivers
        )
    }
}
