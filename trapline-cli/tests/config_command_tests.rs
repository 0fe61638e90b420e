//! Integration tests for `trapline config`.
//!
//! Tests validation and display with real TOML files.

use std::fs;

use tempfile::TempDir;

use trapline_cli::commands::config;
use trapline_cli::{OutputFormat, OutputWriter};
use trapline_core::config::TraplineConfig;

#[tokio::test]
async fn validate_accepts_valid_toml() {
    // Given
    let temp = TempDir::new().expect("should create temp dir");
    let path = temp.path().join("trapline.toml");
    fs::write(
        &path,
        r#"
[general]
log_level = "info"
log_format = "json"

[forwarder]
url = "https://alerts.example.net/hook"
"#,
    )
    .expect("should write config");

    // When
    let report = config::validation_report(&path).await;

    // Then
    assert!(report.valid, "errors: {:?}", report.errors);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn validate_reports_malformed_toml() {
    let temp = TempDir::new().expect("should create temp dir");
    let path = temp.path().join("bad.toml");
    fs::write(&path, "[general\nlog_level = \"info\"\n").expect("should write config");

    let report = config::validation_report(&path).await;

    assert!(!report.valid);
    assert_eq!(report.errors.len(), 1);
}

#[tokio::test]
async fn validate_reports_missing_file() {
    let report = config::validation_report(std::path::Path::new("/nonexistent/trapline.toml")).await;

    assert!(!report.valid);
    assert!(report.errors[0].contains("/nonexistent/trapline.toml"));
}

#[tokio::test]
async fn show_section_renders_toml_text() {
    // Given
    let temp = TempDir::new().expect("should create temp dir");
    let path = temp.path().join("trapline.toml");
    fs::write(&path, "[queues]\ningest = \"noc:ingest\"\n").expect("should write config");
    let loaded = TraplineConfig::load(&path).await.expect("should load");

    // When
    let report =
        config::show_report(loaded, &path, Some("queues".to_owned())).expect("known section");
    let mut buf = Vec::new();
    OutputWriter::new(OutputFormat::Text)
        .render_to(&report, &mut buf)
        .expect("should render");

    // Then
    let text = String::from_utf8(buf).expect("utf8");
    assert!(text.contains("noc:ingest"));
}
