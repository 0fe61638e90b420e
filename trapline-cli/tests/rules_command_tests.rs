//! Integration tests for `trapline rules`.
//!
//! Rule directories are real files under a tempdir.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use trapline_cli::cli::RuleTestArgs;
use trapline_cli::commands::rules;
use trapline_core::config::TraplineConfig;
use trapline_store::{MemoryStore, SharedStore};

const LINK_DOWN: &str = r#"
id: 10
name: link down
priority: 5
severity: high
match:
  type: contains
  pattern: LINK-DOWN
"#;

const COLD_START: &str = r#"
id: 20
name: cold start trap
priority: 5
severity: medium
match:
  type: oid_prefix
  pattern: 1.3.6.1.6.3.1.1.5.1
handling:
  production: alert
  development: drop
"#;

const RETIRED: &str = r#"
id: 30
name: retired rule
priority: 1
active: false
match:
  type: contains
  pattern: LINK
"#;

fn write_rules(dir: &Path, files: &[(&str, &str)]) {
    fs::create_dir_all(dir).expect("should create rule dir");
    for (name, body) in files {
        fs::write(dir.join(name), body).expect("should write rule");
    }
}

fn config_for(dir: &Path) -> TraplineConfig {
    let mut config = TraplineConfig::default();
    config.matcher.rule_dir = dir.display().to_string();
    config.matcher.dev_hosts = vec!["lab-sw-01".to_owned()];
    config
}

#[tokio::test]
async fn validate_counts_parse_failures_and_bad_regex() {
    // Given: 유효한 규칙 하나, 깨진 YAML 하나, 컴파일되지 않는 정규식 하나
    let temp = TempDir::new().expect("should create temp dir");
    let bad_regex = "id: 40\nname: broken\nmatch:\n  type: regex\n  pattern: \"(unclosed\"\n";
    write_rules(
        temp.path(),
        &[
            ("a-link.yml", LINK_DOWN),
            ("b-broken.yml", "id: ["),
            ("c-regex.yml", bad_regex),
        ],
    );

    // When
    let report = rules::validate_dir(temp.path()).await.expect("dir is readable");

    // Then: 파싱 실패와 정규식 실패 모두 invalid로 집계
    assert_eq!(report.valid, 1);
    assert_eq!(report.invalid, 2);
    assert!(report.errors.iter().any(|e| e.source.contains("b-broken.yml")));
    assert!(report.errors.iter().any(|e| e.source == "rule 40"));
}

#[tokio::test]
async fn validate_missing_directory_is_an_error() {
    let result = rules::validate_dir(Path::new("/nonexistent/trapline/rules")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn list_hides_inactive_rules_unless_asked() {
    // Given
    let temp = TempDir::new().expect("should create temp dir");
    write_rules(
        temp.path(),
        &[
            ("link.yml", LINK_DOWN),
            ("cold.yml", COLD_START),
            ("retired.yml", RETIRED),
        ],
    );
    let snapshot = rules::load_snapshot(&config_for(temp.path()))
        .await
        .expect("should load");

    // When
    let active = rules::list_report(&snapshot, false);
    let all = rules::list_report(&snapshot, true);

    // Then: priority 순, 같은 priority는 id 순
    let ids: Vec<u64> = active.rules.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![10, 20]);
    assert_eq!(all.rules.len(), 3);
    assert_eq!(all.rules[0].id, 30);
    assert!(!all.rules[0].active);
    assert_eq!(active.dev_hosts, 1);
    assert_eq!(active.rules[1].match_type, "oid_prefix");
}

#[tokio::test]
async fn test_reports_match_and_environment() {
    // Given
    let temp = TempDir::new().expect("should create temp dir");
    write_rules(temp.path(), &[("link.yml", LINK_DOWN), ("cold.yml", COLD_START)]);
    let snapshot = rules::load_snapshot(&config_for(temp.path()))
        .await
        .expect("should load");

    // When: 개발 호스트에서 cold start trap
    let report = rules::test_report(
        &snapshot,
        &RuleTestArgs {
            host: "LAB-SW-01".to_owned(),
            message: None,
            oid: Some(".1.3.6.1.6.3.1.1.5.1.0".to_owned()),
        },
    );

    // Then
    assert!(report.matched);
    assert_eq!(report.rule_id, Some(20));
    assert_eq!(report.environment, "development");
    assert_eq!(report.handling, "drop");
}

#[tokio::test]
async fn test_reports_unhandled_when_nothing_matches() {
    let temp = TempDir::new().expect("should create temp dir");
    write_rules(temp.path(), &[("link.yml", LINK_DOWN)]);
    let snapshot = rules::load_snapshot(&config_for(temp.path()))
        .await
        .expect("should load");

    let report = rules::test_report(
        &snapshot,
        &RuleTestArgs {
            host: "core-rtr-01".to_owned(),
            message: Some("BGP session established".to_owned()),
            oid: None,
        },
    );

    assert!(!report.matched);
    assert_eq!(report.rule_id, None);
    assert_eq!(report.environment, "production");
    assert_eq!(report.handling, "unhandled");
}

#[tokio::test]
async fn reload_publishes_on_rules_channel() {
    // Given: 규칙 채널 구독자 하나
    let store = MemoryStore::new();
    let config = TraplineConfig::default();
    let mut rx = store
        .subscribe(&config.queues.rules_channel)
        .await
        .expect("should subscribe");

    // When
    let report = rules::reload(&store, &config).await.expect("should publish");

    // Then
    assert_eq!(report.receivers, 1);
    assert_eq!(rx.recv().await.as_deref(), Some("reload"));
}
