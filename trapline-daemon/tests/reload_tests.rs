//! Config hot reload tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use trapline_core::config::TraplineConfig;
use trapline_core::envelope::Envelope;
use trapline_daemon::reload::{reload_once, spawn_config_reload};
use trapline_forwarder::{ForwardProcessor, ForwarderSettings, ScriptedWebhookClient};
use trapline_queue::Processor;
use trapline_store::MemoryStore;

const BASE: &str = r#"
[forwarder]
webhook_url = "http://alerts.internal/hook"
rate_limit = 100
"#;

fn write(path: &std::path::Path, body: &str) {
    std::fs::write(path, body).expect("write config");
}

#[tokio::test]
async fn changed_forwarder_section_is_published() {
    // Given: 기동 시점 설정
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trapline.toml");
    write(&path, BASE);
    let initial = TraplineConfig::parse(BASE).unwrap().forwarder;
    let (tx, mut rx) = watch::channel(initial);

    // When: 파일이 그대로면 발행하지 않음
    assert!(!reload_once(&path, &tx).await.unwrap());
    assert!(!rx.has_changed().unwrap());

    // When: rate limit을 바꿈
    write(&path, &BASE.replace("rate_limit = 100", "rate_limit = 25"));
    assert!(reload_once(&path, &tx).await.unwrap());

    // Then
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().rate_limit, 25);
}

#[tokio::test]
async fn invalid_file_keeps_current_settings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trapline.toml");
    write(&path, BASE);
    let (tx, rx) = watch::channel(TraplineConfig::parse(BASE).unwrap().forwarder);

    write(&path, &BASE.replace("rate_limit = 100", "rate_limit = 0"));
    assert!(reload_once(&path, &tx).await.is_err());

    write(&path, "[forwarder\nbroken");
    assert!(reload_once(&path, &tx).await.is_err());

    assert_eq!(rx.borrow().rate_limit, 100);
}

#[tokio::test]
async fn reload_task_picks_up_changes_and_stops_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trapline.toml");
    write(&path, BASE);
    let (tx, mut rx) = watch::channel(TraplineConfig::parse(BASE).unwrap().forwarder);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let task = spawn_config_reload(path.clone(), Duration::from_millis(50), tx, shutdown_rx);

    write(
        &path,
        &BASE.replace("http://alerts.internal/hook", "http://alerts.internal/v2"),
    );
    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .expect("reload within timeout")
        .unwrap();
    assert_eq!(rx.borrow().webhook_url, "http://alerts.internal/v2");

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("task stops")
        .unwrap();
}

#[tokio::test]
async fn rotated_token_file_reaches_webhook_requests() {
    // Given: 토큰을 파일에서 읽는 포워더
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("webhook.token");
    std::fs::write(&token_path, "old-secret\n").unwrap();
    let path = dir.path().join("trapline.toml");
    let body = format!(
        "{BASE}webhook_token_file = \"{}\"\n",
        token_path.display().to_string().replace('\\', "\\\\")
    );
    write(&path, &body);

    let initial = TraplineConfig::parse(&body).unwrap().forwarder;
    let (tx, rx) = watch::channel(initial.clone());
    let client = Arc::new(ScriptedWebhookClient::new());
    let settings = ForwarderSettings::resolve(&initial).await.unwrap();
    let mut processor =
        ForwardProcessor::new(Arc::new(MemoryStore::new()), Arc::clone(&client), settings)
            .with_updates(rx);
    processor.process(&alert()).await.unwrap();

    // When: 설정 파일은 그대로 두고 토큰 파일만 교체
    std::fs::write(&token_path, "new-secret\n").unwrap();
    assert!(!reload_once(&path, &tx).await.unwrap());
    processor.on_tick().await;
    processor.process(&alert()).await.unwrap();

    // Then: 다음 요청부터 새 토큰 사용
    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].token.as_deref(), Some("old-secret"));
    assert_eq!(requests[1].token.as_deref(), Some("new-secret"));
}

#[tokio::test]
async fn inline_token_config_is_not_republished() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trapline.toml");
    let body = format!("{BASE}webhook_token = \"inline\"\n");
    write(&path, &body);
    let (tx, rx) = watch::channel(TraplineConfig::parse(&body).unwrap().forwarder);

    assert!(!reload_once(&path, &tx).await.unwrap());
    assert!(!rx.has_changed().unwrap());
}

fn alert() -> Envelope {
    Envelope::decode(r#"{"kind":"rule_match","correlation_id":"evt-1","rule_id":5}"#).unwrap()
}
