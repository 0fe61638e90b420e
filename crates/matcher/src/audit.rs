//! 감사 기록 -- 매칭된 이벤트의 append-only 기록
//!
//! 기록은 이벤트 시각 + 규칙 ID로 식별됩니다. 저장소가 쓸 수 없는 상태면
//! 매칭 엔진은 크래시하지 않고 항목을 재시도하며, 재시도가 소진되면
//! `persistence_unavailable` 사유로 dead-letter합니다.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use trapline_core::types::Environment;

use crate::error::MatcherError;
use crate::rule::types::Handling;

/// 감사 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// 이벤트 발생 시각 (RFC 3339)
    pub event_timestamp: String,
    /// 매칭된 규칙 ID
    pub rule_id: u64,
    /// 상관관계 ID
    pub correlation_id: String,
    /// 발생 호스트
    pub hostname: String,
    /// 적용된 처리 방식
    pub handling: Handling,
    /// 호스트 환경
    pub environment: Environment,
    /// 기록 시각 (RFC 3339)
    pub recorded_at: String,
}

/// append-only 감사 저장소
pub trait AuditSink: Send + Sync + 'static {
    /// 레코드 하나를 추가합니다.
    fn append(&self, record: &AuditRecord) -> impl Future<Output = Result<(), MatcherError>> + Send;
}

impl<T: AuditSink> AuditSink for Arc<T> {
    fn append(&self, record: &AuditRecord) -> impl Future<Output = Result<(), MatcherError>> + Send {
        (**self).append(record)
    }
}

/// JSON Lines 파일 감사 저장소
///
/// 한 레코드당 한 줄을 추가합니다. 쓰기 실패 시 파일 핸들을 버리고 다음 기록에서 다시 엽니다.
pub struct JsonlAuditSink {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl JsonlAuditSink {
    /// 경로로 생성합니다. 파일은 첫 기록 때 열립니다.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    /// 파일 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open(&self) -> Result<tokio::fs::File, MatcherError> {
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| MatcherError::Audit(format!("open {}: {e}", self.path.display())))
    }
}

impl AuditSink for JsonlAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), MatcherError> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| MatcherError::Audit(format!("serialize: {e}")))?;
        line.push('\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(MatcherError::Audit("audit file not open".to_owned()));
        };

        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            *guard = None;
            return Err(MatcherError::Audit(format!(
                "write {}: {e}",
                self.path.display()
            )));
        }
        Ok(())
    }
}

/// 메모리 감사 저장소 -- 테스트와 드라이런용
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: std::sync::Mutex<Vec<AuditRecord>>,
    unavailable: AtomicBool,
}

impl MemoryAuditSink {
    /// 빈 저장소를 만듭니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 장애 상태를 설정합니다. 장애 중에는 모든 기록이 실패합니다.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 지금까지의 기록
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), MatcherError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MatcherError::Audit("audit store unavailable".to_owned()));
        }
        self.records
            .lock()
            .map_err(|_| MatcherError::Audit("audit lock poisoned".to_owned()))?
            .push(record.clone());
        Ok(())
    }
}
