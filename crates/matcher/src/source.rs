//! 규칙 출처 -- 스냅샷을 만들 규칙과 dev host 목록을 제공합니다.
//!
//! 규칙의 원본 저장소(관리 API 뒤의 DB, 디렉토리 등)는 [`RuleSource`] 뒤에 숨깁니다.
//! 매칭 엔진은 변경 알림이나 주기 타이머가 올 때마다 전체를 다시 읽어 스냅샷을 새로 만듭니다.

use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use trapline_core::config::MatcherConfig;

use crate::error::MatcherError;
use crate::rule::loader::{LoadedRules, RuleLoader};
use crate::rule::types::Rule;

/// 규칙 / dev host 일괄 조회
pub trait RuleSource: Send + Sync + 'static {
    /// 모든 규칙을 읽습니다 (비활성 포함).
    fn load_rules(&self) -> impl Future<Output = Result<LoadedRules, MatcherError>> + Send;

    /// 개발 환경으로 분류할 호스트명 목록을 읽습니다.
    fn load_dev_hosts(&self) -> impl Future<Output = Result<Vec<String>, MatcherError>> + Send;
}

impl<T: RuleSource> RuleSource for Arc<T> {
    fn load_rules(&self) -> impl Future<Output = Result<LoadedRules, MatcherError>> + Send {
        (**self).load_rules()
    }

    fn load_dev_hosts(&self) -> impl Future<Output = Result<Vec<String>, MatcherError>> + Send {
        (**self).load_dev_hosts()
    }
}

/// YAML 디렉토리 + dev host 파일 출처
#[derive(Debug, Clone)]
pub struct DirectoryRuleSource {
    rule_dir: PathBuf,
    dev_hosts_file: Option<PathBuf>,
    dev_hosts: Vec<String>,
}

impl DirectoryRuleSource {
    /// 규칙 디렉토리로 생성합니다.
    pub fn new(rule_dir: impl Into<PathBuf>) -> Self {
        Self {
            rule_dir: rule_dir.into(),
            dev_hosts_file: None,
            dev_hosts: Vec::new(),
        }
    }

    /// `[matcher]` 설정으로 생성합니다.
    pub fn from_config(config: &MatcherConfig) -> Self {
        let mut source = Self::new(&config.rule_dir).with_dev_hosts(config.dev_hosts.clone());
        if !config.dev_hosts_file.is_empty() {
            source = source.with_dev_hosts_file(&config.dev_hosts_file);
        }
        source
    }

    /// dev host 파일을 지정합니다.
    pub fn with_dev_hosts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.dev_hosts_file = Some(path.into());
        self
    }

    /// 파일과 별도로 고정 dev host를 추가합니다.
    pub fn with_dev_hosts(mut self, hosts: Vec<String>) -> Self {
        self.dev_hosts = hosts;
        self
    }

    /// 규칙 디렉토리
    pub fn rule_dir(&self) -> &std::path::Path {
        &self.rule_dir
    }
}

impl RuleSource for DirectoryRuleSource {
    async fn load_rules(&self) -> Result<LoadedRules, MatcherError> {
        RuleLoader::load_directory(&self.rule_dir).await
    }

    async fn load_dev_hosts(&self) -> Result<Vec<String>, MatcherError> {
        let mut hosts: Vec<String> = self
            .dev_hosts
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        if let Some(path) = &self.dev_hosts_file {
            hosts.extend(RuleLoader::load_dev_hosts(path).await?);
        }
        Ok(hosts)
    }
}

/// 메모리 출처 -- 테스트와 `rules test` 명령용
#[derive(Debug, Default)]
pub struct MemoryRuleSource {
    rules: Mutex<Vec<Rule>>,
    dev_hosts: Mutex<Vec<String>>,
}

impl MemoryRuleSource {
    /// 규칙과 dev host로 생성합니다.
    pub fn new(rules: Vec<Rule>, dev_hosts: Vec<String>) -> Self {
        Self {
            rules: Mutex::new(rules),
            dev_hosts: Mutex::new(dev_hosts),
        }
    }

    /// 규칙 목록을 교체합니다.
    pub fn replace_rules(&self, rules: Vec<Rule>) -> Result<(), MatcherError> {
        let mut guard = self
            .rules
            .lock()
            .map_err(|_| MatcherError::RuleLoad {
                path: "memory".to_owned(),
                reason: "rule source lock poisoned".to_owned(),
            })?;
        *guard = rules;
        Ok(())
    }
}

impl RuleSource for MemoryRuleSource {
    async fn load_rules(&self) -> Result<LoadedRules, MatcherError> {
        let rules = self.rules.lock().map_err(|_| MatcherError::RuleLoad {
            path: "memory".to_owned(),
            reason: "rule source lock poisoned".to_owned(),
        })?;
        Ok(LoadedRules {
            rules: rules.clone(),
            rejected: Vec::new(),
        })
    }

    async fn load_dev_hosts(&self) -> Result<Vec<String>, MatcherError> {
        let hosts = self.dev_hosts.lock().map_err(|_| MatcherError::RuleLoad {
            path: "memory".to_owned(),
            reason: "rule source lock poisoned".to_owned(),
        })?;
        Ok(hosts.clone())
    }
}
