//! 규칙 파일 로더 -- YAML 규칙 파일을 디스크에서 로드합니다.
//!
//! 규칙 디렉토리 내의 `.yml`/`.yaml` 파일을 파일명 순으로 스캔하고 파싱합니다.
//! 개별 파일 파싱 실패는 경고 로그를 남기고 건너뜁니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::MatcherError;

use super::types::Rule;

/// 규칙 파일 최대 크기
pub const MAX_RULE_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB
/// 디렉토리당 최대 규칙 수
pub const MAX_RULES_COUNT: usize = 10_000;
/// dev host 파일 최대 크기
const MAX_DEV_HOSTS_FILE_SIZE: u64 = 1024 * 1024;

/// 디렉토리 로딩 결과
#[derive(Debug, Default)]
pub struct LoadedRules {
    /// 로드된 규칙 (파일명 순)
    pub rules: Vec<Rule>,
    /// 건너뛴 파일과 사유
    pub rejected: Vec<RejectedFile>,
}

/// 로딩에 실패해 건너뛴 파일
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedFile {
    /// 파일 경로
    pub path: String,
    /// 실패 사유
    pub reason: String,
}

/// 규칙 파일 로더
pub struct RuleLoader;

impl RuleLoader {
    /// 디렉토리에서 모든 YAML 규칙 파일을 로드합니다.
    ///
    /// 같은 ID가 여러 파일에 있으면 파일명 순으로 먼저 나온 것만 유지합니다.
    ///
    /// # Errors
    /// - 디렉토리를 읽을 수 없는 경우
    /// - 규칙 수가 `MAX_RULES_COUNT`를 초과하는 경우
    pub async fn load_directory(dir: impl AsRef<Path>) -> Result<LoadedRules, MatcherError> {
        let dir = dir.as_ref();
        let paths = Self::yaml_files(dir).await?;

        let mut loaded = LoadedRules::default();
        let mut seen_ids = HashSet::new();

        for path in paths {
            match Self::load_file(&path).await {
                Ok(rule) => {
                    if !seen_ids.insert(rule.id) {
                        tracing::warn!(
                            rule_id = rule.id,
                            path = %path.display(),
                            "duplicate rule id, skipping"
                        );
                        loaded.rejected.push(RejectedFile {
                            path: path.display().to_string(),
                            reason: format!("duplicate rule id {}", rule.id),
                        });
                        continue;
                    }
                    loaded.rules.push(rule);
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load rule file, skipping"
                    );
                    loaded.rejected.push(RejectedFile {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }

            if loaded.rules.len() > MAX_RULES_COUNT {
                return Err(MatcherError::RuleLoad {
                    path: dir.display().to_string(),
                    reason: format!("too many rules: max {MAX_RULES_COUNT}"),
                });
            }
        }

        tracing::debug!(
            dir = %dir.display(),
            count = loaded.rules.len(),
            rejected = loaded.rejected.len(),
            "loaded rule files"
        );

        Ok(loaded)
    }

    /// 디렉토리의 YAML 파일 경로를 파일명 순으로 반환합니다.
    async fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>, MatcherError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| MatcherError::RuleLoad {
                path: dir.display().to_string(),
                reason: format!("failed to read directory: {e}"),
            })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MatcherError::RuleLoad {
                path: dir.display().to_string(),
                reason: format!("failed to read directory entry: {e}"),
            })?
        {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yml" || ext == "yaml");
            if is_yaml {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// 단일 YAML 파일에서 규칙을 로드합니다.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Rule, MatcherError> {
        let path = path.as_ref();
        let content = read_bounded(path, MAX_RULE_FILE_SIZE).await?;
        Self::parse_yaml(&content, &path.display().to_string())
    }

    /// YAML 문자열을 파싱하여 규칙을 생성합니다.
    pub fn parse_yaml(yaml_str: &str, source: &str) -> Result<Rule, MatcherError> {
        let rule: Rule = serde_yaml::from_str(yaml_str).map_err(|e| MatcherError::RuleLoad {
            path: source.to_owned(),
            reason: format!("YAML parse error: {e}"),
        })?;

        rule.validate()?;

        Ok(rule)
    }

    /// dev host 파일을 로드합니다.
    pub async fn load_dev_hosts(path: impl AsRef<Path>) -> Result<Vec<String>, MatcherError> {
        let path = path.as_ref();
        let content = read_bounded(path, MAX_DEV_HOSTS_FILE_SIZE).await?;
        Ok(Self::parse_dev_hosts(&content))
    }

    /// 한 줄에 하나의 호스트명, `#` 이후는 주석. 호스트명은 소문자로 정규화합니다.
    pub fn parse_dev_hosts(content: &str) -> Vec<String> {
        content
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default().trim())
            .filter(|host| !host.is_empty())
            .map(str::to_ascii_lowercase)
            .collect()
    }
}

async fn read_bounded(path: &Path, max: u64) -> Result<String, MatcherError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| MatcherError::RuleLoad {
            path: path.display().to_string(),
            reason: format!("failed to read file metadata: {e}"),
        })?;

    if metadata.len() > max {
        return Err(MatcherError::RuleLoad {
            path: path.display().to_string(),
            reason: format!("file too large: {} bytes (max: {max})", metadata.len()),
        });
    }

    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| MatcherError::RuleLoad {
            path: path.display().to_string(),
            reason: format!("failed to read file: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use trapline_core::types::Severity;

    const LINK_DOWN: &str = r#"
id: 1
name: link down
priority: 5
severity: high
match:
  type: contains
  pattern: LINK-DOWN
"#;

    #[test]
    fn parse_valid_yaml() {
        let rule = RuleLoader::parse_yaml(LINK_DOWN, "link.yml").unwrap();
        assert_eq!(rule.id, 1);
        assert_eq!(rule.severity, Severity::High);
    }

    #[test]
    fn parse_invalid_yaml_returns_error() {
        let result = RuleLoader::parse_yaml("not: [valid: yaml: {{{", "bad.yml");
        assert!(matches!(result, Err(MatcherError::RuleLoad { .. })));
    }

    #[test]
    fn parse_yaml_runs_validation() {
        let yaml = "id: 2\nname: \"\"\nmatch:\n  type: contains\n  pattern: x\n";
        let result = RuleLoader::parse_yaml(yaml, "empty_name.yml");
        assert!(matches!(
            result,
            Err(MatcherError::RuleValidation { rule_id: 2, .. })
        ));
    }

    #[test]
    fn dev_hosts_skip_comments_and_blank_lines() {
        let content = "# lab gear\nLab-Router-1\n\n  lab-switch-2   # rack 4\n#\n";
        assert_eq!(
            RuleLoader::parse_dev_hosts(content),
            vec!["lab-router-1", "lab-switch-2"]
        );
    }

    #[tokio::test]
    async fn load_nonexistent_directory_returns_error() {
        let result = RuleLoader::load_directory("/nonexistent/path/rules").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn duplicate_ids_keep_first_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yml"), LINK_DOWN).unwrap();
        std::fs::write(
            dir.path().join("b.yaml"),
            LINK_DOWN.replace("link down", "shadow"),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("c.yml"), "id: [").unwrap();

        let loaded = RuleLoader::load_directory(dir.path()).await.unwrap();

        assert_eq!(loaded.rules.len(), 1);
        assert_eq!(loaded.rules[0].name, "link down");
        assert_eq!(loaded.rejected.len(), 2);
        assert!(loaded.rejected[0].reason.contains("duplicate"));
    }
}
