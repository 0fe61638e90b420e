//! 매칭 규칙 데이터 타입
//!
//! YAML 규칙 파일에서 역직렬화되는 구조체들을 정의합니다.

use std::fmt;

use serde::{Deserialize, Serialize};
use trapline_core::types::{Environment, Severity};

use crate::error::MatcherError;

/// 규칙 이름 최대 길이
const MAX_NAME_LEN: usize = 256;

/// 규칙 -- 하나의 YAML 규칙 파일에 대응합니다.
///
/// # YAML 스키마
/// ```yaml
/// id: 1001
/// name: interface down
/// description: link state change to down
/// priority: 10
/// active: true
/// severity: high
/// match:
///   type: contains
///   pattern: "LINK-DOWN"
/// handling:
///   production: alert
///   development: audit
/// tags:
///   - network
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// 규칙 고유 ID (우선순위 동률 시 낮은 ID가 이깁니다)
    pub id: u64,
    /// 규칙 이름 (알림에 표시)
    pub name: String,
    /// 규칙 설명
    #[serde(default)]
    pub description: String,
    /// 우선순위 (낮을수록 우선)
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// 활성화 여부
    #[serde(default = "default_active")]
    pub active: bool,
    /// 심각도
    #[serde(default)]
    pub severity: Severity,
    /// 매칭 조건
    #[serde(rename = "match")]
    pub matcher: MatchSpec,
    /// 환경별 처리
    #[serde(default)]
    pub handling: HandlingPolicy,
    /// 분류 태그
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_priority() -> u32 {
    100
}

fn default_active() -> bool {
    true
}

impl Rule {
    /// 규칙의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), MatcherError> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("rule name must not be empty"));
        }

        if self.name.len() > MAX_NAME_LEN {
            return Err(self.invalid(format!(
                "rule name must not exceed {MAX_NAME_LEN} characters"
            )));
        }

        if self.matcher.pattern.is_empty() {
            return Err(self.invalid("match pattern must not be empty"));
        }

        if self.matcher.kind == MatchKind::OidPrefix && !is_dotted_oid(&self.matcher.pattern) {
            return Err(self.invalid(format!(
                "oid_prefix pattern '{}' must be dot-separated numeric segments",
                self.matcher.pattern
            )));
        }

        Ok(())
    }

    /// 주어진 환경의 처리 방식
    pub fn handling_for(&self, environment: Environment) -> Handling {
        self.handling.for_environment(environment)
    }

    fn invalid(&self, reason: impl Into<String>) -> MatcherError {
        MatcherError::RuleValidation {
            rule_id: self.id,
            reason: reason.into(),
        }
    }
}

/// `1.3.6.1` 형태인지 확인합니다. 앞의 `.` 하나는 허용합니다.
pub(crate) fn is_dotted_oid(pattern: &str) -> bool {
    let trimmed = pattern.strip_prefix('.').unwrap_or(pattern);
    !trimmed.is_empty()
        && trimmed
            .split('.')
            .all(|seg| !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()))
}

/// 매칭 조건
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpec {
    /// 매칭 방식
    #[serde(rename = "type")]
    pub kind: MatchKind,
    /// 패턴 (부분 문자열, 정규식, OID 접두사)
    pub pattern: String,
}

/// 매칭 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// `message`에 대한 대소문자 구분 부분 문자열
    Contains,
    /// `message`에 대한 정규식
    Regex,
    /// `trap_oid`에 대한 점 구분 계층 접두사
    OidPrefix,
}

impl MatchKind {
    /// 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Regex => "regex",
            Self::OidPrefix => "oid_prefix",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 매칭된 이벤트의 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handling {
    /// 버림 (감사도 알림도 없음)
    Drop,
    /// 감사 기록만
    Audit,
    /// 감사 기록 후 알림
    Alert,
}

impl Handling {
    /// 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Audit => "audit",
            Self::Alert => "alert",
        }
    }

    /// 감사 기록 대상인지 여부
    pub fn audits(&self) -> bool {
        matches!(self, Self::Audit | Self::Alert)
    }
}

impl fmt::Display for Handling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 환경별 처리 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlingPolicy {
    /// 운영 호스트
    #[serde(default = "default_production")]
    pub production: Handling,
    /// 개발 호스트
    #[serde(default = "default_development")]
    pub development: Handling,
}

fn default_production() -> Handling {
    Handling::Alert
}

fn default_development() -> Handling {
    Handling::Audit
}

impl Default for HandlingPolicy {
    fn default() -> Self {
        Self {
            production: default_production(),
            development: default_development(),
        }
    }
}

impl HandlingPolicy {
    /// 환경에 해당하는 처리 방식
    pub fn for_environment(&self, environment: Environment) -> Handling {
        match environment {
            Environment::Production => self.production,
            Environment::Development => self.development,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rule() -> Rule {
        Rule {
            id: 1,
            name: "link down".to_owned(),
            description: String::new(),
            priority: 10,
            active: true,
            severity: Severity::High,
            matcher: MatchSpec {
                kind: MatchKind::Contains,
                pattern: "LINK-DOWN".to_owned(),
            },
            handling: HandlingPolicy::default(),
            tags: vec![],
        }
    }

    #[test]
    fn valid_rule_passes_validation() {
        sample_rule().validate().unwrap();
    }

    #[test]
    fn empty_name_fails_validation() {
        let mut rule = sample_rule();
        rule.name = "   ".to_owned();
        assert!(rule.validate().is_err());
    }

    #[test]
    fn too_long_name_fails_validation() {
        let mut rule = sample_rule();
        rule.name = "x".repeat(300);
        assert!(rule.validate().is_err());
    }

    #[test]
    fn empty_pattern_fails_validation() {
        let mut rule = sample_rule();
        rule.matcher.pattern = String::new();
        assert!(rule.validate().is_err());
    }

    #[test]
    fn oid_prefix_must_be_numeric() {
        let mut rule = sample_rule();
        rule.matcher.kind = MatchKind::OidPrefix;
        rule.matcher.pattern = "1.3.6.1.4.1".to_owned();
        rule.validate().unwrap();

        rule.matcher.pattern = ".1.3.6".to_owned();
        rule.validate().unwrap();

        for bad in ["1..3", "1.3.x", ".", "1.3."] {
            rule.matcher.pattern = bad.to_owned();
            assert!(rule.validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn handling_defaults_alert_in_production_audit_in_development() {
        let rule = sample_rule();
        assert_eq!(rule.handling_for(Environment::Production), Handling::Alert);
        assert_eq!(rule.handling_for(Environment::Development), Handling::Audit);
        assert!(!Handling::Drop.audits());
    }

    #[test]
    fn rule_from_yaml() {
        let yaml = r#"
id: 7
name: cisco traps
priority: 20
severity: critical
match:
  type: oid_prefix
  pattern: "1.3.6.1.4.1.9"
handling:
  production: alert
  development: drop
tags:
  - snmp
"#;
        let rule: Rule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.id, 7);
        assert_eq!(rule.matcher.kind, MatchKind::OidPrefix);
        assert_eq!(rule.handling.development, Handling::Drop);
        assert!(rule.active);
        assert_eq!(rule.tags, vec!["snmp"]);
    }

    #[test]
    fn yaml_defaults_apply() {
        let yaml = r#"
id: 3
name: minimal
match:
  type: regex
  pattern: "^%LINK"
"#;
        let rule: Rule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.priority, 100);
        assert!(rule.active);
        assert_eq!(rule.severity, Severity::Info);
        assert_eq!(rule.handling, HandlingPolicy::default());
    }
}
