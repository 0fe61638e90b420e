//! 규칙 매칭 로직 -- 전략별 평가와 정규식 사전 컴파일
//!
//! [`CompiledRule`]은 규칙 로딩 시 한 번만 만들어지며, 정규식은 이때 컴파일됩니다.
//! 매칭 시에는 재컴파일 없이 단일 패스로 평가합니다.

use regex::{Regex, RegexBuilder};

use crate::error::MatcherError;
use crate::event::Event;

use super::types::{MatchKind, Rule};

/// 컴파일된 정규식 최대 크기
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// 전략별 사전 처리된 패턴
#[derive(Debug, Clone)]
enum Strategy {
    Contains(String),
    Regex(Regex),
    /// 앞의 `.`을 제거한 OID 접두사
    OidPrefix(String),
}

/// 매칭 준비가 끝난 규칙
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    strategy: Strategy,
}

impl CompiledRule {
    /// 규칙을 검증하고 패턴을 컴파일합니다.
    ///
    /// 정규식 컴파일 실패는 `RuleValidation` 에러가 되며, 스냅샷 빌드 시
    /// 해당 규칙만 제외됩니다.
    pub fn compile(rule: Rule) -> Result<Self, MatcherError> {
        rule.validate()?;
        let strategy = match rule.matcher.kind {
            MatchKind::Contains => Strategy::Contains(rule.matcher.pattern.clone()),
            MatchKind::Regex => {
                let regex = RegexBuilder::new(&rule.matcher.pattern)
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map_err(|e| MatcherError::RuleValidation {
                        rule_id: rule.id,
                        reason: format!("invalid regex: {e}"),
                    })?;
                Strategy::Regex(regex)
            }
            MatchKind::OidPrefix => {
                Strategy::OidPrefix(normalize_oid(&rule.matcher.pattern).to_owned())
            }
        };
        Ok(Self { rule, strategy })
    }

    /// 원본 규칙
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// 규칙 ID
    pub fn id(&self) -> u64 {
        self.rule.id
    }

    /// 정렬 키: (priority, id) 오름차순이 우선
    pub fn rank(&self) -> (u32, u64) {
        (self.rule.priority, self.rule.id)
    }

    /// 이벤트가 규칙에 매칭되는지 평가합니다.
    ///
    /// 전략이 요구하는 필드가 이벤트에 없으면 매칭되지 않습니다.
    pub fn matches(&self, event: &Event) -> bool {
        match &self.strategy {
            Strategy::Contains(needle) => event
                .message
                .as_deref()
                .is_some_and(|msg| msg.contains(needle.as_str())),
            Strategy::Regex(regex) => event
                .message
                .as_deref()
                .is_some_and(|msg| regex.is_match(msg)),
            Strategy::OidPrefix(prefix) => event
                .trap_oid
                .as_deref()
                .is_some_and(|oid| oid_has_prefix(oid, prefix)),
        }
    }
}

fn normalize_oid(oid: &str) -> &str {
    oid.strip_prefix('.').unwrap_or(oid)
}

/// `oid`가 `prefix`와 같거나 점 구분 세그먼트 단위로 그 하위인지 여부
///
/// `1.3.6.1.4.1.9`는 `1.3.6.1.4.1`의 하위지만 `1.3.6.1.4.10`은 `1.3.6.1.4.1`의 하위가 아닙니다.
pub fn oid_has_prefix(oid: &str, prefix: &str) -> bool {
    let oid = normalize_oid(oid);
    let prefix = normalize_oid(prefix);
    match oid.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

/// 정렬된 규칙 목록에서 이벤트에 매칭되는 가장 우선하는 규칙을 찾습니다.
///
/// `rules`는 [`CompiledRule::rank`] 오름차순이어야 합니다. 비활성 규칙은 건너뜁니다.
pub fn select<'a>(rules: &'a [CompiledRule], event: &Event) -> Option<&'a CompiledRule> {
    rules
        .iter()
        .filter(|rule| rule.rule.active)
        .find(|rule| rule.matches(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::types::{HandlingPolicy, MatchSpec};
    use proptest::prelude::*;
    use trapline_core::types::Severity;

    fn rule(id: u64, priority: u32, kind: MatchKind, pattern: &str) -> Rule {
        Rule {
            id,
            name: format!("rule-{id}"),
            description: String::new(),
            priority,
            active: true,
            severity: Severity::Medium,
            matcher: MatchSpec {
                kind,
                pattern: pattern.to_owned(),
            },
            handling: HandlingPolicy::default(),
            tags: vec![],
        }
    }

    fn compiled(rules: Vec<Rule>) -> Vec<CompiledRule> {
        let mut out: Vec<_> = rules
            .into_iter()
            .map(|r| CompiledRule::compile(r).unwrap())
            .collect();
        out.sort_by_key(CompiledRule::rank);
        out
    }

    fn message(text: &str) -> Event {
        Event::for_test("web-01", Some(text), None)
    }

    fn trap(oid: &str) -> Event {
        Event::for_test("sw-01", None, Some(oid))
    }

    #[test]
    fn contains_is_case_sensitive() {
        let r = CompiledRule::compile(rule(1, 1, MatchKind::Contains, "LINK-DOWN")).unwrap();
        assert!(r.matches(&message("%LINK-DOWN eth0")));
        assert!(!r.matches(&message("link-down eth0")));
        assert!(!r.matches(&trap("1.3.6")));
    }

    #[test]
    fn regex_matches_message() {
        let r = CompiledRule::compile(rule(1, 1, MatchKind::Regex, r"^%\w+-\d-UPDOWN")).unwrap();
        assert!(r.matches(&message("%LINK-3-UPDOWN: Interface Gi0/1")));
        assert!(!r.matches(&message("LINK-3-UPDOWN")));
    }

    #[test]
    fn invalid_regex_fails_compilation() {
        let err = CompiledRule::compile(rule(9, 1, MatchKind::Regex, "[invalid")).unwrap_err();
        assert!(matches!(err, MatcherError::RuleValidation { rule_id: 9, .. }));
    }

    #[test]
    fn oid_prefix_respects_segment_boundaries() {
        assert!(oid_has_prefix("1.3.6.1.4.1.9", "1.3.6.1.4.1"));
        assert!(oid_has_prefix("1.3.6.1.4.1", "1.3.6.1.4.1"));
        assert!(oid_has_prefix(".1.3.6.1.4.1.9.9", "1.3.6.1.4.1"));
        assert!(!oid_has_prefix("1.3.6.1.4.10", "1.3.6.1.4.1"));
        assert!(!oid_has_prefix("1.3.6", "1.3.6.1"));
    }

    #[test]
    fn oid_rule_matches_trap_only() {
        let r = CompiledRule::compile(rule(1, 1, MatchKind::OidPrefix, ".1.3.6.1.4.1")).unwrap();
        assert!(r.matches(&trap("1.3.6.1.4.1.9.9.41")));
        assert!(!r.matches(&message("1.3.6.1.4.1.9")));
    }

    #[test]
    fn lower_priority_value_wins() {
        // Given: "LINK-DOWN eth0"에 둘 다 매칭되는 규칙
        let rules = compiled(vec![
            rule(2, 50, MatchKind::Contains, "eth0"),
            rule(1, 5, MatchKind::Contains, "LINK-DOWN"),
        ]);

        // When
        let selected = select(&rules, &message("LINK-DOWN eth0")).unwrap();

        // Then
        assert_eq!(selected.id(), 1);
    }

    #[test]
    fn equal_priority_breaks_tie_on_lower_id() {
        let rules = compiled(vec![
            rule(20, 10, MatchKind::Contains, "eth0"),
            rule(11, 10, MatchKind::Contains, "LINK"),
        ]);
        assert_eq!(select(&rules, &message("LINK-DOWN eth0")).unwrap().id(), 11);
    }

    #[test]
    fn inactive_rules_are_skipped() {
        let mut inactive = rule(1, 1, MatchKind::Contains, "LINK");
        inactive.active = false;
        let rules = compiled(vec![inactive, rule(2, 99, MatchKind::Contains, "eth0")]);
        assert_eq!(select(&rules, &message("LINK-DOWN eth0")).unwrap().id(), 2);
    }

    #[test]
    fn no_match_returns_none() {
        let rules = compiled(vec![rule(1, 1, MatchKind::Contains, "BGP")]);
        assert!(select(&rules, &message("LINK-DOWN eth0")).is_none());
    }

    proptest! {
        #[test]
        fn selection_is_minimum_over_all_matches(
            specs in proptest::collection::vec((0u32..5, 0u64..50, any::<bool>()), 1..20)
        ) {
            // 패턴은 모두 "a" 또는 "z" -- 메시지 "abc"에는 "a"만 매칭
            let mut seen = std::collections::HashSet::new();
            let rules: Vec<Rule> = specs
                .into_iter()
                .filter(|(_, id, _)| seen.insert(*id))
                .map(|(priority, id, hit)| {
                    rule(id, priority, MatchKind::Contains, if hit { "a" } else { "z" })
                })
                .collect();
            let compiled_rules = compiled(rules.clone());
            let event = message("abc");

            let expected = rules
                .iter()
                .filter(|r| r.matcher.pattern == "a")
                .map(|r| (r.priority, r.id))
                .min();
            let actual = select(&compiled_rules, &event).map(CompiledRule::rank);
            prop_assert_eq!(actual, expected);
        }
    }
}
