//! 규칙 스냅샷과 원자 교체 캐시
//!
//! [`RuleSnapshot`]은 한 세대(generation)의 컴파일된 규칙과 dev host 집합입니다.
//! 만들어진 뒤에는 변경되지 않으며, 재로드는 새 스냅샷을 옆에서 완성한 뒤
//! [`RuleCache`]의 포인터를 한 번에 바꾸는 방식으로만 일어납니다.
//! 읽는 쪽은 항상 완전한 한 세대만 봅니다.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use trapline_core::metrics as m;
use trapline_core::types::Environment;

use crate::error::MatcherError;
use crate::event::Event;
use crate::rule::matcher::{self, CompiledRule};
use crate::rule::types::{Handling, Rule};
use crate::source::RuleSource;

/// 컴파일에 실패해 스냅샷에서 제외된 규칙
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedRule {
    /// 규칙 ID
    pub rule_id: u64,
    /// 제외 사유
    pub reason: String,
}

/// 매칭 결과
#[derive(Debug, Clone, Copy)]
pub struct Decision<'a> {
    /// 선택된 규칙
    pub rule: &'a Rule,
    /// 호스트 환경
    pub environment: Environment,
    /// 환경별 처리 방식
    pub handling: Handling,
}

/// 한 세대의 규칙 스냅샷 (불변)
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    generation: u64,
    rules: Vec<CompiledRule>,
    dev_hosts: HashSet<String>,
    excluded: Vec<ExcludedRule>,
}

impl RuleSnapshot {
    /// 규칙을 컴파일해 스냅샷을 만듭니다.
    ///
    /// 컴파일에 실패한 규칙은 경고 로그와 함께 제외됩니다. 규칙은 (priority, id) 순으로 정렬됩니다.
    pub fn build(
        generation: u64,
        rules: Vec<Rule>,
        dev_hosts: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut excluded = Vec::new();

        for rule in rules {
            let rule_id = rule.id;
            match CompiledRule::compile(rule) {
                Ok(c) => compiled.push(c),
                Err(e) => {
                    tracing::warn!(rule_id, error = %e, "excluding rule from snapshot");
                    excluded.push(ExcludedRule {
                        rule_id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        compiled.sort_by_key(CompiledRule::rank);

        Self {
            generation,
            rules: compiled,
            dev_hosts: dev_hosts
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            excluded,
        }
    }

    /// 세대 번호 (0은 아직 로드되지 않은 빈 스냅샷)
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 컴파일된 규칙 (우선순위 순)
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// 활성 규칙 수
    pub fn active_count(&self) -> usize {
        self.rules.iter().filter(|r| r.rule().active).count()
    }

    /// 제외된 규칙
    pub fn excluded(&self) -> &[ExcludedRule] {
        &self.excluded
    }

    /// dev host 수
    pub fn dev_host_count(&self) -> usize {
        self.dev_hosts.len()
    }

    /// 호스트의 환경을 분류합니다.
    pub fn environment(&self, hostname: &str) -> Environment {
        if self.dev_hosts.contains(&hostname.to_ascii_lowercase()) {
            Environment::Development
        } else {
            Environment::Production
        }
    }

    /// 이벤트에 가장 우선하는 규칙과 처리 방식을 결정합니다.
    pub fn evaluate(&self, event: &Event) -> Option<Decision<'_>> {
        let selected = matcher::select(&self.rules, event)?;
        let environment = self.environment(&event.hostname);
        Some(Decision {
            rule: selected.rule(),
            environment,
            handling: selected.rule().handling_for(environment),
        })
    }
}

/// 원자 교체 규칙 캐시
///
/// 읽기는 락 없이 현재 스냅샷의 `Arc`를 가져갑니다.
pub struct RuleCache {
    current: ArcSwap<RuleSnapshot>,
}

impl RuleCache {
    /// 빈 스냅샷(세대 0)으로 시작합니다.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RuleSnapshot::default()),
        }
    }

    /// 현재 스냅샷
    pub fn load(&self) -> Arc<RuleSnapshot> {
        self.current.load_full()
    }

    /// 완성된 스냅샷을 게시합니다.
    pub fn publish(&self, snapshot: RuleSnapshot) -> Arc<RuleSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.current.store(Arc::clone(&snapshot));

        metrics::gauge!(m::MATCHER_RULES_LOADED).set(snapshot.active_count() as f64);
        metrics::gauge!(m::MATCHER_RULES_EXCLUDED).set(snapshot.excluded().len() as f64);
        metrics::gauge!(m::MATCHER_SNAPSHOT_GENERATION).set(snapshot.generation() as f64);
        snapshot
    }

    /// 출처에서 규칙을 다시 읽어 다음 세대를 게시합니다.
    ///
    /// 실패하면 이전 스냅샷을 그대로 유지합니다.
    pub async fn refresh<R: RuleSource>(
        &self,
        source: &R,
        trigger: &'static str,
    ) -> Result<Arc<RuleSnapshot>, MatcherError> {
        let result = async {
            let loaded = source.load_rules().await?;
            let dev_hosts = source.load_dev_hosts().await?;
            Ok::<_, MatcherError>((loaded, dev_hosts))
        }
        .await;

        let (loaded, dev_hosts) = match result {
            Ok(parts) => parts,
            Err(e) => {
                metrics::counter!(
                    m::MATCHER_RELOADS_TOTAL,
                    m::LABEL_RESULT => "error",
                    "trigger" => trigger
                )
                .increment(1);
                return Err(e);
            }
        };

        let generation = self.current.load().generation() + 1;
        let snapshot = RuleSnapshot::build(generation, loaded.rules, dev_hosts);
        let published = self.publish(snapshot);

        metrics::counter!(
            m::MATCHER_RELOADS_TOTAL,
            m::LABEL_RESULT => "ok",
            "trigger" => trigger
        )
        .increment(1);
        tracing::info!(
            generation,
            trigger,
            rules = published.rules().len(),
            active = published.active_count(),
            excluded = published.excluded().len(),
            rejected_files = loaded.rejected.len(),
            dev_hosts = published.dev_host_count(),
            "rule snapshot published"
        );
        Ok(published)
    }
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::types::{HandlingPolicy, MatchKind, MatchSpec};
    use crate::source::MemoryRuleSource;
    use trapline_core::types::Severity;

    fn rule(id: u64, priority: u32, kind: MatchKind, pattern: &str) -> Rule {
        Rule {
            id,
            name: format!("rule-{id}"),
            description: String::new(),
            priority,
            active: true,
            severity: Severity::High,
            matcher: MatchSpec {
                kind,
                pattern: pattern.to_owned(),
            },
            handling: HandlingPolicy {
                production: Handling::Alert,
                development: Handling::Drop,
            },
            tags: vec![],
        }
    }

    #[test]
    fn invalid_regex_is_excluded_not_fatal() {
        let snapshot = RuleSnapshot::build(
            1,
            vec![
                rule(1, 10, MatchKind::Regex, "(unclosed"),
                rule(2, 20, MatchKind::Contains, "LINK"),
            ],
            Vec::new(),
        );
        assert_eq!(snapshot.rules().len(), 1);
        assert_eq!(snapshot.excluded()[0].rule_id, 1);

        let event = Event::for_test("r1", Some("LINK-DOWN"), None);
        assert_eq!(snapshot.evaluate(&event).unwrap().rule.id, 2);
    }

    #[test]
    fn dev_hosts_select_development_handling() {
        let snapshot = RuleSnapshot::build(
            1,
            vec![rule(1, 1, MatchKind::Contains, "LINK")],
            vec!["Lab-1".to_owned()],
        );

        let dev = Event::for_test("LAB-1", Some("LINK-DOWN"), None);
        let decision = snapshot.evaluate(&dev).unwrap();
        assert_eq!(decision.environment, Environment::Development);
        assert_eq!(decision.handling, Handling::Drop);

        let prod = Event::for_test("core-1", Some("LINK-DOWN"), None);
        assert_eq!(snapshot.evaluate(&prod).unwrap().handling, Handling::Alert);
    }

    #[tokio::test]
    async fn refresh_bumps_generation_and_swaps_atomically() {
        let cache = RuleCache::new();
        let source = MemoryRuleSource::new(vec![rule(1, 1, MatchKind::Contains, "A")], vec![]);

        let before = cache.load();
        let first = cache.refresh(&source, "startup").await.unwrap();
        source
            .replace_rules(vec![rule(2, 1, MatchKind::Contains, "B")])
            .unwrap();
        let second = cache.refresh(&source, "notification").await.unwrap();

        assert_eq!(before.generation(), 0);
        assert_eq!(first.generation(), 1);
        assert_eq!(second.generation(), 2);
        // 이전 세대를 쥔 읽기는 그대로 유효
        assert_eq!(first.rules()[0].id(), 1);
        assert_eq!(cache.load().rules()[0].id(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let cache = RuleCache::new();
        let good = MemoryRuleSource::new(vec![rule(1, 1, MatchKind::Contains, "A")], vec![]);
        cache.refresh(&good, "startup").await.unwrap();

        let broken = crate::source::DirectoryRuleSource::new("/nonexistent/trapline/rules");
        assert!(cache.refresh(&broken, "timer").await.is_err());

        assert_eq!(cache.load().generation(), 1);
        assert_eq!(cache.load().rules().len(), 1);
    }
}
