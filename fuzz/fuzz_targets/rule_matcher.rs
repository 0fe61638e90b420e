#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use trapline_core::types::Severity;
use trapline_matcher::{CompiledRule, Event, HandlingPolicy, MatchKind, MatchSpec, Rule};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    kind: FuzzKind,
    pattern: String,
    hostname: String,
    message: Option<String>,
    trap_oid: Option<String>,
}

#[derive(Arbitrary, Debug)]
enum FuzzKind {
    Contains,
    Regex,
    OidPrefix,
}

impl FuzzKind {
    fn to_match_kind(&self) -> MatchKind {
        match self {
            FuzzKind::Contains => MatchKind::Contains,
            FuzzKind::Regex => MatchKind::Regex,
            FuzzKind::OidPrefix => MatchKind::OidPrefix,
        }
    }
}

fuzz_target!(|input: FuzzInput| {
    let rule = Rule {
        id: 1,
        name: "fuzz rule".to_owned(),
        description: String::new(),
        priority: 0,
        active: true,
        severity: Severity::default(),
        matcher: MatchSpec {
            kind: input.kind.to_match_kind(),
            pattern: input.pattern,
        },
        handling: HandlingPolicy::default(),
        tags: Vec::new(),
    };

    // 검증/컴파일 실패는 크래시가 아님
    let Ok(compiled) = CompiledRule::compile(rule) else {
        return;
    };

    let event = Event::new(input.hostname, input.message, input.trap_oid);
    let _ = compiled.matches(&event);
});
