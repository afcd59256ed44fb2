use std::collections::HashSet;

use md_core::store::prepare_rule;
use md_core::types::{MappingRule, PatternType, RuleTarget};

pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
}

/// Drop rules that repeat an earlier rule field for field (ids aside). The
/// first occurrence is kept, so the surviving id is the oldest one.
pub fn optimize_rules(rules: &mut Vec<MappingRule>) -> OptimizeStats {
    let before = rules.len();

    let mut seen: HashSet<RuleKey> = HashSet::new();
    let mut deduped = 0usize;
    rules.retain(|rule| {
        if seen.insert(RuleKey::from(rule)) {
            true
        } else {
            deduped += 1;
            false
        }
    });

    let after = rules.len();

    OptimizeStats { before, after, deduped }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleKey {
    pattern_type: PatternType,
    pattern: String,
    includes_hostname: bool,
    priority: u8,
    target: RuleTarget,
    status_code: u16,
    forward_body: bool,
    hostname_restriction: Option<String>,
}

impl From<&MappingRule> for RuleKey {
    fn from(rule: &MappingRule) -> Self {
        let rule = prepare_rule(rule.clone());
        Self {
            pattern_type: rule.pattern_type,
            pattern: rule.pattern,
            includes_hostname: rule.includes_hostname,
            priority: rule.priority,
            target: rule.target,
            status_code: rule.status_code,
            forward_body: rule.forward_body,
            hostname_restriction: rule.hostname_restriction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_equivalent_rules() {
        let mut rules = vec![
            MappingRule::link("/Old/Page/", "new").with_id(3),
            MappingRule::link("old/page", "/new/").with_id(7),
            MappingRule::link("old/page", "new").with_priority(2),
            MappingRule::regex("^old/page$", "new"),
        ];

        let stats = optimize_rules(&mut rules);
        assert_eq!(stats.before, 4);
        assert_eq!(stats.after, 3);
        assert_eq!(stats.deduped, 1);
        assert_eq!(rules[0].id, 3);
    }
}
