use std::collections::HashSet;

use hz_core::rule::HostRule;

pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
    pub noop_rules: usize,
}

/// Drop rules that can never apply and exact duplicates, keeping the first
/// occurrence so evaluation order is unchanged.
pub fn optimize_rules(rules: &mut Vec<HostRule>) -> OptimizeStats {
    let before = rules.len();

    let mut noop_rules = 0usize;
    rules.retain(|rule| {
        if is_noop(rule) {
            noop_rules += 1;
            false
        } else {
            true
        }
    });

    let mut seen: HashSet<String> = HashSet::new();
    let mut deduped = 0usize;
    rules.retain(|rule| {
        let key = rule_key(rule);
        if seen.contains(&key) {
            deduped += 1;
            false
        } else {
            seen.insert(key);
            true
        }
    });

    let after = rules.len();

    OptimizeStats {
        before,
        after,
        deduped,
        noop_rules,
    }
}

/// An empty `d` scopes the rule to no page at all.
fn is_noop(rule: &HostRule) -> bool {
    matches!(rule.d.as_deref(), Some(d) if d.trim().is_empty())
}

/// Identity of a rule for deduplication; the name is not part of it.
fn rule_key(rule: &HostRule) -> String {
    let unnamed = HostRule {
        name: None,
        ..rule.clone()
    };
    serde_json::to_string(&unnamed).unwrap_or_default()
}
