//! Ordered rule set with a lazily filled compiled-rule cache
//!
//! Order is fixed at construction: custom rules, then disabling rules, then
//! domain-scoped rules for the current page host, then generic rules.
//! [`RuleId`] is the position in that order.
//!
//! Each rule is compiled on first use and the result (including a failure)
//! is cached for the lifetime of the set.

use std::sync::OnceLock;

use log::warn;

use crate::native::FunctionTable;
use crate::rule::{CompiledRule, HostRule, RuleDiagnostic, RuleError};
use crate::types::RuleId;

/// Where a rule sits in the evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleClass {
    Custom,
    Disabling,
    DomainScoped,
    Generic,
}

impl RuleClass {
    fn of_builtin(rule: &HostRule) -> Self {
        if rule.is_disabling() {
            RuleClass::Disabling
        } else if rule.d.is_some() {
            RuleClass::DomainScoped
        } else {
            RuleClass::Generic
        }
    }
}

struct Entry {
    rule: HostRule,
    class: RuleClass,
    /// Index in the list the rule came from, for diagnostics.
    source_index: usize,
    compiled: OnceLock<Result<CompiledRule, RuleError>>,
}

/// The ordered rules for one page.
pub struct RuleSet {
    entries: Vec<Entry>,
    table: FunctionTable,
}

impl RuleSet {
    /// Order `custom` and `builtin` rules for a page on `page_host`. Rules
    /// with a `d` scope that does not cover the host are left out.
    pub fn new(custom: Vec<HostRule>, builtin: Vec<HostRule>, page_host: Option<&str>, table: FunctionTable) -> Self {
        let mut entries: Vec<Entry> = custom
            .into_iter()
            .enumerate()
            .map(|(i, rule)| (i, rule, RuleClass::Custom))
            .chain(builtin.into_iter().enumerate().map(|(i, rule)| {
                let class = RuleClass::of_builtin(&rule);
                (i, rule, class)
            }))
            .filter(|(_, rule, _)| rule.applies_to_host(page_host))
            .map(|(source_index, rule, class)| Entry {
                rule,
                class,
                source_index,
                compiled: OnceLock::new(),
            })
            .collect();

        // Stable: keeps list order within a class.
        entries.sort_by_key(|e| e.class);

        Self { entries, table }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = RuleId> {
        (0..self.entries.len()).map(RuleId)
    }

    pub fn rule(&self, id: RuleId) -> Option<&HostRule> {
        self.entries.get(id.0).map(|e| &e.rule)
    }

    pub fn class(&self, id: RuleId) -> Option<RuleClass> {
        self.entries.get(id.0).map(|e| e.class)
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.table
    }

    /// The compiled form of a rule, compiling it on first access.
    pub fn compiled(&self, id: RuleId) -> Option<&Result<CompiledRule, RuleError>> {
        let entry = self.entries.get(id.0)?;
        Some(entry.compiled.get_or_init(|| {
            let result = CompiledRule::compile(&entry.rule, &self.table);
            if let Err(e) = &result {
                warn!("rule {} ({}) excluded: {}", id.0, entry.rule.label(), e);
            }
            result
        }))
    }

    /// Compile every rule and report the ones that failed.
    pub fn diagnostics(&self) -> Vec<RuleDiagnostic> {
        self.ids()
            .filter_map(|id| match self.compiled(id) {
                Some(Err(e)) => {
                    let entry = &self.entries[id.0];
                    Some(RuleDiagnostic {
                        index: entry.source_index,
                        name: entry.rule.name.clone(),
                        error: e.to_string(),
                    })
                }
                _ => None,
            })
            .collect()
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleSet")
            .field("rules", &self.entries.len())
            .field("functions", &self.table)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(json: &str) -> HostRule {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn orders_by_class() {
        let builtin = vec![
            rule(r#"{"name": "generic", "r": "x"}"#),
            rule(r#"{"name": "scoped", "d": "example.com", "r": "x"}"#),
            rule(r#"{"name": "off", "u": "||ads.example", "s": ""}"#),
            rule(r#"{"name": "elsewhere", "d": "other.org", "r": "x"}"#),
        ];
        let custom = vec![rule(r#"{"name": "mine", "r": "x"}"#)];
        let set = RuleSet::new(custom, builtin, Some("www.example.com"), FunctionTable::default());

        let names: Vec<_> = set
            .ids()
            .map(|id| set.rule(id).unwrap().name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["mine", "off", "scoped", "generic"]);
        assert_eq!(set.class(RuleId(1)), Some(RuleClass::Disabling));
    }

    #[test]
    fn compiles_lazily_and_caches() {
        let set = RuleSet::new(vec![rule(r#"{"r": "a(b"}"#)], vec![], None, FunctionTable::default());
        let first = set.compiled(RuleId(0)).unwrap();
        let second = set.compiled(RuleId(0)).unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(first.is_err());
        assert!(set.compiled(RuleId(1)).is_none());
    }

    #[test]
    fn diagnostics_keep_valid_rules() {
        let custom = vec![
            rule(r#"{"name": "ok", "r": "x", "s": "$0"}"#),
            rule(r#"{"name": "bad", "r": "("}"#),
        ];
        let set = RuleSet::new(custom, vec![], None, FunctionTable::default());
        let diags = set.diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].index, 1);
        assert_eq!(diags[0].name.as_deref(), Some("bad"));
        assert!(set.compiled(RuleId(0)).unwrap().is_ok());
    }
}
