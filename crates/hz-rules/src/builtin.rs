//! Built-in rule list and rule set assembly.

use std::sync::OnceLock;

use hz_core::rule::{HostRule, RuleDiagnostic};
use hz_core::rules::RuleSet;
use log::{debug, warn};

use crate::natives::builtin_functions;
use crate::optimizer::optimize_rules;
use crate::parser::import_rules;

const BUILTIN_RULES: &str = include_str!("../rules/builtin.json");

/// The shipped rules, parsed once.
pub fn builtin_rules() -> &'static [HostRule] {
    static RULES: OnceLock<Vec<HostRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let report = import_rules(BUILTIN_RULES, &builtin_functions());
        for diagnostic in &report.diagnostics {
            warn!("built-in {}", diagnostic);
        }
        report.rules
    })
}

/// A rule set ready for matching plus the problems found in the custom rules.
pub struct LoadedRules {
    pub rules: RuleSet,
    pub diagnostics: Vec<RuleDiagnostic>,
}

/// Build the ordered rule set for a page: custom rules from `custom_json`
/// ahead of the built-in list, domain-scoped rules filtered by `page_host`.
pub fn load_rule_set(custom_json: &str, page_host: Option<&str>) -> LoadedRules {
    let table = builtin_functions();
    let mut report = import_rules(custom_json, &table);
    let stats = optimize_rules(&mut report.rules);
    debug!(
        "custom rules: {} -> {} ({} duplicates, {} no-ops)",
        stats.before, stats.after, stats.deduped, stats.noop_rules
    );

    LoadedRules {
        rules: RuleSet::new(report.rules, builtin_rules().to_vec(), page_host, table),
        diagnostics: report.diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hz_core::matcher::{FindOptions, RuleMatcher};
    use hz_core::types::MatchResult;

    fn find(set: &RuleSet, url: &str) -> Option<MatchResult> {
        RuleMatcher::new(set).find(url, None, &FindOptions::default())
    }

    fn label(set: &RuleSet, result: &MatchResult) -> String {
        set.rule(result.rule).map(|r| r.label()).unwrap_or_default()
    }

    #[test]
    fn test_builtin_rules_compile() {
        let report = import_rules(BUILTIN_RULES, &builtin_functions());
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
        assert_eq!(builtin_rules().len(), report.rules.len());
    }

    #[test]
    fn test_youtube_alternatives() {
        let loaded = load_rule_set("", None);
        let result = find(&loaded.rules, "https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        assert_eq!(result.url, "https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg");
        assert_eq!(result.fallback, vec!["https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg"]);
    }

    #[test]
    fn test_domain_scoped_by_page_host() {
        let thumb = "https://upload.wikimedia.org/wikipedia/commons/thumb/a/ab/Cat.jpg/220px-Cat.jpg";

        let on_wiki = load_rule_set("", Some("en.wikipedia.org"));
        let result = find(&on_wiki.rules, thumb).unwrap();
        assert_eq!(result.url, "https://upload.wikimedia.org/wikipedia/commons/a/ab/Cat.jpg");

        let elsewhere = load_rule_set("", Some("example.com"));
        let result = find(&elsewhere.rules, thumb);
        assert!(result.map_or(true, |r| label(&elsewhere.rules, &r) != "wikimedia thumbnails"));
    }

    #[test]
    fn test_disabling_rule_suppresses() {
        let loaded = load_rule_set("", None);
        let result = find(&loaded.rules, "https://shop.example/track/123").unwrap();
        assert!(result.is_suppressed());
    }

    #[test]
    fn test_custom_rules_first() {
        let custom = r#"[{"name": "mine", "r": "youtube\\.com/watch", "s": "https://mirror.example/thumb.jpg"}, {"r": "("}]"#;
        let loaded = load_rule_set(custom, None);
        assert_eq!(loaded.diagnostics.len(), 1);
        assert_eq!(loaded.diagnostics[0].index, 1);

        let result = find(&loaded.rules, "https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        assert_eq!(result.url, "https://mirror.example/thumb.jpg");
        assert_eq!(label(&loaded.rules, &result), "mine");
    }

    #[test]
    fn test_native_and_expression_rules() {
        let loaded = load_rule_set("", None);
        let flickr = find(&loaded.rules, "https://live.staticflickr.com/65535/123_abc_m.jpg").unwrap();
        assert_eq!(flickr.url, "https://live.staticflickr.com/65535/123_abc_b.jpg");
        assert_eq!(flickr.fallback.len(), 3);

        let dropbox = find(&loaded.rules, "https://www.dropbox.com/s/xyz/cat.jpg?dl=0").unwrap();
        assert_eq!(dropbox.url, "https://www.dropbox.com/s/xyz/cat.jpg?raw=1");
    }
}
