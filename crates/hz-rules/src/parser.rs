//! JSON rule list import and export.

use hz_core::native::FunctionTable;
use hz_core::rule::{CompiledRule, HostRule, RuleDiagnostic, RuleError};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

/// Outcome of importing a rule list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    /// Valid rules in list order.
    pub rules: Vec<HostRule>,
    /// One entry per rejected rule.
    pub diagnostics: Vec<RuleDiagnostic>,
}

/// Parse a JSON array of rules. Invalid entries are reported and skipped;
/// the valid ones are kept. A blank document is an empty list.
pub fn import_rules(json: &str, table: &FunctionTable) -> ImportReport {
    let mut report = ImportReport::default();
    if json.trim().is_empty() {
        return report;
    }

    let entries = match serde_json::from_str::<Value>(json) {
        Ok(Value::Array(entries)) => entries,
        Ok(_) => {
            report.diagnostics.push(list_error("rule list must be a JSON array"));
            return report;
        }
        Err(e) => {
            report.diagnostics.push(list_error(&format!("malformed rule list: {e}")));
            return report;
        }
    };

    for (index, entry) in entries.into_iter().enumerate() {
        let name = entry.get("name").and_then(Value::as_str).map(str::to_string);
        match import_entry(entry, table) {
            Ok(rule) => report.rules.push(rule),
            Err(error) => {
                let diagnostic = RuleDiagnostic {
                    index,
                    name,
                    error: error.to_string(),
                };
                warn!("{}", diagnostic);
                report.diagnostics.push(diagnostic);
            }
        }
    }

    debug!(
        "imported {} rules, {} rejected",
        report.rules.len(),
        report.diagnostics.len()
    );
    report
}

fn import_entry(entry: Value, table: &FunctionTable) -> Result<HostRule, RuleError> {
    let rule = HostRule::deserialize(entry).map_err(|e| RuleError::Json(e.to_string()))?;
    CompiledRule::compile(&rule, table)?;
    Ok(rule)
}

fn list_error(message: &str) -> RuleDiagnostic {
    RuleDiagnostic {
        index: 0,
        name: None,
        error: message.to_string(),
    }
}

/// Serialize rules back into the list format.
pub fn export_rules(rules: &[HostRule]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_keeps_valid_rules() {
        let json = r#"[
            {"name": "ok", "r": "_thumb\\.jpg$", "s": "/_thumb//"},
            {"name": "bad regex", "r": "("},
            {"name": "bad selector", "e": "a[[", "r": "x"},
            {"name": "bad expr", "r": "x", "s": "return (url"},
            {"name": "bad type", "r": 5},
            {"s": {"native": "missing"}},
            {"r": "y"}
        ]"#;
        let report = import_rules(json, &FunctionTable::default());
        assert_eq!(report.rules.len(), 2);
        assert_eq!(report.rules[0].name.as_deref(), Some("ok"));

        let indices: Vec<usize> = report.diagnostics.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
        assert_eq!(report.diagnostics[0].name.as_deref(), Some("bad regex"));
        assert!(report.diagnostics[4].error.contains("missing"));
        assert_eq!(report.diagnostics[4].name, None);
    }

    #[test]
    fn test_import_rejects_whole_document() {
        let report = import_rules("[{\"r\": ", &FunctionTable::default());
        assert!(report.rules.is_empty());
        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.diagnostics[0].error.starts_with("malformed rule list"));

        let report = import_rules(r#"{"r": "x"}"#, &FunctionTable::default());
        assert_eq!(report.diagnostics.len(), 1);
    }

    #[test]
    fn test_blank_is_empty() {
        assert_eq!(import_rules("  \n", &FunctionTable::default()), ImportReport::default());
    }

    #[test]
    fn test_export_reimports() {
        let json = r#"[{"name": "a", "d": "example.com", "r": "x", "s": ["$&", "b"], "xhr": true}]"#;
        let report = import_rules(json, &FunctionTable::default());
        let exported = export_rules(&report.rules).unwrap();
        assert!(!exported.contains("\"manual\""));
        let again = import_rules(&exported, &FunctionTable::default());
        assert_eq!(again.rules, report.rules);
    }
}
