//! Substitution: turning a match into candidate URLs
//!
//! Forms of the `s` field:
//!
//! - `"$1.jpg"`: capture template (`$n`, `$&`, `$$`)
//! - `"/_thumb//g"`: regex replace applied to the matched input
//! - `["$1.webp", "$1.jpg"]`: alternatives, tried in order by the controller
//! - `"return ..."`: transform expression
//! - `{"native": "name"}`: registered function
//!
//! The result is an [`Outcome`]: candidate URLs, or one of the three falsy
//! signals.

use log::warn;

use crate::dom::Node;
use crate::expr::{
    compile_regex, expand_captures, is_expression, regex_replace, Program, RegexLiteral, Scope, Value,
};
use crate::native::{FunctionTable, NativeFn, NativeSubstitution};
use crate::rule::{parse_expr, Directive, RuleError};
use crate::types::RuleId;

/// Result of applying a substitution.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// One or more candidates; the first is primary.
    Urls(Vec<String>),
    /// `false`: the rule does not apply, keep searching.
    Skip,
    /// `""`: matched but suppressed.
    Suppress,
    /// Any other falsy value: stop evaluating rules.
    Stop,
}

/// What a substitution sees.
pub struct SubstInput<'a> {
    /// The string the rule matched (URL or node markup).
    pub input: &'a str,
    pub url: &'a str,
    pub captures: &'a [Option<String>],
    pub node: Option<&'a dyn Node>,
    pub rule: RuleId,
}

/// Compiled `s` field.
#[derive(Debug)]
pub enum Substitution {
    Template(String),
    Replace { re: RegexLiteral, replacement: String },
    Alternatives(Vec<Substitution>),
    Expr(Program),
    Native(NativeFn<NativeSubstitution>),
}

impl Substitution {
    pub fn compile(directive: &Directive, table: &FunctionTable) -> Result<Self, RuleError> {
        match directive {
            Directive::Text(text) => compile_text(text),
            Directive::List(list) => Ok(Substitution::Alternatives(
                list.iter().map(|s| compile_text(s)).collect::<Result<_, _>>()?,
            )),
            Directive::Native(native) => Ok(Substitution::Native(table.substitution(&native.native)?)),
            Directive::Flag(_) => Err(RuleError::Unsupported {
                field: "s",
                what: "booleans",
            }),
        }
    }

    /// Produce candidates for one match.
    pub fn apply(&self, input: &SubstInput<'_>) -> Outcome {
        match self {
            Substitution::Template(template) => {
                let groups: Vec<Option<&str>> = input.captures.iter().map(|c| c.as_deref()).collect();
                text_outcome(expand_captures(template, &groups))
            }
            Substitution::Replace { re, replacement } => {
                text_outcome(regex_replace(input.input, re, replacement))
            }
            Substitution::Alternatives(list) => {
                let urls: Vec<String> = list
                    .iter()
                    .filter_map(|alt| match alt.apply(input) {
                        Outcome::Urls(urls) => Some(urls),
                        _ => None,
                    })
                    .flatten()
                    .collect();
                if urls.is_empty() {
                    Outcome::Suppress
                } else {
                    Outcome::Urls(urls)
                }
            }
            Substitution::Expr(program) => {
                let scope = Scope::new(input.url)
                    .with_captures(input.captures)
                    .with_node(input.node);
                match program.eval(&scope) {
                    Ok(value) => value_outcome(value, input.url),
                    Err(e) => {
                        warn!("substitution of rule {:?} failed: {}", input.rule, e);
                        Outcome::Skip
                    }
                }
            }
            Substitution::Native(native) => (native.get())(input),
        }
    }
}

fn compile_text(text: &str) -> Result<Substitution, RuleError> {
    if is_expression(text) {
        return Ok(Substitution::Expr(parse_expr(text, "s")?));
    }
    if let Some((pattern, replacement, flags)) = split_slash_expression(text) {
        let re = compile_regex(pattern, flags).map_err(|reason| RuleError::Regex {
            pattern: pattern.to_string(),
            reason,
        })?;
        return Ok(Substitution::Replace {
            re,
            replacement: replacement.to_string(),
        });
    }
    Ok(Substitution::Template(text.to_string()))
}

/// Split `/pattern/replacement/flags` on unescaped slashes.
fn split_slash_expression(text: &str) -> Option<(&str, &str, &str)> {
    let body = text.strip_prefix('/')?;
    let bytes = body.as_bytes();
    let mut cuts = Vec::with_capacity(2);
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'/' => cuts.push(i),
            _ => {}
        }
        i += 1;
    }
    if cuts.len() != 2 {
        return None;
    }
    let flags = &body[cuts[1] + 1..];
    if !flags.chars().all(|c| matches!(c, 'g' | 'i' | 'm' | 's' | 'u' | 'y')) {
        return None;
    }
    Some((&body[..cuts[0]], &body[cuts[0] + 1..cuts[1]], flags))
}

fn text_outcome(text: String) -> Outcome {
    if text.is_empty() {
        Outcome::Suppress
    } else {
        Outcome::Urls(vec![text])
    }
}

/// Map an expression result onto the substitution signals. `true` keeps
/// the matched `url`.
pub fn value_outcome(value: Value, url: &str) -> Outcome {
    match value {
        Value::Bool(false) => Outcome::Skip,
        Value::Bool(true) if url.is_empty() => Outcome::Skip,
        Value::Bool(true) => Outcome::Urls(vec![url.to_string()]),
        Value::Str(s) => text_outcome(s),
        Value::List(items) => {
            let urls: Vec<String> = items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Str(s) if !s.is_empty() => Some(s),
                    _ => None,
                })
                .collect();
            if urls.is_empty() {
                Outcome::Suppress
            } else {
                Outcome::Urls(urls)
            }
        }
        other if !other.truthy() => Outcome::Stop,
        other => text_outcome(other.to_text()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(s: Directive, input: &str, captures: &[&str]) -> Outcome {
        let sub = Substitution::compile(&s, &FunctionTable::default()).expect("compiles");
        let captures: Vec<Option<String>> = captures.iter().map(|c| Some(c.to_string())).collect();
        sub.apply(&SubstInput {
            input,
            url: input,
            captures: &captures,
            node: None,
            rule: RuleId(0),
        })
    }

    fn text(s: &str) -> Directive {
        Directive::Text(s.to_string())
    }

    #[test]
    fn template_uses_captures() {
        assert_eq!(
            apply(text("$1.jpg"), "x/abc_t.jpg", &["abc_t.jpg", "abc"]),
            Outcome::Urls(vec!["abc.jpg".to_string()])
        );
    }

    #[test]
    fn slash_expression_rewrites_input() {
        assert_eq!(
            apply(text("/_thumb//"), "http://img.example/photo_thumb.jpg", &["_thumb.jpg"]),
            Outcome::Urls(vec!["http://img.example/photo.jpg".to_string()])
        );
        assert_eq!(
            apply(text("/A/b/gi"), "aXa", &["aXa"]),
            Outcome::Urls(vec!["bXb".to_string()])
        );
    }

    #[test]
    fn escaped_slash_stays_in_pattern() {
        assert_eq!(split_slash_expression(r"/a\/b/c/"), Some((r"a\/b", "c", "")));
        assert_eq!(split_slash_expression("/only/two"), None);
        assert_eq!(split_slash_expression("/a/b/xyz"), None);
    }

    #[test]
    fn falsy_signals() {
        assert_eq!(apply(text(""), "u", &["u"]), Outcome::Suppress);
        assert_eq!(apply(text("return false"), "u", &["u"]), Outcome::Skip);
        assert_eq!(apply(text("return ''"), "u", &["u"]), Outcome::Suppress);
        assert_eq!(apply(text("return null"), "u", &["u"]), Outcome::Stop);
        assert_eq!(apply(text("return 0"), "u", &["u"]), Outcome::Stop);
    }

    #[test]
    fn true_keeps_matched_url() {
        assert_eq!(
            apply(text("return true"), "https://x/a.jpg", &["https://x/a.jpg"]),
            Outcome::Urls(vec!["https://x/a.jpg".to_string()])
        );
        assert_eq!(apply(text("return true"), "", &[""]), Outcome::Skip);
    }

    #[test]
    fn alternatives_drop_empties() {
        let list = Directive::List(vec!["$1.webp".into(), "$2".into(), "$1.jpg".into()]);
        assert_eq!(
            apply(list, "u", &["u", "p", ""]),
            Outcome::Urls(vec!["p.webp".to_string(), "p.jpg".to_string()])
        );
    }

    #[test]
    fn expression_errors_decline() {
        assert_eq!(apply(text("return nope.length"), "u", &["u"]), Outcome::Skip);
    }
}
