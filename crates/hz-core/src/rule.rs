//! Rule schema and compiled rules
//!
//! [`HostRule`] is the persisted shape (one object of the JSON rule list).
//! [`CompiledRule`] is what the matcher runs: selectors parsed, patterns and
//! regexes compiled, expressions parsed, native references resolved.
//! A rule compiles once and is immutable afterwards.

use std::collections::BTreeMap;

use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};

use crate::dom::{parse_selector, Node};
use crate::expr::{is_expression, ExprError, Program};
use crate::gallery::GalleryDirective;
use crate::native::FunctionTable;
use crate::pattern::{PatternError, PatternSet};
use crate::substitute::Substitution;
use crate::url::host_matches_domain;

// =============================================================================
// Schema
// =============================================================================

/// Element selector field `e`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorSpec {
    One(String),
    Many(Vec<String>),
    /// Named selectors; the names only appear in diagnostics.
    Named(BTreeMap<String, String>),
}

impl SelectorSpec {
    pub fn selectors(&self) -> Vec<&str> {
        match self {
            SelectorSpec::One(s) => vec![s.as_str()],
            SelectorSpec::Many(list) => list.iter().map(String::as_str).collect(),
            SelectorSpec::Named(map) => map.values().map(String::as_str).collect(),
        }
    }
}

/// A string or a list of strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn as_slice(&self) -> &[String] {
        match self {
            OneOrMany::One(s) => std::slice::from_ref(s),
            OneOrMany::Many(list) => list,
        }
    }
}

/// Reference to a function registered in a [`FunctionTable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NativeRef {
    pub native: String,
}

/// Value of a field that may hold a literal, a list, a flag, an expression
/// (a string containing `return`) or a native reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Directive {
    Flag(bool),
    Text(String),
    List(Vec<String>),
    Native(NativeRef),
}

/// Declarative gallery descriptor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GalleryDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<OneOrMany>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

/// Gallery field `g`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GallerySpec {
    Code(String),
    Native(NativeRef),
    Descriptor(GalleryDescriptor),
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One declarative rule as stored in the rule list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Page-host scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<SelectorSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub u: Option<OneOrMany>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<Directive>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q: Option<Directive>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c: Option<Directive>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub g: Option<GallerySpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow: Option<Directive>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post: Option<Directive>,
    #[serde(skip_serializing_if = "is_false")]
    pub html: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub manual: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub xhr: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub anonymous: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub tabfix: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
}

impl HostRule {
    /// Label used in diagnostics and console output.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match (&self.d, &self.r, &self.u) {
            (Some(d), _, _) => d.clone(),
            (None, Some(r), _) => r.clone(),
            (None, None, Some(u)) => u.as_slice().join(" "),
            _ => "<unnamed>".to_string(),
        }
    }

    /// A rule whose substitution is the literal empty string: it matches only
    /// to suppress popups.
    pub fn is_disabling(&self) -> bool {
        matches!(&self.s, Some(Directive::Text(s)) if s.is_empty())
    }

    /// Whether the rule applies on a page served from `page_host`.
    pub fn applies_to_host(&self, page_host: Option<&str>) -> bool {
        match (&self.d, page_host) {
            (None, _) => true,
            (Some(d), Some(host)) => host_matches_domain(host, d),
            (Some(_), None) => false,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Rule-definition error. Reported per rule; the rule is excluded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("malformed rule: {0}")]
    Json(String),
    #[error("invalid regex '{pattern}': {reason}")]
    Regex { pattern: String, reason: String },
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },
    #[error("invalid expression in '{field}': {source}")]
    Expr {
        field: &'static str,
        #[source]
        source: ExprError,
    },
    #[error("unknown native function '{0}'")]
    UnknownNative(String),
    #[error("'{field}' does not accept {what}")]
    Unsupported { field: &'static str, what: &'static str },
}

/// A rule that failed to import or compile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleDiagnostic {
    /// Position in the imported list.
    pub index: usize,
    pub name: Option<String>,
    pub error: String,
}

impl std::fmt::Display for RuleDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "rule #{} ({}): {}", self.index, name, self.error),
            None => write!(f, "rule #{}: {}", self.index, self.error),
        }
    }
}

// =============================================================================
// Compiled Rule
// =============================================================================

bitflags::bitflags! {
    /// Boolean switches of a compiled rule.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RuleFlags: u8 {
        /// Match `r` against the node's markup
        const HTML = 1 << 0;
        /// Only on forced activation
        const MANUAL = 1 << 1;
        /// Load assets through a same-origin fetch
        const XHR = 1 << 2;
        /// No credentials, no referer
        const ANONYMOUS = 1 << 3;
        /// Video/tab display fix
        const TABFIX = 1 << 4;
    }
}

/// Remote extractor `q` or caption extractor `c`.
#[derive(Debug, Clone)]
pub enum Extractor {
    /// Tried in order; the first node that yields a value wins.
    Selectors(Vec<Selector>),
    Expr(Program),
}

/// When to re-resolve a substituted URL.
#[derive(Debug, Clone, Default)]
pub enum Follow {
    #[default]
    Never,
    Always,
    /// Truthy result means follow.
    Expr(Program),
}

/// How remote documents are requested.
#[derive(Debug, Clone, Default)]
pub enum Post {
    #[default]
    Get,
    /// POST with an empty body.
    Empty,
    /// POST with a `$n` template body.
    Template(String),
    /// POST with a computed body; falsy means GET.
    Expr(Program),
}

/// The executable form of a [`HostRule`].
#[derive(Debug)]
pub struct CompiledRule {
    pub name: String,
    pub selectors: Vec<Selector>,
    pub pattern: Option<PatternSet>,
    pub regex: Option<Regex>,
    pub substitution: Option<Substitution>,
    pub extractor: Option<Extractor>,
    pub caption: Option<Extractor>,
    pub gallery: Option<GalleryDirective>,
    pub follow: Follow,
    pub post: Post,
    pub flags: RuleFlags,
    pub rect: Option<String>,
    pub css: Option<String>,
}

impl CompiledRule {
    /// Compile a rule, resolving native references through `table`.
    pub fn compile(rule: &HostRule, table: &FunctionTable) -> Result<Self, RuleError> {
        let selectors = match &rule.e {
            Some(spec) => spec
                .selectors()
                .into_iter()
                .map(compile_selector)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let pattern = match &rule.u {
            Some(u) => Some(PatternSet::compile(u.as_slice())?),
            None => None,
        };

        let regex = match &rule.r {
            Some(r) => Some(Regex::new(r).map_err(|e| RuleError::Regex {
                pattern: r.clone(),
                reason: e.to_string(),
            })?),
            None => None,
        };

        let substitution = match &rule.s {
            Some(s) => Some(Substitution::compile(s, table)?),
            None => None,
        };

        let extractor = rule.q.as_ref().map(|q| compile_extractor(q, "q")).transpose()?;
        let caption = rule.c.as_ref().map(|c| compile_extractor(c, "c")).transpose()?;
        let gallery = rule
            .g
            .as_ref()
            .map(|g| GalleryDirective::compile(g, table))
            .transpose()?;

        let follow = match &rule.follow {
            None | Some(Directive::Flag(false)) => Follow::Never,
            Some(Directive::Flag(true)) => Follow::Always,
            Some(Directive::Text(src)) if is_expression(src) => Follow::Expr(parse_expr(src, "follow")?),
            Some(_) => {
                return Err(RuleError::Unsupported {
                    field: "follow",
                    what: "this value",
                })
            }
        };

        let post = match &rule.post {
            None | Some(Directive::Flag(false)) => Post::Get,
            Some(Directive::Flag(true)) => Post::Empty,
            Some(Directive::Text(src)) if is_expression(src) => Post::Expr(parse_expr(src, "post")?),
            Some(Directive::Text(body)) => Post::Template(body.clone()),
            Some(_) => {
                return Err(RuleError::Unsupported {
                    field: "post",
                    what: "lists or native functions",
                })
            }
        };

        let mut flags = RuleFlags::empty();
        flags.set(RuleFlags::HTML, rule.html);
        flags.set(RuleFlags::MANUAL, rule.manual);
        flags.set(RuleFlags::XHR, rule.xhr);
        flags.set(RuleFlags::ANONYMOUS, rule.anonymous);
        flags.set(RuleFlags::TABFIX, rule.tabfix);

        Ok(Self {
            name: rule.label(),
            selectors,
            pattern,
            regex,
            substitution,
            extractor,
            caption,
            gallery,
            follow,
            post,
            flags,
            rect: rule.rect.clone(),
            css: rule.css.clone(),
        })
    }

    /// True when the rule has no `e`, or `node` matches one of its selectors.
    pub fn selects(&self, node: Option<&dyn Node>) -> bool {
        if self.selectors.is_empty() {
            return true;
        }
        match node {
            Some(node) => self.selectors.iter().any(|s| node.matches(s)),
            None => false,
        }
    }
}

pub(crate) fn compile_selector(selector: &str) -> Result<Selector, RuleError> {
    parse_selector(selector).map_err(|reason| RuleError::Selector {
        selector: selector.to_string(),
        reason,
    })
}

pub(crate) fn parse_expr(source: &str, field: &'static str) -> Result<Program, RuleError> {
    Program::parse(source).map_err(|source| RuleError::Expr { field, source })
}

fn compile_extractor(directive: &Directive, field: &'static str) -> Result<Extractor, RuleError> {
    match directive {
        Directive::Text(src) if is_expression(src) => Ok(Extractor::Expr(parse_expr(src, field)?)),
        Directive::Text(selector) => Ok(Extractor::Selectors(vec![compile_selector(selector)?])),
        Directive::List(list) => Ok(Extractor::Selectors(
            list.iter()
                .map(|s| compile_selector(s))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Directive::Flag(_) => Err(RuleError::Unsupported { field, what: "booleans" }),
        Directive::Native(_) => Err(RuleError::Unsupported {
            field,
            what: "native functions",
        }),
    }
}
