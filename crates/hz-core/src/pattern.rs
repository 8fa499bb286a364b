//! Plain-text URL patterns
//!
//! Compiles AdBlock-style patterns into predicates over URL strings:
//!
//! - `||example.com/a` anchors to a domain boundary (host equals the domain
//!   or ends with `.example.com`), the rest must follow the host directly
//! - `|https://` anchors to the start of the URL and matches whole tokens
//! - `^` matches a separator character or the end of the URL
//! - `*` matches any span
//!
//! Matching runs once per rule per hovered element, so every pattern is
//! tiered: domain check, then a literal pre-screen, and only then a regex.

use regex::Regex;

use crate::url::{get_host_position, host_matches_domain, is_at_separator};

/// Error type for pattern compilation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,
    #[error("invalid pattern '{pattern}': {reason}")]
    Invalid { pattern: String, reason: String },
}

/// Regex fragment equivalent to a `^` separator.
const SEPARATOR_CLASS: &str = r"(?:[^A-Za-z0-9%._\-]|$)";

// =============================================================================
// Compiled Pattern
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    None,
    Start,
    Host,
}

#[derive(Debug, Clone)]
enum Body {
    /// Nothing left to check after the anchor.
    Empty,
    /// One literal, optionally followed by a separator.
    Literal {
        text: String,
        separator_after: bool,
        end_anchor: bool,
    },
    /// Wildcards present: full regex test, pre-screened by `prescreen`.
    Regex { re: Regex, prescreen: String },
}

/// A single compiled pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    anchor: Anchor,
    domain: String,
    body: Body,
}

impl Pattern {
    /// Compile one pattern.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let source = pattern.to_string();
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let (anchor, rest) = if let Some(rest) = pattern.strip_prefix("||") {
            (Anchor::Host, rest)
        } else if let Some(rest) = pattern.strip_prefix('|') {
            (Anchor::Start, rest)
        } else {
            (Anchor::None, pattern)
        };

        let (domain, rest) = if anchor == Anchor::Host {
            let end = rest
                .find(|c: char| matches!(c, '/' | '^' | '*' | ':' | '?' | '|'))
                .unwrap_or(rest.len());
            (rest[..end].to_ascii_lowercase(), &rest[end..])
        } else {
            (String::new(), rest)
        };

        if anchor == Anchor::Host && domain.is_empty() {
            return Err(PatternError::Invalid {
                pattern: source,
                reason: "missing domain after '||'".to_string(),
            });
        }

        let (rest, end_anchor) = match rest.strip_suffix('|') {
            Some(stripped) => (stripped, true),
            None => (rest, false),
        };

        let body = compile_body(rest, anchor != Anchor::None, end_anchor, &source)?;

        Ok(Self {
            source,
            anchor,
            domain,
            body,
        })
    }

    /// The pattern text this was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Test a URL against the pattern.
    pub fn matches(&self, url: &str) -> bool {
        let subject = match self.anchor {
            Anchor::Host => {
                let (host_start, host_end) = match get_host_position(url) {
                    Some(pos) => pos,
                    None => return false,
                };
                if !host_matches_domain(&url[host_start..host_end], &self.domain) {
                    return false;
                }
                &url[host_end..]
            }
            _ => url,
        };
        let anchored = self.anchor != Anchor::None;

        match &self.body {
            Body::Empty => true,
            Body::Literal {
                text,
                separator_after,
                end_anchor,
            } => {
                let accept = |end: usize| {
                    (!*separator_after || is_at_separator(subject, end))
                        && (!*end_anchor || end == subject.len())
                        && (self.anchor != Anchor::Start || ends_token(subject, text, end))
                };
                if anchored {
                    subject.starts_with(text.as_str()) && accept(text.len())
                } else if !*separator_after && !*end_anchor {
                    subject.contains(text.as_str())
                } else {
                    subject
                        .match_indices(text.as_str())
                        .any(|(pos, _)| accept(pos + text.len()))
                }
            }
            Body::Regex { re, prescreen } => {
                if !prescreen.is_empty() && !subject.contains(prescreen.as_str()) {
                    return false;
                }
                re.is_match(subject)
            }
        }
    }
}

/// A start-anchored bare scheme (`|http`) names the whole scheme, so it must
/// not stop in the middle of a longer one. Any other start-anchored literal
/// is a plain prefix.
fn ends_token(subject: &str, text: &str, end: usize) -> bool {
    if !is_bare_scheme(text) || end >= subject.len() {
        return true;
    }
    !subject.as_bytes()[end].is_ascii_alphanumeric()
}

fn is_bare_scheme(text: &str) -> bool {
    let mut bytes = text.bytes();
    bytes.next().map_or(false, |b| b.is_ascii_alphabetic())
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
}

fn compile_body(rest: &str, anchored: bool, end_anchor: bool, source: &str) -> Result<Body, PatternError> {
    if rest.is_empty() {
        return Ok(if end_anchor {
            Body::Literal {
                text: String::new(),
                separator_after: false,
                end_anchor,
            }
        } else {
            Body::Empty
        });
    }

    // Only a trailing '^' and no wildcards: stay on the literal path.
    let (literal, separator_after) = match rest.strip_suffix('^') {
        Some(head) => (head, true),
        None => (rest, false),
    };
    if !literal.contains(['^', '*']) {
        return Ok(Body::Literal {
            text: literal.to_string(),
            separator_after,
            end_anchor,
        });
    }

    let mut expr = String::with_capacity(rest.len() * 2);
    if anchored {
        expr.push_str(r"\A");
    }
    let mut prescreen = "";
    for (idx, segment) in rest.split(['^', '*']).enumerate() {
        if idx > 0 {
            // The delimiter sits right before this segment.
            let delim_pos = rest_delimiter_position(rest, idx);
            expr.push_str(if rest.as_bytes()[delim_pos] == b'^' {
                SEPARATOR_CLASS
            } else {
                ".*"
            });
        }
        if segment.len() > prescreen.len() {
            prescreen = segment;
        }
        expr.push_str(&regex::escape(segment));
    }
    if end_anchor {
        expr.push_str(r"\z");
    }

    let re = Regex::new(&expr).map_err(|e| PatternError::Invalid {
        pattern: source.to_string(),
        reason: e.to_string(),
    })?;

    Ok(Body::Regex {
        re,
        prescreen: prescreen.to_string(),
    })
}

/// Byte offset of the `n`-th wildcard delimiter (1-based) in `rest`.
fn rest_delimiter_position(rest: &str, n: usize) -> usize {
    rest.match_indices(['^', '*'])
        .nth(n - 1)
        .map(|(pos, _)| pos)
        .unwrap_or(rest.len())
}

// =============================================================================
// Pattern Set
// =============================================================================

/// A disjunction of patterns: matches if any member matches.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    /// Compile a list of patterns.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PatternError> {
        let patterns = patterns
            .iter()
            .map(|p| Pattern::compile(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if patterns.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(Self { patterns })
    }

    /// Test a URL against every pattern.
    #[inline]
    pub fn matches(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(url))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
