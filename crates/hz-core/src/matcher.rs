//! Rule matcher
//!
//! Walks the ordered [`RuleSet`] for a hovered node and/or URL and returns
//! the result of the first rule that matches and does not decline.
//!
//! # Algorithm
//!
//! For each rule in order:
//! 1. skip it if listed in `options.skip`, failed to compile, or its `e`
//!    selector does not match the node
//! 2. test `u` against the URL, then `r` against the URL or (HTML mode) the
//!    node's markup, computed once per call
//! 3. skip rules without `s` on direct media elements
//! 4. substitute; `false` continues, `""` suppresses, null stops
//! 5. optionally follow the result through the remaining rules

use std::cell::OnceCell;

use log::{debug, warn};

use crate::dom::{node_url, Document, Node};
use crate::expr::{expand_captures, Scope, Value};
use crate::gallery::{caption_text, GalleryFuture, GalleryInput};
use crate::error::ResolveError;
use crate::rule::{CompiledRule, Extractor, Follow, Post, RuleFlags};
use crate::rules::RuleSet;
use crate::substitute::{Outcome, SubstInput};
use crate::types::{MatchResult, RuleId};
use crate::url::absolutize;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Rules not to consider; grows along a follow chain.
    pub skip: Vec<RuleId>,
}

impl FindOptions {
    pub fn skipping(rule: RuleId) -> Self {
        Self { skip: vec![rule] }
    }
}

enum Found {
    Match(MatchResult),
    Stop,
    Nothing,
}

/// Applies a [`RuleSet`] to nodes and URLs.
#[derive(Debug, Clone, Copy)]
pub struct RuleMatcher<'a> {
    rules: &'a RuleSet,
}

impl<'a> RuleMatcher<'a> {
    pub fn new(rules: &'a RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &'a RuleSet {
        self.rules
    }

    fn compiled(&self, id: RuleId) -> Option<&'a CompiledRule> {
        self.rules.compiled(id).and_then(|r| r.as_ref().ok())
    }

    /// Resolve `url` (may be empty) and/or `node`.
    pub fn find(&self, url: &str, node: Option<&dyn Node>, options: &FindOptions) -> Option<MatchResult> {
        match self.find_inner(url, node, options) {
            Found::Match(result) => Some(result),
            Found::Stop | Found::Nothing => None,
        }
    }

    fn find_inner(&self, url: &str, node: Option<&dyn Node>, options: &FindOptions) -> Found {
        let markup = OnceCell::new();

        for id in self.rules.ids() {
            if options.skip.contains(&id) {
                continue;
            }
            let rule = match self.compiled(id) {
                Some(rule) => rule,
                None => continue,
            };
            if !rule.selects(node) {
                continue;
            }

            if let Some(pattern) = &rule.pattern {
                if !pattern.matches(url) {
                    continue;
                }
            }

            let html_mode = rule.flags.contains(RuleFlags::HTML)
                && node.map_or(false, |n| n.is_link_or_media() || !rule.selectors.is_empty());
            let input: &str = match node {
                Some(n) if html_mode => markup.get_or_init(|| n.outer_html()).as_str(),
                _ => url,
            };

            let captures: Vec<Option<String>> = match &rule.regex {
                Some(re) => match re.captures(input) {
                    Some(caps) => caps.iter().map(|m| m.map(|m| m.as_str().to_string())).collect(),
                    None => continue,
                },
                None if rule.pattern.is_none() && url.is_empty() => continue,
                None => vec![Some(url.to_string())],
            };

            if node.map_or(false, |n| n.is_media()) && rule.substitution.is_none() {
                continue;
            }

            let outcome = match &rule.substitution {
                Some(sub) => sub.apply(&SubstInput {
                    input,
                    url,
                    captures: &captures,
                    node,
                    rule: id,
                }),
                None if url.is_empty() => continue,
                None => Outcome::Urls(vec![url.to_string()]),
            };

            let mut urls = match outcome {
                Outcome::Urls(urls) => urls,
                Outcome::Skip => continue,
                Outcome::Suppress => {
                    debug!("rule {} ({}) suppresses {}", id.0, rule.name, url);
                    return Found::Match(self.package(id, rule, String::new(), Vec::new(), captures, url));
                }
                Outcome::Stop => {
                    debug!("rule {} ({}) stops matching", id.0, rule.name);
                    return Found::Stop;
                }
            };

            if !url.is_empty() {
                for candidate in urls.iter_mut() {
                    if let Some(abs) = absolutize(url, candidate) {
                        *candidate = abs;
                    }
                }
            }

            if urls.len() > 1 && rule.extractor.is_some() {
                warn!("rule {} ({}) has both alternatives and 'q'; ignored", id.0, rule.name);
                continue;
            }

            let primary = urls.remove(0);

            if rule.extractor.is_none() && self.should_follow(rule, &primary, &captures, node) {
                let mut skip = options.skip.clone();
                skip.push(id);
                debug!("rule {} ({}) follows {}", id.0, rule.name, primary);
                if let Found::Match(result) = self.find_inner(&primary, node, &FindOptions { skip }) {
                    return Found::Match(result);
                }
            }

            debug!("rule {} ({}) resolved {} -> {}", id.0, rule.name, url, primary);
            return Found::Match(self.package(id, rule, primary, urls, captures, url));
        }

        Found::Nothing
    }

    fn should_follow(&self, rule: &CompiledRule, resolved: &str, captures: &[Option<String>], node: Option<&dyn Node>) -> bool {
        match &rule.follow {
            Follow::Never => false,
            Follow::Always => true,
            Follow::Expr(program) => {
                let scope = Scope::new(resolved).with_captures(captures).with_node(node);
                match program.eval(&scope) {
                    Ok(value) => value.truthy(),
                    Err(e) => {
                        warn!("follow of rule {} failed: {}", rule.name, e);
                        false
                    }
                }
            }
        }
    }

    fn package(
        &self,
        id: RuleId,
        rule: &CompiledRule,
        url: String,
        fallback: Vec<String>,
        captures: Vec<Option<String>>,
        source_url: &str,
    ) -> MatchResult {
        let post = match &rule.post {
            Post::Get => None,
            Post::Empty => Some(String::new()),
            Post::Template(template) => {
                let groups: Vec<Option<&str>> = captures.iter().map(|c| c.as_deref()).collect();
                Some(expand_captures(template, &groups))
            }
            Post::Expr(program) => {
                match program.eval(&Scope::new(source_url).with_captures(&captures)) {
                    Ok(value) if value.truthy() => Some(value.to_text()),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("post of rule {} failed: {}", rule.name, e);
                        None
                    }
                }
            }
        };

        MatchResult {
            url,
            fallback: fallback.into(),
            rule: id,
            captures,
            xhr: rule.flags.contains(RuleFlags::XHR),
            anonymous: rule.flags.contains(RuleFlags::ANONYMOUS),
            manual: rule.flags.contains(RuleFlags::MANUAL),
            tabfix: rule.flags.contains(RuleFlags::TABFIX),
            post,
            has_extractor: rule.extractor.is_some(),
            has_gallery: rule.gallery.is_some(),
            rect: rule.rect.clone(),
            css: rule.css.clone(),
        }
    }

    /// Run the rule's remote extractor `q` over a fetched document.
    pub fn extract(&self, result: &MatchResult, doc: &Document) -> Option<String> {
        let rule = self.compiled(result.rule)?;
        match rule.extractor.as_ref()? {
            Extractor::Selectors(selectors) => selectors.iter().find_map(|sel| {
                doc.select_first(sel)
                    .and_then(|el| node_url(&el).and_then(|href| doc.absolutize(href)))
            }),
            Extractor::Expr(program) => {
                let scope = Scope::new(&result.url)
                    .with_captures(&result.captures)
                    .with_document(Some(doc));
                let value = match program.eval(&scope) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("extractor of rule {} failed: {}", rule.name, e);
                        return None;
                    }
                };
                let first = match value {
                    Value::List(items) => items.into_iter().find_map(|v| match v {
                        Value::Str(s) if !s.is_empty() => Some(s),
                        _ => None,
                    }),
                    Value::Str(s) if !s.is_empty() => Some(s),
                    _ => None,
                };
                first.and_then(|s| doc.absolutize(&s))
            }
        }
    }

    /// Re-resolve an extracted URL when the rule asks to follow. `visited`
    /// holds the rules already used earlier in the chain; they and the
    /// result's own rule are not considered again.
    pub fn follow_extracted(&self, result: &MatchResult, extracted: &str, visited: &[RuleId]) -> Option<MatchResult> {
        let rule = self.compiled(result.rule)?;
        if !self.should_follow(rule, extracted, &result.captures, None) {
            return None;
        }
        let mut options = FindOptions::skipping(result.rule);
        options.skip.extend(visited.iter().filter(|id| **id != result.rule));
        self.find(extracted, None, &options)
    }

    /// Caption from the rule's `c` field.
    pub fn caption(&self, result: &MatchResult, node: Option<&dyn Node>, doc: Option<&Document>) -> Option<String> {
        let rule = self.compiled(result.rule)?;
        match rule.caption.as_ref()? {
            Extractor::Selectors(selectors) => {
                let doc = doc?;
                selectors
                    .iter()
                    .find_map(|sel| doc.select_first(sel).and_then(caption_text))
            }
            Extractor::Expr(program) => {
                let scope = Scope::new(&result.url)
                    .with_captures(&result.captures)
                    .with_node(node)
                    .with_document(doc);
                match program.eval(&scope) {
                    Ok(Value::Str(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("caption of rule {} failed: {}", rule.name, e);
                        None
                    }
                }
            }
        }
    }

    /// Start gallery extraction for a fetched document.
    pub fn gallery(&self, result: &MatchResult, doc: &Document) -> GalleryFuture {
        let directive = match self.compiled(result.rule).and_then(|r| r.gallery.as_ref()) {
            Some(directive) => directive,
            None => return GalleryFuture::Ready(Err(ResolveError::Gallery("rule has no gallery".to_string()))),
        };
        directive.resolve(&GalleryInput {
            text: doc.text(),
            document: doc,
            url: &result.url,
            captures: &result.captures,
            rule: result.rule,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::FunctionTable;
    use crate::rule::HostRule;
    use scraper::Html;

    fn rules(json: &[&str]) -> RuleSet {
        let custom: Vec<HostRule> = json.iter().map(|j| serde_json::from_str(j).unwrap()).collect();
        RuleSet::new(custom, Vec::new(), None, FunctionTable::default())
    }

    fn find(set: &RuleSet, url: &str) -> Option<MatchResult> {
        RuleMatcher::new(set).find(url, None, &FindOptions::default())
    }

    #[test]
    fn first_match_wins() {
        let set = rules(&[
            r#"{"r": "nomatch"}"#,
            r#"{"r": "/(\\w+)\\.png$", "s": "https://a/$1.jpg"}"#,
            r#"{"r": "\\.png$", "s": "https://b/x.jpg"}"#,
        ]);
        let result = find(&set, "https://x/pic.png").unwrap();
        assert_eq!(result.url, "https://a/pic.jpg");
        assert_eq!(result.rule, RuleId(1));
    }

    #[test]
    fn template_capture() {
        let set = rules(&[r#"{"r": "/(\\w+)_t\\.jpg", "s": "$1.jpg"}"#]);
        let result = find(&set, "https://x/abc_t.jpg").unwrap();
        assert_eq!(result.url, "https://x/abc.jpg");
        assert_eq!(result.captures[1].as_deref(), Some("abc"));
    }

    #[test]
    fn false_skips_and_empty_suppresses() {
        let set = rules(&[
            r#"{"r": "x", "s": "return false"}"#,
            r#"{"r": "x", "s": ""}"#,
            r#"{"r": "x", "s": "https://never/"}"#,
        ]);
        let result = find(&set, "https://x/").unwrap();
        assert!(result.is_suppressed());
        assert_eq!(result.rule, RuleId(1));
    }

    #[test]
    fn null_stops_search() {
        let set = rules(&[r#"{"r": "x", "s": "return null"}"#, r#"{"r": "x"}"#]);
        assert!(find(&set, "https://x/").is_none());
    }

    #[test]
    fn pattern_gates_regex() {
        let set = rules(&[r#"{"u": "||img.example^", "r": "/p/(\\d+)", "s": "https://img.example/full/$1"}"#]);
        assert!(find(&set, "https://other.org/p/1").is_none());
        assert_eq!(find(&set, "https://img.example/p/7").unwrap().url, "https://img.example/full/7");
    }

    #[test]
    fn alternatives_become_fallbacks() {
        let set = rules(&[r#"{"r": "(.+)\\.jpg$", "s": ["$1.webp", "$1.png"]}"#]);
        let result = find(&set, "https://x/a.jpg").unwrap();
        assert_eq!(result.url, "https://x/a.webp");
        assert_eq!(result.fallback, vec!["https://x/a.png".to_string()]);
    }

    #[test]
    fn alternatives_with_extractor_are_discarded() {
        let set = rules(&[
            r#"{"r": "x", "s": ["https://a/", "https://b/"], "q": "img"}"#,
            r#"{"r": "x", "s": "https://c/"}"#,
        ]);
        assert_eq!(find(&set, "https://x/").unwrap().url, "https://c/");
    }

    #[test]
    fn follow_chains_and_terminates() {
        let set = rules(&[
            r#"{"r": "^https://short/(\\w+)", "s": "https://long/$1", "follow": true}"#,
            r#"{"r": "^https://long/(\\w+)", "s": "https://cdn/$1.jpg"}"#,
            r#"{"r": "loop", "s": "$&", "follow": true}"#,
        ]);
        let result = find(&set, "https://short/abc").unwrap();
        assert_eq!(result.url, "https://cdn/abc.jpg");
        assert_eq!(result.rule, RuleId(1));

        // A self-following rule is visited once; its own result stands.
        let result = find(&set, "https://loop/").unwrap();
        assert_eq!(result.rule, RuleId(2));
    }

    #[test]
    fn media_nodes_need_substitution() {
        let html = Html::parse_fragment(r#"<img src="https://x/a.jpg">"#);
        let sel = scraper::Selector::parse("img").unwrap();
        let img = html.select(&sel).next().unwrap();
        let set = rules(&[r#"{"r": "a\\.jpg"}"#, r#"{"r": "(a)\\.jpg", "s": "https://x/$1_big.jpg"}"#]);
        let result = RuleMatcher::new(&set)
            .find("https://x/a.jpg", Some(&img), &FindOptions::default())
            .unwrap();
        assert_eq!(result.rule, RuleId(1));
    }

    #[test]
    fn html_mode_matches_markup() {
        let html = Html::parse_fragment(r#"<a href="/post/1" data-full="https://cdn/1.png">x</a>"#);
        let sel = scraper::Selector::parse("a").unwrap();
        let a = html.select(&sel).next().unwrap();
        let set = rules(&[r#"{"html": true, "r": "data-full=\"([^\"]+)\"", "s": "$1"}"#]);
        let result = RuleMatcher::new(&set)
            .find("https://site/post/1", Some(&a), &FindOptions::default())
            .unwrap();
        assert_eq!(result.url, "https://cdn/1.png");
    }

    #[test]
    fn element_selector_requires_node() {
        let set = rules(&[r#"{"e": "a.zoom", "s": "return attr('data-big')"}"#]);
        assert!(find(&set, "https://x/").is_none());

        let html = Html::parse_fragment(r#"<a class="zoom" href="/p" data-big="https://x/big.jpg">x</a>"#);
        let sel = scraper::Selector::parse("a").unwrap();
        let a = html.select(&sel).next().unwrap();
        let result = RuleMatcher::new(&set)
            .find("https://x/p", Some(&a), &FindOptions::default())
            .unwrap();
        assert_eq!(result.url, "https://x/big.jpg");
    }

    #[test]
    fn post_and_flags() {
        let set = rules(&[r#"{"r": "id=(\\d+)", "q": "img", "post": "id=$1", "xhr": true}"#]);
        let result = find(&set, "https://x/view?id=9").unwrap();
        assert_eq!(result.post.as_deref(), Some("id=9"));
        assert!(result.xhr && result.has_extractor && result.needs_document());
    }

    #[test]
    fn extractor_reads_document() {
        let set = rules(&[r##"{"r": "/view/", "q": ["#missing", "#main img"], "c": "h1"}"##]);
        let m = RuleMatcher::new(&set);
        let result = find(&set, "https://x/view/1").unwrap();

        let doc = Document::parse(
            r#"<h1> Title </h1><div id="main"><img src="/full/1.jpg"></div>"#,
            "https://x/view/1",
        );
        assert_eq!(m.extract(&result, &doc).as_deref(), Some("https://x/full/1.jpg"));
        assert_eq!(m.caption(&result, None, Some(&doc)).as_deref(), Some("Title"));

        let empty = Document::parse("<p>gone</p>", "https://x/view/1");
        assert_eq!(m.extract(&result, &empty), None);
    }

    #[test]
    fn follow_skips_visited_rules() {
        let set = rules(&[
            r#"{"r": "^https://site/a/", "q": "a", "follow": true}"#,
            r#"{"r": "^https://site/b/", "q": "a", "follow": true}"#,
        ]);
        let m = RuleMatcher::new(&set);
        let a = find(&set, "https://site/a/1").unwrap();
        let b = m.follow_extracted(&a, "https://site/b/1", &[]).unwrap();
        assert_eq!(b.rule, RuleId(1));

        // b points back at a: without history rule 0 matches again.
        assert_eq!(m.follow_extracted(&b, "https://site/a/1", &[]).map(|r| r.rule), Some(RuleId(0)));
        assert!(m.follow_extracted(&b, "https://site/a/1", &[RuleId(0)]).is_none());
    }
}
