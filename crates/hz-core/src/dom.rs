//! Minimal DOM surface used by rules.
//!
//! The matcher only needs a handful of element queries. [`Node`] captures
//! them so the same engine runs against a live browser element (through the
//! wasm bindings) or a `scraper` element from a parsed page.

use scraper::{ElementRef, Html, Selector};

use crate::url::absolutize;

/// An element the rules can inspect.
pub trait Node {
    /// Lowercase tag name.
    fn tag_name(&self) -> &str;

    fn attr(&self, name: &str) -> Option<&str>;

    /// Serialized markup of the element including itself.
    fn outer_html(&self) -> String;

    fn matches(&self, selector: &Selector) -> bool;

    fn text_content(&self) -> String;

    /// `<img>` or `<video>`.
    fn is_media(&self) -> bool {
        matches!(self.tag_name(), "img" | "video")
    }

    /// `<a>`, `<img>` or `<video>`.
    fn is_link_or_media(&self) -> bool {
        matches!(self.tag_name(), "a" | "img" | "video")
    }
}

impl<'a> Node for ElementRef<'a> {
    fn tag_name(&self) -> &str {
        self.value().name()
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.value().attr(name)
    }

    fn outer_html(&self) -> String {
        self.html()
    }

    fn matches(&self, selector: &Selector) -> bool {
        selector.matches(self)
    }

    fn text_content(&self) -> String {
        self.text().collect()
    }
}

/// Parse a CSS selector, flattening the error into a message.
pub fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|e| format!("{e:?}"))
}

/// The URL an element points at: `src`, lazy-load sources, `href`,
/// `content` or `poster`, in that order.
pub fn node_url<N: Node + ?Sized>(node: &N) -> Option<&str> {
    const ATTRS: [&str; 5] = ["src", "data-src", "href", "content", "poster"];
    for name in ATTRS {
        if let Some(value) = node.attr(name).map(str::trim).filter(|v| !v.is_empty()) {
            return Some(value);
        }
        if name == "data-src" {
            if let Some(first) = node.attr("srcset").and_then(first_srcset_url) {
                return Some(first);
            }
        }
    }
    None
}

fn first_srcset_url(srcset: &str) -> Option<&str> {
    srcset
        .split(',')
        .next()
        .and_then(|candidate| candidate.split_whitespace().next())
        .filter(|url| !url.is_empty())
}

// =============================================================================
// Document
// =============================================================================

/// A fetched remote document.
pub struct Document {
    html: Html,
    text: String,
    base: String,
}

impl Document {
    /// Parse response text. The base is `<base href>` when present, else the
    /// post-redirect URL.
    pub fn parse(text: impl Into<String>, final_url: &str) -> Self {
        let text = text.into();
        let html = Html::parse_document(&text);
        let base = match Selector::parse("base[href]") {
            Ok(sel) => html
                .select(&sel)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| absolutize(final_url, href))
                .unwrap_or_else(|| final_url.to_string()),
            Err(_) => final_url.to_string(),
        };
        Self { html, text, base }
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    /// Raw response text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// URL relative references resolve against.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn select_first(&self, selector: &Selector) -> Option<ElementRef<'_>> {
        self.html.select(selector).next()
    }

    pub fn select_all<'s>(&'s self, selector: &'s Selector) -> impl Iterator<Item = ElementRef<'s>> + 's {
        self.html.select(selector)
    }

    /// Resolve a reference found in this document.
    pub fn absolutize(&self, href: &str) -> Option<String> {
        absolutize(&self.base, href)
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("base", &self.base)
            .field("len", &self.text.len())
            .finish()
    }
}
