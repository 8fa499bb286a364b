//! Gallery extraction
//!
//! A rule's `g` directive turns a fetched document into [`GalleryItems`].
//! Three forms:
//!
//! - declarative `{entry, image, caption, title, fix}` selectors
//! - an expression returning URLs or `[url, caption]` pairs
//! - a native function, which may need further network round trips
//!
//! Every form yields a [`GalleryFuture`]. A native function that needs a
//! second page returns `Deferred` with the request to make and a
//! continuation; the controller performs the fetch and calls the
//! continuation, repeating until `Ready`.

use std::fmt;

use log::{debug, warn};
use scraper::{ElementRef, Selector};

use crate::dom::{node_url, Document, Node};
use crate::error::ResolveError;
use crate::expr::{is_expression, Program, Scope, Value};
use crate::fetch::{FetchRequest, FetchResponse, TransportError};
use crate::native::{FunctionTable, NativeFn, NativeGallery};
use crate::rule::{compile_selector, parse_expr, GalleryDescriptor, GallerySpec, RuleError};
use crate::types::{GalleryItem, GalleryItems, RuleId};

/// Separator between caption pieces.
const CAPTION_JOIN: &str = " - ";

/// What a gallery function sees.
pub struct GalleryInput<'a> {
    /// Raw response text.
    pub text: &'a str,
    pub document: &'a Document,
    /// URL the document was requested for.
    pub url: &'a str,
    pub captures: &'a [Option<String>],
    pub rule: RuleId,
}

/// Continuation of a deferred gallery.
pub type Resume = Box<dyn FnOnce(Result<FetchResponse, TransportError>) -> GalleryFuture>;

/// Gallery result, now or after another fetch.
pub enum GalleryFuture {
    Ready(Result<GalleryItems, ResolveError>),
    Deferred { request: FetchRequest, resume: Resume },
}

impl GalleryFuture {
    pub fn ready(items: GalleryItems) -> Self {
        GalleryFuture::Ready(Ok(items))
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, GalleryFuture::Ready(_))
    }
}

impl fmt::Debug for GalleryFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GalleryFuture::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            GalleryFuture::Deferred { request, .. } => f
                .debug_struct("Deferred")
                .field("request", &request.url)
                .finish_non_exhaustive(),
        }
    }
}

// =============================================================================
// Compiled Directive
// =============================================================================

/// Compiled declarative descriptor.
#[derive(Debug)]
pub struct Descriptor {
    entry: Option<Selector>,
    image: Selector,
    captions: Vec<Selector>,
    title: Option<Selector>,
    fix: Option<Program>,
}

/// Compiled `g` field.
#[derive(Debug)]
pub enum GalleryDirective {
    Declarative(Descriptor),
    Expr(Program),
    Native(NativeFn<NativeGallery>),
}

impl GalleryDirective {
    pub fn compile(spec: &GallerySpec, table: &FunctionTable) -> Result<Self, RuleError> {
        match spec {
            GallerySpec::Code(src) if is_expression(src) => Ok(GalleryDirective::Expr(parse_expr(src, "g")?)),
            // A bare selector lists the images directly.
            GallerySpec::Code(selector) => Ok(GalleryDirective::Declarative(Descriptor::compile(
                &GalleryDescriptor {
                    image: Some(selector.clone()),
                    ..GalleryDescriptor::default()
                },
            )?)),
            GallerySpec::Native(native) => Ok(GalleryDirective::Native(table.gallery(&native.native)?)),
            GallerySpec::Descriptor(desc) => Ok(GalleryDirective::Declarative(Descriptor::compile(desc)?)),
        }
    }

    /// Extract the gallery from a fetched document.
    pub fn resolve(&self, input: &GalleryInput<'_>) -> GalleryFuture {
        match self {
            GalleryDirective::Declarative(desc) => GalleryFuture::ready(desc.extract(input)),
            GalleryDirective::Expr(program) => {
                let scope = Scope::new(input.url)
                    .with_captures(input.captures)
                    .with_document(Some(input.document));
                match program.eval(&scope) {
                    Ok(value) => GalleryFuture::ready(items_from_value(value, input.document)),
                    Err(e) => GalleryFuture::Ready(Err(ResolveError::Gallery(e.to_string()))),
                }
            }
            GalleryDirective::Native(native) => {
                debug!("gallery {} via native {}", input.url, native.name());
                (native.get())(input)
            }
        }
    }
}

impl Descriptor {
    fn compile(desc: &GalleryDescriptor) -> Result<Self, RuleError> {
        let captions = match &desc.caption {
            Some(list) => list
                .as_slice()
                .iter()
                .map(|s| compile_selector(s))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        Ok(Self {
            entry: desc.entry.as_deref().map(compile_selector).transpose()?,
            image: compile_selector(desc.image.as_deref().unwrap_or("img"))?,
            captions,
            title: desc.title.as_deref().map(compile_selector).transpose()?,
            fix: desc.fix.as_deref().map(|src| parse_expr(src, "fix")).transpose()?,
        })
    }

    /// Normalize an extracted string. `None` drops it.
    fn fix(&self, input: &GalleryInput<'_>, s: &str, is_url: bool) -> Option<String> {
        let program = match &self.fix {
            Some(program) => program,
            None => {
                let trimmed = s.trim();
                return (!trimmed.is_empty()).then(|| trimmed.to_string());
            }
        };
        let scope = Scope::new(input.url)
            .with_captures(input.captures)
            .with_document(Some(input.document))
            .with_var("s", Value::Str(s.to_string()))
            .with_var("isUrl", Value::Bool(is_url));
        match program.eval(&scope) {
            Ok(Value::Str(fixed)) if !fixed.is_empty() => Some(fixed),
            Ok(_) => None,
            Err(e) => {
                warn!("gallery fix failed for rule {:?}: {}", input.rule, e);
                None
            }
        }
    }

    fn extract(&self, input: &GalleryInput<'_>) -> GalleryItems {
        let doc = input.document;
        let sibling_guard = self.entry.as_ref().unwrap_or(&self.image);

        let entries: Vec<ElementRef<'_>> = match &self.entry {
            Some(entry) => doc.select_all(entry).collect(),
            None => doc.select_all(&self.image).collect(),
        };

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let image = if self.entry.is_none() || entry.matches(&self.image) {
                Some(entry)
            } else {
                entry.select(&self.image).next()
            };
            let url = image
                .as_ref()
                .and_then(|img| node_url(img))
                .and_then(|href| doc.absolutize(href))
                .and_then(|url| self.fix(input, &url, true));
            let url = match url {
                Some(url) => url,
                None => {
                    debug!("gallery entry without a URL dropped");
                    continue;
                }
            };

            let pieces: Vec<String> = self
                .captions
                .iter()
                .filter_map(|sel| find_caption(entry, sel, sibling_guard))
                .filter_map(|text| self.fix(input, &text, false))
                .collect();

            let mut item = GalleryItem::new(url);
            if !pieces.is_empty() {
                item = item.with_caption(pieces.join(CAPTION_JOIN));
            }
            items.push(item);
        }

        let title = self
            .title
            .as_ref()
            .and_then(|sel| doc.select_first(sel))
            .map(|el| match el.value().attr("content") {
                Some(content) => content.to_string(),
                None => el.text_content(),
            })
            .and_then(|t| self.fix(input, &t, false));

        GalleryItems { items, title }
    }
}

/// Caption from the entry, else from a neighbouring sibling that is not
/// itself an entry.
fn find_caption(entry: ElementRef<'_>, selector: &Selector, guard: &Selector) -> Option<String> {
    if let Some(text) = entry.select(selector).next().and_then(caption_text) {
        return Some(text);
    }
    let prev = entry.prev_siblings().find_map(ElementRef::wrap);
    let next = entry.next_siblings().find_map(ElementRef::wrap);
    [prev, next]
        .into_iter()
        .flatten()
        .filter(|sib| !guard.matches(sib))
        .find_map(|sib| {
            if selector.matches(&sib) {
                caption_text(sib)
            } else {
                sib.select(selector).next().and_then(caption_text)
            }
        })
}

pub(crate) fn caption_text(el: ElementRef<'_>) -> Option<String> {
    let text = el.text().collect::<String>();
    let text = text.trim();
    if !text.is_empty() {
        return Some(text.to_string());
    }
    ["content", "title", "alt"]
        .iter()
        .find_map(|a| el.value().attr(a))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Items from an expression result: a URL, a list of URLs, or a list of
/// `[url, caption]` / `[[alternatives], caption]` pairs.
fn items_from_value(value: Value, doc: &Document) -> GalleryItems {
    let resolve = |v: &Value| v.as_str().and_then(|s| doc.absolutize(s));
    let item_from = |v: &Value| -> Option<GalleryItem> {
        match v {
            Value::Str(_) => resolve(v).map(GalleryItem::new),
            Value::List(parts) => {
                let urls: Vec<String> = match parts.first()? {
                    Value::List(alts) => alts.iter().filter_map(resolve).collect(),
                    first => resolve(first).into_iter().collect(),
                };
                if urls.is_empty() {
                    return None;
                }
                let caption = parts.get(1).and_then(Value::as_str).map(str::trim).unwrap_or("");
                Some(GalleryItem { urls, caption: None }.with_caption(caption))
            }
            _ => None,
        }
    };

    let items = match &value {
        Value::List(list) => list.iter().filter_map(item_from).collect(),
        single => item_from(single).into_iter().collect(),
    };
    GalleryItems { items, title: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><base href="https://host/media/">
        <meta property="og:title" content=" Trip "></head><body>
        <ul>
          <li class="e"><img src="1.jpg"><span class="cap">First</span></li>
          <p class="note">about two</p>
          <li class="e"><a href="2.jpg">two</a></li>
          <li class="e"><span>no image</span></li>
        </ul></body></html>"#;

    fn resolve(directive: &GalleryDirective, doc: &Document) -> GalleryItems {
        let input = GalleryInput {
            text: doc.text(),
            document: doc,
            url: "https://host/album",
            captures: &[],
            rule: RuleId(0),
        };
        match directive.resolve(&input) {
            GalleryFuture::Ready(Ok(items)) => items,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn compile(json: &str) -> GalleryDirective {
        let spec: GallerySpec = serde_json::from_str(json).unwrap();
        GalleryDirective::compile(&spec, &FunctionTable::default()).unwrap()
    }

    #[test]
    fn declarative_entries() {
        let doc = Document::parse(PAGE, "https://host/album");
        let g = compile(
            r#"{"entry": "li.e", "image": "img, a", "caption": [".cap", ".note"], "title": "meta[property='og:title']"}"#,
        );
        let items = resolve(&g, &doc);
        assert_eq!(items.len(), 2);
        assert_eq!(items.items[0].url(), Some("https://host/media/1.jpg"));
        assert_eq!(items.items[0].caption.as_deref(), Some("First - about two"));
        assert_eq!(items.items[1].url(), Some("https://host/media/2.jpg"));
        assert_eq!(items.items[1].caption.as_deref(), Some("about two"));
        assert_eq!(items.title.as_deref(), Some("Trip"));
    }

    #[test]
    fn bare_selector_lists_images() {
        let doc = Document::parse(PAGE, "https://host/album");
        let items = resolve(&compile(r#""li img""#), &doc);
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn fix_can_rewrite_urls_only() {
        let doc = Document::parse(PAGE, "https://host/album");
        let g = compile(
            r#"{"entry": "li.e", "image": "img", "caption": ".cap", "fix": "return isUrl ? s.replace('.jpg', '_o.jpg') : s.toUpperCase()"}"#,
        );
        let items = resolve(&g, &doc);
        assert_eq!(items.items[0].url(), Some("https://host/media/1_o.jpg"));
        assert_eq!(items.items[0].caption.as_deref(), Some("FIRST"));
    }

    #[test]
    fn expression_pairs() {
        let doc = Document::parse(PAGE, "https://host/album");
        let g = compile(r#""return [['a.jpg', 'A'], 'b.jpg', [['c.webp', 'c.jpg'], '']]""#);
        let items = resolve(&g, &doc);
        assert_eq!(items.len(), 3);
        assert_eq!(items.items[0].caption.as_deref(), Some("A"));
        assert_eq!(items.items[2].urls.len(), 2);
        assert_eq!(items.items[2].caption, None);
    }

    #[test]
    fn failing_expression_is_an_error() {
        let doc = Document::parse(PAGE, "https://host/album");
        let g = compile(r#""return nope""#);
        let input = GalleryInput {
            text: doc.text(),
            document: &doc,
            url: "https://host/album",
            captures: &[],
            rule: RuleId(0),
        };
        assert!(matches!(g.resolve(&input), GalleryFuture::Ready(Err(ResolveError::Gallery(_)))));
    }
}
