//! Built-in native functions
//!
//! Rules reference these as `{"native": "<name>"}`.

use std::time::Duration;

use hz_core::dom::Document;
use hz_core::fetch::FetchRequest;
use hz_core::gallery::{GalleryFuture, GalleryInput};
use hz_core::native::FunctionTable;
use hz_core::substitute::{Outcome, SubstInput};
use hz_core::types::{GalleryItem, GalleryItems};
use hz_core::ResolveError;
use log::{debug, warn};
use scraper::Selector;

/// Upper bound on pages walked by [`paged_gallery`].
const MAX_PAGES: usize = 20;
const PAGE_TIMEOUT: Duration = Duration::from_secs(15);

/// Flickr size suffixes, largest first.
const FLICKR_SIZES: [char; 3] = ['b', 'c', 'z'];

/// Table of every built-in native function.
pub fn builtin_functions() -> FunctionTable {
    let mut table = FunctionTable::new();
    table
        .register_substitution("flickr-sizes", flickr_sizes)
        .register_gallery("paged-gallery", paged_gallery);
    table
}

/// `photo_m.jpg` -> larger sizes first, then the original.
fn flickr_sizes(input: &SubstInput<'_>) -> Outcome {
    let url = input.url;
    let stem = match url.strip_suffix(".jpg") {
        Some(stem) => stem,
        None => return Outcome::Skip,
    };
    let (base, size) = match stem.rsplit_once('_') {
        Some((base, size)) if size.len() == 1 && size.chars().all(|c| c.is_ascii_lowercase()) => (base, size),
        _ => return Outcome::Skip,
    };

    let mut urls: Vec<String> = FLICKR_SIZES
        .iter()
        .filter(|s| s.to_string() != size)
        .map(|s| format!("{base}_{s}.jpg"))
        .collect();
    urls.push(url.to_string());
    Outcome::Urls(urls)
}

/// Album spread over pages linked with `rel="next"`. Items are elements
/// carrying `data-full`, or the images of the page's article.
pub(crate) fn paged_gallery(input: &GalleryInput<'_>) -> GalleryFuture {
    let title = Selector::parse("meta[property='og:title']")
        .ok()
        .and_then(|sel| input.document.select_first(&sel).and_then(|el| el.value().attr("content")))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    collect_page(input.document, Vec::new(), title, vec![input.url.to_string()])
}

fn collect_page(doc: &Document, mut items: Vec<GalleryItem>, title: Option<String>, mut visited: Vec<String>) -> GalleryFuture {
    items.extend(page_items(doc));

    let next = next_page(doc).filter(|url| visited.len() < MAX_PAGES && !visited.contains(url));
    let next = match next {
        Some(next) => next,
        None => return GalleryFuture::ready(GalleryItems { items, title }),
    };

    debug!("gallery page {} -> {}", visited.len(), next);
    visited.push(next.clone());
    GalleryFuture::Deferred {
        request: FetchRequest::get(next.clone(), PAGE_TIMEOUT),
        resume: Box::new(move |result| match result.and_then(|r| r.check(&next)) {
            Ok(response) => {
                let doc = Document::parse(response.text, &response.final_url);
                collect_page(&doc, items, title, visited)
            }
            Err(e) if items.is_empty() => GalleryFuture::Ready(Err(ResolveError::Transport(e))),
            Err(e) => {
                warn!("gallery page {} failed, keeping {} items: {}", next, items.len(), e);
                GalleryFuture::ready(GalleryItems { items, title })
            }
        }),
    }
}

fn page_items(doc: &Document) -> Vec<GalleryItem> {
    let (Ok(full), Ok(article)) = (Selector::parse("[data-full]"), Selector::parse("article img")) else {
        return Vec::new();
    };

    let mut items: Vec<GalleryItem> = doc
        .select_all(&full)
        .filter_map(|el| {
            let el = el.value();
            let url = doc.absolutize(el.attr("data-full")?)?;
            let caption = ["data-caption", "alt", "title"]
                .iter()
                .find_map(|name| el.attr(name))
                .unwrap_or_default();
            Some(GalleryItem::new(url).with_caption(caption.trim()))
        })
        .collect();

    if items.is_empty() {
        items = doc
            .select_all(&article)
            .filter_map(|img| {
                let src = img.value().attr("src")?;
                let alt = img.value().attr("alt").unwrap_or_default();
                Some(GalleryItem::new(doc.absolutize(src)?).with_caption(alt.trim()))
            })
            .collect();
    }
    items
}

fn next_page(doc: &Document) -> Option<String> {
    let sel = Selector::parse("a[rel~='next'], link[rel~='next']").ok()?;
    let href = doc.select_first(&sel)?.value().attr("href")?;
    doc.absolutize(href)
}
