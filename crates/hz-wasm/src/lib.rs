//! WebAssembly bindings for Hoverzoom

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::OnceLock;

use hz_core::{
    dom::{Document, Node},
    fetch::{FetchRequest, FetchResponse, Method, TransportError},
    gallery::{GalleryFuture, Resume},
    matcher::{FindOptions, RuleMatcher},
    pattern::Pattern,
    rule::RuleDiagnostic,
    types::{GalleryItems, MatchResult},
    url::extract_host,
    Config, FrameMessage, RuleSet, Size,
};
use hz_rules::{builtin_functions, import_rules, load_rule_set};
use scraper::{ElementRef, Html};
use serde_json::{json, Value};
use wasm_bindgen::prelude::*;

struct ResolverState {
    rules: &'static RuleSet,
    rule_count: usize,
}

static RESOLVER_STATE: OnceLock<ResolverState> = OnceLock::new();

/// Multi-page galleries waiting for the host to fetch their next page.
#[derive(Default)]
struct PendingGalleries {
    next_token: u32,
    waiting: HashMap<u32, Resume>,
}

impl PendingGalleries {
    fn park(&mut self, resume: Resume) -> u32 {
        self.next_token = self.next_token.wrapping_add(1);
        self.waiting.insert(self.next_token, resume);
        self.next_token
    }
}

thread_local! {
    static PENDING_GALLERIES: RefCell<PendingGalleries> = RefCell::new(PendingGalleries::default());
}

/// Load the built-in rules plus `custom_rules` (a JSON array) for a page on
/// `page_url`. Returns the diagnostics of rejected custom rules.
#[wasm_bindgen]
pub fn init(custom_rules: &str, page_url: Option<String>) -> Result<JsValue, JsValue> {
    if RESOLVER_STATE.get().is_some() {
        return Err(JsValue::from_str("Already initialized. Reload the page to reinitialize."));
    }

    let page_host = page_url.as_deref().and_then(extract_host);
    let loaded = load_rule_set(custom_rules, page_host);
    for diagnostic in &loaded.diagnostics {
        web_sys::console::warn_1(&JsValue::from_str(&format!("hoverzoom: {}", diagnostic)));
    }

    let rule_count = loaded.rules.len();
    let rules: &'static RuleSet = Box::leak(Box::new(loaded.rules));
    RESOLVER_STATE
        .set(ResolverState { rules, rule_count })
        .map_err(|_| JsValue::from_str("Failed to set resolver state"))?;

    to_js(&diagnostics_json(&loaded.diagnostics))
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    RESOLVER_STATE.get().is_some()
}

#[wasm_bindgen]
pub fn get_rules_info() -> JsValue {
    let result = js_sys::Object::new();
    if let Some(state) = RESOLVER_STATE.get() {
        let _ = js_sys::Reflect::set(&result, &"rules".into(), &JsValue::from(state.rule_count as u32));
        let _ = js_sys::Reflect::set(&result, &"initialized".into(), &JsValue::from(true));
    } else {
        let _ = js_sys::Reflect::set(&result, &"initialized".into(), &JsValue::from(false));
    }
    result.into()
}

/// Check a custom rule list without installing it.
#[wasm_bindgen]
pub fn validate_rules(custom_rules: &str) -> Result<JsValue, JsValue> {
    let report = import_rules(custom_rules, &builtin_functions());
    to_js(&diagnostics_json(&report.diagnostics))
}

/// Resolve a hovered element, given its URL and outer HTML. Returns `null`
/// when no rule applies.
#[wasm_bindgen]
pub fn resolve(url: &str, outer_html: Option<String>) -> Result<JsValue, JsValue> {
    let rules = state()?;
    let result = find(rules, url, outer_html.as_deref());
    to_js(&result.map_or(Value::Null, |r| match_json(rules, &r)))
}

/// Finish a resolution that needs the linked page: run the rule's extractor,
/// caption and gallery directive over the fetched document.
#[wasm_bindgen]
pub fn resolve_document(
    url: &str,
    outer_html: Option<String>,
    text: String,
    final_url: &str,
) -> Result<JsValue, JsValue> {
    let rules = state()?;
    let result = match find(rules, url, outer_html.as_deref()) {
        Some(result) if result.needs_document() => result,
        _ => return Ok(JsValue::NULL),
    };
    let doc = Document::parse(text, final_url);
    to_js(&document_json(rules, &result, &doc))
}

/// Feed the page fetched for a pending gallery back in. Returns the gallery,
/// an error, or another `pending` request.
#[wasm_bindgen]
pub fn resume_gallery(token: u32, text: String, final_url: &str, status: u16) -> Result<JsValue, JsValue> {
    let response = FetchResponse {
        text,
        final_url: final_url.to_string(),
        status,
    };
    to_js(&continue_gallery(token, Ok(response))?)
}

/// Report that the host could not fetch a pending gallery's page. Items
/// collected so far are still returned.
#[wasm_bindgen]
pub fn fail_gallery(token: u32, url: &str, message: &str) -> Result<JsValue, JsValue> {
    let error = TransportError::Network {
        url: url.to_string(),
        message: message.to_string(),
    };
    to_js(&continue_gallery(token, Err(error))?)
}

/// Drop a pending gallery the host no longer wants, e.g. after the hover ended.
#[wasm_bindgen]
pub fn discard_gallery(token: u32) -> bool {
    PENDING_GALLERIES.with(|p| p.borrow_mut().waiting.remove(&token).is_some())
}

#[wasm_bindgen]
pub fn test_pattern(pattern: &str, url: &str) -> Result<bool, JsValue> {
    let pattern = Pattern::compile(pattern).map_err(|e| JsValue::from_str(&e.to_string()))?;
    Ok(pattern.matches(url))
}

/// Parse a cross-frame message; `null` when it is not one.
#[wasm_bindgen]
pub fn parse_frame_message(message: &str) -> Result<JsValue, JsValue> {
    to_js(&frame_json(message))
}

#[wasm_bindgen]
pub fn request_view_size_message() -> String {
    FrameMessage::RequestViewSize.to_string()
}

#[wasm_bindgen]
pub fn view_size_message(width: f64, height: f64) -> String {
    FrameMessage::ViewSize(Size::new(width, height)).to_string()
}

/// Default configuration as JSON.
#[wasm_bindgen]
pub fn default_config() -> String {
    serde_json::to_string(&Config::default()).unwrap_or_default()
}

fn state() -> Result<&'static RuleSet, JsValue> {
    RESOLVER_STATE
        .get()
        .map(|s| s.rules)
        .ok_or_else(|| JsValue::from_str("Not initialized"))
}

fn to_js(value: &Value) -> Result<JsValue, JsValue> {
    js_sys::JSON::parse(&value.to_string())
}

fn find(rules: &RuleSet, url: &str, outer_html: Option<&str>) -> Option<MatchResult> {
    let matcher = RuleMatcher::new(rules);
    let fragment = outer_html.map(Html::parse_fragment);
    let node = fragment.as_ref().and_then(first_element);
    match &node {
        Some(node) => matcher.find(url, Some(node as &dyn Node), &FindOptions::default()),
        None => matcher.find(url, None, &FindOptions::default()),
    }
}

/// First real element of a parsed fragment (skipping the synthetic root).
fn first_element(fragment: &Html) -> Option<ElementRef<'_>> {
    fragment.root_element().descendants().skip(1).find_map(ElementRef::wrap)
}

fn diagnostics_json(diagnostics: &[RuleDiagnostic]) -> Value {
    serde_json::to_value(diagnostics).unwrap_or(Value::Null)
}

fn match_json(rules: &RuleSet, result: &MatchResult) -> Value {
    if result.is_suppressed() {
        return json!({ "suppressed": true });
    }
    json!({
        "url": result.url,
        "fallback": result.fallback,
        "rule": rules.rule(result.rule).map(|r| r.label()),
        "needsDocument": result.needs_document(),
        "gallery": result.has_gallery,
        "xhr": result.xhr,
        "anonymous": result.anonymous,
        "manual": result.manual,
        "tabfix": result.tabfix,
        "post": result.post,
        "rect": result.rect,
        "css": result.css,
    })
}

fn continue_gallery(token: u32, result: Result<FetchResponse, TransportError>) -> Result<Value, JsValue> {
    let resume = PENDING_GALLERIES
        .with(|p| p.borrow_mut().waiting.remove(&token))
        .ok_or_else(|| JsValue::from_str(&format!("Unknown gallery token {}", token)))?;
    Ok(future_json(resume(result)))
}

fn future_json(future: GalleryFuture) -> Value {
    match future {
        GalleryFuture::Ready(Ok(items)) => json!({ "gallery": gallery_json(&items) }),
        GalleryFuture::Ready(Err(e)) => json!({ "error": e.to_string() }),
        GalleryFuture::Deferred { request, resume } => {
            let token = PENDING_GALLERIES.with(|p| p.borrow_mut().park(resume));
            json!({ "pending": request_json(token, &request) })
        }
    }
}

fn request_json(token: u32, request: &FetchRequest) -> Value {
    let method = match request.method {
        Method::Get => "GET",
        Method::Post => "POST",
    };
    json!({
        "token": token,
        "url": request.url,
        "method": method,
        "body": request.body,
        "headers": request.headers,
        "timeoutMs": request.timeout.as_millis() as u64,
    })
}

fn gallery_json(items: &GalleryItems) -> Value {
    json!({
        "title": items.title,
        "items": items
            .items
            .iter()
            .map(|i| json!({ "urls": i.urls, "caption": i.caption }))
            .collect::<Vec<_>>(),
    })
}

fn document_json(rules: &RuleSet, result: &MatchResult, doc: &Document) -> Value {
    let matcher = RuleMatcher::new(rules);
    if result.has_gallery {
        return future_json(matcher.gallery(result, doc));
    }

    let caption = matcher.caption(result, None, Some(doc));
    match matcher.extract(result, doc) {
        Some(found) => {
            let next = matcher
                .follow_extracted(result, &found, &[])
                .filter(|r| !r.is_suppressed())
                .map(|r| match_json(rules, &r));
            json!({ "url": found, "caption": caption, "next": next })
        }
        None => json!({ "error": format!("nothing extracted from {}", result.url) }),
    }
}

fn frame_json(message: &str) -> Value {
    match message.parse::<FrameMessage>() {
        Ok(FrameMessage::RequestViewSize) => json!({ "type": "requestViewSize" }),
        Ok(FrameMessage::ViewSize(size)) => json!({ "type": "viewSize", "width": size.w, "height": size.h }),
        Err(_) => Value::Null,
    }
}
