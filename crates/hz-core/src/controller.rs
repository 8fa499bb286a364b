//! Interaction controller
//!
//! The popup state machine. It performs no I/O and owns no timers: the host
//! feeds it a [`Hover`] or an [`Event`] and executes the [`Effect`]s it
//! returns, reporting completions back as further events.
//!
//! ```text
//! idle -> armed -> loading -> displayed <-> zoomed
//!                     |            (gallery variants)
//!                     +-> error
//! any  -> idle on hover-out / close
//! ```
//!
//! Exactly one session is live. Every request and timer id carries the
//! session token, so completions that belong to an abandoned session are
//! discarded.

use std::collections::VecDeque;
use std::time::Duration;

use log::{debug, warn};

use crate::config::{Config, Extents};
use crate::dom::{Document, Node};
use crate::error::ResolveError;
use crate::fetch::{AssetRequest, FetchRequest, FetchResponse, LoadedAsset, TransportError};
use crate::frame::FrameMessage;
use crate::gallery::{GalleryFuture, Resume};
use crate::matcher::{FindOptions, RuleMatcher};
use crate::navigator::{self, GalleryNavigator};
use crate::pattern::PatternSet;
use crate::placement::{self, natural_size, scale_gain, LadderOptions, ScaleLadder};
use crate::rules::RuleSet;
use crate::types::{GalleryItems, MatchResult, Point, Rect, RuleId, Size};

// =============================================================================
// Ids
// =============================================================================

/// Identifies one network request of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId {
    pub session: u64,
    pub seq: u32,
}

/// Identifies one timer of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    pub session: u64,
    pub seq: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
    Document,
    GalleryPage,
    Asset,
}

// =============================================================================
// Inputs
// =============================================================================

/// A pointer entering an element.
pub struct Hover<'n> {
    pub node: &'n dyn Node,
    /// Host identity of the element; re-hovering the same key is a no-op.
    pub key: u64,
    /// Absolute URL the element points at; empty when it has none.
    pub url: String,
    /// Anchor rectangle in viewport coordinates.
    pub anchor: Rect,
    /// Rendered (CSS) size of the element.
    pub rendered: Size,
    /// Intrinsic size of a media element, when known.
    pub natural: Option<Size>,
    pub pointer: Point,
    /// Explicit activation, e.g. a modifier key.
    pub forced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Next,
    Prev,
    First,
    Last,
    ZoomIn,
    ZoomOut,
    ToggleZoom,
    Close,
}

#[derive(Debug)]
pub enum Event {
    PointerMove(Point),
    HoverOut,
    TimerFired(TimerId),
    DocumentLoaded {
        request: RequestId,
        result: Result<FetchResponse, TransportError>,
    },
    AssetLoaded {
        request: RequestId,
        result: Result<LoadedAsset, TransportError>,
    },
    Progress {
        request: RequestId,
        loaded: u64,
        total: Option<u64>,
    },
    /// Positive is down / toward the user.
    Wheel { delta_y: f64 },
    Key(Key),
    ViewportResized(Size),
    Frame(FrameMessage),
}

// =============================================================================
// Outputs
// =============================================================================

/// Transient indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Loading,
    Buffering { loaded: u64, total: Option<u64> },
    Retrying,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryPosition {
    pub index: usize,
    pub count: usize,
    pub title: Option<String>,
}

/// Work for the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartTimer { id: TimerId, after: Duration },
    CancelTimer(TimerId),
    FetchDocument { id: RequestId, request: FetchRequest },
    LoadAsset { id: RequestId, request: AssetRequest },
    Abort(RequestId),
    /// Let the host start loading before it reports progress.
    Yield,
    Show {
        url: String,
        caption: Option<String>,
        gallery: Option<GalleryPosition>,
        tabfix: bool,
    },
    Place { rect: Rect, scale: f64, zoomed: bool },
    Hide,
    Preload { url: String },
    Status(Status),
    /// Persistent, human-readable failure summary.
    Message(String),
    /// Developer-facing detail.
    Console {
        rule: Option<String>,
        url: String,
        detail: String,
    },
    PostToParent(FrameMessage),
    ReplyToFrame(FrameMessage),
    InjectCss(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Armed,
    Loading,
    Displayed,
    Zoomed,
    GalleryDisplayed,
    GalleryZoomed,
    Error,
}

// =============================================================================
// Session
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Stage {
    #[default]
    Idle,
    Armed,
    Loading,
    Shown,
    Error,
}

/// Everything about the active hover. Replaced wholesale on deactivation.
#[derive(Default)]
struct Session {
    token: u64,
    stage: Stage,
    seq: u32,

    node_key: u64,
    node_url: String,
    node_natural: Option<Size>,
    anchor: Option<Rect>,

    result: Option<MatchResult>,
    /// Document or asset URL being resolved.
    url: String,
    fallback: VecDeque<String>,
    caption: Option<String>,

    gallery: Option<GalleryItems>,
    nav: GalleryNavigator,
    direction: isize,
    pending_gallery: Option<Resume>,
    /// Rules already used along a follow chain.
    visited: Vec<RuleId>,

    request: Option<(RequestId, Purpose)>,
    start_timer: Option<TimerId>,
    delay_pending: bool,
    ready: Option<LoadedAsset>,

    asset_url: String,
    xhr_retry: bool,
    shown: bool,

    natural: Size,
    ladder: Option<ScaleLadder>,
    scale: f64,
    zoomed: bool,
    zoom_index: usize,
    placement: Option<Rect>,
}

impl Session {
    fn next_seq(&mut self) -> u32 {
        self.seq += 1;
        self.seq
    }
}

// =============================================================================
// Controller
// =============================================================================

pub struct Controller<'r> {
    matcher: RuleMatcher<'r>,
    config: Config,
    ladder_options: LadderOptions,
    extents: Extents,
    xhr_retry: Option<PatternSet>,
    page_url: Option<String>,
    viewport: Size,
    nested: bool,
    parent_view: Option<Size>,
    view_requested: bool,
    pointer: Point,
    next_token: u64,
    session: Session,
}

impl<'r> Controller<'r> {
    pub fn new(rules: &'r RuleSet, config: Config, viewport: Size) -> Self {
        Self {
            matcher: RuleMatcher::new(rules),
            ladder_options: config.ladder_options(),
            extents: config.popup_extents,
            xhr_retry: config.xhr_retry_patterns(),
            config,
            page_url: None,
            viewport,
            nested: false,
            parent_view: None,
            view_requested: false,
            pointer: Point::default(),
            next_token: 0,
            session: Session::default(),
        }
    }

    /// The controller runs inside a nested frame.
    pub fn nested(mut self) -> Self {
        self.nested = true;
        self
    }

    /// Page URL sent as referer on non-anonymous requests.
    pub fn with_page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    pub fn phase(&self) -> Phase {
        let s = &self.session;
        match s.stage {
            Stage::Idle => Phase::Idle,
            Stage::Armed => Phase::Armed,
            Stage::Loading if s.delay_pending => Phase::Armed,
            Stage::Loading => Phase::Loading,
            Stage::Shown => match (s.gallery.is_some(), s.zoomed) {
                (true, true) => Phase::GalleryZoomed,
                (true, false) => Phase::GalleryDisplayed,
                (false, true) => Phase::Zoomed,
                (false, false) => Phase::Displayed,
            },
            Stage::Error => Phase::Error,
        }
    }

    /// URL of the asset currently shown or loading.
    pub fn asset_url(&self) -> Option<&str> {
        Some(self.session.asset_url.as_str()).filter(|u| !u.is_empty())
    }

    pub fn match_result(&self) -> Option<&MatchResult> {
        self.session.result.as_ref()
    }

    pub fn gallery(&self) -> Option<(&GalleryItems, usize)> {
        self.session.gallery.as_ref().map(|g| (g, self.session.nav.index))
    }

    pub fn scale(&self) -> Option<f64> {
        (self.session.stage == Stage::Shown).then_some(self.session.scale)
    }

    pub fn placement(&self) -> Option<Rect> {
        self.session.placement
    }

    // -------------------------------------------------------------------------
    // Activation
    // -------------------------------------------------------------------------

    /// Pointer entered an element.
    pub fn hover(&mut self, hover: Hover<'_>) -> Vec<Effect> {
        let mut fx = Vec::new();
        self.pointer = hover.pointer;

        if self.session.stage != Stage::Idle {
            if self.session.node_key == hover.key {
                return fx;
            }
            self.deactivate(&mut fx);
        }

        let result = match self.matcher.find(&hover.url, Some(hover.node), &FindOptions::default()) {
            Some(result) => result,
            None => {
                debug!("no rule for {:?}", hover.url);
                return fx;
            }
        };
        if result.is_suppressed() {
            debug!("popup suppressed for {:?}", hover.url);
            return fx;
        }
        if result.manual && !hover.forced {
            debug!("rule {:?} is manual; waiting for forced hover", result.rule);
            return fx;
        }
        if !hover.forced && !result.has_gallery && hover.node.is_media() && result.url == hover.url {
            let gain = hover.natural.and_then(|n| scale_gain(n, hover.rendered));
            if let Some(gain) = gain.filter(|g| *g < self.config.scale_threshold) {
                debug!("scale gain {:.2} below threshold for {}", gain, hover.url);
                return fx;
            }
        }

        let caption = self.matcher.caption(&result, Some(hover.node), None);
        self.next_token += 1;
        self.session = Session {
            token: self.next_token,
            stage: Stage::Armed,
            node_key: hover.key,
            node_url: hover.url,
            node_natural: hover.natural,
            anchor: Some(hover.anchor),
            url: result.url.clone(),
            fallback: result.fallback.clone(),
            caption,
            result: Some(result),
            ..Session::default()
        };
        debug!("session {} armed for {}", self.session.token, self.session.url);

        if hover.forced || self.config.start_delay_ms == 0 {
            self.start_loading(&mut fx);
        } else {
            self.session.delay_pending = true;
            self.arm_timer(self.config.start_delay(), &mut fx);
            if self.config.preload_during_delay {
                self.start_loading(&mut fx);
            }
        }
        fx
    }

    /// Feed one event.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut fx = Vec::new();
        match event {
            Event::PointerMove(pos) => self.on_pointer(pos, &mut fx),
            Event::HoverOut | Event::Key(Key::Close) => self.deactivate(&mut fx),
            Event::TimerFired(id) => self.on_timer(id, &mut fx),
            Event::DocumentLoaded { request, result } => self.on_document(request, result, &mut fx),
            Event::AssetLoaded { request, result } => self.on_asset(request, result, &mut fx),
            Event::Progress { request, loaded, total } => {
                if matches!(self.session.request, Some((id, _)) if id == request) {
                    fx.push(Effect::Status(Status::Buffering { loaded, total }));
                }
            }
            Event::Wheel { delta_y } => self.on_wheel(delta_y, &mut fx),
            Event::Key(key) => self.on_key(key, &mut fx),
            Event::ViewportResized(size) => {
                self.viewport = size;
                if self.session.stage == Stage::Shown {
                    self.relayout(&mut fx);
                }
            }
            Event::Frame(message) => self.on_frame(message, &mut fx),
        }
        fx
    }

    /// Cancel everything the session holds and replace it with an idle one.
    fn deactivate(&mut self, fx: &mut Vec<Effect>) {
        let s = &mut self.session;
        if s.stage == Stage::Idle {
            return;
        }
        if let Some((id, _)) = s.request.take() {
            fx.push(Effect::Abort(id));
        }
        if let Some(id) = s.start_timer.take() {
            fx.push(Effect::CancelTimer(id));
        }
        fx.push(Effect::Hide);
        fx.push(Effect::Status(Status::Clear));
        debug!("session {} closed", s.token);
        self.session = Session::default();
    }

    fn arm_timer(&mut self, after: Duration, fx: &mut Vec<Effect>) {
        if let Some(old) = self.session.start_timer.take() {
            fx.push(Effect::CancelTimer(old));
        }
        let id = TimerId {
            session: self.session.token,
            seq: self.session.next_seq(),
        };
        self.session.start_timer = Some(id);
        fx.push(Effect::StartTimer { id, after });
    }

    fn on_timer(&mut self, id: TimerId, fx: &mut Vec<Effect>) {
        if self.session.start_timer != Some(id) {
            debug!("stale timer {:?} ignored", id);
            return;
        }
        self.session.start_timer = None;
        self.session.delay_pending = false;

        if let Some(asset) = self.session.ready.take() {
            self.display(asset, fx);
        } else if self.session.stage == Stage::Armed {
            self.start_loading(fx);
        }
    }

    fn on_pointer(&mut self, pos: Point, fx: &mut Vec<Effect>) {
        self.pointer = pos;
        let s = &self.session;
        if s.delay_pending && s.start_timer.is_some() && self.config.settle_ms > 0 {
            self.arm_timer(Duration::from_millis(self.config.settle_ms), fx);
        } else if s.stage == Stage::Shown {
            self.place(fx);
        }
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    fn next_request(&mut self, purpose: Purpose) -> RequestId {
        let id = RequestId {
            session: self.session.token,
            seq: self.session.next_seq(),
        };
        self.session.request = Some((id, purpose));
        id
    }

    /// Take the in-flight request if `id` is it.
    fn take_request(&mut self, id: RequestId) -> Option<Purpose> {
        match self.session.request {
            Some((current, purpose)) if current == id => {
                self.session.request = None;
                Some(purpose)
            }
            _ => {
                debug!("stale completion {:?} discarded", id);
                None
            }
        }
    }

    fn referer(&self, anonymous: bool) -> Vec<(String, String)> {
        match (&self.page_url, anonymous) {
            (Some(page), false) => vec![("Referer".to_string(), page.clone())],
            _ => Vec::new(),
        }
    }

    fn start_loading(&mut self, fx: &mut Vec<Effect>) {
        let result = match &self.session.result {
            Some(result) => result,
            None => return,
        };
        self.session.stage = Stage::Loading;

        if result.needs_document() {
            let mut request = FetchRequest::get(self.session.url.clone(), self.config.request_timeout());
            if let Some(body) = &result.post {
                request = request.with_post(body.clone());
            }
            request.headers = self.referer(result.anonymous);
            self.fetch(request, Purpose::Document, fx);
        } else {
            let url = self.session.url.clone();
            self.load_asset(url, fx);
        }
    }

    fn fetch(&mut self, request: FetchRequest, purpose: Purpose, fx: &mut Vec<Effect>) {
        let id = self.next_request(purpose);
        debug!("fetch {:?} {}", id, request.url);
        fx.push(Effect::FetchDocument { id, request });
        fx.push(Effect::Status(Status::Loading));
    }

    fn load_asset(&mut self, url: String, fx: &mut Vec<Effect>) {
        let (xhr, anonymous) = self
            .session
            .result
            .as_ref()
            .map_or((false, false), |r| (r.xhr, r.anonymous));
        let request = AssetRequest {
            url: url.clone(),
            headers: self.referer(anonymous),
            via_fetch: xhr || self.session.xhr_retry,
            anonymous,
        };
        self.session.asset_url = url;
        let id = self.next_request(Purpose::Asset);
        fx.push(Effect::LoadAsset { id, request });
        fx.push(Effect::Yield);
        fx.push(Effect::Status(Status::Loading));
    }

    fn on_document(&mut self, id: RequestId, result: Result<FetchResponse, TransportError>, fx: &mut Vec<Effect>) {
        match self.take_request(id) {
            Some(Purpose::Document) => {}
            Some(Purpose::GalleryPage) => {
                if let Some(resume) = self.session.pending_gallery.take() {
                    self.drive_gallery(resume(result), fx);
                }
                return;
            }
            Some(Purpose::Asset) => {
                warn!("document completion for asset request {:?}", id);
                return;
            }
            None => return,
        }

        let response = match result.and_then(|r| r.check(&self.session.url)) {
            Ok(response) => response,
            Err(e) => return self.fail(e.into(), fx),
        };
        let doc = Document::parse(response.text, &response.final_url);
        let result = match self.session.result.clone() {
            Some(result) => result,
            None => return,
        };

        if result.has_gallery {
            let future = self.matcher.gallery(&result, &doc);
            self.drive_gallery(future, fx);
            return;
        }

        let found = match self.matcher.extract(&result, &doc) {
            Some(found) => found,
            None => {
                let url = self.session.url.clone();
                return self.terminal(ResolveError::NothingExtracted { url }, fx);
            }
        };
        if let Some(caption) = self.matcher.caption(&result, None, Some(&doc)) {
            self.session.caption = Some(caption);
        }

        self.session.visited.push(result.rule);
        match self.matcher.follow_extracted(&result, &found, &self.session.visited) {
            Some(next) if next.is_suppressed() => {
                debug!("extracted {} is disabled by rule {:?}", found, next.rule);
                self.terminal(ResolveError::NotFound { url: found }, fx);
            }
            Some(next) => {
                debug!("extracted {} follows to {}", found, next.url);
                self.session.url = next.url.clone();
                self.session.fallback = next.fallback.clone();
                self.session.result = Some(next);
                self.start_loading(fx);
            }
            None => {
                self.session.url = found.clone();
                self.load_asset(found, fx);
            }
        }
    }

    fn drive_gallery(&mut self, future: GalleryFuture, fx: &mut Vec<Effect>) {
        match future {
            GalleryFuture::Ready(Ok(items)) if items.is_empty() => {
                let url = self.session.url.clone();
                self.terminal(ResolveError::EmptyGallery { url }, fx);
            }
            GalleryFuture::Ready(Ok(items)) => {
                debug!("gallery of {} items", items.len());
                self.session.nav = GalleryNavigator::new(items.len());
                self.session.direction = 1;
                self.session.gallery = Some(items);
                self.load_gallery_item(fx);
            }
            GalleryFuture::Ready(Err(e)) => self.terminal(e, fx),
            GalleryFuture::Deferred { request, resume } => {
                self.session.pending_gallery = Some(resume);
                self.fetch(request, Purpose::GalleryPage, fx);
            }
        }
    }

    fn load_gallery_item(&mut self, fx: &mut Vec<Effect>) {
        let urls = match &self.session.gallery {
            Some(gallery) => gallery.items[self.session.nav.index].urls.clone(),
            None => return,
        };
        let mut urls: VecDeque<String> = urls.into();
        let first = match urls.pop_front() {
            Some(first) => first,
            None => {
                let url = self.session.url.clone();
                return self.terminal(ResolveError::NotFound { url }, fx);
            }
        };
        self.session.fallback = urls;
        self.session.xhr_retry = false;
        if self.session.stage != Stage::Shown {
            self.session.stage = Stage::Loading;
        }
        self.load_asset(first, fx);
    }

    fn on_asset(&mut self, id: RequestId, result: Result<LoadedAsset, TransportError>, fx: &mut Vec<Effect>) {
        match self.take_request(id) {
            Some(Purpose::Asset) => {}
            Some(other) => {
                warn!("asset completion for {:?} request {:?}", other, id);
                return;
            }
            None => return,
        }

        let asset = match result {
            Ok(asset) => asset,
            Err(e) => return self.asset_failed(e, fx),
        };

        if self.session.gallery.is_some() {
            if let Some(bytes) = asset.byte_len.filter(|b| *b < self.config.min_asset_bytes) {
                let url = self.session.asset_url.clone();
                return self.asset_failed(TransportError::TooSmall { url, bytes }, fx);
            }
        }

        if self.session.delay_pending {
            self.session.ready = Some(asset);
            return;
        }
        self.display(asset, fx);
    }

    // -------------------------------------------------------------------------
    // Failure
    // -------------------------------------------------------------------------

    fn asset_failed(&mut self, error: TransportError, fx: &mut Vec<Effect>) {
        let url = self.session.asset_url.clone();
        let via_fetch = self.session.xhr_retry || self.session.result.as_ref().map_or(false, |r| r.xhr);
        let retry_host = self.xhr_retry.as_ref().map_or(false, |p| p.matches(&url));

        if !via_fetch && retry_host {
            debug!("{} failed ({}); retrying through fetch", url, error);
            self.session.xhr_retry = true;
            fx.push(Effect::Status(Status::Retrying));
            self.load_asset(url, fx);
            return;
        }
        self.fail(error.into(), fx);
    }

    /// Fall back to the next candidate, or give up.
    fn fail(&mut self, error: ResolveError, fx: &mut Vec<Effect>) {
        if error.allows_fallback() {
            if let Some(next) = self.session.fallback.pop_front() {
                debug!("{}; falling back to {}", error, next);
                fx.push(Effect::Status(Status::Retrying));
                self.session.xhr_retry = false;
                if self.session.gallery.is_some() {
                    self.load_asset(next, fx);
                } else {
                    self.session.url = next;
                    self.start_loading(fx);
                }
                return;
            }
        }
        self.terminal(error, fx);
    }

    fn terminal(&mut self, error: ResolveError, fx: &mut Vec<Effect>) {
        warn!("session {} failed: {}", self.session.token, error);
        let rule = self
            .session
            .result
            .as_ref()
            .and_then(|r| self.matcher.rules().rule(r.rule))
            .map(|r| r.label());
        let url = if self.session.asset_url.is_empty() {
            self.session.url.clone()
        } else {
            self.session.asset_url.clone()
        };

        if let Some((id, _)) = self.session.request.take() {
            fx.push(Effect::Abort(id));
        }
        if self.session.shown {
            fx.push(Effect::Hide);
        }
        self.session.stage = Stage::Error;
        fx.push(Effect::Status(Status::Clear));
        fx.push(Effect::Message(summary(&error)));
        fx.push(Effect::Console {
            rule,
            url,
            detail: error.to_string(),
        });
    }

    // -------------------------------------------------------------------------
    // Display
    // -------------------------------------------------------------------------

    fn display(&mut self, asset: LoadedAsset, fx: &mut Vec<Effect>) {
        let declared = if self.session.asset_url == self.session.node_url {
            self.session.node_natural
        } else {
            None
        };
        let natural = natural_size(asset.natural, declared);
        if natural.is_empty() {
            let url = self.session.asset_url.clone();
            return self.asset_failed(TransportError::Decode { url }, fx);
        }

        let first_show = !self.session.shown;
        self.session.natural = natural;
        self.session.stage = Stage::Shown;
        self.session.shown = true;

        fx.push(Effect::Status(Status::Clear));
        if first_show {
            if let Some(css) = self.session.result.as_ref().and_then(|r| r.css.clone()) {
                fx.push(Effect::InjectCss(css));
            }
        }

        let (caption, gallery) = match &self.session.gallery {
            Some(items) => {
                let index = self.session.nav.index;
                (
                    items.items[index].caption.clone(),
                    Some(GalleryPosition {
                        index,
                        count: items.len(),
                        title: items.title.clone(),
                    }),
                )
            }
            None => (self.session.caption.clone(), None),
        };
        fx.push(Effect::Show {
            url: self.session.asset_url.clone(),
            caption,
            gallery,
            tabfix: self.session.result.as_ref().map_or(false, |r| r.tabfix),
        });

        self.relayout(fx);
        self.preload(fx);

        if self.nested && self.parent_view.is_none() && !self.view_requested {
            self.view_requested = true;
            fx.push(Effect::PostToParent(FrameMessage::RequestViewSize));
        }
    }

    fn view(&self) -> Size {
        self.parent_view.unwrap_or(self.viewport)
    }

    /// Rebuild the ladder for the current view and re-place.
    fn relayout(&mut self, fx: &mut Vec<Effect>) {
        let ladder = ScaleLadder::build(self.session.natural, self.view(), self.extents.size(), &self.ladder_options);
        if self.session.zoomed {
            self.session.zoom_index = self.session.zoom_index.min(ladder.steps.len().saturating_sub(1));
        }
        self.session.ladder = Some(ladder);
        self.session.placement = None;
        self.rescale(fx);
    }

    fn rescale(&mut self, fx: &mut Vec<Effect>) {
        let s = &mut self.session;
        if let Some(ladder) = &s.ladder {
            s.scale = if s.zoomed { ladder.scale(s.zoom_index) } else { ladder.base };
        }
        s.placement = None;
        self.place(fx);
    }

    fn place(&mut self, fx: &mut Vec<Effect>) {
        let s = &self.session;
        if s.stage != Stage::Shown {
            return;
        }
        let scaled = s.natural.scaled(s.scale);
        let popup = Size::new(scaled.w + self.extents.horizontal, scaled.h + self.extents.vertical);
        let placed = placement::place(self.view(), popup, s.anchor, self.pointer, s.zoomed);
        if s.placement == Some(placed.rect) {
            return;
        }
        let (scale, zoomed) = (s.scale, s.zoomed);
        self.session.placement = Some(placed.rect);
        fx.push(Effect::Place {
            rect: placed.rect,
            scale,
            zoomed,
        });
    }

    fn preload(&self, fx: &mut Vec<Effect>) {
        let gallery = match &self.session.gallery {
            Some(gallery) => gallery,
            None => return,
        };
        for index in self
            .session
            .nav
            .preload_targets(self.session.direction, self.config.preload_ahead)
        {
            if let Some(url) = gallery.items[index].url() {
                fx.push(Effect::Preload { url: url.to_string() });
            }
        }
    }

    // -------------------------------------------------------------------------
    // Input
    // -------------------------------------------------------------------------

    fn on_wheel(&mut self, delta_y: f64, fx: &mut Vec<Effect>) {
        if self.session.stage != Stage::Shown || delta_y == 0.0 {
            return;
        }
        let down = delta_y > 0.0;
        if self.session.gallery.is_some() && !self.session.zoomed && self.config.wheel_gallery {
            self.navigate_by(if down { 1 } else { -1 }, fx);
        } else if down {
            self.zoom_out(fx);
        } else {
            self.zoom_in(fx);
        }
    }

    fn on_key(&mut self, key: Key, fx: &mut Vec<Effect>) {
        if self.session.stage != Stage::Shown {
            return;
        }
        let count = self.session.nav.count;
        match key {
            Key::Next => self.navigate_by(1, fx),
            Key::Prev => self.navigate_by(-1, fx),
            Key::First => self.navigate_to(navigator::first(count), -1, fx),
            Key::Last => self.navigate_to(navigator::last(count), 1, fx),
            Key::ZoomIn => self.zoom_in(fx),
            Key::ZoomOut => self.zoom_out(fx),
            Key::ToggleZoom if self.session.zoomed => self.unzoom(fx),
            Key::ToggleZoom => self.zoom_in(fx),
            Key::Close => self.deactivate(fx),
        }
    }

    fn navigate_by(&mut self, delta: isize, fx: &mut Vec<Effect>) {
        let nav = self.session.nav;
        self.navigate_to(navigator::step(nav.index, nav.count, delta), delta, fx);
    }

    fn navigate_to(&mut self, index: usize, direction: isize, fx: &mut Vec<Effect>) {
        if self.session.gallery.is_none() || index == self.session.nav.index {
            return;
        }
        if let Some((id, _)) = self.session.request.take() {
            fx.push(Effect::Abort(id));
        }
        self.session.nav.index = index;
        self.session.direction = direction;
        self.load_gallery_item(fx);
    }

    fn zoom_in(&mut self, fx: &mut Vec<Effect>) {
        let s = &mut self.session;
        let ladder = match &s.ladder {
            Some(ladder) => ladder,
            None => return,
        };
        if s.zoomed {
            let next = ladder.step(s.zoom_index, 1).unwrap_or(s.zoom_index);
            if next == s.zoom_index {
                return;
            }
            s.zoom_index = next;
        } else {
            s.zoomed = true;
            s.zoom_index = ladder.zoom_in_index();
        }
        self.rescale(fx);
    }

    fn zoom_out(&mut self, fx: &mut Vec<Effect>) {
        if !self.session.zoomed {
            if self.config.zoom_out_closes {
                self.deactivate(fx);
            }
            return;
        }
        let step = self
            .session
            .ladder
            .as_ref()
            .and_then(|l| l.step(self.session.zoom_index, -1));
        match step {
            Some(index) => {
                self.session.zoom_index = index;
                self.rescale(fx);
            }
            None => self.unzoom(fx),
        }
    }

    fn unzoom(&mut self, fx: &mut Vec<Effect>) {
        self.session.zoomed = false;
        self.rescale(fx);
    }

    fn on_frame(&mut self, message: FrameMessage, fx: &mut Vec<Effect>) {
        match message {
            FrameMessage::RequestViewSize if !self.nested => {
                fx.push(Effect::ReplyToFrame(FrameMessage::ViewSize(self.viewport)));
            }
            FrameMessage::RequestViewSize => {}
            FrameMessage::ViewSize(size) if self.nested => {
                self.parent_view = Some(size);
                if self.session.stage == Stage::Shown {
                    self.relayout(fx);
                }
            }
            FrameMessage::ViewSize(_) => debug!("view size reply ignored by top frame"),
        }
    }
}

/// Message bar text for a terminal failure.
fn summary(error: &ResolveError) -> String {
    match error {
        ResolveError::NotFound { .. } => "Nothing to show here".to_string(),
        ResolveError::NothingExtracted { .. } => "No media found on the linked page".to_string(),
        ResolveError::EmptyGallery { .. } => "The gallery is empty".to_string(),
        ResolveError::Gallery(_) => "The gallery could not be read".to_string(),
        ResolveError::Transport(TransportError::Status { status, .. }) => {
            format!("Could not load the media (HTTP {status})")
        }
        ResolveError::Transport(TransportError::Timeout { .. }) => "Loading the media timed out".to_string(),
        ResolveError::Transport(TransportError::Decode { .. }) => "The media could not be decoded".to_string(),
        ResolveError::Transport(_) => "Could not load the media".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::GalleryInput;
    use crate::native::FunctionTable;
    use crate::rule::HostRule;
    use crate::types::GalleryItem;
    use scraper::{ElementRef, Html, Selector};

    const VIEW: Size = Size::new(1000.0, 800.0);

    fn rules(json: &[&str]) -> RuleSet {
        rules_with(json, FunctionTable::default())
    }

    fn rules_with(json: &[&str], table: FunctionTable) -> RuleSet {
        let custom: Vec<HostRule> = json.iter().map(|j| serde_json::from_str(j).unwrap()).collect();
        RuleSet::new(custom, Vec::new(), None, table)
    }

    fn instant() -> Config {
        Config {
            start_delay_ms: 0,
            ..Config::default()
        }
    }

    fn element<'a>(html: &'a Html, selector: &str) -> ElementRef<'a> {
        html.select(&Selector::parse(selector).unwrap()).next().unwrap()
    }

    fn hover<'n>(node: &'n dyn Node, key: u64, url: &str) -> Hover<'n> {
        Hover {
            node,
            key,
            url: url.to_string(),
            anchor: Rect::new(100.0, 100.0, 50.0, 50.0),
            rendered: Size::new(50.0, 50.0),
            natural: None,
            pointer: Point::new(120.0, 120.0),
            forced: false,
        }
    }

    fn asset_request(fx: &[Effect]) -> (RequestId, AssetRequest) {
        fx.iter()
            .find_map(|e| match e {
                Effect::LoadAsset { id, request } => Some((*id, request.clone())),
                _ => None,
            })
            .expect("asset load requested")
    }

    fn document_request(fx: &[Effect]) -> (RequestId, FetchRequest) {
        fx.iter()
            .find_map(|e| match e {
                Effect::FetchDocument { id, request } => Some((*id, request.clone())),
                _ => None,
            })
            .expect("document fetch requested")
    }

    fn loaded(request: RequestId, w: f64, h: f64) -> Event {
        Event::AssetLoaded {
            request,
            result: Ok(LoadedAsset {
                natural: Size::new(w, h),
                byte_len: Some(10_000),
            }),
        }
    }

    fn page(request: RequestId, url: &str, html: &str) -> Event {
        Event::DocumentLoaded {
            request,
            result: Ok(FetchResponse {
                text: html.to_string(),
                final_url: url.to_string(),
                status: 200,
            }),
        }
    }

    fn has_message(fx: &[Effect]) -> bool {
        fx.iter().any(|e| matches!(e, Effect::Message(_)))
    }

    #[test]
    fn thumbnail_link_end_to_end() {
        let set = rules(&[r#"{"r": "_thumb\\.jpg$", "s": "/_thumb//"}"#]);
        let html = Html::parse_fragment(r#"<a href="http://img.example/photo_thumb.jpg">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, Config::default(), VIEW);
        assert_eq!(c.phase(), Phase::Idle);

        let fx = c.hover(hover(&a, 1, "http://img.example/photo_thumb.jpg"));
        assert_eq!(c.phase(), Phase::Armed);
        let timer = fx
            .iter()
            .find_map(|e| match e {
                Effect::StartTimer { id, .. } => Some(*id),
                _ => None,
            })
            .unwrap();

        let fx = c.handle(Event::TimerFired(timer));
        assert_eq!(c.phase(), Phase::Loading);
        let (id, request) = asset_request(&fx);
        assert_eq!(request.url, "http://img.example/photo.jpg");

        let fx = c.handle(loaded(id, 400.0, 300.0));
        assert_eq!(c.phase(), Phase::Displayed);
        assert!(fx.iter().any(|e| matches!(e, Effect::Show { url, .. } if url == "http://img.example/photo.jpg")));
        assert!(fx.iter().any(|e| matches!(e, Effect::Place { .. })));
        assert_eq!(c.scale(), Some(1.0));
    }

    #[test]
    fn extractor_without_result_is_terminal() {
        let set = rules(&[r##"{"r": "/post/", "q": "#photo img", "s": ["$&"]}"##]);
        let html = Html::parse_fragment(r#"<a href="https://site/post/1">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);

        let fx = c.hover(hover(&a, 1, "https://site/post/1"));
        let (id, request) = document_request(&fx);
        assert_eq!(request.url, "https://site/post/1");

        let fx = c.handle(page(id, "https://site/post/1", "<p>no photo</p>"));
        assert_eq!(c.phase(), Phase::Error);
        assert!(has_message(&fx));
        assert!(!fx.iter().any(|e| matches!(e, Effect::LoadAsset { .. } | Effect::FetchDocument { .. })));
    }

    #[test]
    fn extractor_loads_found_asset() {
        let set = rules(&[r##"{"r": "/post/", "q": "#photo img", "c": "h1"}"##]);
        let html = Html::parse_fragment(r#"<a href="https://site/post/1">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);

        let (id, _) = document_request(&c.hover(hover(&a, 1, "https://site/post/1")));
        let fx = c.handle(page(
            id,
            "https://site/post/1",
            r#"<h1>Sunset</h1><div id="photo"><img src="/img/1.jpg"></div>"#,
        ));
        let (id, request) = asset_request(&fx);
        assert_eq!(request.url, "https://site/img/1.jpg");

        let fx = c.handle(loaded(id, 200.0, 100.0));
        assert!(fx
            .iter()
            .any(|e| matches!(e, Effect::Show { caption: Some(text), .. } if text == "Sunset")));
    }

    #[test]
    fn follow_chain_visits_each_rule_once() {
        let set = rules(&[
            r#"{"name": "pages-a", "r": "^https://site/a/", "q": "a", "follow": true}"#,
            r#"{"name": "pages-b", "r": "^https://site/b/", "q": "a", "follow": true}"#,
        ]);
        let html = Html::parse_fragment(r#"<a href="https://site/a/1">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);

        let (id, request) = document_request(&c.hover(hover(&a, 1, "https://site/a/1")));
        assert_eq!(request.url, "https://site/a/1");

        let fx = c.handle(page(id, "https://site/a/1", r#"<a href="/b/1">next</a>"#));
        let (id, request) = document_request(&fx);
        assert_eq!(request.url, "https://site/b/1");

        // Both rules are used up; the page's link is loaded as the asset.
        let fx = c.handle(page(id, "https://site/b/1", r#"<a href="/a/1">back</a>"#));
        assert!(!fx.iter().any(|e| matches!(e, Effect::FetchDocument { .. })));
        let (_, request) = asset_request(&fx);
        assert_eq!(request.url, "https://site/a/1");
    }

    #[test]
    fn disabled_follow_target_is_not_found() {
        let set = rules(&[
            r#"{"r": "^https://site/post/", "q": "a", "follow": true}"#,
            r#"{"name": "ads", "r": "^https://ads\\.example/", "s": ""}"#,
        ]);
        let html = Html::parse_fragment(r#"<a href="https://site/post/1">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);

        let (id, _) = document_request(&c.hover(hover(&a, 1, "https://site/post/1")));
        let fx = c.handle(page(id, "https://site/post/1", r#"<a href="https://ads.example/x">ad</a>"#));
        assert_eq!(c.phase(), Phase::Error);
        assert!(!fx.iter().any(|e| matches!(e, Effect::LoadAsset { .. })));
        assert!(fx.iter().any(|e| matches!(e, Effect::Message(m) if m == "Nothing to show here")));
    }

    #[test]
    fn fallback_after_404_without_message() {
        let set = rules(&[r#"{"r": "^https://x/(\\w+)$", "s": ["https://a/$1.jpg", "https://b/$1.jpg"]}"#]);
        let html = Html::parse_fragment(r#"<a href="https://x/pic">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);

        let fx = c.hover(hover(&a, 1, "https://x/pic"));
        let (id_a, req_a) = asset_request(&fx);
        assert_eq!(req_a.url, "https://a/pic.jpg");

        let fx = c.handle(Event::AssetLoaded {
            request: id_a,
            result: Err(TransportError::Status {
                url: req_a.url.clone(),
                status: 404,
            }),
        });
        assert!(!has_message(&fx));
        let (id_b, req_b) = asset_request(&fx);
        assert_eq!(req_b.url, "https://b/pic.jpg");

        let fx = c.handle(loaded(id_b, 100.0, 100.0));
        assert!(!has_message(&fx));
        assert_eq!(c.phase(), Phase::Displayed);
        assert_eq!(c.asset_url(), Some("https://b/pic.jpg"));
        assert_eq!(c.match_result().map(|r| r.url.as_str()), Some("https://a/pic.jpg"));
    }

    #[test]
    fn exhausted_fallback_is_terminal() {
        let set = rules(&[r#"{"r": "x"}"#]);
        let html = Html::parse_fragment(r#"<a href="https://x/">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);

        let (id, _) = asset_request(&c.hover(hover(&a, 1, "https://x/")));
        let fx = c.handle(Event::AssetLoaded {
            request: id,
            result: Err(TransportError::Timeout { url: "https://x/".into() }),
        });
        assert_eq!(c.phase(), Phase::Error);
        assert!(fx.contains(&Effect::Message("Loading the media timed out".to_string())));
        assert!(fx.iter().any(|e| matches!(e, Effect::Console { url, .. } if url == "https://x/")));
    }

    #[test]
    fn hover_out_cancels_everything() {
        let set = rules(&[r#"{"r": "x"}"#]);
        let html = Html::parse_fragment(r#"<a href="https://x/">x</a>"#);
        let a = element(&html, "a");
        let config = Config {
            preload_during_delay: true,
            ..Config::default()
        };
        let mut c = Controller::new(&set, config, VIEW);

        let fx = c.hover(hover(&a, 1, "https://x/"));
        let (id, _) = asset_request(&fx);
        let timer = fx
            .iter()
            .find_map(|e| match e {
                Effect::StartTimer { id, .. } => Some(*id),
                _ => None,
            })
            .unwrap();

        let fx = c.handle(Event::HoverOut);
        assert!(fx.contains(&Effect::Abort(id)));
        assert!(fx.contains(&Effect::CancelTimer(timer)));
        assert!(fx.contains(&Effect::Hide));
        assert_eq!(c.phase(), Phase::Idle);

        // Late completions of the old session change nothing.
        assert!(c.handle(loaded(id, 10.0, 10.0)).is_empty());
        assert!(c.handle(Event::TimerFired(timer)).is_empty());
        assert_eq!(c.phase(), Phase::Idle);
    }

    #[test]
    fn rehover_replaces_session() {
        let set = rules(&[r#"{"r": "x"}"#]);
        let html = Html::parse_fragment(r#"<a id="one" href="https://x/1">1</a><a id="two" href="https://x/2">2</a>"#);
        let one = element(&html, "#one");
        let two = element(&html, "#two");
        let mut c = Controller::new(&set, instant(), VIEW);

        let (old, _) = asset_request(&c.hover(hover(&one, 1, "https://x/1")));
        assert!(c.hover(hover(&one, 1, "https://x/1")).is_empty());

        let fx = c.hover(hover(&two, 2, "https://x/2"));
        assert!(fx.contains(&Effect::Abort(old)));
        let (new, _) = asset_request(&fx);
        assert_ne!(old.session, new.session);

        assert!(c.handle(loaded(old, 10.0, 10.0)).is_empty());
        c.handle(loaded(new, 10.0, 10.0));
        assert_eq!(c.asset_url(), Some("https://x/2"));
        assert_eq!(c.phase(), Phase::Displayed);
    }

    #[test]
    fn preload_during_delay_waits_for_timer() {
        let set = rules(&[r#"{"r": "x"}"#]);
        let html = Html::parse_fragment(r#"<a href="https://x/">x</a>"#);
        let a = element(&html, "a");
        let config = Config {
            preload_during_delay: true,
            ..Config::default()
        };
        let mut c = Controller::new(&set, config, VIEW);

        let fx = c.hover(hover(&a, 1, "https://x/"));
        let (id, _) = asset_request(&fx);
        let timer = fx
            .iter()
            .find_map(|e| match e {
                Effect::StartTimer { id, .. } => Some(*id),
                _ => None,
            })
            .unwrap();

        assert!(c.handle(loaded(id, 10.0, 10.0)).is_empty());
        assert_eq!(c.phase(), Phase::Armed);
        let fx = c.handle(Event::TimerFired(timer));
        assert!(fx.iter().any(|e| matches!(e, Effect::Show { .. })));
        assert_eq!(c.phase(), Phase::Displayed);
    }

    #[test]
    fn settle_window_restarts_timer() {
        let set = rules(&[r#"{"r": "x"}"#]);
        let html = Html::parse_fragment(r#"<a href="https://x/">x</a>"#);
        let a = element(&html, "a");
        let config = Config {
            settle_ms: 50,
            ..Config::default()
        };
        let mut c = Controller::new(&set, config, VIEW);

        let fx = c.hover(hover(&a, 1, "https://x/"));
        let first = fx
            .iter()
            .find_map(|e| match e {
                Effect::StartTimer { id, .. } => Some(*id),
                _ => None,
            })
            .unwrap();
        let fx = c.handle(Event::PointerMove(Point::new(130.0, 130.0)));
        assert!(fx.contains(&Effect::CancelTimer(first)));
        assert!(fx
            .iter()
            .any(|e| matches!(e, Effect::StartTimer { after, .. } if *after == Duration::from_millis(50))));
        assert!(c.handle(Event::TimerFired(first)).is_empty());
    }

    #[test]
    fn manual_rule_needs_forced_hover() {
        let set = rules(&[r#"{"r": "x", "manual": true}"#]);
        let html = Html::parse_fragment(r#"<a href="https://x/">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);

        assert!(c.hover(hover(&a, 1, "https://x/")).is_empty());
        assert_eq!(c.phase(), Phase::Idle);

        let mut forced = hover(&a, 1, "https://x/");
        forced.forced = true;
        asset_request(&c.hover(forced));
        assert_eq!(c.phase(), Phase::Loading);
    }

    #[test]
    fn scale_gain_blocks_small_media_only() {
        let set = rules(&[r#"{"r": "^https://x/.+$", "s": "$&"}"#]);
        let html = Html::parse_fragment(r#"<img src="https://x/a.jpg">"#);
        let img = element(&html, "img");
        let mut c = Controller::new(&set, instant(), VIEW);

        let mut barely = hover(&img, 1, "https://x/a.jpg");
        barely.natural = Some(Size::new(55.0, 55.0));
        assert!(c.hover(barely).is_empty());

        let mut unknown = hover(&img, 1, "https://x/a.jpg");
        unknown.natural = None;
        asset_request(&c.hover(unknown));
        c.handle(Event::HoverOut);

        let mut large = hover(&img, 2, "https://x/a.jpg");
        large.natural = Some(Size::new(500.0, 500.0));
        asset_request(&c.hover(large));
    }

    #[test]
    fn wheel_zooms_and_unzooms() {
        let set = rules(&[r#"{"r": "x"}"#]);
        let html = Html::parse_fragment(r#"<a href="https://x/">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);
        let (id, _) = asset_request(&c.hover(hover(&a, 1, "https://x/")));
        c.handle(loaded(id, 3000.0, 3000.0));
        let base = c.scale().unwrap();
        assert!(base < 1.0);

        let fx = c.handle(Event::Wheel { delta_y: -1.0 });
        assert_eq!(c.phase(), Phase::Zoomed);
        assert!(c.scale().unwrap() > base);
        assert!(fx.iter().any(|e| matches!(e, Effect::Place { zoomed: true, .. })));

        c.handle(Event::Wheel { delta_y: 1.0 });
        assert_eq!(c.phase(), Phase::Displayed);
        assert_eq!(c.scale(), Some(base));

        // Already unzoomed: no-op unless zoom-out closes.
        assert!(c.handle(Event::Wheel { delta_y: 1.0 }).is_empty());
    }

    #[test]
    fn resize_to_empty_view_keeps_popup() {
        let set = rules(&[r#"{"r": "x"}"#]);
        let html = Html::parse_fragment(r#"<a href="https://x/">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);
        let (id, _) = asset_request(&c.hover(hover(&a, 1, "https://x/")));
        c.handle(loaded(id, 400.0, 300.0));

        let fx = c.handle(Event::ViewportResized(Size::new(0.0, 0.0)));
        assert!(fx.iter().any(|e| matches!(e, Effect::Place { .. })));
        assert_eq!(c.scale(), Some(placement::MIN_SCALE));
        assert_eq!(c.phase(), Phase::Displayed);

        c.handle(Event::ViewportResized(Size::new(15.0, 15.0)));
        assert_eq!(c.scale(), Some(placement::MIN_SCALE));
        c.handle(Event::Wheel { delta_y: -1.0 });
        assert_eq!(c.phase(), Phase::Zoomed);
    }

    #[test]
    fn zoom_out_closes_when_configured() {
        let set = rules(&[r#"{"r": "x"}"#]);
        let html = Html::parse_fragment(r#"<a href="https://x/">x</a>"#);
        let a = element(&html, "a");
        let config = Config {
            zoom_out_closes: true,
            ..instant()
        };
        let mut c = Controller::new(&set, config, VIEW);
        let (id, _) = asset_request(&c.hover(hover(&a, 1, "https://x/")));
        c.handle(loaded(id, 300.0, 300.0));

        let fx = c.handle(Event::Wheel { delta_y: 1.0 });
        assert!(fx.contains(&Effect::Hide));
        assert_eq!(c.phase(), Phase::Idle);
    }

    const ALBUM: &str = r#"<ul><li><img src="/a.jpg" title="A"></li><li><img src="/b.jpg"></li><li><img src="/c.jpg"></li></ul>"#;

    fn open_gallery(c: &mut Controller<'_>, a: &dyn Node) -> RequestId {
        let (id, _) = document_request(&c.hover(hover(a, 1, "https://site/album/1")));
        let fx = c.handle(page(id, "https://site/album/1", ALBUM));
        let (id, request) = asset_request(&fx);
        assert_eq!(request.url, "https://site/a.jpg");
        id
    }

    #[test]
    fn gallery_navigation_wraps() {
        let set = rules(&[r#"{"r": "/album/", "g": {"entry": "li", "image": "img"}}"#]);
        let html = Html::parse_fragment(r#"<a href="https://site/album/1">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);

        let id = open_gallery(&mut c, &a);
        let fx = c.handle(loaded(id, 100.0, 100.0));
        assert_eq!(c.phase(), Phase::GalleryDisplayed);
        assert!(fx.contains(&Effect::Preload {
            url: "https://site/b.jpg".into()
        }));
        assert!(fx.iter().any(|e| matches!(
            e,
            Effect::Show { gallery: Some(GalleryPosition { index: 0, count: 3, .. }), .. }
        )));

        // Wheel up from the first item wraps to the last.
        let fx = c.handle(Event::Wheel { delta_y: -1.0 });
        let (id, request) = asset_request(&fx);
        assert_eq!(request.url, "https://site/c.jpg");
        c.handle(loaded(id, 100.0, 100.0));
        assert_eq!(c.gallery().map(|(_, i)| i), Some(2));

        let fx = c.handle(Event::Key(Key::Next));
        let (_, request) = asset_request(&fx);
        assert_eq!(request.url, "https://site/a.jpg");
    }

    #[test]
    fn tiny_gallery_asset_fails() {
        let set = rules(&[r#"{"r": "/album/", "g": {"entry": "li", "image": "img"}}"#]);
        let html = Html::parse_fragment(r#"<a href="https://site/album/1">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);

        let id = open_gallery(&mut c, &a);
        let fx = c.handle(Event::AssetLoaded {
            request: id,
            result: Ok(LoadedAsset {
                natural: Size::new(1.0, 1.0),
                byte_len: Some(43),
            }),
        });
        assert_eq!(c.phase(), Phase::Error);
        assert!(has_message(&fx));
    }

    #[test]
    fn empty_gallery_is_fatal() {
        let set = rules(&[r#"{"r": "/album/", "g": {"entry": "li.none"}}"#]);
        let html = Html::parse_fragment(r#"<a href="https://site/album/1">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);

        let (id, _) = document_request(&c.hover(hover(&a, 1, "https://site/album/1")));
        let fx = c.handle(page(id, "https://site/album/1", ALBUM));
        assert_eq!(c.phase(), Phase::Error);
        assert!(fx.contains(&Effect::Message("The gallery is empty".to_string())));
    }

    fn two_pages(input: &GalleryInput<'_>) -> GalleryFuture {
        let first = input.document.absolutize("/p1.jpg").unwrap();
        let next = input.document.absolutize("/album/1?page=2").unwrap();
        GalleryFuture::Deferred {
            request: FetchRequest::get(next, Duration::from_secs(1)),
            resume: Box::new(move |result| match result {
                Ok(response) => {
                    let doc = Document::parse(response.text, &response.final_url);
                    let second = doc.absolutize("/p2.jpg").unwrap();
                    GalleryFuture::ready(GalleryItems {
                        items: vec![GalleryItem::new(first), GalleryItem::new(second)],
                        title: None,
                    })
                }
                Err(e) => GalleryFuture::Ready(Err(e.into())),
            }),
        }
    }

    #[test]
    fn deferred_gallery_fetches_next_page() {
        let mut table = FunctionTable::new();
        table.register_gallery("two-pages", two_pages);
        let set = rules_with(&[r#"{"r": "/album/", "g": {"native": "two-pages"}}"#], table);
        let html = Html::parse_fragment(r#"<a href="https://site/album/1">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);

        let (id, _) = document_request(&c.hover(hover(&a, 1, "https://site/album/1")));
        let fx = c.handle(page(id, "https://site/album/1", "<p>1</p>"));
        let (page_id, request) = document_request(&fx);
        assert_eq!(request.url, "https://site/album/1?page=2");

        let fx = c.handle(page(page_id, "https://site/album/1?page=2", "<p>2</p>"));
        let (_, request) = asset_request(&fx);
        assert_eq!(request.url, "https://site/p1.jpg");
        assert_eq!(c.gallery().map(|(g, _)| g.len()), Some(2));
    }

    #[test]
    fn xhr_retry_for_listed_hosts() {
        let set = rules(&[r#"{"r": "x"}"#]);
        let html = Html::parse_fragment(r#"<a href="https://cdn.picky.example/x.jpg">x</a>"#);
        let a = element(&html, "a");
        let config = Config {
            xhr_retry_hosts: vec!["||picky.example".into()],
            ..instant()
        };
        let mut c = Controller::new(&set, config, VIEW);

        let (id, request) = asset_request(&c.hover(hover(&a, 1, "https://cdn.picky.example/x.jpg")));
        assert!(!request.via_fetch);
        let fx = c.handle(Event::AssetLoaded {
            request: id,
            result: Err(TransportError::Decode { url: request.url }),
        });
        assert!(!has_message(&fx));
        let (id, request) = asset_request(&fx);
        assert!(request.via_fetch);

        let fx = c.handle(Event::AssetLoaded {
            request: id,
            result: Err(TransportError::Decode { url: request.url }),
        });
        assert!(has_message(&fx));
    }

    #[test]
    fn nested_frame_requests_parent_view() {
        let set = rules(&[r#"{"r": "x"}"#]);
        let html = Html::parse_fragment(r#"<a href="https://x/">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), Size::new(300.0, 200.0)).nested();

        let (id, _) = asset_request(&c.hover(hover(&a, 1, "https://x/")));
        let fx = c.handle(loaded(id, 1000.0, 1000.0));
        assert!(fx.contains(&Effect::PostToParent(FrameMessage::RequestViewSize)));
        let small = c.scale().unwrap();

        let fx = c.handle(Event::Frame(FrameMessage::ViewSize(Size::new(1600.0, 1200.0))));
        assert!(fx.iter().any(|e| matches!(e, Effect::Place { .. })));
        assert!(c.scale().unwrap() > small);

        let mut top = Controller::new(&set, instant(), VIEW);
        assert_eq!(
            top.handle(Event::Frame(FrameMessage::RequestViewSize)),
            vec![Effect::ReplyToFrame(FrameMessage::ViewSize(VIEW))]
        );
    }

    #[test]
    fn progress_reports_buffering() {
        let set = rules(&[r#"{"r": "x"}"#]);
        let html = Html::parse_fragment(r#"<a href="https://x/">x</a>"#);
        let a = element(&html, "a");
        let mut c = Controller::new(&set, instant(), VIEW);
        let (id, _) = asset_request(&c.hover(hover(&a, 1, "https://x/")));
        let fx = c.handle(Event::Progress {
            request: id,
            loaded: 10,
            total: Some(100),
        });
        assert_eq!(
            fx,
            vec![Effect::Status(Status::Buffering {
                loaded: 10,
                total: Some(100)
            })]
        );
    }
}
