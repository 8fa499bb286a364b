//! Core type definitions shared by the matcher, gallery and controller.

use std::collections::VecDeque;

// =============================================================================
// Geometry
// =============================================================================

/// Width/height pair in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub w: f64,
    pub h: f64,
}

impl Size {
    pub const fn new(w: f64, h: f64) -> Self {
        Self { w, h }
    }

    /// True when either side is zero, negative or not finite.
    pub fn is_empty(&self) -> bool {
        !(self.w.is_finite() && self.h.is_finite() && self.w > 0.0 && self.h > 0.0)
    }

    pub fn scaled(&self, scale: f64) -> Self {
        Self::new(self.w * scale, self.h * scale)
    }
}

/// A point in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn size(&self) -> Size {
        Size::new(self.w, self.h)
    }
}

// =============================================================================
// Rule Identity
// =============================================================================

/// Position of a rule in the ordered rule set. Stable for the set's lifetime
/// and used as the key of the compiled-rule cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub usize);

// =============================================================================
// Match Result
// =============================================================================

/// Outcome of applying one rule to a node/URL.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Primary resolved URL. Empty means matched but suppressed.
    pub url: String,
    /// Alternative URLs tried in order after a failure.
    pub fallback: VecDeque<String>,
    /// Rule that produced this result.
    pub rule: RuleId,
    /// Capture groups of the regex/pattern match; index 0 is the whole match.
    pub captures: Vec<Option<String>>,
    /// Load the asset through a same-origin fetch instead of directly.
    pub xhr: bool,
    /// Fetch without credentials or referer.
    pub anonymous: bool,
    /// Only activate on an explicit trigger.
    pub manual: bool,
    /// Apply the video/tab display fix when shown.
    pub tabfix: bool,
    /// POST body; `Some` switches remote fetches to POST.
    pub post: Option<String>,
    /// The rule carries a remote extractor (`q`).
    pub has_extractor: bool,
    /// The rule carries a gallery directive (`g`).
    pub has_gallery: bool,
    /// Selector of the element whose rectangle anchors the popup.
    pub rect: Option<String>,
    /// Extra CSS to inject for the popup.
    pub css: Option<String>,
}

impl MatchResult {
    /// Matched but intentionally suppressed: no popup.
    pub fn is_suppressed(&self) -> bool {
        self.url.is_empty()
    }

    /// Remote document must be fetched before an asset can be shown.
    pub fn needs_document(&self) -> bool {
        self.has_extractor || self.has_gallery
    }
}

// =============================================================================
// Gallery
// =============================================================================

/// One logical gallery entry: format alternatives plus a description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryItem {
    pub urls: Vec<String>,
    pub caption: Option<String>,
}

impl GalleryItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            caption: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        let caption = caption.into();
        self.caption = if caption.is_empty() { None } else { Some(caption) };
        self
    }

    /// The preferred URL of the item.
    pub fn url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }
}

/// Ordered gallery plus optional collection title.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GalleryItems {
    pub items: Vec<GalleryItem>,
    pub title: Option<String>,
}

impl GalleryItems {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
