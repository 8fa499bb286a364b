//! Scale ladder, popup placement and the scale-gain heuristic
//!
//! Pure geometry; no state. Sizes are CSS pixels, scales are multiples of
//! the asset's natural size.

use crate::types::{Point, Rect, Size};

/// Hard upper bound of the auto ladder.
pub const MAX_SCALE: f64 = 16.0;

/// Smallest fit scale; a view no larger than the extents still shows the
/// asset, just tiny.
pub const MIN_SCALE: f64 = 0.01;

/// Ladder entries closer than this to their predecessor are dropped.
const MIN_STEP_GAP: f64 = 0.01;

// =============================================================================
// Natural Size / Scale Gain
// =============================================================================

/// The first non-empty of the size the loaded element reports and a size
/// declared elsewhere (attributes, metadata).
pub fn natural_size(reported: Size, declared: Option<Size>) -> Size {
    if !reported.is_empty() {
        return reported;
    }
    declared.filter(|s| !s.is_empty()).unwrap_or_default()
}

/// How much larger the intrinsic image is than its rendering: the larger of
/// the width and height ratios. `None` when neither ratio is finite.
pub fn scale_gain(natural: Size, rendered: Size) -> Option<f64> {
    let ratios = [natural.w / rendered.w, natural.h / rendered.h];
    ratios
        .into_iter()
        .filter(|r| r.is_finite())
        .fold(None, |best: Option<f64>, r| Some(best.map_or(r, |b| b.max(r))))
}

/// Scale at which `natural` plus `extents` fits in `view`, never below
/// [`MIN_SCALE`].
pub fn fit_scale(natural: Size, view: Size, extents: Size) -> f64 {
    if natural.is_empty() {
        return 1.0;
    }
    let w = (view.w - extents.w).max(0.0) / natural.w;
    let h = (view.h - extents.h).max(0.0) / natural.h;
    let fit = w.min(h);
    if fit.is_finite() {
        fit.max(MIN_SCALE)
    } else {
        1.0
    }
}

// =============================================================================
// Scale Tokens
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleValue {
    Fit,
    Fixed(f64),
}

/// One user-declared ladder entry: `"0.5"`, `"fit"`, `"1!"` (zoom-out
/// cutoff), `"2*"` (default zoom target).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleToken {
    pub value: ScaleValue,
    pub cutoff: bool,
    pub target: bool,
}

impl ScaleToken {
    pub fn parse(token: &str) -> Option<Self> {
        let mut body = token.trim();
        let mut cutoff = false;
        let mut target = false;
        loop {
            if let Some(rest) = body.strip_suffix('!') {
                cutoff = true;
                body = rest;
            } else if let Some(rest) = body.strip_suffix('*') {
                target = true;
                body = rest;
            } else {
                break;
            }
        }
        let value = if body.eq_ignore_ascii_case("fit") {
            ScaleValue::Fit
        } else {
            let v: f64 = body.parse().ok()?;
            if !v.is_finite() || v <= 0.0 {
                return None;
            }
            ScaleValue::Fixed(v)
        };
        Some(Self { value, cutoff, target })
    }

    fn resolve(&self, fit: f64) -> f64 {
        match self.value {
            ScaleValue::Fit => fit,
            ScaleValue::Fixed(v) => v,
        }
    }
}

// =============================================================================
// Scale Ladder
// =============================================================================

/// Inputs of [`ScaleLadder::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct LadderOptions {
    /// Multiplicative step of the auto ladder, > 1.
    pub zoom_step: f64,
    /// Explicit ladder; empty means auto.
    pub tokens: Vec<ScaleToken>,
    /// Start above 1x when the asset is smaller than the view.
    pub enlarge_small: bool,
}

/// Permissible zoom scales for one popup.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleLadder {
    /// Strictly increasing.
    pub steps: Vec<f64>,
    /// Unzoomed scale.
    pub base: f64,
    pub fit: f64,
    /// Zooming out below this unzooms.
    cutoff: f64,
    /// Where a zoom-in lands.
    target: Option<f64>,
}

impl ScaleLadder {
    pub fn build(natural: Size, view: Size, extents: Size, options: &LadderOptions) -> Self {
        let fit = fit_scale(natural, view, extents);
        let base = if options.enlarge_small && fit > 1.0 {
            fit
        } else {
            fit.min(1.0)
        };

        if !options.tokens.is_empty() {
            return Self::custom(fit, base, &options.tokens);
        }

        let step = if options.zoom_step > 1.0 { options.zoom_step } else { 1.25 };
        let goal = if fit > 1.0 { fit } else { 1.0 };
        let mut steps = vec![base];
        let mut s = base;
        while s * step < goal {
            s *= step;
            steps.push(s);
        }
        steps.push(goal);
        let mut s = goal;
        while s * step <= MAX_SCALE {
            s *= step;
            steps.push(s);
        }
        let steps = dedupe(steps);
        let cutoff = steps.get(1).copied().unwrap_or(base);

        Self {
            steps,
            base,
            fit,
            cutoff,
            target: None,
        }
    }

    fn custom(fit: f64, base: f64, tokens: &[ScaleToken]) -> Self {
        let mut resolved: Vec<(f64, &ScaleToken)> = tokens.iter().map(|t| (t.resolve(fit), t)).collect();
        resolved.sort_by(|a, b| a.0.total_cmp(&b.0));

        let steps = dedupe(resolved.iter().map(|(v, _)| *v).collect());
        let cutoff = resolved
            .iter()
            .find(|(_, t)| t.cutoff)
            .map(|(v, _)| *v)
            .unwrap_or_else(|| steps.first().copied().unwrap_or(base));
        let target = resolved.iter().find(|(_, t)| t.target).map(|(v, _)| *v);

        Self {
            steps,
            base,
            fit,
            cutoff,
            target,
        }
    }

    pub fn scale(&self, index: usize) -> f64 {
        self.steps.get(index).copied().unwrap_or(self.base)
    }

    /// Index a zoom-in from the unzoomed state lands on: the target entry,
    /// else the first entry above the base scale, else the last entry.
    pub fn zoom_in_index(&self) -> usize {
        if let Some(target) = self.target {
            if let Some(i) = self.index_of(target) {
                return i;
            }
        }
        self.steps
            .iter()
            .position(|&s| s > self.base + MIN_STEP_GAP)
            .unwrap_or_else(|| self.steps.len().saturating_sub(1))
    }

    /// Move `delta` entries from `index` while zoomed. `None` means the move
    /// dropped below the cutoff and the popup should unzoom.
    pub fn step(&self, index: usize, delta: i32) -> Option<usize> {
        let next = index as i64 + delta as i64;
        if next < 0 {
            return None;
        }
        let next = (next as usize).min(self.steps.len().saturating_sub(1));
        if self.steps[next] + MIN_STEP_GAP < self.cutoff {
            return None;
        }
        Some(next)
    }

    fn index_of(&self, value: f64) -> Option<usize> {
        self.steps.iter().position(|&s| (s - value).abs() < MIN_STEP_GAP)
    }
}

fn dedupe(sorted: Vec<f64>) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::with_capacity(sorted.len());
    for v in sorted {
        match out.last() {
            Some(&last) if v - last < MIN_STEP_GAP => {}
            _ => out.push(v),
        }
    }
    out
}

// =============================================================================
// Placement
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementMode {
    /// Left or right of the anchor.
    Beside,
    /// Above or below the anchor.
    Vertical,
    /// Centered, biased toward the pointer on overflowing axes.
    Centered,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub rect: Rect,
    pub mode: PlacementMode,
}

/// Position a popup box of size `popup` (scaled asset plus extents) in
/// `view`. Zoomed popups are always centered.
pub fn place(view: Size, popup: Size, anchor: Option<Rect>, pointer: Point, zoomed: bool) -> Placement {
    if let (Some(anchor), false) = (anchor, zoomed) {
        let center = anchor.center();

        if popup.w <= view.w && popup.h <= view.h {
            let x = if center.x < view.w / 2.0 {
                anchor.right()
            } else {
                anchor.x - popup.w
            };
            if x >= 0.0 && x + popup.w <= view.w {
                let y = clamp(center.y - popup.h / 2.0, 0.0, view.h - popup.h);
                return Placement {
                    rect: Rect::new(x, y, popup.w, popup.h),
                    mode: PlacementMode::Beside,
                };
            }

            let y = if center.y < view.h / 2.0 {
                anchor.bottom()
            } else {
                anchor.y - popup.h
            };
            if y >= 0.0 && y + popup.h <= view.h {
                let x = clamp(center.x - popup.w / 2.0, 0.0, view.w - popup.w);
                return Placement {
                    rect: Rect::new(x, y, popup.w, popup.h),
                    mode: PlacementMode::Vertical,
                };
            }
        }
    }

    Placement {
        rect: Rect::new(
            centered_axis(view.w, popup.w, pointer.x),
            centered_axis(view.h, popup.h, pointer.y),
            popup.w,
            popup.h,
        ),
        mode: PlacementMode::Centered,
    }
}

/// Offset along one axis: centered when it fits, otherwise sliding with the
/// pointer between the two edges.
fn centered_axis(view: f64, full: f64, pointer: f64) -> f64 {
    if full <= view {
        return (view - full) / 2.0;
    }
    let k = clamp((pointer / view - 0.2) * 5.0 / 3.0, 0.0, 1.0);
    (view - full) * k
}

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi.max(lo))
}
