//! Candidate rectangles and the geometric noise filter.

/// Axis-aligned rectangle in pixel coordinates (`w`/`h` are inclusive extents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.w)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Grow by `pad` on every side, clamped to `[0, bound_w) x [0, bound_h)`.
    pub fn padded(&self, pad: u32, bound_w: u32, bound_h: u32) -> Rect {
        let x0 = self.x.saturating_sub(pad).min(bound_w);
        let y0 = self.y.saturating_sub(pad).min(bound_h);
        let x1 = self.right().saturating_add(pad).min(bound_w);
        let y1 = self.bottom().saturating_add(pad).min(bound_h);
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }
}

/// Display window the extractor measures candidates against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub width: u32,
    pub height: u32,
}

impl Window {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

pub const MAX_PLATE_WIDTH: u32 = 70;
pub const MAX_PLATE_HEIGHT: u32 = 40;
pub const MIN_PLATE_WIDTH: u32 = 15;
pub const MIN_HEIGHT_FRACTION: f32 = 0.03;
pub const MIN_WIDTH_FRACTION: f32 = 0.05;
pub const MIN_ASPECT: f32 = 0.45;
pub const MAX_ASPECT: f32 = 0.55;

/// True when `rect` cannot be a door plate in a `window`-sized view.
///
/// Pure function of the rectangle and window; anything wider than
/// `MAX_PLATE_WIDTH` is always rejected.
pub fn is_noise(rect: Rect, window: Window) -> bool {
    if rect.w > MAX_PLATE_WIDTH || rect.h > MAX_PLATE_HEIGHT || rect.w < MIN_PLATE_WIDTH {
        return true;
    }
    let (w, h) = (rect.w as f32, rect.h as f32);
    if h < MIN_HEIGHT_FRACTION * window.height as f32 || w < MIN_WIDTH_FRACTION * window.width as f32
    {
        return true;
    }
    let aspect = h / w;
    !(MIN_ASPECT..=MAX_ASPECT).contains(&aspect)
}
