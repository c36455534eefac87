//! Integer pixel regions used for damage tracking and window shapes

use std::marker::PhantomData;

use pixman::{Box32, Region32};

use super::geometry::Rectangle;

/// Largest coordinate a region may extend to
///
/// Kept well below `i32::MAX` so that scaling and outsetting damage never overflows.
pub const MAX_SIZE: i32 = i32::MAX / 10;
/// Smallest coordinate a region may extend to
pub const MIN_SIZE: i32 = i32::MIN / 10;

/// A set of integer pixels in a given coordinate space, backed by a [`pixman::Region32`]
///
/// The region is kept as y-x banded, non-overlapping rectangles, so every pixel is
/// visited exactly once when iterating [`Region::rects`].
pub struct Region<Kind> {
    inner: Region32,
    _kind: PhantomData<Kind>,
}

fn to_box<Kind>(rect: Rectangle<i32, Kind>) -> Box32 {
    Box32 {
        x1: rect.loc.x,
        y1: rect.loc.y,
        x2: rect.right(),
        y2: rect.bottom(),
    }
}

fn from_box<Kind>(b: &Box32) -> Rectangle<i32, Kind> {
    Rectangle::from_extremities((b.x1, b.y1), (b.x2, b.y2))
}

impl<Kind> Region<Kind> {
    fn wrap(inner: Region32) -> Self {
        Region {
            inner,
            _kind: PhantomData,
        }
    }

    /// An empty region
    pub fn new() -> Self {
        Region::wrap(Region32::init_rects(&[]))
    }

    /// A region covering the given rectangle
    pub fn from_rect(rect: Rectangle<i32, Kind>) -> Self {
        if rect.is_empty() {
            return Region::new();
        }
        Region::wrap(Region32::init_rect(
            rect.loc.x,
            rect.loc.y,
            rect.size.w as u32,
            rect.size.h as u32,
        ))
    }

    /// A region covering everything a surface could ever contain
    pub fn infinite() -> Self {
        Region::from_rect(Rectangle::from_extremities((0, 0), (MAX_SIZE, MAX_SIZE)))
    }

    /// Add a rectangle to this region
    pub fn union_rect(&mut self, rect: Rectangle<i32, Kind>) {
        if rect.is_empty() {
            return;
        }
        let mut boxes = self.inner.rectangles().to_vec();
        boxes.push(to_box(rect));
        self.inner = Region32::init_rects(&boxes);
    }

    /// Add a rectangle given by its location and size, empty or negative sizes add nothing
    pub fn union_xywh(&mut self, x: i32, y: i32, width: i32, height: i32) {
        if width <= 0 || height <= 0 {
            return;
        }
        self.union_rect(Rectangle::from_extremities(
            (x, y),
            (x.saturating_add(width), y.saturating_add(height)),
        ));
    }

    /// Restrict this region to the given rectangle
    pub fn intersect_rect(&self, bounds: Rectangle<i32, Kind>) -> Region<Kind> {
        let bounds = Region::from_rect(bounds);
        Region::wrap(self.inner.intersect(&bounds.inner))
    }

    /// Remove all rectangles
    pub fn clear(&mut self) {
        self.inner = Region32::init_rects(&[]);
    }

    /// Whether this region contains no pixel
    pub fn is_empty(&self) -> bool {
        self.inner.rectangles().is_empty()
    }

    /// Non-overlapping rectangles making up this region
    pub fn rects(&self) -> impl Iterator<Item = Rectangle<i32, Kind>> + '_ {
        self.inner.rectangles().iter().map(from_box)
    }

    /// The underlying pixman region
    pub fn as_pixman(&self) -> &Region32 {
        &self.inner
    }
}

impl<Kind> Default for Region<Kind> {
    fn default() -> Self {
        Region::new()
    }
}

impl<Kind> Clone for Region<Kind> {
    fn clone(&self) -> Self {
        Region::wrap(Region32::init_rects(self.inner.rectangles()))
    }
}

impl<Kind> std::fmt::Debug for Region<Kind> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rects()).finish()
    }
}

impl<Kind> PartialEq for Region<Kind> {
    fn eq(&self, other: &Self) -> bool {
        self.rects().eq(other.rects())
    }
}
