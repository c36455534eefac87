//! Client side `wp_viewport` state
//!
//! A client may attach one viewport to each of its surfaces, cropping the content
//! to a source rectangle and scaling it to a destination size. The proxy keeps the
//! last requested values per surface and derives from them:
//!
//! - the mapping between surface coordinates and content pixels, used to translate damage
//!   (see [`compute_buffer_scale_and_offset`])
//! - the viewport forwarded to the host, combined with the guest scale
//!
//! Unset values are represented by `-1`, like on the wire.

use crate::utils::{Buffer, Fixed, Logical, Point, Scale, Size};

/// Source rectangle and destination size of a viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Left edge of the source rectangle
    pub src_x: Fixed,
    /// Top edge of the source rectangle
    pub src_y: Fixed,
    /// Width of the source rectangle
    pub src_width: Fixed,
    /// Height of the source rectangle
    pub src_height: Fixed,
    /// Destination width
    pub dst_width: i32,
    /// Destination height
    pub dst_height: i32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            src_x: Fixed::from_int(-1),
            src_y: Fixed::from_int(-1),
            src_width: Fixed::from_int(-1),
            src_height: Fixed::from_int(-1),
            dst_width: -1,
            dst_height: -1,
        }
    }
}

impl Viewport {
    /// Set the source rectangle, `-1` in all values unsets it
    pub fn set_source(&mut self, x: Fixed, y: Fixed, width: Fixed, height: Fixed) {
        self.src_x = x;
        self.src_y = y;
        self.src_width = width;
        self.src_height = height;
    }

    /// Set the destination size, `-1` in both values unsets it
    pub fn set_destination(&mut self, width: i32, height: i32) {
        self.dst_width = width;
        self.dst_height = height;
    }

    /// Whether the source rectangle is set
    pub fn has_source(&self) -> bool {
        self.src_x.non_negative()
            && self.src_y.non_negative()
            && self.src_width.non_negative()
            && self.src_height.non_negative()
    }

    /// Whether the destination size is set
    pub fn has_destination(&self) -> bool {
        self.dst_width >= 0 && self.dst_height >= 0
    }
}

/// Scale and offset from surface coordinates to content pixels
///
/// A surface point `p` covers the content pixel `p * scale + offset`.
///
/// `contents_scale` is the buffer scale of the surface and `contents` the size of the
/// attached content. Without a viewport the mapping is a plain scale by `contents_scale`.
pub fn compute_buffer_scale_and_offset(
    contents_scale: f64,
    contents: Size<i32, Buffer>,
    viewport: Option<&Viewport>,
) -> (Scale, Point<Fixed, Logical>) {
    let mut scale = Scale::from(contents_scale);
    let mut offset = Point::from((Fixed::default(), Fixed::default()));

    let Some(viewport) = viewport else {
        return (scale, offset);
    };

    if viewport.src_x.non_negative() && viewport.src_y.non_negative() {
        offset = Point::from((viewport.src_x, viewport.src_y));
    }

    if viewport.dst_width > 0 && viewport.dst_height > 0 {
        let contents = contents.to_f64();
        scale.x *= contents.w / viewport.dst_width as f64;
        scale.y *= contents.h / viewport.dst_height as f64;

        // with only a source rectangle the surface takes its size, so it does not scale
        if viewport.src_width.non_negative() && viewport.src_height.non_negative() {
            scale.x *= viewport.src_width.to_f64() / contents.w;
            scale.y *= viewport.src_height.to_f64() / contents.h;
        }
    }

    (scale, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_viewport_uses_contents_scale() {
        let (scale, offset) = compute_buffer_scale_and_offset(2.0, (100, 100).into(), None);
        assert_eq!(scale, Scale::from(2.0));
        assert_eq!(offset, Point::from((Fixed::from_int(0), Fixed::from_int(0))));
    }

    #[test]
    fn destination_scales_contents() {
        let mut viewport = Viewport::default();
        viewport.set_destination(100, 50);
        let (scale, offset) = compute_buffer_scale_and_offset(1.0, (200, 100).into(), Some(&viewport));
        assert_eq!(scale, Scale::from(2.0));
        assert_eq!(offset, Point::from((Fixed::from_int(0), Fixed::from_int(0))));

        let (scale, _) = compute_buffer_scale_and_offset(2.0, (200, 100).into(), Some(&viewport));
        assert_eq!(scale, Scale::from(4.0));
    }

    #[test]
    fn source_rectangle_offsets_and_scales() {
        let mut viewport = Viewport::default();
        viewport.set_source(
            Fixed::from_int(10),
            Fixed::from_int(20),
            Fixed::from_int(50),
            Fixed::from_int(50),
        );
        let (scale, offset) = compute_buffer_scale_and_offset(1.0, (200, 100).into(), Some(&viewport));
        assert_eq!(scale, Scale::from(1.0));
        assert_eq!(offset, Point::from((Fixed::from_int(10), Fixed::from_int(20))));

        viewport.set_destination(100, 100);
        let (scale, _) = compute_buffer_scale_and_offset(1.0, (200, 100).into(), Some(&viewport));
        assert_eq!(scale, Scale::from((0.5, 0.5)));
    }
}
