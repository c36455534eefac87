//! Coordinate translation between guest and host
//!
//! Guest clients draw in guest pixels, the host compositor expects its own coordinate space.
//! The [`Transform`] trait is consulted whenever the proxy forwards a position, a damage
//! rectangle or a viewport destination to the host.
//!
//! [`ScaleTransform`] implements the translation through a single global scale factor, see
//! [`ProxyConfig::scale`].

use std::fmt;

use tracing::trace;

use crate::{
    config::ProxyConfig,
    utils::{
        region::{MAX_SIZE, MIN_SIZE},
        Logical, Physical, Point, Scale, Size,
    },
    wayland::compositor::SurfaceId,
    xwayland::WindowState,
};

/// Damage rectangle given by its extremities
///
/// Wide integers keep the outset applied during translation from overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageBox {
    /// Left edge
    pub x1: i64,
    /// Top edge
    pub y1: i64,
    /// Right edge, exclusive
    pub x2: i64,
    /// Bottom edge, exclusive
    pub y2: i64,
}

impl DamageBox {
    /// Box of the rectangle at `(x, y)` with the given size
    pub fn from_xywh(x: i64, y: i64, width: i64, height: i64) -> DamageBox {
        DamageBox {
            x1: x,
            y1: y,
            x2: x + width,
            y2: y + height,
        }
    }

    /// Position and size of the box, saturated to the 32 bit wire range
    pub fn to_xywh(self) -> (i32, i32, i32, i32) {
        let clamp = |v: i64| v.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        (
            clamp(self.x1),
            clamp(self.y1),
            clamp(self.x2 - self.x1),
            clamp(self.y2 - self.y1),
        )
    }
}

/// Translation of coordinates and sizes from guest to host space
pub trait Transform: fmt::Debug {
    /// Translate a position
    ///
    /// `surface` is `None` for objects not tied to a surface, like regions.
    fn guest_to_host(&self, surface: Option<SurfaceId>, point: Point<i32, Logical>) -> Point<i32, Physical>;

    /// Translate a damage rectangle
    ///
    /// `buffer_scale` is the factor between the coordinate space of `damage` and surface
    /// coordinates. The result encloses the translated damage.
    fn damage_coord(&self, surface: SurfaceId, buffer_scale: Scale, damage: DamageBox) -> DamageBox;

    /// Compute the host viewport destination of a surface of the given size
    ///
    /// Returns `None` if no destination should be set.
    fn viewport_scale(
        &self,
        surface: SurfaceId,
        window: Option<&WindowState>,
        contents_scale: f64,
        size: Size<i32, Logical>,
    ) -> Option<Size<i32, Physical>>;

    /// Forget any scale specific to the surface, called when it enters an output
    fn reset_surface_scale(&mut self, surface: SurfaceId);

    /// Give the surface of a window a scale of its own if its size in guest pixels would not
    /// survive a round trip through host coordinates under the default scale
    ///
    /// Called after [`Transform::reset_surface_scale`] when the surface of a window enters
    /// an output.
    fn try_window_scale(&mut self, surface: SurfaceId, size: Size<i32, Logical>);
}

/// [`Transform`] dividing by a global scale factor
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleTransform {
    scale: f64,
    stable_scaling: bool,
}

impl ScaleTransform {
    /// Create a new transform
    pub fn new(scale: f64, stable_scaling: bool) -> Self {
        ScaleTransform { scale, stable_scaling }
    }

    /// Create a transform matching the given configuration
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.scale, config.stable_scaling)
    }

    fn position(&self, value: i32) -> i32 {
        if self.stable_scaling {
            (value as f64 / self.scale).floor() as i32
        } else {
            (value as f64 / self.scale) as i32
        }
    }

    fn size(&self, value: i32, scale: f64) -> i32 {
        (value as f64 / scale).ceil() as i32
    }
}

impl Transform for ScaleTransform {
    fn guest_to_host(&self, _surface: Option<SurfaceId>, point: Point<i32, Logical>) -> Point<i32, Physical> {
        (self.position(point.x), self.position(point.y)).into()
    }

    fn damage_coord(&self, _surface: SurfaceId, buffer_scale: Scale, damage: DamageBox) -> DamageBox {
        let sx = buffer_scale.x * self.scale;
        let sy = buffer_scale.y * self.scale;

        // outset by one pixel to account for filtering
        DamageBox {
            x1: ((damage.x1 - 1).max(MIN_SIZE as i64) as f64 / sx) as i64,
            y1: ((damage.y1 - 1).max(MIN_SIZE as i64) as f64 / sy) as i64,
            x2: ((damage.x2 + 1).min(MAX_SIZE as i64) as f64 / sx).ceil() as i64,
            y2: ((damage.y2 + 1).min(MAX_SIZE as i64) as f64 / sy).ceil() as i64,
        }
    }

    fn viewport_scale(
        &self,
        surface: SurfaceId,
        window: Option<&WindowState>,
        contents_scale: f64,
        size: Size<i32, Logical>,
    ) -> Option<Size<i32, Physical>> {
        if let Some(window) = window.filter(|window| window.viewport_override) {
            trace!(?surface, "Using viewport override of window");
            return Some((window.viewport_width, window.viewport_height).into());
        }

        let scale = self.scale * contents_scale;
        Some((self.size(size.w, scale), self.size(size.h, scale)).into())
    }

    fn reset_surface_scale(&mut self, _surface: SurfaceId) {}

    // a single global scale has no per surface state
    fn try_window_scale(&mut self, _surface: SurfaceId, _size: Size<i32, Logical>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    const SURFACE: SurfaceId = SurfaceId(1);

    #[test]
    fn positions_truncate_unless_stable() {
        let truncating = ScaleTransform::new(2.0, false);
        let stable = ScaleTransform::new(2.0, true);
        let point = Point::<i32, Logical>::from((-3, 5));
        assert_eq!(truncating.guest_to_host(None, point), (-1, 2).into());
        assert_eq!(stable.guest_to_host(None, point), (-2, 2).into());
    }

    #[test]
    fn damage_is_outset_and_enclosing() {
        let transform = ScaleTransform::new(2.0, false);
        let damage = transform.damage_coord(SURFACE, Scale::from(1.0), DamageBox::from_xywh(10, 10, 5, 5));
        assert_eq!(
            damage,
            DamageBox {
                x1: 4,
                y1: 4,
                x2: 8,
                y2: 8
            }
        );
    }

    #[test]
    fn infinite_damage_does_not_overflow() {
        let transform = ScaleTransform::new(1.0, false);
        let damage = transform.damage_coord(
            SURFACE,
            Scale::from(1.0),
            DamageBox::from_xywh(0, 0, i32::MAX as i64, i32::MAX as i64),
        );
        assert_eq!(damage.x2, MAX_SIZE as i64);
        assert_eq!(damage.x1, -1);
    }

    #[test]
    fn viewport_destination_rounds_up() {
        let transform = ScaleTransform::new(2.0, false);
        let size = transform.viewport_scale(SURFACE, None, 1.0, (101, 50).into());
        assert_eq!(size, Some((51, 25).into()));
    }

    #[test]
    fn viewport_override_wins() {
        let transform = ScaleTransform::new(2.0, false);
        let window = WindowState {
            viewport_override: true,
            viewport_width: 640,
            viewport_height: 480,
            ..Default::default()
        };
        let size = transform.viewport_scale(SURFACE, Some(&window), 1.0, (101, 50).into());
        assert_eq!(size, Some((640, 480).into()));
    }
}
