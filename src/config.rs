//! Runtime configuration of the proxy
//!
//! The configuration is passed to [`CompositorState::new`](crate::wayland::compositor::CompositorState::new)
//! as part of the [`ProxyContext`](crate::wayland::compositor::ProxyContext) and is never mutated
//! afterwards.

/// Options controlling how client surfaces are translated to the host
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    /// Factor between guest and host coordinates
    pub scale: f64,
    /// Round coordinates to the closest representable value instead of truncating
    ///
    /// Keeps adjacent surfaces from drifting apart under fractional scales.
    pub stable_scaling: bool,
    /// Clip X11 windows to their bounding shape
    pub enable_xshape: bool,
    /// Forward fences of the virtualized GPU through explicit synchronization
    pub use_explicit_fence: bool,
    /// Offer `wl_surface.damage_buffer` to clients
    pub support_damage_buffer: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            scale: 1.0,
            stable_scaling: false,
            enable_xshape: false,
            use_explicit_fence: false,
            support_damage_buffer: true,
        }
    }
}
