//! Reexports of crates, that are part of the public api, for convenience

pub use calloop;
pub use drm_fourcc;
#[cfg(feature = "backend_drm")]
pub use drm_ffi;
pub use pixman;
pub use rustix;
pub use wayland_server;
