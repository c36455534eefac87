//! X11 window integration
//!
//! X11 clients reach the proxy through Xwayland, whose surfaces get paired with the X11 windows
//! they display. The window manager side of the proxy is not part of this crate, surfaces
//! consult it through the [`WindowManager`] trait and read the [`WindowState`] it keeps for
//! every window.
//!
//! Windows using the X11 SHAPE extension are presented by stamping their bounding shape out
//! of their content, see [`shape`].

pub mod shape;
mod window;

pub use self::window::{WindowManager, WindowState};
