use std::fmt;

use crate::{
    utils::{Buffer, Region, Size},
    wayland::compositor::SurfaceId,
};

/// State of an X11 window, as far as surfaces are concerned
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowState {
    /// The window has a bounding shape
    pub shaped: bool,
    /// Bounding shape of the window, in window pixels
    pub shape_rectangles: Region<Buffer>,
    /// Window width in pixels
    pub width: i32,
    /// Window height in pixels
    pub height: i32,
    /// A host shell surface exists for the window
    pub has_xdg_surface: bool,
    /// The window was shown with content at least once
    pub realized: bool,
    /// The window has keyboard focus
    pub activated: bool,
    /// The client asked for fullscreen
    pub fullscreen: bool,
    /// The host made the window fullscreen
    pub compositor_fullscreen: bool,
    /// The window is minimized
    pub iconified: bool,
    /// The window has server side decorations
    pub decorated: bool,
    /// The window is presented in a container sized by the host, e.g. a game window
    pub containerized: bool,
    /// A borderless window left fullscreen, it is promoted back on its next frame
    pub maybe_promote_to_fullscreen: bool,
    /// Steam game id of the window, zero if unknown
    pub steam_game_id: u32,
    /// The viewport size is dictated by the window instead of its content
    pub viewport_override: bool,
    /// Dictated viewport width
    pub viewport_width: i32,
    /// Dictated viewport height
    pub viewport_height: i32,
    /// Viewport width last forwarded to the host
    pub viewport_width_realized: i32,
    /// Viewport height last forwarded to the host
    pub viewport_height_realized: i32,
}

/// Access to the X11 window manager
///
/// Windows are looked up through the surface they are paired with.
pub trait WindowManager: fmt::Debug {
    /// Window paired with the surface
    fn window(&self, surface: SurfaceId) -> Option<&WindowState>;

    /// Mutable access to the window paired with the surface
    fn window_mut(&mut self, surface: SurfaceId) -> Option<&mut WindowState>;

    /// Acknowledge a configure of the window, if the attached content matches it
    ///
    /// Returns true if a configure was acknowledged. Called repeatedly after every attach,
    /// until it returns false.
    fn process_pending_configure_acks(&mut self, surface: SurfaceId, contents: Size<i32, Buffer>) -> bool;

    /// Ask the host to make the window fullscreen
    fn set_fullscreen(&mut self, surface: SurfaceId);

    /// Re-evaluate the pairing and host side state of the window
    fn update(&mut self, surface: SurfaceId);

    /// Unpair the window from its destroyed surface
    fn unpair(&mut self, surface: SurfaceId);

    /// A surface was created, pair it with a window waiting for it
    fn surface_created(&mut self, surface: SurfaceId);
}
