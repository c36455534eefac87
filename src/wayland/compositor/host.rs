//! Interfaces towards both ends of the proxy
//!
//! Requests towards the host compositor go through [`HostCompositor`], events towards the
//! guest client through [`ClientConnection`]. Objects on either side are referred to by opaque
//! ids, the implementations map them to their protocol objects.

use std::{fmt, os::unix::io::BorrowedFd};

use wayland_server::protocol::wl_shm;

use crate::{
    backend::allocator::Fourcc,
    utils::{Buffer, Fixed, Physical, Point, Size},
    wayland::buffer::BufferId,
};

use super::{CallbackId, SurfaceId};

macro_rules! host_id {
    ($($(#[$attr:meta])* $name:ident;)*) => {
        $(
            $(#[$attr])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);
        )*
    };
}

host_id! {
    /// A `wl_surface` of the host
    HostSurfaceId;
    /// A `wl_buffer` of the host
    HostBufferId;
    /// A `wl_callback` of the host
    HostCallbackId;
    /// A `wl_region` of the host
    HostRegionId;
    /// A `wp_viewport` of the host
    HostViewportId;
    /// A `zwp_linux_surface_synchronization_v1` of the host
    HostSyncId;
    /// A `wl_output`, shared between host and client
    OutputId;
}

/// Optional globals offered by the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCapabilities {
    /// `wp_viewporter` is available
    pub viewporter: bool,
    /// `zwp_linux_explicit_synchronization_v1` is available
    pub explicit_synchronization: bool,
    /// `zwp_linux_dmabuf_v1` is bound in a version supporting `create_immed`
    pub linux_dmabuf_v2: bool,
}

/// A plane of a dma-buf buffer
#[derive(Debug, Clone, Copy)]
pub struct DmabufPlane<'a> {
    /// File descriptor of the buffer
    pub fd: BorrowedFd<'a>,
    /// Index of the plane
    pub plane_idx: u32,
    /// Byte offset of the plane
    pub offset: u32,
    /// Stride of the plane
    pub stride: u32,
}

/// Connection to the host compositor
pub trait HostCompositor: fmt::Debug {
    /// Optional globals of the host
    fn capabilities(&self) -> HostCapabilities;
    /// The output of the built-in display, if any
    fn internal_output(&self) -> Option<OutputId>;

    /// Create a surface
    fn create_surface(&mut self) -> HostSurfaceId;
    /// Destroy a surface
    fn destroy_surface(&mut self, surface: HostSurfaceId);
    /// `wl_surface.attach`
    fn attach(&mut self, surface: HostSurfaceId, buffer: Option<HostBufferId>, offset: Point<i32, Physical>);
    /// `wl_surface.damage`
    fn damage(&mut self, surface: HostSurfaceId, x: i32, y: i32, width: i32, height: i32);
    /// `wl_surface.frame`
    fn frame(&mut self, surface: HostSurfaceId) -> HostCallbackId;
    /// `wl_surface.set_opaque_region`
    fn set_opaque_region(&mut self, surface: HostSurfaceId, region: Option<HostRegionId>);
    /// `wl_surface.set_input_region`
    fn set_input_region(&mut self, surface: HostSurfaceId, region: Option<HostRegionId>);
    /// `wl_surface.set_buffer_scale`
    fn set_buffer_scale(&mut self, surface: HostSurfaceId, scale: i32);
    /// `wl_surface.commit`
    fn commit(&mut self, surface: HostSurfaceId);

    /// Create a viewport for a surface
    fn create_viewport(&mut self, surface: HostSurfaceId) -> HostViewportId;
    /// `wp_viewport.set_source`
    fn set_viewport_source(&mut self, viewport: HostViewportId, x: Fixed, y: Fixed, width: Fixed, height: Fixed);
    /// `wp_viewport.set_destination`
    fn set_viewport_destination(&mut self, viewport: HostViewportId, width: i32, height: i32);
    /// Destroy a viewport
    fn destroy_viewport(&mut self, viewport: HostViewportId);

    /// Create the explicit synchronization object of a surface
    fn create_surface_synchronization(&mut self, surface: HostSurfaceId) -> HostSyncId;
    /// `zwp_linux_surface_synchronization_v1.set_acquire_fence`
    fn set_acquire_fence(&mut self, sync: HostSyncId, fence: BorrowedFd<'_>);
    /// Destroy an explicit synchronization object
    fn destroy_surface_synchronization(&mut self, sync: HostSyncId);

    /// Create a buffer in a temporary shm pool of `pool_size` bytes backed by `fd`
    fn create_shm_buffer(
        &mut self,
        fd: BorrowedFd<'_>,
        pool_size: u64,
        offset: i32,
        size: Size<i32, Buffer>,
        stride: i32,
        format: wl_shm::Format,
    ) -> HostBufferId;
    /// Create a dma-buf buffer through `create_immed`
    fn create_dmabuf_buffer(
        &mut self,
        planes: &[DmabufPlane<'_>],
        size: Size<i32, Buffer>,
        format: Fourcc,
    ) -> HostBufferId;
    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: HostBufferId);

    /// Create a region
    fn create_region(&mut self) -> HostRegionId;
    /// `wl_region.add`
    fn region_add(&mut self, region: HostRegionId, x: i32, y: i32, width: i32, height: i32);
    /// `wl_region.subtract`
    fn region_subtract(&mut self, region: HostRegionId, x: i32, y: i32, width: i32, height: i32);
    /// Destroy a region
    fn destroy_region(&mut self, region: HostRegionId);
}

/// Connection to the guest client
pub trait ClientConnection: fmt::Debug {
    /// `wl_buffer.release`
    fn buffer_release(&mut self, buffer: BufferId);
    /// `wl_surface.enter`
    fn surface_enter(&mut self, surface: SurfaceId, output: OutputId);
    /// `wl_surface.leave`
    fn surface_leave(&mut self, surface: SurfaceId, output: OutputId);
    /// `wl_callback.done`, destroying the callback
    fn callback_done(&mut self, callback: CallbackId, time: u32);
}

/// Frame timing and statistics collection
///
/// All hooks are optional.
pub trait FrameTiming: fmt::Debug {
    /// A buffer was attached
    fn on_attach(&mut self, _surface: SurfaceId, _buffer: Option<BufferId>) {}
    /// A surface was committed
    fn on_commit(&mut self, _surface: SurfaceId) {}
    /// A frame was presented
    fn add_frame(&mut self, _surface: SurfaceId, _steam_game_id: u32, _activated: bool) {}
}
