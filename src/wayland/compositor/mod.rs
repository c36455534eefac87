//! Proxying of surfaces and regions
//!
//! This module implements the `wl_compositor` side of the proxy. Every client surface is backed
//! by a surface of the host, and every request of the client is translated for the host:
//!
//! - positions, damage and viewports go through the [`Transform`] of the [`ProxyContext`]
//! - content in memory the host cannot read is copied into host visible buffers on commit,
//!   see [`Surface`]
//! - GPU work on dma-buf content is synchronized before the host gets to see it
//!
//! ## How to use it
//!
//! The protocol layer owns a [`CompositorState`] built from a [`ProxyContext`], which carries
//! the connections to the host and the client as well as every other collaborator of the
//! proxy. Client requests are fed through [`CompositorState::surface_request`] and
//! [`CompositorState::region_request`], events of the host through
//! [`CompositorState::handle_host_event`], possibly with the help of a [`HostEventSource`]
//! inserted into the event loop.
//!
//! ```no_run
//! # use guest_proxy::wayland::compositor::*;
//! # fn ctx() -> ProxyContext { unimplemented!() }
//! let mut state = CompositorState::new(ctx());
//! state.create_surface(SurfaceId(3)).unwrap();
//! state.surface_request(SurfaceId(3), SurfaceRequest::Damage { x: 0, y: 0, width: 64, height: 64 }).unwrap();
//! state.surface_request(SurfaceId(3), SurfaceRequest::Commit).unwrap();
//! state.handle_host_event(HostEvent::BufferRelease(HostBufferId(12)));
//! ```

use std::{collections::HashMap, fmt, os::unix::io::OwnedFd, rc::Rc};

use indexmap::IndexMap;
use tracing::{debug, trace, warn};
use wayland_server::protocol::wl_shm;

mod copy;
pub mod host;
mod pool;
mod region;
mod source;
mod surface;

pub use self::host::{
    ClientConnection, DmabufPlane, FrameTiming, HostBufferId, HostCallbackId, HostCapabilities,
    HostCompositor, HostRegionId, HostSurfaceId, HostSyncId, HostViewportId, OutputId,
};
pub use self::pool::{BufferState, OutputBuffer, OutputBufferId, OutputBufferPool};
pub use self::region::RegionRequest;
pub use self::source::{HostEventSender, HostEventSource};
pub use self::surface::Surface;

use crate::{
    backend::{channel::WaylandChannel, sync::FenceSync},
    config::ProxyConfig,
    utils::Fixed,
    wayland::{
        buffer::{BufferId, ClientBuffer},
        dmabuf::{self, DmabufError, DmabufParams},
        shm::{PoolId, ShmError, ShmPool},
        transform::Transform,
        viewporter::Viewport,
    },
    xwayland::WindowManager,
};

/// Highest `wl_compositor` version, offered with `wl_surface.damage_buffer`
pub const COMPOSITOR_VERSION: u32 = 4;
/// `wl_compositor` version offered without `wl_surface.damage_buffer`
pub const COMPOSITOR_VERSION_NO_DAMAGE_BUFFER: u32 = 3;

/// A client `wl_surface`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wl_surface@{}", self.0)
    }
}

/// A client `wl_callback`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub u32);

/// A client `wl_region`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u32);

/// Collaborators of the proxy
///
/// Everything the surface logic talks to is reached through this context, there is no global
/// state. Tests substitute any of the trait objects.
#[derive(Debug)]
pub struct ProxyContext {
    /// Runtime configuration
    pub config: ProxyConfig,
    /// Connection to the host compositor
    pub host: Box<dyn HostCompositor>,
    /// Connection to the guest client
    pub client: Box<dyn ClientConnection>,
    /// Virtualization transport, allocating host visible memory
    pub channel: Rc<dyn WaylandChannel>,
    /// Guest to host coordinate translation
    pub transform: Box<dyn Transform>,
    /// X11 window state
    pub windows: Box<dyn WindowManager>,
    /// GPU fence handling
    pub fences: Box<dyn FenceSync>,
    /// Optional frame statistics
    pub timing: Option<Box<dyn FrameTiming>>,
}

/// Requests of a client `wl_surface`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceRequest {
    /// Attach a buffer, `None` detaches the current one
    Attach {
        /// The buffer
        buffer: Option<BufferId>,
        /// Horizontal offset
        x: i32,
        /// Vertical offset
        y: i32,
    },
    /// Damage in surface coordinates
    Damage {
        /// Left edge
        x: i32,
        /// Top edge
        y: i32,
        /// Width
        width: i32,
        /// Height
        height: i32,
    },
    /// Damage in buffer coordinates
    DamageBuffer {
        /// Left edge
        x: i32,
        /// Top edge
        y: i32,
        /// Width
        width: i32,
        /// Height
        height: i32,
    },
    /// Request a frame callback
    Frame {
        /// The new callback
        callback: CallbackId,
    },
    /// Set the opaque region
    SetOpaqueRegion(Option<RegionId>),
    /// Set the input region
    SetInputRegion(Option<RegionId>),
    /// Apply the pending state
    Commit,
    /// Set the buffer scale
    SetBufferScale(i32),
    /// Destroy the surface
    Destroy,
}

/// Requests of a client `wp_viewport`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportRequest {
    /// Set the source rectangle, all `-1` unsets it
    SetSource {
        /// Left edge
        x: Fixed,
        /// Top edge
        y: Fixed,
        /// Width
        width: Fixed,
        /// Height
        height: Fixed,
    },
    /// Set the destination size, all `-1` unsets it
    SetDestination {
        /// Width
        width: i32,
        /// Height
        height: i32,
    },
    /// Destroy the viewport
    Destroy,
}

/// Events of the host compositor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// The host is done reading a buffer
    BufferRelease(HostBufferId),
    /// A frame callback fired
    FrameDone {
        /// The callback
        callback: HostCallbackId,
        /// Timestamp in milliseconds
        time: u32,
    },
    /// A surface entered an output
    Enter {
        /// The surface
        surface: HostSurfaceId,
        /// The output
        output: OutputId,
    },
    /// A surface left an output
    Leave {
        /// The surface
        surface: HostSurfaceId,
        /// The output
        output: OutputId,
    },
}

/// Errors of requests referring to unknown or invalid objects
#[derive(Debug, thiserror::Error)]
pub enum CompositorError {
    /// The surface does not exist
    #[error("Unknown surface {0:?}")]
    UnknownSurface(SurfaceId),
    /// The surface id is in use
    #[error("Surface {0:?} already exists")]
    SurfaceExists(SurfaceId),
    /// The buffer does not exist
    #[error("Unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    /// The region does not exist
    #[error("Unknown region {0:?}")]
    UnknownRegion(RegionId),
    /// The shm pool does not exist
    #[error("Unknown shm pool {0:?}")]
    UnknownPool(PoolId),
    /// The surface already has a viewport
    #[error("Surface {0:?} already has a viewport")]
    ViewportExists(SurfaceId),
    /// Creating a shm pool or buffer failed
    #[error(transparent)]
    Shm(#[from] ShmError),
    /// Creating a dma-buf buffer failed
    #[error(transparent)]
    Dmabuf(#[from] DmabufError),
}

/// State of all proxied surfaces, buffers and regions of a client
#[derive(Debug)]
pub struct CompositorState {
    ctx: ProxyContext,
    surfaces: IndexMap<SurfaceId, Surface>,
    buffers: HashMap<BufferId, ClientBuffer>,
    callbacks: HashMap<HostCallbackId, (SurfaceId, CallbackId)>,
    regions: HashMap<RegionId, HostRegionId>,
    shm_pools: HashMap<PoolId, ShmPool>,
}

impl CompositorState {
    /// Create a new state around the given collaborators
    pub fn new(ctx: ProxyContext) -> Self {
        CompositorState {
            ctx,
            surfaces: IndexMap::new(),
            buffers: HashMap::new(),
            callbacks: HashMap::new(),
            regions: HashMap::new(),
            shm_pools: HashMap::new(),
        }
    }

    /// The collaborators of the proxy
    pub fn context(&self) -> &ProxyContext {
        &self.ctx
    }

    /// Mutable access to the collaborators of the proxy
    pub fn context_mut(&mut self) -> &mut ProxyContext {
        &mut self.ctx
    }

    /// `wl_compositor` version to advertise
    pub fn compositor_version(&self) -> u32 {
        if self.ctx.config.support_damage_buffer {
            COMPOSITOR_VERSION
        } else {
            COMPOSITOR_VERSION_NO_DAMAGE_BUFFER
        }
    }

    /// Version a client binding `wl_compositor` in version `requested` gets
    pub fn bind_version(&self, requested: u32) -> u32 {
        requested.min(self.compositor_version())
    }

    /// Access a surface
    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&id)
    }

    /// Iterate over all surfaces, in creation order
    pub fn surfaces(&self) -> impl Iterator<Item = &Surface> {
        self.surfaces.values()
    }

    /// Access a client buffer
    pub fn buffer(&self, id: BufferId) -> Option<&ClientBuffer> {
        self.buffers.get(&id)
    }

    /// `wl_compositor.create_surface`
    pub fn create_surface(&mut self, id: SurfaceId) -> Result<&Surface, CompositorError> {
        if self.surfaces.contains_key(&id) {
            return Err(CompositorError::SurfaceExists(id));
        }
        let surface = Surface::new(&mut self.ctx, id);
        self.surfaces.insert(id, surface);
        self.ctx.windows.surface_created(id);
        self.surfaces.get(&id).ok_or(CompositorError::UnknownSurface(id))
    }

    /// Give a surface a role, like shell surface or cursor
    ///
    /// Surfaces with a role are committed to the host right away, surfaces without one only
    /// once their window is shown.
    pub fn set_role(&mut self, id: SurfaceId) -> Result<(), CompositorError> {
        let surface = self
            .surfaces
            .get_mut(&id)
            .ok_or(CompositorError::UnknownSurface(id))?;
        surface.set_has_role(true);
        Ok(())
    }

    /// Handle a request of a client surface
    pub fn surface_request(&mut self, id: SurfaceId, request: SurfaceRequest) -> Result<(), CompositorError> {
        if let SurfaceRequest::Destroy = request {
            let surface = self
                .surfaces
                .shift_remove(&id)
                .ok_or(CompositorError::UnknownSurface(id))?;
            self.callbacks.retain(|_, (surface, _)| *surface != id);
            surface.destroy(&mut self.ctx);
            return Ok(());
        }

        let surface = self
            .surfaces
            .get_mut(&id)
            .ok_or(CompositorError::UnknownSurface(id))?;
        let ctx = &mut self.ctx;

        match request {
            SurfaceRequest::Attach { buffer, x, y } => {
                let buffer = match buffer {
                    Some(buffer) => Some(
                        self.buffers
                            .get(&buffer)
                            .ok_or(CompositorError::UnknownBuffer(buffer))?,
                    ),
                    None => None,
                };
                surface.attach(ctx, buffer, x, y);
            }
            SurfaceRequest::Damage { x, y, width, height } => surface.damage(ctx, x, y, width, height),
            SurfaceRequest::DamageBuffer { x, y, width, height } => {
                surface.damage_buffer(ctx, x, y, width, height)
            }
            SurfaceRequest::Frame { callback } => {
                let host_callback = ctx.host.frame(surface.host_surface());
                trace!(surface = ?id, ?callback, ?host_callback, "frame");
                self.callbacks.insert(host_callback, (id, callback));
            }
            SurfaceRequest::SetOpaqueRegion(region) => {
                let region = host_region(&self.regions, region)?;
                ctx.host.set_opaque_region(surface.host_surface(), region);
            }
            SurfaceRequest::SetInputRegion(region) => {
                let region = host_region(&self.regions, region)?;
                ctx.host.set_input_region(surface.host_surface(), region);
            }
            SurfaceRequest::Commit => surface.commit(ctx),
            SurfaceRequest::SetBufferScale(scale) => surface.set_buffer_scale(scale),
            SurfaceRequest::Destroy => unreachable!(),
        }
        Ok(())
    }

    /// `wp_viewporter.get_viewport`
    pub fn create_viewport(&mut self, id: SurfaceId) -> Result<(), CompositorError> {
        let surface = self
            .surfaces
            .get_mut(&id)
            .ok_or(CompositorError::UnknownSurface(id))?;
        let viewport = surface.viewport_mut();
        if viewport.is_some() {
            return Err(CompositorError::ViewportExists(id));
        }
        *viewport = Some(Viewport::default());
        Ok(())
    }

    /// Handle a request of the viewport of a surface
    ///
    /// The state is applied with the next commit of the surface.
    pub fn viewport_request(&mut self, id: SurfaceId, request: ViewportRequest) -> Result<(), CompositorError> {
        let surface = self
            .surfaces
            .get_mut(&id)
            .ok_or(CompositorError::UnknownSurface(id))?;
        let viewport = surface.viewport_mut();
        match (request, viewport.as_mut()) {
            (ViewportRequest::Destroy, _) => *viewport = None,
            (ViewportRequest::SetSource { x, y, width, height }, Some(viewport)) => {
                viewport.set_source(x, y, width, height)
            }
            (ViewportRequest::SetDestination { width, height }, Some(viewport)) => {
                viewport.set_destination(width, height)
            }
            (request, None) => debug!(surface = ?id, ?request, "Ignoring request of destroyed viewport"),
        }
        Ok(())
    }

    /// `wl_compositor.create_region`
    pub fn create_region(&mut self, id: RegionId) {
        let host_region = self.ctx.host.create_region();
        self.regions.insert(id, host_region);
    }

    /// Handle a request of a client region
    pub fn region_request(&mut self, id: RegionId, request: RegionRequest) -> Result<(), CompositorError> {
        let host_region = *self.regions.get(&id).ok_or(CompositorError::UnknownRegion(id))?;
        region::forward(&mut self.ctx, host_region, request);
        Ok(())
    }

    /// `wl_region.destroy`
    pub fn destroy_region(&mut self, id: RegionId) -> Result<(), CompositorError> {
        let host_region = self.regions.remove(&id).ok_or(CompositorError::UnknownRegion(id))?;
        self.ctx.host.destroy_region(host_region);
        Ok(())
    }

    /// `wl_shm.create_pool`
    pub fn create_shm_pool(&mut self, id: PoolId, fd: OwnedFd, size: i32) -> Result<(), CompositorError> {
        let pool = ShmPool::new(fd, size)?;
        self.shm_pools.insert(id, pool);
        Ok(())
    }

    /// `wl_shm_pool.resize`
    pub fn resize_shm_pool(&mut self, id: PoolId, size: i32) -> Result<(), CompositorError> {
        let pool = self.shm_pools.get_mut(&id).ok_or(CompositorError::UnknownPool(id))?;
        pool.resize(size)?;
        Ok(())
    }

    /// `wl_shm_pool.destroy`, buffers created from the pool stay valid
    pub fn destroy_shm_pool(&mut self, id: PoolId) -> Result<(), CompositorError> {
        self.shm_pools.remove(&id).ok_or(CompositorError::UnknownPool(id))?;
        Ok(())
    }

    /// `wl_shm_pool.create_buffer`
    #[allow(clippy::too_many_arguments)]
    pub fn create_shm_buffer(
        &mut self,
        pool: PoolId,
        id: BufferId,
        offset: i32,
        width: i32,
        height: i32,
        stride: i32,
        format: wl_shm::Format,
    ) -> Result<&ClientBuffer, CompositorError> {
        let pool = self.shm_pools.get(&pool).ok_or(CompositorError::UnknownPool(pool))?;
        let buffer = pool.create_buffer(id, offset, width, height, stride, format)?;
        Ok(self.insert_buffer(buffer))
    }

    /// `zwp_linux_buffer_params_v1.create_immed`, once the host created its buffer
    pub fn create_dmabuf_buffer(
        &mut self,
        id: BufferId,
        params: DmabufParams,
    ) -> Result<&ClientBuffer, CompositorError> {
        let buffer = dmabuf::create_buffer(id, params)?;
        Ok(self.insert_buffer(buffer))
    }

    fn insert_buffer(&mut self, buffer: ClientBuffer) -> &ClientBuffer {
        let id = buffer.id();
        if let Some(old) = self.buffers.insert(id, buffer) {
            warn!(buffer = ?id, "Replacing buffer with a reused id");
            self.drop_buffer(old);
        }
        &self.buffers[&id]
    }

    /// `wl_buffer.destroy`
    ///
    /// Surfaces keep the content of an attached buffer until their next commit.
    pub fn destroy_buffer(&mut self, id: BufferId) -> Result<(), CompositorError> {
        let buffer = self.buffers.remove(&id).ok_or(CompositorError::UnknownBuffer(id))?;
        self.drop_buffer(buffer);
        Ok(())
    }

    fn drop_buffer(&mut self, buffer: ClientBuffer) {
        trace!(buffer = ?buffer.id(), "Destroying client buffer");
        if let Some(host_buffer) = buffer.proxy() {
            self.ctx.host.destroy_buffer(host_buffer);
        }
    }

    /// Handle an event of the host
    pub fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::BufferRelease(host_buffer) => {
                let released = self
                    .surfaces
                    .values_mut()
                    .any(|surface| surface.buffer_released(host_buffer));
                if released {
                    return;
                }
                // dma-bufs are forwarded as is, their release goes straight to the client
                match self.buffers.values().find(|buffer| buffer.proxy() == Some(host_buffer)) {
                    Some(buffer) => {
                        trace!(buffer = ?buffer.id(), ?host_buffer, "Relaying release of forwarded buffer");
                        self.ctx.client.buffer_release(buffer.id());
                    }
                    None => warn!(?host_buffer, "Release of unknown buffer"),
                }
            }
            HostEvent::FrameDone { callback, time } => match self.callbacks.remove(&callback) {
                Some((_, client_callback)) => self.ctx.client.callback_done(client_callback, time),
                None => warn!(?callback, "Frame callback of unknown surface"),
            },
            HostEvent::Enter { surface, output } => {
                if let Some(surface) = surface_by_host(&mut self.surfaces, surface) {
                    surface.enter(&mut self.ctx, output);
                }
            }
            HostEvent::Leave { surface, output } => {
                if let Some(surface) = surface_by_host(&mut self.surfaces, surface) {
                    surface.leave(&mut self.ctx, output);
                }
            }
        }
    }
}

fn host_region(
    regions: &HashMap<RegionId, HostRegionId>,
    region: Option<RegionId>,
) -> Result<Option<HostRegionId>, CompositorError> {
    region
        .map(|id| regions.get(&id).copied().ok_or(CompositorError::UnknownRegion(id)))
        .transpose()
}

fn surface_by_host(
    surfaces: &mut IndexMap<SurfaceId, Surface>,
    host_surface: HostSurfaceId,
) -> Option<&mut Surface> {
    let surface = surfaces
        .values_mut()
        .find(|surface| surface.host_surface() == host_surface);
    if surface.is_none() {
        debug!(?host_surface, "Event for unknown host surface");
    }
    surface
}
