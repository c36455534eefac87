use std::os::unix::io::AsFd;

use tracing::{debug, error, info, trace, warn};
use wayland_server::protocol::wl_shm;

use super::{
    copy::{copy_damaged_rect, DamageCopy},
    pool::{OutputBuffer, OutputBufferId, OutputBufferPool},
    HostBufferId, HostSurfaceId, HostSyncId, HostViewportId, OutputId, ProxyContext, SurfaceId,
};
use crate::{
    backend::{
        allocator::{format, BufferLayout, Fourcc, MappedBuffer, PlaneLayout, WriteSync},
        channel::{BufferCreateInfo, BufferCreateOutput},
        sync::SyncError,
    },
    utils::{Buffer, Fixed, Logical, Physical, Point, Region, Scale, Size},
    wayland::{
        buffer::ClientBuffer,
        compositor::host::DmabufPlane,
        transform::DamageBox,
        viewporter::{compute_buffer_scale_and_offset, Viewport},
    },
    xwayland::shape::{generate_argb_image, ShapeImage},
};

/// Proxy side state of a client `wl_surface`
///
/// Content attached by the client is either forwarded to the host as is, for dma-bufs, or
/// copied into a host visible [`OutputBuffer`] of the surface on commit. Copies only cover
/// the damage accumulated by the output buffer since it was last written, so every output
/// buffer tracks damage separately.
#[derive(Debug)]
pub struct Surface {
    id: SurfaceId,
    host_surface: HostSurfaceId,

    contents_size: Size<i32, Buffer>,
    contents_format: wl_shm::Format,
    contents_offset: Point<i32, Physical>,
    contents_scale: i32,
    contents_mapping: Option<MappedBuffer>,
    contents_shaped: bool,
    contents_shape: Region<Buffer>,

    viewport: Option<Viewport>,
    host_viewport: Option<HostViewportId>,
    surface_sync: Option<HostSyncId>,

    pool: OutputBufferPool,
    current_buffer: Option<OutputBufferId>,
    proxy_buffer: Option<HostBufferId>,

    has_role: bool,
    has_output: bool,
    output: Option<OutputId>,
}

impl Surface {
    pub(crate) fn new(ctx: &mut ProxyContext, id: SurfaceId) -> Surface {
        let host_surface = ctx.host.create_surface();
        let caps = ctx.host.capabilities();

        let surface_sync = (caps.explicit_synchronization && ctx.config.use_explicit_fence)
            .then(|| ctx.host.create_surface_synchronization(host_surface));
        let host_viewport = caps.viewporter.then(|| ctx.host.create_viewport(host_surface));

        debug!(surface = ?id, ?host_surface, explicit_sync = surface_sync.is_some(), "New surface");
        Surface {
            id,
            host_surface,
            contents_size: Size::default(),
            contents_format: wl_shm::Format::Argb8888,
            contents_offset: Point::default(),
            contents_scale: 1,
            contents_mapping: None,
            contents_shaped: false,
            contents_shape: Region::new(),
            viewport: None,
            host_viewport,
            surface_sync,
            pool: OutputBufferPool::new(),
            current_buffer: None,
            proxy_buffer: None,
            has_role: false,
            has_output: false,
            output: None,
        }
    }

    /// Id of the client surface
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// The surface of the host presenting this surface
    pub fn host_surface(&self) -> HostSurfaceId {
        self.host_surface
    }

    /// Size of the last attached content
    pub fn contents_size(&self) -> Size<i32, Buffer> {
        self.contents_size
    }

    /// Host position of the last attached content
    pub fn contents_offset(&self) -> Point<i32, Physical> {
        self.contents_offset
    }

    /// Buffer scale set by the client
    pub fn contents_scale(&self) -> i32 {
        self.contents_scale
    }

    /// Whether the attached content is clipped to the shape of its window
    pub fn is_shaped(&self) -> bool {
        self.contents_shaped
    }

    /// Shape the attached content is clipped to
    pub fn contents_shape(&self) -> &Region<Buffer> {
        &self.contents_shape
    }

    /// Whether the attached content still has to be copied on commit
    pub fn has_pending_contents(&self) -> bool {
        self.contents_mapping.is_some()
    }

    /// Host buffers of the surface
    pub fn output_buffers(&self) -> &OutputBufferPool {
        &self.pool
    }

    /// The output buffer the attached content goes to
    pub fn current_buffer(&self) -> Option<OutputBufferId> {
        self.current_buffer
    }

    /// Whether explicit synchronization is in use
    pub fn has_surface_sync(&self) -> bool {
        self.surface_sync.is_some()
    }

    /// The client viewport of the surface
    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    pub(crate) fn viewport_mut(&mut self) -> &mut Option<Viewport> {
        &mut self.viewport
    }

    /// Whether the surface has a role, like shell surface or cursor
    pub fn has_role(&self) -> bool {
        self.has_role
    }

    pub(crate) fn set_has_role(&mut self, has_role: bool) {
        self.has_role = has_role;
    }

    /// The output the surface was last seen on
    pub fn output(&self) -> Option<OutputId> {
        self.output
    }

    /// Whether the client was told the surface is on an output
    pub fn has_output(&self) -> bool {
        self.has_output
    }

    /// Attach new content, `None` detaches the current content
    pub(crate) fn attach(&mut self, ctx: &mut ProxyContext, buffer: Option<&ClientBuffer>, x: i32, y: i32) {
        trace!(surface = ?self.id, buffer = ?buffer.map(ClientBuffer::id), x, y, "attach");
        if let Some(timing) = ctx.timing.as_mut() {
            timing.on_attach(self.id, buffer.map(ClientBuffer::id));
        }

        let window_shape = ctx
            .windows
            .window(self.id)
            .filter(|window| window.shaped && !window.shape_rectangles.is_empty())
            .map(|window| window.shape_rectangles.clone());
        self.contents_shaped = ctx.config.enable_xshape && window_shape.is_some();

        self.current_buffer = None;
        self.contents_mapping = None;

        match buffer {
            Some(buffer) => {
                self.contents_size = buffer.size;
                self.contents_format = buffer.format;
                self.proxy_buffer = buffer.proxy;

                if !buffer.is_drm {
                    self.contents_mapping = buffer.mapping.clone();
                } else if self.contents_shaped && buffer.mapping.is_some() {
                    // only shaped dma-buf content is read by the proxy
                    self.contents_mapping = buffer.mapping.clone();
                } else {
                    self.contents_shaped = false;
                }
            }
            None => {
                self.contents_shaped = false;
                self.proxy_buffer = None;
            }
        }

        match window_shape {
            Some(shape) if self.contents_shaped => self.contents_shape = shape,
            _ => self.contents_shape.clear(),
        }

        if let Some(contents) = self.contents_mapping.clone() {
            let size = self.contents_size;
            let format = self.contents_format;
            let shaped = self.contents_shaped;
            let host = &mut ctx.host;

            let reuse = self.pool.select_released(
                |candidate| {
                    candidate.size == size
                        && if shaped {
                            candidate.shape_image.is_some() && candidate.format == wl_shm::Format::Argb8888
                        } else {
                            candidate.format == format
                        }
                },
                |evicted| host.destroy_buffer(evicted.host_buffer),
            );
            let current = match reuse {
                Some(id) => id,
                None => self.allocate_output_buffer(ctx, &contents),
            };
            self.current_buffer = Some(current);
        }

        self.contents_offset = ctx.transform.guest_to_host(Some(self.id), (x, y).into());

        if let Some(sync_point) = buffer.and_then(ClientBuffer::sync_point) {
            let mut needs_sync = true;
            if let Some(surface_sync) = self.surface_sync {
                match ctx.fences.export_read_sync_file(sync_point.as_fd()) {
                    Ok(sync_file) => {
                        if ctx.fences.is_virtgpu(sync_file.as_fd()) {
                            ctx.host.set_acquire_fence(surface_sync, sync_file.as_fd());
                        } else {
                            trace!(surface = ?self.id, "Waiting for GPU work in the guest");
                            ctx.fences.wait(sync_file.as_fd());
                        }
                        needs_sync = false;
                    }
                    Err(SyncError::NotSupported) => {
                        ctx.host.destroy_surface_synchronization(surface_sync);
                        self.surface_sync = None;
                        info!(
                            surface = ?self.id,
                            "Sync file export not implemented, falling back to implicit synchronization"
                        );
                    }
                    Err(err) => {
                        warn!(surface = ?self.id, ?err, "Explicit synchronization failed, retrying on next attach");
                    }
                }
            }
            if needs_sync {
                ctx.fences.sync_point(sync_point);
            }
        }

        let host_buffer = self
            .current_buffer
            .and_then(|id| self.pool.get(id))
            .map(OutputBuffer::host_buffer)
            .or(self.proxy_buffer);
        ctx.host.attach(self.host_surface, host_buffer, self.contents_offset);

        while ctx.windows.process_pending_configure_acks(self.id, self.contents_size) {}
    }

    fn allocate_output_buffer(&mut self, ctx: &mut ProxyContext, contents: &MappedBuffer) -> OutputBufferId {
        let size = self.contents_size;
        let shaped = self.contents_shaped;
        let format = if shaped {
            wl_shm::Format::Argb8888
        } else {
            self.contents_format
        };
        let contents_layout = *contents.layout();
        let (width, height) = (size.w.max(0) as u32, size.h.max(0) as u32);

        let (host_buffer, mapping) = if ctx.channel.supports_dmabuf() && ctx.host.capabilities().linux_dmabuf_v2 {
            let info = BufferCreateInfo {
                dmabuf: true,
                width,
                height,
                drm_format: format::to_drm(format),
                size: 0,
            };
            let output = allocate(ctx, &info, "dma-buf");
            let num_planes = format::plane_count(format);

            let mut host_size = output.host_size as usize;
            if num_planes > 1 {
                let y_ss = contents_layout.planes[1].y_subsampling.max(1);
                let plane_end = output.offsets[1] as usize + output.strides[1] as usize * height as usize / y_ss;
                host_size = host_size.max(plane_end);
            }

            let planes = (0..num_planes)
                .map(|idx| DmabufPlane {
                    fd: output.fd.as_fd(),
                    plane_idx: idx as u32,
                    offset: output.offsets[idx],
                    stride: output.strides[idx],
                })
                .collect::<Vec<_>>();
            let host_buffer = ctx.host.create_dmabuf_buffer(&planes, size, info.drm_format);
            drop(planes);

            let offset = output.offsets[0] as usize;
            let layout = BufferLayout {
                size: host_size.saturating_sub(offset),
                bpp: format::bpp(format),
                num_planes,
                planes: [
                    PlaneLayout {
                        offset,
                        stride: output.strides[0] as usize,
                        y_subsampling: contents_layout.planes[0].y_subsampling,
                    },
                    PlaneLayout {
                        offset: output.offsets[1] as usize,
                        stride: output.strides[1] as usize,
                        y_subsampling: contents_layout.planes[1].y_subsampling,
                    },
                ],
            };
            let mapping = map_output(output, layout);
            mapping.set_write_sync(WriteSync(ctx.channel.clone()));
            (host_buffer, mapping)
        } else {
            let layout = if shaped {
                let stride = width as usize * 4;
                BufferLayout {
                    size: stride * height as usize,
                    bpp: 4,
                    num_planes: 1,
                    planes: [
                        PlaneLayout {
                            offset: 0,
                            stride,
                            y_subsampling: 1,
                        },
                        PlaneLayout::default(),
                    ],
                }
            } else {
                let [plane0, plane1] = contents_layout.planes;
                BufferLayout {
                    size: contents_layout.size,
                    bpp: contents_layout.bpp,
                    num_planes: contents_layout.num_planes,
                    planes: [
                        PlaneLayout { offset: 0, ..plane0 },
                        PlaneLayout {
                            offset: plane1.offset.saturating_sub(plane0.offset),
                            ..plane1
                        },
                    ],
                }
            };
            let info = BufferCreateInfo {
                dmabuf: false,
                width: layout.size as u32,
                height: 1,
                drm_format: Fourcc::R8,
                size: layout.size as u32,
            };
            let output = allocate(ctx, &info, "shm");
            let host_buffer = ctx.host.create_shm_buffer(
                output.fd.as_fd(),
                output.host_size,
                0,
                size,
                layout.planes[0].stride as i32,
                format,
            );
            let layout = BufferLayout {
                size: (output.host_size as usize).max(layout.size),
                ..layout
            };
            (host_buffer, map_output(output, layout))
        };

        debug!(
            surface = ?self.id,
            ?host_buffer,
            ?size,
            ?format,
            dmabuf = mapping.has_write_sync(),
            "Allocated output buffer"
        );
        let shape_image = if shaped {
            match ShapeImage::new(size) {
                Ok(image) => Some(image),
                Err(err) => {
                    warn!(surface = ?self.id, ?err, "Failed to create shape image");
                    None
                }
            }
        } else {
            None
        };
        self.pool.insert_released(OutputBuffer {
            size,
            format,
            host_buffer,
            mapping,
            surface_damage: Region::infinite(),
            buffer_damage: Region::infinite(),
            shape_image,
        })
    }

    /// Damage in surface coordinates
    pub(crate) fn damage(&mut self, ctx: &mut ProxyContext, x: i32, y: i32, width: i32, height: i32) {
        trace!(surface = ?self.id, x, y, width, height, "damage");
        self.pool
            .for_each_mut(|buffer| buffer.surface_damage.union_xywh(x, y, width, height));

        let damage = ctx.transform.damage_coord(
            self.id,
            Scale::IDENTITY,
            DamageBox::from_xywh(x as i64, y as i64, width as i64, height as i64),
        );
        let (x, y, width, height) = damage.to_xywh();
        ctx.host.damage(self.host_surface, x, y, width, height);
    }

    /// Damage in buffer coordinates
    ///
    /// The host is sent surface damage covering the same area.
    pub(crate) fn damage_buffer(&mut self, ctx: &mut ProxyContext, x: i32, y: i32, width: i32, height: i32) {
        trace!(surface = ?self.id, x, y, width, height, "damage_buffer");
        self.pool
            .for_each_mut(|buffer| buffer.buffer_damage.union_xywh(x, y, width, height));

        let (scale, offset) = compute_buffer_scale_and_offset(
            self.contents_scale as f64,
            self.contents_size,
            self.viewport.as_ref(),
        );
        let x1 = x as i64 - offset.x.to_int() as i64;
        let y1 = y as i64 - offset.y.to_int() as i64;
        let damage =
            ctx.transform
                .damage_coord(self.id, scale, DamageBox::from_xywh(x1, y1, width as i64, height as i64));
        let (x, y, width, height) = damage.to_xywh();
        ctx.host.damage(self.host_surface, x, y, width, height);
    }

    pub(crate) fn set_buffer_scale(&mut self, scale: i32) {
        trace!(surface = ?self.id, scale, "set_buffer_scale");
        self.contents_scale = scale;
    }

    /// Apply the pending state, copying damaged content into the current output buffer
    #[profiling::function]
    pub(crate) fn commit(&mut self, ctx: &mut ProxyContext) {
        trace!(surface = ?self.id, buffer = ?self.current_buffer, "commit");
        if let Some(timing) = ctx.timing.as_mut() {
            timing.on_commit(self.id);
        }

        if let Some(contents) = self.contents_mapping.clone() {
            if !contents.begin_access() {
                contents.end_access();
                if !self.contents_shaped {
                    panic!("Content of unshaped surface {:?} is not accessible", self.id);
                }
                self.unshape(ctx);
            } else if self.contents_shaped {
                let current = self.current_buffer.and_then(|id| self.pool.get_mut(id));
                if let Some(image) = current.and_then(|buffer| buffer.shape_image.as_mut()) {
                    if let Err(err) =
                        generate_argb_image(&self.contents_shape, &contents, image, self.contents_format)
                    {
                        warn!(surface = ?self.id, ?err, "Failed to stamp out the window shape");
                    }
                }
            }
        }

        if let (Some(contents), Some(current)) = (self.contents_mapping.as_ref(), self.current_buffer) {
            let (scale, offset) = compute_buffer_scale_and_offset(
                self.contents_scale as f64,
                self.contents_size,
                self.viewport.as_ref(),
            );
            if let Some(buffer) = self.pool.get(current) {
                copy_damage(
                    buffer,
                    contents,
                    self.contents_shaped,
                    self.contents_size,
                    scale,
                    Point::from((offset.x.to_f64(), offset.y.to_f64())),
                );
            }
            if let Some(buffer) = self.pool.get_mut(current) {
                buffer.surface_damage.clear();
                buffer.buffer_damage.clear();
            }
            self.pool.mark_busy(current);
        }

        if !self.contents_size.is_empty() {
            match self.host_viewport {
                Some(host_viewport) => self.commit_viewport(ctx, host_viewport),
                None => {
                    let scale = ctx.config.scale * self.contents_scale as f64;
                    ctx.host.set_buffer_scale(self.host_surface, scale as i32);
                }
            }
        }

        if self.has_role {
            ctx.host.commit(self.host_surface);
            if !self.has_output {
                if let Some(output) = ctx.host.internal_output() {
                    ctx.client.surface_enter(self.id, output);
                    self.has_output = true;
                }
            }
        } else if let Some(window) = ctx.windows.window_mut(self.id) {
            // without a role the content is only shown once the window has a shell surface
            if window.has_xdg_surface {
                ctx.host.commit(self.host_surface);
                if !self.contents_size.is_empty() {
                    window.realized = true;
                }
            }
        }

        if let Some(timing) = ctx.timing.as_mut() {
            let (steam_game_id, activated) = ctx
                .windows
                .window(self.id)
                .map(|window| (window.steam_game_id, window.activated))
                .unwrap_or_default();
            timing.add_frame(self.id, steam_game_id, activated);
        }

        if let Some(contents) = self.contents_mapping.take() {
            if let Some(buffer) = contents.buffer_resource() {
                ctx.client.buffer_release(buffer);
            }
            contents.end_access();
        }

        let promote = match ctx.windows.window_mut(self.id) {
            Some(window)
                if window.containerized
                    && !window.fullscreen
                    && !window.decorated
                    && !window.compositor_fullscreen
                    && window.maybe_promote_to_fullscreen
                    && !window.iconified
                    && window.activated =>
            {
                window.maybe_promote_to_fullscreen = false;
                true
            }
            _ => false,
        };
        if promote {
            debug!(surface = ?self.id, "Promoting borderless window to fullscreen");
            ctx.windows.set_fullscreen(self.id);
        }
    }

    fn unshape(&mut self, ctx: &mut ProxyContext) {
        warn!(surface = ?self.id, "Shaped content is not accessible, presenting it unshaped");
        self.contents_mapping = None;
        self.contents_shaped = false;
        self.contents_shape.clear();
        if let Some(current) = self.current_buffer {
            self.pool.mark_released(current);
        }

        let Some(proxy_buffer) = self.proxy_buffer else {
            panic!("Shaped surface {:?} has no buffer to fall back to", self.id);
        };
        ctx.host
            .attach(self.host_surface, Some(proxy_buffer), self.contents_offset);
    }

    fn commit_viewport(&mut self, ctx: &mut ProxyContext, host_viewport: HostViewportId) {
        let mut size: Size<i32, Logical> = (self.contents_size.w, self.contents_size.h).into();

        match self.viewport.as_ref() {
            Some(viewport) => {
                if viewport.has_source() {
                    ctx.host.set_viewport_source(
                        host_viewport,
                        viewport.src_x,
                        viewport.src_y,
                        viewport.src_width,
                        viewport.src_height,
                    );
                    size = (viewport.src_width.to_int(), viewport.src_height.to_int()).into();
                }
                if viewport.has_destination() {
                    size = (viewport.dst_width, viewport.dst_height).into();
                }
            }
            None => {
                let unset = Fixed::from_int(-1);
                ctx.host
                    .set_viewport_source(host_viewport, unset, unset, unset, unset);
            }
        }

        let destination = ctx.transform.viewport_scale(
            self.id,
            ctx.windows.window(self.id),
            self.contents_scale as f64,
            size,
        );
        match destination {
            Some(destination) => {
                ctx.host
                    .set_viewport_destination(host_viewport, destination.w, destination.h);
                if let Some(window) = ctx.windows.window_mut(self.id) {
                    window.viewport_width_realized = destination.w;
                    window.viewport_height_realized = destination.h;
                }
            }
            None => ctx.host.set_viewport_destination(host_viewport, -1, -1),
        }
    }

    /// The host released one of its buffers, returns false if it is not one of ours
    pub(crate) fn buffer_released(&mut self, host_buffer: HostBufferId) -> bool {
        self.pool.release_host(host_buffer)
    }

    pub(crate) fn enter(&mut self, ctx: &mut ProxyContext, output: OutputId) {
        trace!(surface = ?self.id, ?output, "enter");
        ctx.client.surface_enter(self.id, output);
        self.has_output = true;
        self.output = Some(output);
        ctx.transform.reset_surface_scale(self.id);
        let window_size = ctx
            .windows
            .window(self.id)
            .map(|window| Size::from((window.width, window.height)));
        if let Some(size) = window_size {
            ctx.transform.try_window_scale(self.id, size);
            ctx.windows.update(self.id);
        }
    }

    pub(crate) fn leave(&mut self, ctx: &mut ProxyContext, output: OutputId) {
        trace!(surface = ?self.id, ?output, "leave");
        ctx.client.surface_leave(self.id, output);
        self.has_output = false;
        self.output = None;
    }

    /// Destroy the surface and every host object it owns
    pub(crate) fn destroy(mut self, ctx: &mut ProxyContext) {
        trace!(surface = ?self.id, "destroy");
        if ctx.windows.window(self.id).is_some() {
            ctx.windows.unpair(self.id);
        }

        self.contents_mapping = None;
        for buffer in self.pool.drain() {
            ctx.host.destroy_buffer(buffer.host_buffer);
        }
        self.viewport = None;

        if let Some(host_viewport) = self.host_viewport.take() {
            ctx.host.destroy_viewport(host_viewport);
        }
        ctx.host.destroy_surface(self.host_surface);
        if let Some(surface_sync) = self.surface_sync.take() {
            ctx.host.destroy_surface_synchronization(surface_sync);
        }
    }
}

/// Allocate a host buffer, there is no way to present the surface without it
fn allocate(ctx: &ProxyContext, info: &BufferCreateInfo, kind: &str) -> BufferCreateOutput {
    match ctx.channel.allocate(info) {
        Ok(output) => output,
        Err(err) => {
            error!(?err, ?info, "{} allocation failed", kind);
            panic!("Failed to allocate {} host buffer: {}", kind, err);
        }
    }
}

fn map_output(output: BufferCreateOutput, layout: BufferLayout) -> MappedBuffer {
    match MappedBuffer::create(output.fd, layout) {
        Ok(mapping) => mapping,
        Err(err) => {
            error!(?err, ?layout, "Failed to map host buffer");
            panic!("Failed to map host buffer: {}", err);
        }
    }
}

fn copy_damage(
    buffer: &OutputBuffer,
    contents: &MappedBuffer,
    shaped: bool,
    contents_size: Size<i32, Buffer>,
    scale: Scale,
    offset: Point<f64, Logical>,
) {
    let contents_data = contents.data();
    let source = if shaped {
        buffer
            .shape_image
            .as_ref()
            .map(|image| (image.data(), shape_layout(image)))
    } else {
        contents_data.as_deref().map(|data| (data, *contents.layout()))
    };
    let Some((src, src_layout)) = source else {
        warn!("Content to copy is not accessible");
        return;
    };

    buffer.mapping.begin_write();
    if let Some(mut dst) = buffer.mapping.data_mut() {
        let mut copy = DamageCopy {
            src,
            src_layout,
            dst_layout: *buffer.mapping.layout(),
            contents: contents_size,
            scale,
            offset,
        };
        for rect in buffer.surface_damage.rects() {
            copy_damaged_rect(&copy, &mut dst, rect);
        }

        copy.scale = Scale::IDENTITY;
        copy.offset = Point::from((0.0, 0.0));
        for rect in buffer.buffer_damage.rects() {
            copy_damaged_rect(&copy, &mut dst, rect);
        }
    }
    buffer.mapping.end_write();
}

fn shape_layout(image: &ShapeImage) -> BufferLayout {
    BufferLayout {
        size: image.data().len(),
        bpp: 4,
        num_planes: 1,
        planes: [
            PlaneLayout {
                offset: 0,
                stride: image.stride(),
                y_subsampling: 1,
            },
            PlaneLayout::default(),
        ],
    }
}
