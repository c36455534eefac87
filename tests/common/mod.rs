#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::HashMap,
    io,
    os::unix::io::{BorrowedFd, OwnedFd},
    rc::Rc,
};

use guest_proxy::{
    backend::{
        allocator::{dmabuf::DmabufSyncFlags, format, Fourcc},
        channel::{AllocationError, BufferCreateInfo, BufferCreateOutput, WaylandChannel},
        sync::{FenceSync, SyncError, SyncPoint},
    },
    config::ProxyConfig,
    reexports::{
        rustix::fs::{ftruncate, memfd_create, MemfdFlags},
        wayland_server::protocol::wl_shm,
    },
    utils::{Buffer, Fixed, Logical, Physical, Point, Scale, Size},
    wayland::{
        buffer::BufferId,
        compositor::{
            CallbackId, ClientConnection, CompositorState, DmabufPlane, HostBufferId, HostCallbackId,
            HostCapabilities, HostCompositor, HostRegionId, HostSurfaceId, HostSyncId, HostViewportId,
            OutputId, ProxyContext, SurfaceId, SurfaceRequest,
        },
        dmabuf::DmabufParams,
        shm::PoolId,
        transform::{DamageBox, ScaleTransform, Transform},
    },
    xwayland::{WindowManager, WindowState},
};

/// A request the proxy sent to the host
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    CreateSurface(HostSurfaceId),
    DestroySurface(HostSurfaceId),
    Attach(HostSurfaceId, Option<HostBufferId>, Point<i32, Physical>),
    Damage(HostSurfaceId, (i32, i32, i32, i32)),
    Frame(HostSurfaceId, HostCallbackId),
    SetOpaqueRegion(HostSurfaceId, Option<HostRegionId>),
    SetInputRegion(HostSurfaceId, Option<HostRegionId>),
    SetBufferScale(HostSurfaceId, i32),
    Commit(HostSurfaceId),
    CreateViewport(HostViewportId),
    SetViewportSource(HostViewportId, [Fixed; 4]),
    SetViewportDestination(HostViewportId, i32, i32),
    DestroyViewport(HostViewportId),
    CreateSync(HostSyncId),
    SetAcquireFence(HostSyncId),
    DestroySync(HostSyncId),
    CreateShmBuffer {
        buffer: HostBufferId,
        pool_size: u64,
        size: Size<i32, Buffer>,
        stride: i32,
        format: wl_shm::Format,
    },
    CreateDmabufBuffer {
        buffer: HostBufferId,
        planes: usize,
        size: Size<i32, Buffer>,
        format: Fourcc,
    },
    DestroyBuffer(HostBufferId),
    CreateRegion(HostRegionId),
    RegionAdd(HostRegionId, (i32, i32, i32, i32)),
    RegionSubtract(HostRegionId, (i32, i32, i32, i32)),
    DestroyRegion(HostRegionId),
}

/// An event the proxy sent to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCall {
    BufferRelease(BufferId),
    Enter(SurfaceId, OutputId),
    Leave(SurfaceId, OutputId),
    CallbackDone(CallbackId, u32),
}

/// A call into the window manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCall {
    SurfaceCreated(SurfaceId),
    SetFullscreen(SurfaceId),
    Update(SurfaceId),
    Unpair(SurfaceId),
}

/// A call into the coordinate transform that changes its state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformCall {
    ResetSurfaceScale(SurfaceId),
    TryWindowScale(SurfaceId, Size<i32, Logical>),
}

/// Outcome of sync file exports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Export {
    NotSupported,
    Fail,
    Ok { virtgpu: bool },
}

/// Everything observed by the fakes
#[derive(Debug, Default)]
pub struct Log {
    pub host: Vec<HostCall>,
    pub client: Vec<ClientCall>,
    pub windows: Vec<WindowCall>,
    pub transform: Vec<TransformCall>,
    pub allocations: Vec<BufferCreateInfo>,
    pub write_syncs: Vec<DmabufSyncFlags>,
    pub exports: usize,
    pub waits: usize,
    pub sync_points: usize,
}

pub type SharedLog = Rc<RefCell<Log>>;

/// [`ScaleTransform`] recording the calls that change per surface state
#[derive(Debug)]
pub struct RecordingTransform {
    log: SharedLog,
    inner: ScaleTransform,
}

impl Transform for RecordingTransform {
    fn guest_to_host(&self, surface: Option<SurfaceId>, point: Point<i32, Logical>) -> Point<i32, Physical> {
        self.inner.guest_to_host(surface, point)
    }

    fn damage_coord(&self, surface: SurfaceId, buffer_scale: Scale, damage: DamageBox) -> DamageBox {
        self.inner.damage_coord(surface, buffer_scale, damage)
    }

    fn viewport_scale(
        &self,
        surface: SurfaceId,
        window: Option<&WindowState>,
        contents_scale: f64,
        size: Size<i32, Logical>,
    ) -> Option<Size<i32, Physical>> {
        self.inner.viewport_scale(surface, window, contents_scale, size)
    }

    fn reset_surface_scale(&mut self, surface: SurfaceId) {
        self.log
            .borrow_mut()
            .transform
            .push(TransformCall::ResetSurfaceScale(surface));
        self.inner.reset_surface_scale(surface);
    }

    fn try_window_scale(&mut self, surface: SurfaceId, size: Size<i32, Logical>) {
        self.log
            .borrow_mut()
            .transform
            .push(TransformCall::TryWindowScale(surface, size));
        self.inner.try_window_scale(surface, size);
    }
}

#[derive(Debug)]
pub struct RecordingHost {
    log: SharedLog,
    caps: HostCapabilities,
    internal_output: Option<OutputId>,
    next_id: u32,
}

impl RecordingHost {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&self, call: HostCall) {
        self.log.borrow_mut().host.push(call);
    }
}

impl HostCompositor for RecordingHost {
    fn capabilities(&self) -> HostCapabilities {
        self.caps
    }

    fn internal_output(&self) -> Option<OutputId> {
        self.internal_output
    }

    fn create_surface(&mut self) -> HostSurfaceId {
        let id = HostSurfaceId(self.next());
        self.record(HostCall::CreateSurface(id));
        id
    }

    fn destroy_surface(&mut self, surface: HostSurfaceId) {
        self.record(HostCall::DestroySurface(surface));
    }

    fn attach(&mut self, surface: HostSurfaceId, buffer: Option<HostBufferId>, offset: Point<i32, Physical>) {
        self.record(HostCall::Attach(surface, buffer, offset));
    }

    fn damage(&mut self, surface: HostSurfaceId, x: i32, y: i32, width: i32, height: i32) {
        self.record(HostCall::Damage(surface, (x, y, width, height)));
    }

    fn frame(&mut self, surface: HostSurfaceId) -> HostCallbackId {
        let id = HostCallbackId(self.next());
        self.record(HostCall::Frame(surface, id));
        id
    }

    fn set_opaque_region(&mut self, surface: HostSurfaceId, region: Option<HostRegionId>) {
        self.record(HostCall::SetOpaqueRegion(surface, region));
    }

    fn set_input_region(&mut self, surface: HostSurfaceId, region: Option<HostRegionId>) {
        self.record(HostCall::SetInputRegion(surface, region));
    }

    fn set_buffer_scale(&mut self, surface: HostSurfaceId, scale: i32) {
        self.record(HostCall::SetBufferScale(surface, scale));
    }

    fn commit(&mut self, surface: HostSurfaceId) {
        self.record(HostCall::Commit(surface));
    }

    fn create_viewport(&mut self, _surface: HostSurfaceId) -> HostViewportId {
        let id = HostViewportId(self.next());
        self.record(HostCall::CreateViewport(id));
        id
    }

    fn set_viewport_source(&mut self, viewport: HostViewportId, x: Fixed, y: Fixed, width: Fixed, height: Fixed) {
        self.record(HostCall::SetViewportSource(viewport, [x, y, width, height]));
    }

    fn set_viewport_destination(&mut self, viewport: HostViewportId, width: i32, height: i32) {
        self.record(HostCall::SetViewportDestination(viewport, width, height));
    }

    fn destroy_viewport(&mut self, viewport: HostViewportId) {
        self.record(HostCall::DestroyViewport(viewport));
    }

    fn create_surface_synchronization(&mut self, _surface: HostSurfaceId) -> HostSyncId {
        let id = HostSyncId(self.next());
        self.record(HostCall::CreateSync(id));
        id
    }

    fn set_acquire_fence(&mut self, sync: HostSyncId, _fence: BorrowedFd<'_>) {
        self.record(HostCall::SetAcquireFence(sync));
    }

    fn destroy_surface_synchronization(&mut self, sync: HostSyncId) {
        self.record(HostCall::DestroySync(sync));
    }

    fn create_shm_buffer(
        &mut self,
        _fd: BorrowedFd<'_>,
        pool_size: u64,
        _offset: i32,
        size: Size<i32, Buffer>,
        stride: i32,
        format: wl_shm::Format,
    ) -> HostBufferId {
        let buffer = HostBufferId(self.next());
        self.record(HostCall::CreateShmBuffer {
            buffer,
            pool_size,
            size,
            stride,
            format,
        });
        buffer
    }

    fn create_dmabuf_buffer(
        &mut self,
        planes: &[DmabufPlane<'_>],
        size: Size<i32, Buffer>,
        format: Fourcc,
    ) -> HostBufferId {
        let buffer = HostBufferId(self.next());
        self.record(HostCall::CreateDmabufBuffer {
            buffer,
            planes: planes.len(),
            size,
            format,
        });
        buffer
    }

    fn destroy_buffer(&mut self, buffer: HostBufferId) {
        self.record(HostCall::DestroyBuffer(buffer));
    }

    fn create_region(&mut self) -> HostRegionId {
        let id = HostRegionId(self.next());
        self.record(HostCall::CreateRegion(id));
        id
    }

    fn region_add(&mut self, region: HostRegionId, x: i32, y: i32, width: i32, height: i32) {
        self.record(HostCall::RegionAdd(region, (x, y, width, height)));
    }

    fn region_subtract(&mut self, region: HostRegionId, x: i32, y: i32, width: i32, height: i32) {
        self.record(HostCall::RegionSubtract(region, (x, y, width, height)));
    }

    fn destroy_region(&mut self, region: HostRegionId) {
        self.record(HostCall::DestroyRegion(region));
    }
}

#[derive(Debug)]
pub struct RecordingClient {
    log: SharedLog,
}

impl ClientConnection for RecordingClient {
    fn buffer_release(&mut self, buffer: BufferId) {
        self.log.borrow_mut().client.push(ClientCall::BufferRelease(buffer));
    }

    fn surface_enter(&mut self, surface: SurfaceId, output: OutputId) {
        self.log.borrow_mut().client.push(ClientCall::Enter(surface, output));
    }

    fn surface_leave(&mut self, surface: SurfaceId, output: OutputId) {
        self.log.borrow_mut().client.push(ClientCall::Leave(surface, output));
    }

    fn callback_done(&mut self, callback: CallbackId, time: u32) {
        self.log
            .borrow_mut()
            .client
            .push(ClientCall::CallbackDone(callback, time));
    }
}

pub fn memfd(name: &str, len: u64) -> OwnedFd {
    let fd = memfd_create(name, MemfdFlags::CLOEXEC).unwrap();
    ftruncate(&fd, len).unwrap();
    fd
}

/// Transport handing out memfds in place of host memory
#[derive(Debug)]
pub struct MemfdChannel {
    log: SharedLog,
    dmabuf: bool,
}

impl WaylandChannel for MemfdChannel {
    fn supports_dmabuf(&self) -> bool {
        self.dmabuf
    }

    fn allocate(&self, info: &BufferCreateInfo) -> Result<BufferCreateOutput, AllocationError> {
        self.log.borrow_mut().allocations.push(*info);
        if info.dmabuf && !self.dmabuf {
            return Err(AllocationError::DmabufUnsupported);
        }

        let (offsets, strides, size) = if info.dmabuf {
            let pixel = format::drm_info(info.drm_format).expect("unknown drm format");
            let stride = info.width * pixel.bpp as u32;
            let plane = stride * info.height;
            if pixel.planes > 1 {
                ([0, plane, 0, 0], [stride, stride, 0, 0], plane + plane / 2)
            } else {
                ([0; 4], [stride, 0, 0, 0], plane)
            }
        } else {
            ([0; 4], [0; 4], info.size)
        };

        let fd = memfd_create("host-buffer", MemfdFlags::CLOEXEC).map_err(io::Error::from)?;
        ftruncate(&fd, size as u64).map_err(io::Error::from)?;
        Ok(BufferCreateOutput {
            fd,
            offsets,
            strides,
            host_size: size as u64,
        })
    }

    fn sync(&self, _fd: BorrowedFd<'_>, flags: DmabufSyncFlags) -> io::Result<()> {
        self.log.borrow_mut().write_syncs.push(flags);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeWindows {
    log: SharedLog,
    windows: HashMap<SurfaceId, WindowState>,
}

impl WindowManager for FakeWindows {
    fn window(&self, surface: SurfaceId) -> Option<&WindowState> {
        self.windows.get(&surface)
    }

    fn window_mut(&mut self, surface: SurfaceId) -> Option<&mut WindowState> {
        self.windows.get_mut(&surface)
    }

    fn process_pending_configure_acks(&mut self, _surface: SurfaceId, _contents: Size<i32, Buffer>) -> bool {
        false
    }

    fn set_fullscreen(&mut self, surface: SurfaceId) {
        if let Some(window) = self.windows.get_mut(&surface) {
            window.fullscreen = true;
        }
        self.log.borrow_mut().windows.push(WindowCall::SetFullscreen(surface));
    }

    fn update(&mut self, surface: SurfaceId) {
        self.log.borrow_mut().windows.push(WindowCall::Update(surface));
    }

    fn unpair(&mut self, surface: SurfaceId) {
        self.windows.remove(&surface);
        self.log.borrow_mut().windows.push(WindowCall::Unpair(surface));
    }

    fn surface_created(&mut self, surface: SurfaceId) {
        self.log
            .borrow_mut()
            .windows
            .push(WindowCall::SurfaceCreated(surface));
    }
}

#[derive(Debug)]
pub struct FakeFences {
    log: SharedLog,
    export: Export,
}

impl FenceSync for FakeFences {
    fn export_read_sync_file(&self, _dmabuf: BorrowedFd<'_>) -> Result<OwnedFd, SyncError> {
        self.log.borrow_mut().exports += 1;
        match self.export {
            Export::NotSupported => Err(SyncError::NotSupported),
            Export::Fail => Err(SyncError::Io(io::Error::from_raw_os_error(libc::EBUSY))),
            Export::Ok { .. } => Ok(memfd("sync-file", 0)),
        }
    }

    fn is_virtgpu(&self, _sync_file: BorrowedFd<'_>) -> bool {
        matches!(self.export, Export::Ok { virtgpu: true })
    }

    fn wait(&self, _sync_file: BorrowedFd<'_>) {
        self.log.borrow_mut().waits += 1;
    }

    fn sync_point(&self, _sync_point: &SyncPoint) {
        self.log.borrow_mut().sync_points += 1;
    }
}

/// How the fakes behave
#[derive(Debug, Clone)]
pub struct Setup {
    pub config: ProxyConfig,
    pub caps: HostCapabilities,
    pub dmabuf_channel: bool,
    pub export: Export,
    pub internal_output: Option<OutputId>,
    pub windows: Vec<(SurfaceId, WindowState)>,
}

impl Default for Setup {
    fn default() -> Self {
        Setup {
            config: ProxyConfig::default(),
            caps: HostCapabilities::default(),
            dmabuf_channel: false,
            export: Export::NotSupported,
            internal_output: None,
            windows: Vec::new(),
        }
    }
}

pub struct Harness {
    pub state: CompositorState,
    pub log: SharedLog,
    next_pool: u32,
}

impl Harness {
    pub fn new(setup: Setup) -> Harness {
        init_logging();

        let log = SharedLog::default();
        let ctx = ProxyContext {
            transform: Box::new(RecordingTransform {
                log: log.clone(),
                inner: ScaleTransform::from_config(&setup.config),
            }),
            config: setup.config,
            host: Box::new(RecordingHost {
                log: log.clone(),
                caps: setup.caps,
                internal_output: setup.internal_output,
                next_id: 0,
            }),
            client: Box::new(RecordingClient { log: log.clone() }),
            channel: Rc::new(MemfdChannel {
                log: log.clone(),
                dmabuf: setup.dmabuf_channel,
            }),
            windows: Box::new(FakeWindows {
                log: log.clone(),
                windows: setup.windows.into_iter().collect(),
            }),
            fences: Box::new(FakeFences {
                log: log.clone(),
                export: setup.export,
            }),
            timing: None,
        };

        Harness {
            state: CompositorState::new(ctx),
            log,
            next_pool: 0,
        }
    }

    pub fn surface(&mut self, id: u32) -> SurfaceId {
        let id = SurfaceId(id);
        self.state.create_surface(id).unwrap();
        id
    }

    /// Create a shm buffer whose every byte is `fill`
    pub fn shm_buffer(&mut self, id: u32, width: i32, height: i32, format: wl_shm::Format, fill: u8) -> BufferId {
        self.next_pool += 1;
        let pool = PoolId(self.next_pool);
        let stride = width * format::bpp(format) as i32;
        let size = format::total_size(format, height as usize, stride as usize) as i32;
        self.state
            .create_shm_pool(pool, memfd("client-pool", size as u64), size)
            .unwrap();

        let id = BufferId(id);
        let buffer = self
            .state
            .create_shm_buffer(pool, id, 0, width, height, stride, format)
            .unwrap();
        buffer.mapping().unwrap().data_mut().unwrap().fill(fill);
        self.state.destroy_shm_pool(pool).unwrap();
        id
    }

    /// Create a dma-buf buffer backed by a memfd
    pub fn dmabuf_buffer(&mut self, id: u32, host_buffer: u32, width: i32, height: i32, is_virtgpu: bool) -> BufferId {
        let stride = width as u32 * 4;
        let id = BufferId(id);
        self.state
            .create_dmabuf_buffer(
                id,
                DmabufParams {
                    host_buffer: HostBufferId(host_buffer),
                    fd: memfd("client-dmabuf", (stride * height as u32) as u64),
                    size: (width, height).into(),
                    format: Fourcc::Argb8888,
                    stride,
                    is_virtgpu,
                },
            )
            .unwrap();
        id
    }

    pub fn request(&mut self, surface: SurfaceId, request: SurfaceRequest) {
        self.state.surface_request(surface, request).unwrap();
    }

    pub fn attach(&mut self, surface: SurfaceId, buffer: Option<BufferId>) {
        self.attach_at(surface, buffer, 0, 0);
    }

    pub fn attach_at(&mut self, surface: SurfaceId, buffer: Option<BufferId>, x: i32, y: i32) {
        self.request(surface, SurfaceRequest::Attach { buffer, x, y });
    }

    pub fn commit(&mut self, surface: SurfaceId) {
        self.request(surface, SurfaceRequest::Commit);
    }

    pub fn host_calls(&self) -> Vec<HostCall> {
        self.log.borrow().host.clone()
    }

    pub fn take_host_calls(&mut self) -> Vec<HostCall> {
        std::mem::take(&mut self.log.borrow_mut().host)
    }

    pub fn client_calls(&self) -> Vec<ClientCall> {
        self.log.borrow().client.clone()
    }

    pub fn window_calls(&self) -> Vec<WindowCall> {
        self.log.borrow().windows.clone()
    }

    pub fn transform_calls(&self) -> Vec<TransformCall> {
        self.log.borrow().transform.clone()
    }

    /// Host buffers created so far, in order
    pub fn created_host_buffers(&self) -> Vec<HostBufferId> {
        self.log
            .borrow()
            .host
            .iter()
            .filter_map(|call| match call {
                HostCall::CreateShmBuffer { buffer, .. } | HostCall::CreateDmabufBuffer { buffer, .. } => {
                    Some(*buffer)
                }
                _ => None,
            })
            .collect()
    }

    /// The host buffer last attached to the host surface of `surface`
    pub fn attached(&self, surface: SurfaceId) -> Option<HostBufferId> {
        self.last_attach(surface).and_then(|(buffer, _)| buffer)
    }

    /// Buffer and offset of the last attach to the host surface of `surface`
    pub fn last_attach(&self, surface: SurfaceId) -> Option<(Option<HostBufferId>, Point<i32, Physical>)> {
        let host_surface = self.state.surface(surface).unwrap().host_surface();
        self.log
            .borrow()
            .host
            .iter()
            .rev()
            .find_map(|call| match call {
                HostCall::Attach(target, buffer, offset) if *target == host_surface => Some((*buffer, *offset)),
                _ => None,
            })
    }
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
