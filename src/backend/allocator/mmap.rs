use std::{
    cell::{Cell, Ref, RefCell, RefMut},
    fmt, io,
    ops::{Deref, DerefMut},
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
    ptr::{self, NonNull},
    rc::Rc,
    slice,
};

use rustix::mm::{MapFlags, ProtFlags};
use tracing::{debug, trace, warn};

use super::{dmabuf, format::MAX_PLANES};
use crate::{backend::channel::WaylandChannel, wayland::buffer::BufferId};

/// Memory layout of a single plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneLayout {
    /// Byte offset of the plane from the start of the mapping
    pub offset: usize,
    /// Bytes per row
    pub stride: usize,
    /// Vertical subsampling, 1 or 2
    pub y_subsampling: usize,
}

/// Memory layout of a mapped buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Byte size of the buffer content, starting at the first plane
    pub size: usize,
    /// Bytes per pixel
    pub bpp: usize,
    /// Amount of planes in use
    pub num_planes: usize,
    /// Layout of every plane
    pub planes: [PlaneLayout; MAX_PLANES],
}

impl BufferLayout {
    fn validate(&self) -> Result<(), MapError> {
        if self.num_planes == 0 || self.num_planes > MAX_PLANES {
            return Err(MapError::InvalidLayout("plane count out of range"));
        }
        if self.bpp == 0 {
            return Err(MapError::InvalidLayout("zero bytes per pixel"));
        }
        if self.planes[..self.num_planes]
            .iter()
            .any(|plane| plane.y_subsampling == 0)
        {
            return Err(MapError::InvalidLayout("zero subsampling"));
        }
        Ok(())
    }
}

/// Errors that can happen when mapping a buffer
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// The requested layout cannot describe a buffer
    #[error("Invalid buffer layout: {0}")]
    InvalidLayout(&'static str),
    /// The mapping is empty
    #[error("Cannot map an empty buffer")]
    Empty,
    /// `mmap` failed
    #[error("Failed to map buffer")]
    Map(#[source] io::Error),
}

/// CPU write synchronization of a host allocated buffer
///
/// Writes into a host dma-buf have to be announced to the host through the transport.
#[derive(Debug, Clone)]
pub struct WriteSync(pub Rc<dyn WaylandChannel>);

/// A memory mapping
struct MemMap {
    ptr: NonNull<u8>,
    len: usize,
}

impl MemMap {
    fn new(fd: BorrowedFd<'_>, len: usize, writable: bool) -> Result<MemMap, MapError> {
        if len == 0 {
            return Err(MapError::Empty);
        }
        let prot = if writable {
            ProtFlags::READ | ProtFlags::WRITE
        } else {
            ProtFlags::READ
        };
        // SAFETY: we request a fresh mapping, no existing memory is affected
        let ptr = unsafe { rustix::mm::mmap(ptr::null_mut(), len, prot, MapFlags::SHARED, fd, 0) }
            .map_err(|err| MapError::Map(err.into()))?;
        let ptr = NonNull::new(ptr as *mut u8).ok_or(MapError::Empty)?;
        Ok(MemMap { ptr, len })
    }
}

impl Deref for MemMap {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the mapping is valid for `len` bytes until dropped
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for MemMap {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: the mapping is valid for `len` bytes until dropped, and exclusive access
        // is guarded by the `RefCell` holding it
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MemMap {
    fn drop(&mut self) {
        // SAFETY: the pointer was returned by mmap with this length
        if let Err(err) = unsafe { rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len) } {
            warn!(?err, len = self.len, "Failed to unmap buffer");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapKind {
    /// Mapped for the whole lifetime
    Shm,
    /// Dma-buf content, only mapped between `begin_access` and `end_access`
    Prime { height: usize },
}

struct MappedBufferInner {
    // `None` if the descriptor belongs to someone else, e.g. a client pool
    fd: Option<OwnedFd>,
    kind: MapKind,
    map: RefCell<Option<MemMap>>,
    layout: BufferLayout,
    buffer_resource: Cell<Option<BufferId>>,
    write_sync: RefCell<Option<WriteSync>>,
}

impl Drop for MappedBufferInner {
    fn drop(&mut self) {
        if let MapKind::Prime { .. } = self.kind {
            self.end_access();
        }
        trace!(fd = ?self.fd, size = self.layout.size, "Releasing buffer mapping");
    }
}

impl MappedBufferInner {
    fn end_access(&self) {
        if let MapKind::Prime { .. } = self.kind {
            if self.map.borrow_mut().take().is_some() {
                if let Some(fd) = self.fd.as_ref() {
                    if let Err(err) = dmabuf::sync(fd.as_fd(), dmabuf::DmabufSyncFlags::END_READ) {
                        debug!(?err, "Failed to end dma-buf read access");
                    }
                }
            }
        }
    }
}

/// A shared CPU mapping of a buffer
///
/// `MappedBuffer`s act alike to smart pointers and can be freely cloned and passed around,
/// the same mapping is regularly held by a client buffer and by the surface it is attached to.
/// Once the last clone is dropped the memory is unmapped and, if owned, the file descriptor closed.
#[derive(Clone)]
pub struct MappedBuffer(Rc<MappedBufferInner>);

impl fmt::Debug for MappedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedBuffer")
            .field("fd", &self.0.fd)
            .field("kind", &self.0.kind)
            .field("layout", &self.0.layout)
            .field("buffer_resource", &self.0.buffer_resource.get())
            .finish()
    }
}

impl PartialEq for MappedBuffer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl MappedBuffer {
    /// Map a buffer, taking ownership of its file descriptor
    ///
    /// The mapping covers `layout.size` bytes past the offset of the first plane.
    pub fn create(fd: OwnedFd, layout: BufferLayout) -> Result<MappedBuffer, MapError> {
        let map = Self::map_shm(fd.as_fd(), &layout)?;
        Ok(Self::from_parts(Some(fd), MapKind::Shm, Some(map), layout))
    }

    /// Map a buffer whose file descriptor stays owned by the caller
    ///
    /// The mapping stays valid after the descriptor gets closed.
    pub fn create_unowned(fd: BorrowedFd<'_>, layout: BufferLayout) -> Result<MappedBuffer, MapError> {
        let map = Self::map_shm(fd, &layout)?;
        Ok(Self::from_parts(None, MapKind::Shm, Some(map), layout))
    }

    /// Wrap a single-plane dma-buf whose content is only mapped on demand
    ///
    /// The buffer is not accessible until [`MappedBuffer::begin_access`] succeeded.
    pub fn create_prime(
        fd: OwnedFd,
        bpp: usize,
        stride: usize,
        height: usize,
    ) -> Result<MappedBuffer, MapError> {
        let layout = BufferLayout {
            size: stride * height,
            bpp,
            num_planes: 1,
            planes: [
                PlaneLayout {
                    offset: 0,
                    stride,
                    y_subsampling: 1,
                },
                PlaneLayout {
                    offset: 0,
                    stride: 0,
                    y_subsampling: 1,
                },
            ],
        };
        layout.validate()?;
        Ok(Self::from_parts(Some(fd), MapKind::Prime { height }, None, layout))
    }

    fn map_shm(fd: BorrowedFd<'_>, layout: &BufferLayout) -> Result<MemMap, MapError> {
        layout.validate()?;
        MemMap::new(fd, layout.size + layout.planes[0].offset, true)
    }

    fn from_parts(fd: Option<OwnedFd>, kind: MapKind, map: Option<MemMap>, layout: BufferLayout) -> Self {
        trace!(?fd, ?kind, size = layout.size, "Created buffer mapping");
        MappedBuffer(Rc::new(MappedBufferInner {
            fd,
            kind,
            map: RefCell::new(map),
            layout,
            buffer_resource: Cell::new(None),
            write_sync: RefCell::new(None),
        }))
    }

    /// Layout of the buffer
    pub fn layout(&self) -> &BufferLayout {
        &self.0.layout
    }

    /// Layout of a single plane
    pub fn plane(&self, idx: usize) -> PlaneLayout {
        self.0.layout.planes[idx]
    }

    /// File descriptor of the buffer, if owned by the mapping
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        self.0.fd.as_ref().map(|fd| fd.as_fd())
    }

    /// Client buffer that has to be released once the content was consumed
    pub fn buffer_resource(&self) -> Option<BufferId> {
        self.0.buffer_resource.get()
    }

    /// Set the client buffer to release once the content was consumed
    pub fn set_buffer_resource(&self, buffer: Option<BufferId>) {
        self.0.buffer_resource.set(buffer);
    }

    /// Announce CPU writes to the host through the given transport
    pub fn set_write_sync(&self, sync: WriteSync) {
        *self.0.write_sync.borrow_mut() = Some(sync);
    }

    /// Amount of holders of this mapping
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Prepare the mapping for CPU reads
    ///
    /// Returns `false` if the content cannot be accessed right now. Always succeeds for
    /// buffers mapped on creation.
    #[profiling::function]
    pub fn begin_access(&self) -> bool {
        let MapKind::Prime { height } = self.0.kind else {
            return true;
        };
        if self.0.map.borrow().is_some() {
            return true;
        }
        let Some(fd) = self.0.fd.as_ref() else {
            return false;
        };

        if let Err(err) = dmabuf::sync(fd.as_fd(), dmabuf::DmabufSyncFlags::BEGIN_READ) {
            debug!(?err, "Failed to start dma-buf read access");
            return false;
        }
        match MemMap::new(fd.as_fd(), self.0.layout.planes[0].stride * height, false) {
            Ok(map) => {
                *self.0.map.borrow_mut() = Some(map);
                true
            }
            Err(err) => {
                debug!(?err, "Failed to map dma-buf for reading");
                if let Err(err) = dmabuf::sync(fd.as_fd(), dmabuf::DmabufSyncFlags::END_READ) {
                    debug!(?err, "Failed to end dma-buf read access");
                }
                false
            }
        }
    }

    /// Undo [`MappedBuffer::begin_access`]
    ///
    /// Safe to call at any time, including after a failed `begin_access`.
    pub fn end_access(&self) {
        self.0.end_access();
    }

    /// Announce the start of a CPU write, if the buffer requires it
    pub fn begin_write(&self) {
        self.write_sync(dmabuf::DmabufSyncFlags::BEGIN_WRITE);
    }

    /// Announce the end of a CPU write, if the buffer requires it
    pub fn end_write(&self) {
        self.write_sync(dmabuf::DmabufSyncFlags::END_WRITE);
    }

    fn write_sync(&self, flags: dmabuf::DmabufSyncFlags) {
        let sync = self.0.write_sync.borrow();
        if let (Some(WriteSync(channel)), Some(fd)) = (sync.as_ref(), self.0.fd.as_ref()) {
            // the host has no way to recover from a rejected sync of its own buffer
            if let Err(err) = channel.sync(fd.as_fd(), flags) {
                panic!("Transport failed to sync host buffer ({:?}): {}", flags, err);
            }
        }
    }

    /// Whether `begin_write`/`end_write` reach the transport
    pub fn has_write_sync(&self) -> bool {
        self.0.write_sync.borrow().is_some()
    }

    /// Read access to the mapped bytes
    ///
    /// Returns `None` while a dma-buf is not accessed.
    pub fn data(&self) -> Option<Ref<'_, [u8]>> {
        Ref::filter_map(self.0.map.borrow(), |map| map.as_deref()).ok()
    }

    /// Write access to the mapped bytes
    ///
    /// Returns `None` while a dma-buf is not accessed.
    ///
    /// # Panics
    ///
    /// Panics if the data is currently borrowed.
    pub fn data_mut(&self) -> Option<RefMut<'_, [u8]>> {
        RefMut::filter_map(self.0.map.borrow_mut(), |map| map.as_deref_mut()).ok()
    }
}
