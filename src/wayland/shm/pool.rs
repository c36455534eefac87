use std::os::unix::io::{AsFd, OwnedFd};

use tracing::trace;
use wayland_server::protocol::wl_shm;

use super::ShmError;
use crate::{
    backend::allocator::{format, BufferLayout, MappedBuffer, PlaneLayout},
    wayland::buffer::{BufferId, ClientBuffer},
};

/// A client `wl_shm_pool`
///
/// Every buffer created from the pool gets its own mapping of the pool, which stays valid
/// once the pool is destroyed.
#[derive(Debug)]
pub struct ShmPool {
    fd: OwnedFd,
    size: usize,
}

impl ShmPool {
    /// Wrap the file descriptor of a new pool of `size` bytes
    pub fn new(fd: OwnedFd, size: i32) -> Result<ShmPool, ShmError> {
        if size <= 0 {
            return Err(ShmError::InvalidResize { old: 0, new: size });
        }
        trace!(?fd, size, "Creating new shm pool");
        Ok(ShmPool {
            fd,
            size: size as usize,
        })
    }

    /// Size of the pool in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Grow the pool
    ///
    /// Buffers created afterwards may use the new space.
    pub fn resize(&mut self, size: i32) -> Result<(), ShmError> {
        if size <= 0 || (size as usize) < self.size {
            return Err(ShmError::InvalidResize {
                old: self.size,
                new: size,
            });
        }
        trace!(fd = ?self.fd, old = self.size, new = size, "Resizing shm pool");
        self.size = size as usize;
        Ok(())
    }

    /// Create a buffer from the pool
    ///
    /// The buffer content starts `offset` bytes into the pool, further planes of multi-planar
    /// formats follow the layout of the format catalog.
    pub fn create_buffer(
        &self,
        id: BufferId,
        offset: i32,
        width: i32,
        height: i32,
        stride: i32,
        format: wl_shm::Format,
    ) -> Result<ClientBuffer, ShmError> {
        if !format::shm_format_is_supported(format) {
            return Err(ShmError::InvalidFormat(format));
        }
        if width <= 0 || height <= 0 || stride <= 0 {
            return Err(ShmError::InvalidSize { width, height, stride });
        }

        let (height_px, stride_b) = (height as usize, stride as usize);
        let len = format::total_size(format, height_px, stride_b);
        if offset < 0 || offset as usize + len > self.size {
            return Err(ShmError::OutOfBounds {
                offset,
                len,
                pool_size: self.size,
            });
        }

        let offset = offset as usize;
        let layout = BufferLayout {
            size: len,
            bpp: format::bpp(format),
            num_planes: format::plane_count(format),
            planes: [
                PlaneLayout {
                    offset,
                    stride: stride_b,
                    y_subsampling: format::plane_y_subsampling(format, 0),
                },
                PlaneLayout {
                    offset: offset + format::plane_offset(format, 1, height_px, stride_b),
                    stride: stride_b,
                    y_subsampling: format::plane_y_subsampling(format, 1),
                },
            ],
        };
        let mapping = MappedBuffer::create_unowned(self.fd.as_fd(), layout)?;
        mapping.set_buffer_resource(Some(id));

        trace!(buffer = ?id, width, height, ?format, "Created shm buffer");
        Ok(ClientBuffer {
            id,
            size: (width, height).into(),
            format,
            proxy: None,
            is_drm: false,
            mapping: Some(mapping),
            sync_point: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustix::fs::{ftruncate, memfd_create, MemfdFlags};

    fn pool(size: i32) -> ShmPool {
        let fd = memfd_create("shm-pool-test", MemfdFlags::CLOEXEC).unwrap();
        ftruncate(&fd, size as u64).unwrap();
        ShmPool::new(fd, size).unwrap()
    }

    #[test]
    fn nv12_buffer_layout() {
        let pool = pool(4096);
        let buffer = pool
            .create_buffer(BufferId(3), 64, 16, 8, 16, wl_shm::Format::Nv12)
            .unwrap();
        let mapping = buffer.mapping().unwrap();
        let layout = mapping.layout();

        assert_eq!(layout.size, 16 * 8 + 16 * 4);
        assert_eq!(layout.num_planes, 2);
        assert_eq!(layout.planes[0].offset, 64);
        assert_eq!(layout.planes[1].offset, 64 + 16 * 8);
        assert_eq!(layout.planes[1].y_subsampling, 2);
        assert_eq!(mapping.buffer_resource(), Some(BufferId(3)));
        assert!(mapping.fd().is_none());
        assert!(!buffer.is_drm());
        assert_eq!(buffer.proxy(), None);
    }

    #[test]
    fn rejects_buffers_outside_the_pool() {
        let mut pool = pool(1024);
        let err = pool
            .create_buffer(BufferId(1), 512, 16, 16, 64, wl_shm::Format::Argb8888)
            .unwrap_err();
        assert!(matches!(err, ShmError::OutOfBounds { len: 1024, .. }));

        assert!(matches!(
            pool.create_buffer(BufferId(1), 0, 16, 16, 64, wl_shm::Format::Yuyv),
            Err(ShmError::InvalidFormat(_))
        ));
        assert!(matches!(pool.resize(512), Err(ShmError::InvalidResize { .. })));
    }

    #[test]
    fn resize_allows_larger_buffers() {
        let mut pool = pool(1024);
        let fd = pool.fd.try_clone().unwrap();
        ftruncate(&fd, 4096).unwrap();
        pool.resize(4096).unwrap();

        let buffer = pool
            .create_buffer(BufferId(1), 1024, 16, 16, 64, wl_shm::Format::Xrgb8888)
            .unwrap();
        buffer.mapping().unwrap().data_mut().unwrap()[1024] = 7;
    }
}
