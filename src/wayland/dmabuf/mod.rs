//! Linux DMABUF client buffers
//!
//! Buffers clients create through `zwp_linux_dmabuf_v1` are forwarded to the host as they are,
//! the proxy only keeps track of them to synchronize GPU work before the host reads them.
//!
//! Buffers allocated by the virtualized GPU (virtio-gpu) additionally get
//!
//! - a [`SyncPoint`], waited upon when the host cannot wait for the GPU itself
//! - for single-plane formats, a PRIME mapping used to read the content of shaped X11 windows,
//!   which is only mapped between [`MappedBuffer::begin_access`] and [`MappedBuffer::end_access`]

use std::os::unix::io::OwnedFd;

use tracing::{debug, trace};
use wayland_server::protocol::wl_shm;

use crate::{
    backend::{
        allocator::{format, Fourcc, MapError, MappedBuffer},
        sync::SyncPoint,
    },
    utils::{Buffer, Size},
    wayland::{
        buffer::{BufferId, ClientBuffer},
        compositor::HostBufferId,
    },
};

/// Parameters of a client dma-buf, as collected from `zwp_linux_buffer_params_v1`
#[derive(Debug)]
pub struct DmabufParams {
    /// Buffer created on the host from the same parameters
    pub host_buffer: HostBufferId,
    /// File descriptor of the first plane
    pub fd: OwnedFd,
    /// Size in pixels
    pub size: Size<i32, Buffer>,
    /// Pixel format
    pub format: Fourcc,
    /// Stride of the first plane
    pub stride: u32,
    /// The buffer was allocated by the virtio-gpu device
    pub is_virtgpu: bool,
}

/// Errors that can happen when creating a dma-buf client buffer
#[derive(Debug, thiserror::Error)]
pub enum DmabufError {
    /// Width or height is not positive
    #[error("Invalid buffer size {0:?}")]
    InvalidDimensions(Size<i32, Buffer>),
    /// The format is not part of the format catalog
    #[error("Format {0:?} is not supported")]
    UnsupportedFormat(Fourcc),
    /// Duplicating the file descriptor for the PRIME mapping failed
    #[error("Failed to duplicate dma-buf descriptor")]
    Dup(#[source] std::io::Error),
    /// The PRIME mapping could not be created
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Create the client buffer for a dma-buf the host already knows
pub fn create_buffer(id: BufferId, params: DmabufParams) -> Result<ClientBuffer, DmabufError> {
    if params.size.w <= 0 || params.size.h <= 0 {
        return Err(DmabufError::InvalidDimensions(params.size));
    }
    let Some(info) = format::drm_info(params.format) else {
        return Err(DmabufError::UnsupportedFormat(params.format));
    };
    let format: wl_shm::Format = info.shm;

    let mut buffer = ClientBuffer {
        id,
        size: params.size,
        format,
        proxy: Some(params.host_buffer),
        is_drm: true,
        mapping: None,
        sync_point: None,
    };

    if !params.is_virtgpu {
        trace!(buffer = ?id, host_buffer = ?params.host_buffer, "Created foreign dma-buf buffer");
        return Ok(buffer);
    }

    if info.planes == 1 {
        let fd = params.fd.try_clone().map_err(DmabufError::Dup)?;
        let mapping = MappedBuffer::create_prime(
            fd,
            info.bpp,
            params.stride as usize,
            params.size.h as usize,
        )?;
        // released once the content was copied, the host never sees this buffer then
        mapping.set_buffer_resource(Some(id));
        buffer.mapping = Some(mapping);
    } else {
        debug!(buffer = ?id, ?format, "No PRIME mapping for multi-planar dma-buf");
    }
    buffer.sync_point = Some(SyncPoint::new(params.fd));

    trace!(buffer = ?id, host_buffer = ?params.host_buffer, ?format, "Created virtio-gpu dma-buf buffer");
    Ok(buffer)
}
