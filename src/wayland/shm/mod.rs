//! Shared memory buffers
//!
//! Clients share memory with the proxy through `wl_shm` pools, file descriptors of which
//! they carve out buffers. The content of those buffers cannot be handed to the host as is,
//! it is copied into a host visible buffer on every commit (see
//! [`compositor`](crate::wayland::compositor)).
//!
//! Only formats the proxy knows how to copy are offered to clients. The formats announced by
//! the host go through [`shm_format_for_host_shm`] and [`shm_format_for_host_drm`] before being
//! relayed:
//!
//! ```
//! use guest_proxy::wayland::shm::{shm_format_for_host_drm, shm_format_for_host_shm};
//! use guest_proxy::backend::allocator::Fourcc;
//! use guest_proxy::reexports::wayland_server::protocol::wl_shm;
//!
//! assert_eq!(shm_format_for_host_shm(wl_shm::Format::Xrgb8888), Some(wl_shm::Format::Xrgb8888));
//! assert_eq!(shm_format_for_host_shm(wl_shm::Format::Nv12), None);
//! assert_eq!(shm_format_for_host_drm(Fourcc::Nv12), Some(wl_shm::Format::Nv12));
//! ```

use wayland_server::protocol::wl_shm;

use crate::backend::allocator::{format, Fourcc, MapError};

mod pool;

pub use self::pool::ShmPool;

/// A client `wl_shm_pool`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub u32);

/// Error that can occur when creating a buffer from a pool
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    /// The format is not part of the format catalog
    #[error("Format {0:?} is not supported")]
    InvalidFormat(wl_shm::Format),
    /// Negative or zero dimensions
    #[error("Invalid buffer size {width}x{height} with stride {stride}")]
    InvalidSize {
        /// Requested width
        width: i32,
        /// Requested height
        height: i32,
        /// Requested stride
        stride: i32,
    },
    /// The buffer does not fit the pool
    #[error("Buffer at offset {offset} spanning {len} bytes exceeds pool of {pool_size} bytes")]
    OutOfBounds {
        /// Offset of the buffer in the pool
        offset: i32,
        /// Bytes spanned by the buffer
        len: usize,
        /// Size of the pool
        pool_size: usize,
    },
    /// The pool could not be resized
    #[error("Pool cannot shrink from {old} to {new} bytes")]
    InvalidResize {
        /// Current size
        old: usize,
        /// Requested size
        new: i32,
    },
    /// The pool could not be mapped
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Filter a format advertised by the host `wl_shm` global
///
/// Returns the format to advertise to clients, or `None` if the format is not relayed.
/// Multi-planar formats are only offered to clients if the host supports them for dma-bufs.
pub fn shm_format_for_host_shm(format: wl_shm::Format) -> Option<wl_shm::Format> {
    match format {
        wl_shm::Format::Rgb565
        | wl_shm::Format::Argb8888
        | wl_shm::Format::Abgr8888
        | wl_shm::Format::Xrgb8888
        | wl_shm::Format::Xbgr8888 => Some(format),
        _ => None,
    }
}

/// Map a format advertised by the host `zwp_linux_dmabuf_v1` global to a `wl_shm` format
///
/// Host buffers of the returned format can be allocated as dma-buf and filled by the proxy.
pub fn shm_format_for_host_drm(fourcc: Fourcc) -> Option<wl_shm::Format> {
    format::drm_info(fourcc).map(|info| info.shm)
}
