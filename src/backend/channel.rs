//! Interface to the virtualization transport
//!
//! The transport multiplexes the wayland connection between guest and host and is the only
//! component able to allocate memory visible to the host compositor. The proxy core only
//! depends on the three operations of [`WaylandChannel`].

use std::{
    fmt, io,
    os::unix::io::{BorrowedFd, OwnedFd},
};

use crate::backend::allocator::{dmabuf::DmabufSyncFlags, Fourcc};

/// Parameters of a host buffer allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCreateInfo {
    /// Allocate a dma-buf instead of shared memory
    pub dmabuf: bool,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format of the allocation
    pub drm_format: Fourcc,
    /// Byte size, only meaningful for shared memory allocations
    pub size: u32,
}

/// Result of a host buffer allocation
#[derive(Debug)]
pub struct BufferCreateOutput {
    /// File descriptor of the allocation
    pub fd: OwnedFd,
    /// Byte offset of every plane
    pub offsets: [u32; 4],
    /// Stride of every plane
    pub strides: [u32; 4],
    /// Byte size of the allocation as seen by the host
    pub host_size: u64,
}

/// Errors of the transport
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    /// The transport does not support dma-buf allocations
    #[error("The transport does not support dma-buf allocations")]
    DmabufUnsupported,
    /// The host refused or failed the allocation
    #[error("Host allocation failed")]
    Io(#[from] io::Error),
}

/// Virtualization transport between guest and host
pub trait WaylandChannel: fmt::Debug {
    /// Whether the transport is able to allocate dma-bufs
    fn supports_dmabuf(&self) -> bool;

    /// Allocate a new host-visible buffer
    fn allocate(&self, info: &BufferCreateInfo) -> Result<BufferCreateOutput, AllocationError>;

    /// Start or end a CPU access of a buffer allocated by [`WaylandChannel::allocate`]
    fn sync(&self, fd: BorrowedFd<'_>, flags: DmabufSyncFlags) -> io::Result<()>;
}
