//! Client buffers
//!
//! This module provides the [`ClientBuffer`] type, the proxy side of a `wl_buffer` created by a
//! guest client. A client buffer is either backed by shared memory (see [`shm`](crate::wayland::shm))
//! and copied into a host buffer on commit, or backed by a dma-buf of the virtualized GPU (see
//! [`dmabuf`](crate::wayland::dmabuf)) and forwarded to the host as is.
//!
//! Surfaces keep a clone of the [`MappedBuffer`] of the last attached buffer, so the content
//! stays readable after the client destroys the buffer object.

use std::fmt;

use wayland_server::protocol::wl_shm;

use crate::{
    backend::{allocator::MappedBuffer, sync::SyncPoint},
    utils::{Buffer, Size},
    wayland::compositor::HostBufferId,
};

/// A client `wl_buffer`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wl_buffer@{}", self.0)
    }
}

/// State of a client buffer
#[derive(Debug)]
pub struct ClientBuffer {
    pub(crate) id: BufferId,
    pub(crate) size: Size<i32, Buffer>,
    pub(crate) format: wl_shm::Format,
    pub(crate) proxy: Option<HostBufferId>,
    pub(crate) is_drm: bool,
    pub(crate) mapping: Option<MappedBuffer>,
    pub(crate) sync_point: Option<SyncPoint>,
}

impl ClientBuffer {
    /// Id of the buffer
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Size of the content in pixels
    pub fn size(&self) -> Size<i32, Buffer> {
        self.size
    }

    /// Pixel format of the content
    pub fn format(&self) -> wl_shm::Format {
        self.format
    }

    /// Host buffer the content can be attached as directly
    ///
    /// Only dma-buf backed buffers have one.
    pub fn proxy(&self) -> Option<HostBufferId> {
        self.proxy
    }

    /// Whether the buffer is a dma-buf
    pub fn is_drm(&self) -> bool {
        self.is_drm
    }

    /// CPU mapping of the content, if the content can be read by the proxy
    pub fn mapping(&self) -> Option<&MappedBuffer> {
        self.mapping.as_ref()
    }

    /// GPU work to wait for before the host may read the content
    pub fn sync_point(&self) -> Option<&SyncPoint> {
        self.sync_point.as_ref()
    }
}
