//! CPU access helpers for [dma-buf](https://docs.kernel.org/driver-api/dma-buf.html) buffers.
//!
//! A dma-buf shared between devices has to be bracketed by [`sync`] calls whenever the CPU
//! reads or writes its mapping, so that caches are flushed and pending device work is
//! waited upon. The proxy either issues these ioctls itself (for buffers it maps for reading)
//! or forwards them through the transport (for host allocated buffers it writes to).

use std::{
    io,
    os::unix::io::{BorrowedFd, FromRawFd, OwnedFd},
};

use tracing::trace;

use crate::backend::ioctl;

bitflags::bitflags! {
    /// Flags of a dma-buf CPU access synchronization
    ///
    /// Without [`END`](DmabufSyncFlags::END) the flags describe the start of an access.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DmabufSyncFlags: u64 {
        /// The CPU reads from the buffer
        const READ = 1;
        /// The CPU writes to the buffer
        const WRITE = 2;
        /// The access ends
        const END = 4;
    }
}

impl DmabufSyncFlags {
    /// Start of a CPU write
    pub const BEGIN_WRITE: DmabufSyncFlags = DmabufSyncFlags::WRITE;
    /// End of a CPU write
    pub const END_WRITE: DmabufSyncFlags = DmabufSyncFlags::WRITE.union(DmabufSyncFlags::END);
    /// Start of a CPU read
    pub const BEGIN_READ: DmabufSyncFlags = DmabufSyncFlags::READ;
    /// End of a CPU read
    pub const END_READ: DmabufSyncFlags = DmabufSyncFlags::READ.union(DmabufSyncFlags::END);
}

/// Start or end a CPU access to a dma-buf
pub fn sync(dmabuf: BorrowedFd<'_>, flags: DmabufSyncFlags) -> io::Result<()> {
    trace!(?dmabuf, ?flags, "dma-buf cpu access sync");
    ioctl::dma_buf_sync(dmabuf, flags.bits())
}

/// Export the fences currently attached to a dma-buf as a sync file
///
/// With [`READ`](DmabufSyncFlags::READ) the returned sync file signals once all pending
/// writes are done, i.e. once the buffer content is safe to read.
///
/// Kernels without support for this ioctl fail with `ENOTTY`.
pub fn export_sync_file(dmabuf: BorrowedFd<'_>, flags: DmabufSyncFlags) -> io::Result<OwnedFd> {
    let access = (flags & (DmabufSyncFlags::READ | DmabufSyncFlags::WRITE)).bits() as u32;
    let arg = ioctl::dma_buf_export_sync_file(dmabuf, access)?;
    if arg.fd < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "kernel returned an invalid sync file descriptor",
        ));
    }
    // SAFETY: on success the kernel hands us a new file descriptor we now own
    Ok(unsafe { OwnedFd::from_raw_fd(arg.fd) })
}
