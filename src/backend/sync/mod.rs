//! Helpers for waiting on GPU work attached to dma-bufs
//!
//! Clients rendering with a GPU hand out dma-bufs that may still be written to by pending
//! GPU work. Before the proxy reads such a buffer, or forwards it to the host, the pending
//! work has to be waited upon. The preferred way is exporting the implicit fences of the
//! buffer as a [sync file](https://docs.kernel.org/driver-api/sync_file.html), which either
//! gets forwarded to the host (for fences of the virtualized GPU) or waited upon in the guest.
//!
//! Kernels too old to export sync files leave the proxy with a last resort: importing the buffer
//! into the local virtio-gpu device and issuing a blocking wait on it.
//!
//! Waiting always happens on the event loop thread and is therefore bounded by
//! [`FENCE_WAIT_TIMEOUT`]. A timed out wait is logged and otherwise ignored.

use std::{
    fmt, io,
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
    time::Duration,
};

use rustix::event::{poll, PollFd, PollFlags};
use tracing::{trace, warn};

use crate::backend::{
    allocator::dmabuf::{self, DmabufSyncFlags},
    ioctl::{self, SyncFileInfo},
};
use crate::utils::DeviceFd;

/// Upper bound of a blocking fence wait
pub const FENCE_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

const VIRTGPU_DRIVER: &[u8] = b"virtio_gpu";
const STUB_DRIVER: &[u8] = b"stub";

/// Errors of sync file operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The kernel does not implement the operation
    #[error("Sync file export is not supported by the kernel")]
    NotSupported,
    /// The fence was not signaled in time
    #[error("Fence was not signaled in time")]
    Timeout,
    /// Any other failure, the operation may succeed if retried later
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Export a sync file signaling once the content of the dma-buf may be read
///
/// Fails with [`SyncError::NotSupported`] on kernels lacking the export ioctl.
pub fn export_read_sync_file(dmabuf: BorrowedFd<'_>) -> Result<OwnedFd, SyncError> {
    dmabuf::export_sync_file(dmabuf, DmabufSyncFlags::READ).map_err(|err| {
        if err.raw_os_error() == Some(libc::ENOTTY) {
            SyncError::NotSupported
        } else {
            SyncError::Io(err)
        }
    })
}

fn file_info(sync_file: BorrowedFd<'_>) -> io::Result<SyncFileInfo> {
    ioctl::sync_file_info(sync_file)
}

/// Name of the driver the fences of a sync file originate from
pub fn driver_name(sync_file: BorrowedFd<'_>) -> io::Result<String> {
    file_info(sync_file).map(|info| String::from_utf8_lossy(info.name()).into_owned())
}

/// Returns true if the sync file originates from the driver with the given name
///
/// Driver names reported by the kernel may carry a suffix, only the prefix is compared.
pub fn is_driver(sync_file: BorrowedFd<'_>, name: &[u8]) -> bool {
    file_info(sync_file)
        .map(|info| info.name().starts_with(name))
        .unwrap_or(false)
}

/// Returns true if the sync file originates from the virtualized GPU
///
/// Such fences can be forwarded to the host as is.
pub fn is_virtgpu(sync_file: BorrowedFd<'_>) -> bool {
    is_driver(sync_file, VIRTGPU_DRIVER)
}

/// Block until the sync file is signaled, for at most `timeout`
pub fn poll_signaled(sync_file: BorrowedFd<'_>, timeout: Duration) -> Result<(), SyncError> {
    let timeout = timeout.as_millis().min(i32::MAX as u128) as i32;
    let mut fds = [PollFd::new(&sync_file, PollFlags::IN)];
    loop {
        match poll(&mut fds, timeout) {
            Ok(0) => return Err(SyncError::Timeout),
            Ok(_) => {
                if fds[0].revents().intersects(PollFlags::ERR | PollFlags::NVAL) {
                    return Err(SyncError::Io(io::Error::from_raw_os_error(libc::EINVAL)));
                }
                return Ok(());
            }
            Err(rustix::io::Errno::INTR) | Err(rustix::io::Errno::AGAIN) => continue,
            Err(err) => return Err(SyncError::Io(err.into())),
        }
    }
}

/// Wait on a sync file, for at most [`FENCE_WAIT_TIMEOUT`]
///
/// Fences of the stub driver carry no GPU work and return immediately. A timeout is logged
/// as a possible GPU hang and otherwise treated as signaled.
#[profiling::function]
pub fn wait(sync_file: BorrowedFd<'_>) {
    if is_driver(sync_file, STUB_DRIVER) {
        return;
    }

    match poll_signaled(sync_file, FENCE_WAIT_TIMEOUT) {
        Ok(()) => {}
        Err(SyncError::Timeout) => {
            let name = driver_name(sync_file).unwrap_or_else(|_| String::from("<unknown>"));
            warn!(fd = ?sync_file, name, "Fence wait timeout. Possible GPU hang!");
        }
        Err(err) => trace!(fd = ?sync_file, ?err, "Fence wait failed"),
    }
}

/// Wait for GPU work on a dma-buf using the virtio-gpu device
///
/// The buffer is imported into `device` and waited upon. Fails silently if the buffer
/// cannot be imported or the device is no virtio-gpu device. The imported handle is always
/// closed again.
#[cfg(feature = "backend_drm")]
pub fn virtgpu_wait(device: &DeviceFd, dmabuf: BorrowedFd<'_>) {
    let handle = match drm_ffi::gem::fd_to_handle(device.as_fd(), dmabuf) {
        Ok(prime) => prime.handle,
        Err(err) => {
            trace!(?err, "Failed to import dma-buf into the gpu device");
            return;
        }
    };

    if let Err(err) = ioctl::virtgpu_wait(device.as_fd(), handle) {
        trace!(?err, handle, "virtio-gpu wait failed");
    }

    if let Err(err) = drm_ffi::gem::close(device.as_fd(), handle) {
        warn!(?err, handle, "Failed to close imported gem handle");
    }
}

/// Dma-buf of a client buffer rendered to by the GPU
///
/// Attached content has to be synchronized through it before the host may use the buffer.
pub struct SyncPoint {
    fd: OwnedFd,
}

impl fmt::Debug for SyncPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPoint").field("fd", &self.fd).finish()
    }
}

impl SyncPoint {
    /// Create a sync point for the given dma-buf
    pub fn new(fd: OwnedFd) -> Self {
        SyncPoint { fd }
    }

    /// Wait in the guest until the GPU is done with the buffer
    ///
    /// Uses a sync file if possible and the virtio-gpu device given as `device` otherwise.
    #[profiling::function]
    pub fn sync(&self, device: Option<&DeviceFd>) {
        match export_read_sync_file(self.fd.as_fd()) {
            Ok(sync_file) => {
                trace!(prime_fd = ?self.fd, "sync point: sync_wait");
                wait(sync_file.as_fd());
            }
            Err(_) => {
                #[cfg(feature = "backend_drm")]
                if let Some(device) = device {
                    trace!(prime_fd = ?self.fd, "sync point: virtgpu_wait");
                    virtgpu_wait(device, self.fd.as_fd());
                }
                #[cfg(not(feature = "backend_drm"))]
                let _ = device;
            }
        }
    }
}

impl AsFd for SyncPoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// Fence handling as used by surfaces
///
/// [`KernelSync`] talks to the kernel. Other implementations exist to exercise the fallback
/// paths of the surface logic.
pub trait FenceSync: fmt::Debug {
    /// See [`export_read_sync_file`]
    fn export_read_sync_file(&self, dmabuf: BorrowedFd<'_>) -> Result<OwnedFd, SyncError>;
    /// See [`is_virtgpu`]
    fn is_virtgpu(&self, sync_file: BorrowedFd<'_>) -> bool;
    /// See [`wait`]
    fn wait(&self, sync_file: BorrowedFd<'_>);
    /// See [`SyncPoint::sync`]
    fn sync_point(&self, sync_point: &SyncPoint);
}

/// [`FenceSync`] backed by the kernel
#[derive(Debug, Default)]
pub struct KernelSync {
    device: Option<DeviceFd>,
}

impl KernelSync {
    /// Create a new instance using `device` for the virtio-gpu wait fallback
    pub fn new(device: Option<DeviceFd>) -> Self {
        KernelSync { device }
    }
}

impl FenceSync for KernelSync {
    fn export_read_sync_file(&self, dmabuf: BorrowedFd<'_>) -> Result<OwnedFd, SyncError> {
        export_read_sync_file(dmabuf)
    }

    fn is_virtgpu(&self, sync_file: BorrowedFd<'_>) -> bool {
        is_virtgpu(sync_file)
    }

    fn wait(&self, sync_file: BorrowedFd<'_>) {
        wait(sync_file)
    }

    fn sync_point(&self, sync_point: &SyncPoint) {
        sync_point.sync(self.device.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustix::fs::{memfd_create, MemfdFlags};

    #[test]
    fn export_from_non_dmabuf_fails() {
        let fd = memfd_create("not-a-dmabuf", MemfdFlags::CLOEXEC).unwrap();
        assert!(export_read_sync_file(fd.as_fd()).is_err());
    }

    #[test]
    fn non_sync_files_have_no_driver() {
        let fd = memfd_create("not-a-sync-file", MemfdFlags::CLOEXEC).unwrap();
        assert!(!is_virtgpu(fd.as_fd()));
        assert!(driver_name(fd.as_fd()).is_err());
    }

    #[test]
    fn poll_times_out_on_unsignaled_fd() {
        let (read, _write) = rustix::pipe::pipe().unwrap();
        assert!(matches!(
            poll_signaled(read.as_fd(), Duration::from_millis(10)),
            Err(SyncError::Timeout)
        ));
    }

    #[test]
    fn poll_returns_once_readable() {
        let (read, write) = rustix::pipe::pipe().unwrap();
        rustix::io::write(&write, b"x").unwrap();
        assert!(poll_signaled(read.as_fd(), Duration::from_millis(10)).is_ok());
    }
}
