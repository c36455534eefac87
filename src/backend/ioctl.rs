//! Kernel interfaces used for dma-buf and sync-file handling

use std::{io, os::unix::io::BorrowedFd};

use rustix::{
    io::Errno,
    ioctl::{ioctl, ReadWriteOpcode, Setter, Updater, WriteOpcode},
};

const DMA_BUF_BASE: u8 = b'b';
const SYNC_IOC_MAGIC: u8 = b'>';
#[cfg(feature = "backend_drm")]
const DRM_IOCTL_BASE: u8 = b'd';
#[cfg(feature = "backend_drm")]
// DRM_COMMAND_BASE + DRM_VIRTGPU_WAIT
const DRM_IOCTL_VIRTGPU_WAIT_NR: u8 = 0x40 + 0x08;

/// `struct dma_buf_sync`
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct DmaBufSync {
    pub flags: u64,
}

/// `struct dma_buf_export_sync_file`
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct DmaBufExportSyncFile {
    pub flags: u32,
    pub fd: i32,
}

/// `struct sync_file_info`
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct SyncFileInfo {
    pub name: [u8; 32],
    pub status: i32,
    pub flags: u32,
    pub num_fences: u32,
    pub pad: u32,
    pub sync_fence_info: u64,
}

impl SyncFileInfo {
    /// Driver or timeline name, up to the first nul byte
    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|b| *b == 0).unwrap_or(self.name.len());
        &self.name[..len]
    }
}

/// `struct drm_virtgpu_3d_wait`
///
/// The virtio-gpu uapi is not covered by `drm-ffi`.
#[cfg(feature = "backend_drm")]
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct VirtgpuWait {
    pub handle: u32,
    pub flags: u32,
}

type DmaBufIoctlSync = WriteOpcode<DMA_BUF_BASE, 0, DmaBufSync>;
type DmaBufIoctlExportSyncFile = ReadWriteOpcode<DMA_BUF_BASE, 2, DmaBufExportSyncFile>;
type SyncIocFileInfo = ReadWriteOpcode<SYNC_IOC_MAGIC, 4, SyncFileInfo>;
#[cfg(feature = "backend_drm")]
type DrmIoctlVirtgpuWait = ReadWriteOpcode<DRM_IOCTL_BASE, DRM_IOCTL_VIRTGPU_WAIT_NR, VirtgpuWait>;

/// Restart an ioctl while it is interrupted
fn restarting<T>(mut call: impl FnMut() -> rustix::io::Result<T>) -> io::Result<T> {
    loop {
        match call() {
            Err(Errno::INTR) | Err(Errno::AGAIN) => continue,
            result => return result.map_err(io::Error::from),
        }
    }
}

/// `DMA_BUF_IOCTL_SYNC`
pub(crate) fn dma_buf_sync(fd: BorrowedFd<'_>, flags: u64) -> io::Result<()> {
    restarting(|| {
        // SAFETY: DMA_BUF_IOCTL_SYNC takes a `struct dma_buf_sync`
        unsafe { ioctl(fd, Setter::<DmaBufIoctlSync, _>::new(DmaBufSync { flags })) }
    })
}

/// `DMA_BUF_IOCTL_EXPORT_SYNC_FILE`, returns the argument as filled in by the kernel
pub(crate) fn dma_buf_export_sync_file(fd: BorrowedFd<'_>, flags: u32) -> io::Result<DmaBufExportSyncFile> {
    let mut arg = DmaBufExportSyncFile { flags, fd: -1 };
    restarting(|| {
        // SAFETY: DMA_BUF_IOCTL_EXPORT_SYNC_FILE takes a `struct dma_buf_export_sync_file`
        unsafe { ioctl(fd, Updater::<DmaBufIoctlExportSyncFile, _>::new(&mut arg)) }
    })?;
    Ok(arg)
}

/// `SYNC_IOC_FILE_INFO` without per fence information
pub(crate) fn sync_file_info(fd: BorrowedFd<'_>) -> io::Result<SyncFileInfo> {
    let mut info = SyncFileInfo::default();
    restarting(|| {
        // SAFETY: SYNC_IOC_FILE_INFO takes a `struct sync_file_info`, a zeroed
        // `sync_fence_info` asks the kernel to not fill in per fence information
        unsafe { ioctl(fd, Updater::<SyncIocFileInfo, _>::new(&mut info)) }
    })?;
    Ok(info)
}

/// `DRM_IOCTL_VIRTGPU_WAIT` on a gem handle
#[cfg(feature = "backend_drm")]
pub(crate) fn virtgpu_wait(fd: BorrowedFd<'_>, handle: u32) -> io::Result<()> {
    let mut arg = VirtgpuWait { handle, flags: 0 };
    restarting(|| {
        // SAFETY: DRM_IOCTL_VIRTGPU_WAIT takes a `struct drm_virtgpu_3d_wait`
        unsafe { ioctl(fd, Updater::<DrmIoctlVirtgpuWait, _>::new(&mut arg)) }
    })
}
