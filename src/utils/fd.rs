use std::{
    os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    path::Path,
    rc::Rc,
};

use rustix::fs::{Mode, OFlags};

/// Ref-counted file descriptor of an open render node
///
/// The proxy only ever touches the device from its event loop thread,
/// clones are cheap handles to the same open file.
#[derive(Debug, Clone)]
pub struct DeviceFd(Rc<OwnedFd>);

impl DeviceFd {
    /// Open the device node at `path` for reading and writing
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<DeviceFd> {
        let fd = rustix::fs::open(
            path.as_ref(),
            OFlags::RDWR | OFlags::CLOEXEC | OFlags::NOCTTY,
            Mode::empty(),
        )?;
        Ok(DeviceFd(Rc::new(fd)))
    }
}

impl PartialEq for DeviceFd {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0.as_raw_fd() == other.0.as_raw_fd()
    }
}

impl AsFd for DeviceFd {
    #[inline]
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl AsRawFd for DeviceFd {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl From<OwnedFd> for DeviceFd {
    #[inline]
    fn from(fd: OwnedFd) -> Self {
        DeviceFd(Rc::new(fd))
    }
}
