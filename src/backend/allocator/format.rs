//! Pixel format catalog
//!
//! Maps between the formats clients use on `wl_shm` and DRM fourcc codes, and
//! describes the memory layout of each format. Only the formats the proxy is able to
//! copy between guest and host are known:
//!
//! | `wl_shm` | DRM fourcc | bytes per pixel | planes |
//! |----------|------------|-----------------|--------|
//! | `Nv12`     | `NV12`     | 1 | 2 |
//! | `Rgb565`   | `RG16`     | 2 | 1 |
//! | `Argb8888` | `AR24`     | 4 | 1 |
//! | `Abgr8888` | `AB24`     | 4 | 1 |
//! | `Xrgb8888` | `XR24`     | 4 | 1 |
//! | `Xbgr8888` | `XB24`     | 4 | 1 |
//!
//! ```
//! use guest_proxy::backend::allocator::format;
//! use guest_proxy::reexports::wayland_server::protocol::wl_shm;
//!
//! assert_eq!(format::bpp(wl_shm::Format::Xrgb8888), 4);
//! assert_eq!(format::to_shm(format::to_drm(wl_shm::Format::Nv12)), wl_shm::Format::Nv12);
//! ```
//!
//! Apart from the `*_is_supported` predicates, every lookup treats an unknown format as a
//! programming error and panics. Callers are expected to filter formats at the protocol
//! boundary.

use std::cell::Cell;

use wayland_server::protocol::wl_shm;

use super::Fourcc;

/// Maximum amount of planes of any format in the catalog
pub const MAX_PLANES: usize = 2;

/// Domain a raw format code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatDomain {
    /// A `wl_shm` format code
    Shm,
    /// A DRM fourcc code
    Drm,
}

/// Layout description of a catalog format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    /// `wl_shm` format
    pub shm: wl_shm::Format,
    /// Matching DRM fourcc
    pub drm: Fourcc,
    /// Bytes per pixel (of the first plane for multi-planar formats)
    pub bpp: usize,
    /// Amount of planes
    pub planes: usize,
}

macro_rules! format_catalog {
    ($($shm: ident => $drm: ident { bpp: $bpp: expr, planes: $planes: expr $(,)? }),* $(,)?) => {
        static FORMATS: &[PixelFormat] = &[
            $(
                PixelFormat {
                    shm: wl_shm::Format::$shm,
                    drm: Fourcc::$drm,
                    bpp: $bpp,
                    planes: $planes,
                },
            )*
        ];
    };
}

format_catalog! {
    Nv12 => Nv12 { bpp: 1, planes: 2 },
    Rgb565 => Rgb565 { bpp: 2, planes: 1 },
    Argb8888 => Argb8888 { bpp: 4, planes: 1 },
    Abgr8888 => Abgr8888 { bpp: 4, planes: 1 },
    Xrgb8888 => Xrgb8888 { bpp: 4, planes: 1 },
    Xbgr8888 => Xbgr8888 { bpp: 4, planes: 1 },
}

thread_local!(static LAST_LOOKUP: Cell<Option<&'static PixelFormat>> = Cell::new(None));

fn cached(matches: impl Fn(&PixelFormat) -> bool) -> Option<&'static PixelFormat> {
    if let Some(info) = LAST_LOOKUP.with(|cache| cache.get()).filter(|info| matches(*info)) {
        return Some(info);
    }
    let info = FORMATS.iter().find(|info| matches(*info))?;
    LAST_LOOKUP.with(|cache| cache.set(Some(info)));
    Some(info)
}

/// Look up the layout description of a `wl_shm` format
pub fn shm_info(format: wl_shm::Format) -> Option<&'static PixelFormat> {
    cached(|info| info.shm == format)
}

/// Look up the layout description of a DRM format
pub fn drm_info(fourcc: Fourcc) -> Option<&'static PixelFormat> {
    cached(|info| info.drm == fourcc)
}

#[track_caller]
fn expect_shm(format: wl_shm::Format) -> &'static PixelFormat {
    match shm_info(format) {
        Some(info) => info,
        None => panic!("Format {:?} is not part of the format catalog", format),
    }
}

/// Returns true if a raw format code of the given domain is part of the catalog
pub fn is_supported(code: u32, domain: FormatDomain) -> bool {
    match domain {
        FormatDomain::Shm => wl_shm::Format::try_from(code)
            .map(shm_format_is_supported)
            .unwrap_or(false),
        FormatDomain::Drm => Fourcc::try_from(code).map(drm_format_is_supported).unwrap_or(false),
    }
}

/// Returns true if the `wl_shm` format is part of the catalog
pub fn shm_format_is_supported(format: wl_shm::Format) -> bool {
    shm_info(format).is_some()
}

/// Returns true if the DRM format is part of the catalog
pub fn drm_format_is_supported(fourcc: Fourcc) -> bool {
    drm_info(fourcc).is_some()
}

/// DRM fourcc matching a `wl_shm` format
#[track_caller]
pub fn to_drm(format: wl_shm::Format) -> Fourcc {
    expect_shm(format).drm
}

/// `wl_shm` format matching a DRM fourcc
#[track_caller]
pub fn to_shm(fourcc: Fourcc) -> wl_shm::Format {
    match drm_info(fourcc) {
        Some(info) => info.shm,
        None => panic!("Format {:?} is not part of the format catalog", fourcc),
    }
}

/// Bytes per pixel
#[track_caller]
pub fn bpp(format: wl_shm::Format) -> usize {
    expect_shm(format).bpp
}

/// Amount of planes
#[track_caller]
pub fn plane_count(format: wl_shm::Format) -> usize {
    expect_shm(format).planes
}

/// Vertical subsampling factor of a plane
///
/// Planes a format does not have report no subsampling.
#[track_caller]
pub fn plane_y_subsampling(format: wl_shm::Format, plane: usize) -> usize {
    match expect_shm(format).shm {
        wl_shm::Format::Nv12 => [1, 2].get(plane).copied().unwrap_or(1),
        _ => 1,
    }
}

/// Byte offset of a plane relative to the start of the buffer
///
/// Planes a format does not have are reported at offset zero.
#[track_caller]
pub fn plane_offset(format: wl_shm::Format, plane: usize, height: usize, stride: usize) -> usize {
    match expect_shm(format).shm {
        wl_shm::Format::Nv12 => [0, 1].get(plane).copied().unwrap_or(0) * height * stride,
        _ => 0,
    }
}

/// Amount of bytes a buffer of the given height and stride spans
///
/// This is the furthest byte any plane reaches, planes are not assumed to be contiguous.
#[track_caller]
pub fn total_size(format: wl_shm::Format, height: usize, stride: usize) -> usize {
    (0..plane_count(format))
        .map(|plane| {
            height / plane_y_subsampling(format, plane) * stride + plane_offset(format, plane, height, stride)
        })
        .max()
        .unwrap_or(0)
}
