//! Stamping X11 bounding shapes out of window content
//!
//! A shaped window is presented to the host as an ARGB8888 image that contains the content of
//! the window inside its bounding shape and is fully transparent everywhere else. The image is
//! regenerated from the client content on every commit by [`generate_argb_image`], which
//! composites the content onto the image with the shape as clip region.

use pixman::{FormatCode, Image, Operation};
use wayland_server::protocol::wl_shm;

use crate::{
    backend::allocator::{format, Fourcc, MappedBuffer},
    utils::{Buffer, Region, Size},
};

/// Errors of stamping out a shape
#[derive(Debug, thiserror::Error)]
pub enum ShapeError {
    /// The image would contain no pixel
    #[error("Cannot create an empty {0:?} shape image")]
    Empty(Size<i32, Buffer>),
    /// pixman failed to create an image
    #[error("Failed to create a shape image")]
    CreateFailed,
    /// The content format has no pixman equivalent
    #[error("Content format {0:?} is not supported by pixman")]
    UnsupportedFormat(wl_shm::Format),
    /// The content is currently not mapped
    #[error("Shaped content is not accessible")]
    NotAccessible,
    /// The content mapping is smaller than its layout
    #[error("Content holds {actual} bytes, {expected} expected")]
    IncompleteBuffer {
        /// Bytes the layout requires
        expected: usize,
        /// Bytes mapped
        actual: usize,
    },
    /// pixman could not wrap the content
    #[error("Failed to import the content into pixman")]
    ImportFailed,
    /// Setting the clip region failed
    #[error(transparent)]
    Clip(#[from] pixman::OperationFailed),
}

/// An ARGB8888 image in system memory
pub struct ShapeImage {
    size: Size<i32, Buffer>,
    image: Image<'static, 'static>,
}

impl std::fmt::Debug for ShapeImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeImage")
            .field("size", &self.size)
            .field("stride", &self.image.stride())
            .finish_non_exhaustive()
    }
}

impl ShapeImage {
    /// Allocate a transparent image of the given size
    pub fn new(size: Size<i32, Buffer>) -> Result<ShapeImage, ShapeError> {
        if size.w <= 0 || size.h <= 0 {
            return Err(ShapeError::Empty(size));
        }
        let format = FormatCode::try_from(Fourcc::Argb8888).map_err(|_| ShapeError::CreateFailed)?;
        let image = Image::new(format, size.w as usize, size.h as usize, true)
            .map_err(|_| ShapeError::CreateFailed)?;
        Ok(ShapeImage { size, image })
    }

    /// Size in pixels
    pub fn size(&self) -> Size<i32, Buffer> {
        self.size
    }

    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.image.stride()
    }

    /// Pixel data, rows of native endian `0xAARRGGBB` words
    pub fn data(&self) -> &[u8] {
        // SAFETY: the image owns `stride * height` bytes of non-null pixel data for as long
        // as it lives, only `generate_argb_image` writes to it through `&mut self`
        unsafe { std::slice::from_raw_parts(self.image.data() as *const u8, self.len()) }
    }

    /// Pixel at the given position
    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        if x < 0 || y < 0 || x >= self.size.w || y >= self.size.h {
            return None;
        }
        let start = y as usize * self.stride() + x as usize * 4;
        let bytes = self.data().get(start..start + 4)?;
        Some(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn len(&self) -> usize {
        self.image.stride() * self.image.height()
    }

    fn clear(&mut self) {
        // SAFETY: see `data`, the exclusive borrow rules out concurrent readers
        unsafe { std::slice::from_raw_parts_mut(self.image.data() as *mut u8, self.len()) }.fill(0);
    }
}

/// Stamp the shape out of the source content into `dst`
///
/// `dst` is cleared to transparent, then the content is composited onto it in `SRC` mode with
/// `shape` as clip region, converting it to ARGB8888 on the way. The content is expected to
/// have the size of `dst`.
///
/// `dst` stays fully transparent if the content cannot be read.
#[profiling::function]
pub fn generate_argb_image(
    shape: &Region<Buffer>,
    src: &MappedBuffer,
    dst: &mut ShapeImage,
    format: wl_shm::Format,
) -> Result<(), ShapeError> {
    dst.clear();

    let code = format::shm_info(format)
        .and_then(|info| FormatCode::try_from(info.drm).ok())
        .ok_or(ShapeError::UnsupportedFormat(format))?;
    let data = src.data().ok_or(ShapeError::NotAccessible)?;
    let plane = src.plane(0);
    let (width, height) = (dst.size.w, dst.size.h);

    let expected = plane.offset + plane.stride * height as usize;
    if data.len() < expected {
        return Err(ShapeError::IncompleteBuffer {
            expected,
            actual: data.len(),
        });
    }

    let source = unsafe {
        // SAFETY: the image is only used for reading while `data` is borrowed,
        // so it is safe to cast the ptr to *mut
        Image::from_raw_mut(
            code,
            width as usize,
            height as usize,
            data.as_ptr().add(plane.offset) as *mut u32,
            plane.stride,
            false,
        )
    }
    .map_err(|_| ShapeError::ImportFailed)?;

    dst.image.set_clip_region32(Some(shape.as_pixman()))?;
    dst.image.composite32(
        Operation::Src,
        &source,
        None,
        (0, 0),
        (0, 0),
        (0, 0),
        (width, height),
    );
    dst.image.set_clip_region32(None)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::allocator::{BufferLayout, PlaneLayout};
    use crate::utils::Rectangle;
    use rustix::fs::{ftruncate, memfd_create, MemfdFlags};

    fn content(width: usize, height: usize, bpp: usize, fill: &[u8]) -> MappedBuffer {
        let fd = memfd_create("shape-test", MemfdFlags::CLOEXEC).unwrap();
        let stride = width * bpp;
        ftruncate(&fd, (stride * height) as u64).unwrap();
        let mapping = MappedBuffer::create(
            fd,
            BufferLayout {
                size: stride * height,
                bpp,
                num_planes: 1,
                planes: [
                    PlaneLayout {
                        offset: 0,
                        stride,
                        y_subsampling: 1,
                    },
                    PlaneLayout::default(),
                ],
            },
        )
        .unwrap();
        for (i, byte) in mapping.data_mut().unwrap().iter_mut().enumerate() {
            *byte = fill[i % fill.len()];
        }
        mapping
    }

    #[test]
    fn stamps_out_top_left_corner() {
        let src = content(4, 4, 4, &[0x10, 0x20, 0x30, 0xff]);
        let mut dst = ShapeImage::new((4, 4).into()).unwrap();
        let shape = Region::from_rect(Rectangle::from_size((2, 2).into()));

        generate_argb_image(&shape, &src, &mut dst, wl_shm::Format::Argb8888).unwrap();

        for y in 0..4 {
            for x in 0..4 {
                let pixel = dst.pixel(x, y).unwrap();
                if x < 2 && y < 2 {
                    assert_eq!(pixel, 0xff30_2010);
                } else {
                    assert_eq!(pixel >> 24, 0, "pixel {x},{y} is not transparent");
                }
            }
        }
    }

    #[test]
    fn opaque_formats_gain_alpha() {
        let shape = Region::from_rect(Rectangle::from_size((2, 1).into()));
        let mut dst = ShapeImage::new((2, 1).into()).unwrap();

        let xbgr = content(2, 1, 4, &[0x11, 0x22, 0x33, 0x00]);
        generate_argb_image(&shape, &xbgr, &mut dst, wl_shm::Format::Xbgr8888).unwrap();
        assert_eq!(dst.pixel(0, 0), Some(0xff11_2233));

        let rgb565 = content(2, 1, 2, &[0x00, 0xf8]);
        generate_argb_image(&shape, &rgb565, &mut dst, wl_shm::Format::Rgb565).unwrap();
        assert_eq!(dst.pixel(1, 0), Some(0xffff_0000));
    }

    #[test]
    fn shape_is_clipped_to_image() {
        let src = content(2, 2, 4, &[1, 2, 3, 4]);
        let mut dst = ShapeImage::new((2, 2).into()).unwrap();
        let mut shape = Region::new();
        shape.union_xywh(-5, -5, 100, 100);

        generate_argb_image(&shape, &src, &mut dst, wl_shm::Format::Argb8888).unwrap();
        assert_eq!(dst.pixel(1, 1), Some(0x0403_0201));
    }

    #[test]
    fn previous_stamp_is_cleared() {
        let mut dst = ShapeImage::new((2, 1).into()).unwrap();
        let src = content(2, 1, 4, &[0xff]);
        generate_argb_image(&Region::infinite(), &src, &mut dst, wl_shm::Format::Argb8888).unwrap();
        assert_eq!(dst.pixel(1, 0), Some(0xffff_ffff));

        let shape = Region::from_rect(Rectangle::from_size((1, 1).into()));
        generate_argb_image(&shape, &src, &mut dst, wl_shm::Format::Argb8888).unwrap();
        assert_eq!(dst.pixel(0, 0), Some(0xffff_ffff));
        assert_eq!(dst.pixel(1, 0), Some(0));
    }

    #[test]
    fn truncated_content_leaves_image_transparent() {
        let src = content(1, 1, 4, &[0xff]);
        let mut dst = ShapeImage::new((4, 4).into()).unwrap();
        assert!(matches!(
            generate_argb_image(&Region::infinite(), &src, &mut dst, wl_shm::Format::Argb8888),
            Err(ShapeError::IncompleteBuffer { expected: 16, actual: 4 })
        ));
        assert!(dst.data().iter().all(|byte| *byte == 0));
    }

    #[test]
    fn empty_image_is_rejected() {
        assert!(matches!(ShapeImage::new((0, 3).into()), Err(ShapeError::Empty(_))));
    }
}
