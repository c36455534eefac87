use tracing::warn;

use crate::{
    backend::allocator::BufferLayout,
    utils::{Buffer, Logical, Point, Rectangle, Scale, Size},
};

/// Source and destination of a damage copy
#[derive(Debug)]
pub(crate) struct DamageCopy<'a> {
    pub src: &'a [u8],
    pub src_layout: BufferLayout,
    pub dst_layout: BufferLayout,
    /// Size of the content, damage is clipped to it
    pub contents: Size<i32, Buffer>,
    pub scale: Scale,
    pub offset: Point<f64, Logical>,
}

/// Copy the pixels of a damaged rectangle from the content into a host buffer
///
/// The rectangle is mapped to content pixels as `rect * scale + offset`, grown outwards on
/// the far edges, and clipped to the content. Subsampled planes copy proportionally fewer rows.
#[profiling::function]
pub(crate) fn copy_damaged_rect<Kind>(copy: &DamageCopy<'_>, dst: &mut [u8], rect: Rectangle<i32, Kind>) {
    let x1 = (rect.loc.x as f64 * copy.scale.x + copy.offset.x) as i32;
    let y1 = (rect.loc.y as f64 * copy.scale.y + copy.offset.y) as i32;
    let x2 = (rect.right() as f64 * copy.scale.x + copy.offset.x + 0.5) as i32;
    let y2 = (rect.bottom() as f64 * copy.scale.y + copy.offset.y + 0.5) as i32;

    let (x1, y1) = (x1.max(0), y1.max(0));
    let (x2, y2) = (x2.min(copy.contents.w), y2.min(copy.contents.h));
    if x1 >= x2 || y1 >= y2 {
        return;
    }

    let bpp = copy.src_layout.bpp;
    let bytes = (x2 - x1) as usize * bpp;
    let planes = copy.src_layout.planes.iter().zip(copy.dst_layout.planes.iter());

    for (idx, (src_plane, dst_plane)) in planes.take(copy.src_layout.num_planes).enumerate() {
        let y_ss = src_plane.y_subsampling.max(1);
        let first_row = y1 as usize / y_ss;
        let rows = (y2 - y1) as usize / y_ss;
        let column = x1 as usize * bpp;

        for row in first_row..first_row + rows {
            let src_start = src_plane.offset + row * src_plane.stride + column;
            let dst_start = dst_plane.offset + row * dst_plane.stride + column;
            let (Some(src), Some(dst)) = (
                copy.src.get(src_start..src_start + bytes),
                dst.get_mut(dst_start..dst_start + bytes),
            ) else {
                warn!(
                    plane = idx,
                    row,
                    x1,
                    x2,
                    "Damage exceeds the buffer, skipping the rest of the rectangle"
                );
                return;
            };
            dst.copy_from_slice(src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::allocator::PlaneLayout;

    fn layout(stride: usize, bpp: usize, height: usize, nv12: bool) -> BufferLayout {
        BufferLayout {
            size: stride * height + if nv12 { stride * height / 2 } else { 0 },
            bpp,
            num_planes: if nv12 { 2 } else { 1 },
            planes: [
                PlaneLayout {
                    offset: 0,
                    stride,
                    y_subsampling: 1,
                },
                PlaneLayout {
                    offset: stride * height,
                    stride,
                    y_subsampling: if nv12 { 2 } else { 1 },
                },
            ],
        }
    }

    fn copy<'a>(src: &'a [u8], src_layout: BufferLayout, dst_layout: BufferLayout, scale: f64) -> DamageCopy<'a> {
        DamageCopy {
            src,
            src_layout,
            dst_layout,
            contents: (4, 4).into(),
            scale: Scale::from(scale),
            offset: (0.0, 0.0).into(),
        }
    }

    #[test]
    fn copies_only_the_damaged_rect() {
        let src: Vec<u8> = (0..16).collect();
        let mut dst = vec![0u8; 16];
        let params = copy(&src, layout(4, 1, 4, false), layout(4, 1, 4, false), 1.0);

        copy_damaged_rect::<Buffer>(&params, &mut dst, Rectangle::new((1, 1).into(), (2, 2).into()));

        #[rustfmt::skip]
        assert_eq!(dst, vec![
            0, 0, 0, 0,
            0, 5, 6, 0,
            0, 9, 10, 0,
            0, 0, 0, 0,
        ]);
    }

    #[test]
    fn scaled_rect_is_clipped_to_contents() {
        let src = vec![0xffu8; 16];
        let mut dst = vec![0u8; 16];
        let params = copy(&src, layout(4, 1, 4, false), layout(4, 1, 4, false), 2.0);

        copy_damaged_rect::<Logical>(&params, &mut dst, Rectangle::new((1, 1).into(), (10, 10).into()));

        assert_eq!(&dst[..4], &[0, 0, 0, 0]);
        assert_eq!(&dst[4..8], &[0, 0, 0, 0]);
        assert_eq!(&dst[8..12], &[0, 0, 0xff, 0xff]);
        assert_eq!(&dst[12..], &[0, 0, 0xff, 0xff]);
    }

    #[test]
    fn subsampled_plane_starts_at_subsampled_row() {
        let src: Vec<u8> = (0..24).collect();
        let mut dst = vec![0u8; 24];
        let params = copy(&src, layout(4, 1, 4, true), layout(4, 1, 4, true), 1.0);

        copy_damaged_rect::<Buffer>(&params, &mut dst, Rectangle::new((0, 2).into(), (4, 2).into()));

        // luma rows 2 and 3
        assert_eq!(&dst[8..16], &src[8..16]);
        assert_eq!(&dst[..8], &[0; 8]);
        // chroma row 1 only
        assert_eq!(&dst[20..24], &src[20..24]);
        assert_eq!(&dst[16..20], &[0; 4]);
    }

    #[test]
    fn out_of_bounds_damage_is_skipped() {
        let src = vec![1u8; 8];
        let mut dst = vec![0u8; 16];
        let params = copy(&src, layout(4, 1, 4, false), layout(4, 1, 4, false), 1.0);

        copy_damaged_rect::<Buffer>(&params, &mut dst, Rectangle::new((0, 0).into(), (4, 4).into()));

        assert_eq!(&dst[..8], &[1; 8]);
        assert_eq!(&dst[8..], &[0; 8]);
    }
}
