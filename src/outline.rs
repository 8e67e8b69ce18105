use image::RgbaImage;
use rayon::prelude::*;
use tracing::debug;

use crate::buffer::PixelBuffer;
use crate::error::CanvasError;

/// Gradient magnitude above which a pixel becomes line.
pub const DEFAULT_OUTLINE_THRESHOLD: f32 = 50.0;

/// Convert an illustration to black line art on white.
///
/// Sobel gradient over Rec. 709 luminance; pixels whose gradient magnitude
/// exceeds `threshold` become black, everything else white. Alpha is kept.
/// Rows are processed in parallel.
pub fn to_line_art(src: &RgbaImage, threshold: f32) -> RgbaImage {
    let w = src.width() as usize;
    let h = src.height() as usize;
    if w == 0 || h == 0 {
        return src.clone();
    }

    let src_raw = src.as_raw();
    let stride = w * 4;
    let mut dst_raw = vec![0u8; w * h * 4];

    dst_raw
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(y, row_out)| {
            // Edge pixels replicate their nearest neighbour.
            let lum = |px: i32, py: i32| -> f32 {
                let cx = px.clamp(0, w as i32 - 1) as usize;
                let cy = py.clamp(0, h as i32 - 1) as usize;
                let si = cy * stride + cx * 4;
                0.2126 * src_raw[si] as f32
                    + 0.7152 * src_raw[si + 1] as f32
                    + 0.0722 * src_raw[si + 2] as f32
            };

            for x in 0..w {
                let (ix, iy) = (x as i32, y as i32);
                let gx = -lum(ix - 1, iy - 1) - 2.0 * lum(ix - 1, iy) - lum(ix - 1, iy + 1)
                    + lum(ix + 1, iy - 1)
                    + 2.0 * lum(ix + 1, iy)
                    + lum(ix + 1, iy + 1);
                let gy = -lum(ix - 1, iy - 1) - 2.0 * lum(ix, iy - 1) - lum(ix + 1, iy - 1)
                    + lum(ix - 1, iy + 1)
                    + 2.0 * lum(ix, iy + 1)
                    + lum(ix + 1, iy + 1);
                let val = if (gx * gx + gy * gy).sqrt() > threshold { 0 } else { 255 };

                let pi = x * 4;
                row_out[pi] = val;
                row_out[pi + 1] = val;
                row_out[pi + 2] = val;
                row_out[pi + 3] = src_raw[y * stride + pi + 3];
            }
        });

    let mut out = RgbaImage::new(w as u32, h as u32);
    out.copy_from_slice(&dst_raw);
    out
}

pub fn outline_buffer(buffer: &PixelBuffer, threshold: f32) -> Result<PixelBuffer, CanvasError> {
    let lines = to_line_art(&buffer.to_rgba_image(), threshold);
    debug!(width = lines.width(), height = lines.height(), threshold, "line art generated");
    PixelBuffer::from_rgba_image(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn flat_image_has_no_lines() {
        let img = RgbaImage::from_pixel(16, 16, Rgba([40, 120, 200, 255]));
        let out = to_line_art(&img, DEFAULT_OUTLINE_THRESHOLD);
        assert!(out.pixels().all(|p| *p == Rgba([255, 255, 255, 255])));
    }

    #[test]
    fn colour_boundary_becomes_black_line() {
        let mut img = RgbaImage::from_pixel(20, 10, Rgba([255, 255, 255, 255]));
        for y in 0..10 {
            for x in 10..20 {
                img.put_pixel(x, y, Rgba([0, 0, 160, 255]));
            }
        }
        let out = to_line_art(&img, DEFAULT_OUTLINE_THRESHOLD);
        assert_eq!(out.get_pixel(9, 5)[0], 0);
        assert_eq!(out.get_pixel(10, 5)[0], 0);
        assert_eq!(out.get_pixel(2, 5)[0], 255);
        assert_eq!(out.get_pixel(17, 5)[0], 255);
    }

    #[test]
    fn alpha_is_preserved() {
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        img.put_pixel(1, 1, Rgba([0, 0, 0, 77]));
        let out = to_line_art(&img, DEFAULT_OUTLINE_THRESHOLD);
        assert_eq!(out.get_pixel(1, 1)[3], 77);
        assert_eq!(out.get_pixel(3, 3)[3], 0);
    }

    #[test]
    fn outline_buffer_keeps_dimensions() {
        let buf = PixelBuffer::new_filled(7, 3, Rgba([255, 0, 0, 255]));
        let out = outline_buffer(&buf, DEFAULT_OUTLINE_THRESHOLD).unwrap();
        assert_eq!(out.dimensions(), (7, 3));
    }
}
