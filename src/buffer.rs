use std::fmt;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, ImageEncoder, Rgba, RgbaImage};
use tracing::warn;

use crate::error::CanvasError;

pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Maximum supported canvas dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted snapshots.
pub const MAX_CANVAS_DIM: u32 = 8192;

/// Output encodings for history entries, snapshots and exports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodeFormat {
    /// Lossless; used for history and durable snapshots.
    Png,
    /// Lossy, no alpha (flattened onto white).
    Jpeg { quality: u8 },
}

impl EncodeFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            EncodeFormat::Png => "png",
            EncodeFormat::Jpeg { .. } => "jpg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            EncodeFormat::Png => "image/png",
            EncodeFormat::Jpeg { .. } => "image/jpeg",
        }
    }
}

// ============================================================================
// PIXEL BUFFER
// ============================================================================

/// Row-major RGBA8 raster owned by the active coloring session.
///
/// Framework-agnostic on purpose: a flat byte vector plus dimensions, so any
/// surface (software raster, GPU texture upload, a 2D context) can back it.
/// All coordinate access is bounds-checked; out-of-range reads return
/// [`TRANSPARENT`] and out-of-range writes are ignored.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl PixelBuffer {
    // ---- construction -------------------------------------------------------

    /// Create a fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = clamp_dims(width, height);
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn new_filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        let mut buf = Self::new(width, height);
        buf.fill(color);
        buf
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, CanvasError> {
        let expected = width as usize * height as usize * 4;
        if width == 0
            || height == 0
            || width > MAX_CANVAS_DIM
            || height > MAX_CANVAS_DIM
            || data.len() != expected
        {
            return Err(CanvasError::Dimensions {
                width,
                height,
                len: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    pub fn from_rgba_image(img: RgbaImage) -> Result<Self, CanvasError> {
        let (w, h) = img.dimensions();
        Self::from_raw(w, h, img.into_raw())
    }

    /// Decode any image format the `image` crate understands.
    pub fn decode(bytes: &[u8]) -> Result<Self, CanvasError> {
        let img = image::load_from_memory(bytes).map_err(CanvasError::Decode)?;
        Self::from_rgba_image(img.into_rgba8())
    }

    /// Compose source line-art onto a white `width`×`height` canvas.
    ///
    /// The art is scaled to `fit` of the largest size that preserves its
    /// aspect ratio, then centered.
    pub fn compose_source(source: &DynamicImage, width: u32, height: u32, fit: f32) -> Self {
        let (width, height) = clamp_dims(width, height);
        let mut canvas = RgbaImage::from_pixel(width, height, WHITE);
        let (cw, ch) = canvas.dimensions();
        let (iw, ih) = (source.width(), source.height());
        if iw == 0 || ih == 0 {
            return Self::from_image_unchecked(canvas);
        }

        let scale = (cw as f32 / iw as f32).min(ch as f32 / ih as f32) * fit;
        let sw = ((iw as f32 * scale).round() as u32).clamp(1, cw);
        let sh = ((ih as f32 * scale).round() as u32).clamp(1, ch);
        let scaled = imageops::resize(&source.to_rgba8(), sw, sh, FilterType::Triangle);

        let x = (cw - sw) / 2;
        let y = (ch - sh) / 2;
        imageops::overlay(&mut canvas, &scaled, x as i64, y as i64);
        Self::from_image_unchecked(canvas)
    }

    fn from_image_unchecked(img: RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }

    // ---- accessors ----------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        Self::image_from_parts(self.width, self.height, self.data.clone())
    }

    pub fn into_rgba_image(self) -> RgbaImage {
        Self::image_from_parts(self.width, self.height, self.data)
    }

    fn image_from_parts(width: u32, height: u32, data: Vec<u8>) -> RgbaImage {
        // Length is a struct invariant, so `from_raw` cannot reject it.
        RgbaImage::from_raw(width, height, data).unwrap_or_else(|| RgbaImage::new(width, height))
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    #[inline]
    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        self.contains(x, y)
            .then(|| (y as usize * self.width as usize + x as usize) * 4)
    }

    // ---- pixel access -------------------------------------------------------

    #[inline]
    pub fn get_pixel(&self, x: i32, y: i32) -> Rgba<u8> {
        match self.offset(x, y) {
            Some(o) => Rgba([
                self.data[o],
                self.data[o + 1],
                self.data[o + 2],
                self.data[o + 3],
            ]),
            None => TRANSPARENT,
        }
    }

    #[inline]
    pub fn set_pixel(&mut self, x: i32, y: i32, pixel: Rgba<u8>) {
        if let Some(o) = self.offset(x, y) {
            self.data[o..o + 4].copy_from_slice(&pixel.0);
        }
    }

    /// Blend `color` over the pixel at `opacity` (0..=1). The result is
    /// always fully opaque; a transparent destination blends against white.
    pub fn blend_pixel(&mut self, x: i32, y: i32, color: Rgba<u8>, opacity: f32) {
        let Some(o) = self.offset(x, y) else { return };
        let t = opacity.clamp(0.0, 1.0);
        let opaque = self.data[o + 3] > 0;
        for c in 0..3 {
            let dst = if opaque { self.data[o + c] as f32 } else { 255.0 };
            self.data[o + c] = (dst + (color[c] as f32 - dst) * t).round() as u8;
        }
        self.data[o + 3] = 255;
    }

    /// Destination-out: punch the pixel back to transparent.
    #[inline]
    pub fn erase_pixel(&mut self, x: i32, y: i32) {
        self.set_pixel(x, y, TRANSPARENT);
    }

    pub fn fill(&mut self, color: Rgba<u8>) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&color.0);
        }
    }

    /// Blend an axis-aligned square of `size` pixels whose top-left corner is
    /// at (`x`, `y`). Parts outside the buffer are clipped.
    pub fn blend_rect(&mut self, x: f32, y: f32, size: u32, color: Rgba<u8>, opacity: f32) {
        let x0 = x.round() as i32;
        let y0 = y.round() as i32;
        for dy in 0..size as i32 {
            for dx in 0..size as i32 {
                self.blend_pixel(x0 + dx, y0 + dy, color, opacity);
            }
        }
    }

    /// Copy `src` onto this buffer with its top-left at (`x`, `y`), replacing
    /// pixels (no blending). Out-of-range parts are clipped.
    pub fn blit(&mut self, src: &PixelBuffer, x: i32, y: i32) {
        for sy in 0..src.height as i32 {
            let dy = y + sy;
            if dy < 0 || dy as u32 >= self.height {
                continue;
            }
            for sx in 0..src.width as i32 {
                self.set_pixel(x + sx, dy, src.get_pixel(sx, sy));
            }
        }
    }

    /// Return a buffer of exactly `width`×`height`: `self` when it already
    /// matches, otherwise `self` placed at the origin of a transparent canvas.
    pub fn fit_canvas(self, width: u32, height: u32) -> Self {
        if self.dimensions() == (width, height) {
            return self;
        }
        let mut out = Self::new(width, height);
        out.blit(&self, 0, 0);
        out
    }

    // ---- encoding -----------------------------------------------------------

    /// Encode the buffer, used for history entries, snapshots and exports.
    pub fn encode(&self, format: EncodeFormat) -> Result<Vec<u8>, CanvasError> {
        let mut out = Vec::new();
        match format {
            EncodeFormat::Png => {
                PngEncoder::new(&mut out)
                    .write_image(&self.data, self.width, self.height, ColorType::Rgba8)
                    .map_err(CanvasError::Encode)?;
            }
            EncodeFormat::Jpeg { quality } => {
                let rgb = self.flatten_on_white();
                let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
                encoder
                    .encode(&rgb, self.width, self.height, ColorType::Rgb8)
                    .map_err(CanvasError::Encode)?;
            }
        }
        Ok(out)
    }

    fn flatten_on_white(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for px in self.data.chunks_exact(4) {
            let a = px[3] as u32;
            for c in &px[..3] {
                rgb.push(((*c as u32 * a + 255 * (255 - a) + 127) / 255) as u8);
            }
        }
        rgb
    }
}

fn clamp_dims(width: u32, height: u32) -> (u32, u32) {
    if width == 0 || height == 0 || width > MAX_CANVAS_DIM || height > MAX_CANVAS_DIM {
        warn!(
            "canvas dimensions {}x{} out of range, clamped",
            width, height
        );
        (width.clamp(1, MAX_CANVAS_DIM), height.clamp(1, MAX_CANVAS_DIM))
    } else {
        (width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(img: &RgbaImage) -> Vec<u8> {
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(img.as_raw(), img.width(), img.height(), ColorType::Rgba8)
            .unwrap();
        out
    }

    #[test]
    fn out_of_range_access_is_a_no_op() {
        let mut buf = PixelBuffer::new_filled(4, 4, WHITE);
        let before = buf.clone();
        buf.set_pixel(-1, 0, Rgba([1, 2, 3, 255]));
        buf.set_pixel(4, 2, Rgba([1, 2, 3, 255]));
        buf.set_pixel(0, 99, Rgba([1, 2, 3, 255]));
        assert_eq!(buf, before);
        assert_eq!(buf.get_pixel(-3, 1), TRANSPARENT);
        assert_eq!(buf.get_pixel(1, 4), TRANSPARENT);
    }

    #[test]
    fn zero_dimensions_are_clamped() {
        let buf = PixelBuffer::new(0, 10);
        assert_eq!(buf.dimensions(), (1, 10));
    }

    #[test]
    fn from_raw_rejects_wrong_length() {
        assert!(PixelBuffer::from_raw(2, 2, vec![0; 15]).is_err());
        assert!(PixelBuffer::from_raw(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn png_encoding_is_lossless() {
        let mut buf = PixelBuffer::new(8, 5);
        buf.set_pixel(3, 2, Rgba([12, 200, 7, 255]));
        buf.set_pixel(7, 4, WHITE);
        let bytes = buf.encode(EncodeFormat::Png).unwrap();
        assert_eq!(PixelBuffer::decode(&bytes).unwrap(), buf);
    }

    #[test]
    fn jpeg_encoding_produces_decodable_image() {
        let buf = PixelBuffer::new_filled(16, 16, Rgba([255, 0, 0, 255]));
        let bytes = buf.encode(EncodeFormat::Jpeg { quality: 90 }).unwrap();
        let back = PixelBuffer::decode(&bytes).unwrap();
        assert_eq!(back.dimensions(), (16, 16));
        let px = back.get_pixel(8, 8);
        assert!(px[0] > 200 && px[1] < 60 && px[2] < 60);
    }

    #[test]
    fn decode_garbage_fails() {
        assert!(matches!(
            PixelBuffer::decode(b"not an image"),
            Err(CanvasError::Decode(_))
        ));
    }

    #[test]
    fn compose_source_centers_art_on_white() {
        // 10x10 black square into a 100x50 canvas at full fit: scaled to 50x50,
        // centered horizontally.
        let art = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        let decoded = image::load_from_memory(&png_bytes(&art)).unwrap();
        let buf = PixelBuffer::compose_source(&decoded, 100, 50, 1.0);

        assert_eq!(buf.dimensions(), (100, 50));
        assert_eq!(buf.get_pixel(10, 25), WHITE);
        assert_eq!(buf.get_pixel(89, 25), WHITE);
        assert_eq!(buf.get_pixel(50, 25), Rgba([0, 0, 0, 255]));
        assert_eq!(buf.get_pixel(25, 0), Rgba([0, 0, 0, 255]));
        assert!(buf.as_raw().chunks_exact(4).all(|p| p[3] == 255));
    }

    #[test]
    fn compose_source_caps_oversized_canvas() {
        let art = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        let buf = PixelBuffer::compose_source(&DynamicImage::ImageRgba8(art), 100_000, 2, 1.0);
        assert_eq!(buf.dimensions(), (MAX_CANVAS_DIM, 2));
    }

    #[test]
    fn compose_source_respects_fit_margin() {
        let art = RgbaImage::from_pixel(20, 20, Rgba([0, 0, 0, 255]));
        let buf = PixelBuffer::compose_source(&DynamicImage::ImageRgba8(art), 100, 100, 0.5);
        assert_eq!(buf.get_pixel(10, 10), WHITE);
        assert_eq!(buf.get_pixel(50, 50), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn transparent_source_pixels_show_white_background() {
        let mut art = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        art.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        let buf = PixelBuffer::compose_source(&DynamicImage::ImageRgba8(art), 4, 4, 1.0);
        assert_eq!(buf.get_pixel(3, 3), WHITE);
    }

    #[test]
    fn blend_pixel_is_opaque() {
        let mut buf = PixelBuffer::new(2, 1);
        buf.blend_pixel(0, 0, Rgba([0, 0, 0, 255]), 0.5);
        let px = buf.get_pixel(0, 0);
        assert_eq!(px[3], 255);
        assert!((126..=129).contains(&px[0]));
    }

    #[test]
    fn fit_canvas_places_at_origin() {
        let small = PixelBuffer::new_filled(2, 2, WHITE);
        let big = small.fit_canvas(4, 3);
        assert_eq!(big.dimensions(), (4, 3));
        assert_eq!(big.get_pixel(1, 1), WHITE);
        assert_eq!(big.get_pixel(3, 2), TRANSPARENT);
    }
}
