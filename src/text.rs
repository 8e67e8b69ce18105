use std::sync::OnceLock;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont, point};
use image::Rgba;
use tracing::{debug, warn};

use crate::buffer::{PixelBuffer, WHITE};

const TEXT_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);
const TEXT_SIZE: f32 = 24.0;
const LINE_GAP: f32 = 30.0;
const FRAME_COLOR: Rgba<u8> = Rgba([200, 200, 200, 255]);

pub const PLACEHOLDER_TITLE: &str = "Image failed to load";
pub const PLACEHOLDER_HINT: &str = "Please try another page";

static SANS: OnceLock<Option<FontArc>> = OnceLock::new();

/// The system's default sans-serif face, looked up once per process.
pub fn system_sans() -> Option<&'static FontArc> {
    SANS.get_or_init(load_sans).as_ref()
}

fn load_sans() -> Option<FontArc> {
    use font_kit::family_name::FamilyName;
    use font_kit::properties::Properties;
    use font_kit::source::SystemSource;

    let handle = match SystemSource::new()
        .select_best_match(&[FamilyName::SansSerif], &Properties::new())
    {
        Ok(handle) => handle,
        Err(e) => {
            warn!("no system sans-serif font: {:?}", e);
            return None;
        }
    };
    let font = handle.load().ok()?;
    let bytes: Vec<u8> = (*font.copy_font_data()?).clone();
    let arc = FontArc::try_from_vec(bytes).ok();
    if arc.is_some() {
        debug!(family = %font.family_name(), "placeholder font loaded");
    }
    arc
}

/// Horizontal advance of `text` at `size` px, kerning included.
pub fn measure(font: &FontArc, size: f32, text: &str) -> f32 {
    let scaled = font.as_scaled(PxScale::from(size));
    let mut width = 0.0;
    let mut prev = None;
    for c in text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(p) = prev {
            width += scaled.kern(p, id);
        }
        width += scaled.h_advance(id);
        prev = Some(id);
    }
    width
}

/// Draw one line of text horizontally centred on `center_x` with its
/// baseline at `baseline`. Coverage is blended onto the buffer.
pub fn draw_centered(
    buffer: &mut PixelBuffer,
    font: &FontArc,
    size: f32,
    text: &str,
    center_x: f32,
    baseline: f32,
    color: Rgba<u8>,
) {
    let scaled = font.as_scaled(PxScale::from(size));
    let mut caret = center_x - measure(font, size, text) * 0.5;
    let mut prev = None;
    for c in text.chars() {
        let id = scaled.glyph_id(c);
        if let Some(p) = prev {
            caret += scaled.kern(p, id);
        }
        let glyph = id.with_scale_and_position(size, point(caret, baseline));
        caret += scaled.h_advance(id);
        prev = Some(id);

        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|px, py, cov| {
            if cov <= 0.0 {
                return;
            }
            let x = bounds.min.x as i32 + px as i32;
            let y = bounds.min.y as i32 + py as i32;
            buffer.blend_pixel(x, y, color, cov.min(1.0));
        });
    }
}

fn draw_frame(buffer: &mut PixelBuffer, thickness: u32) {
    let (w, h) = buffer.dimensions();
    let t = thickness.min(w / 2).min(h / 2) as i32;
    let (w, h) = (w as i32, h as i32);
    for y in 0..h {
        for x in 0..w {
            if x < t || y < t || x >= w - t || y >= h - t {
                buffer.set_pixel(x, y, FRAME_COLOR);
            }
        }
    }
}

/// Buffer shown when no artwork could be loaded: white with a centred
/// two-line message, or a thin grey frame when no font is available.
pub fn error_placeholder(width: u32, height: u32) -> PixelBuffer {
    let mut buffer = PixelBuffer::new_filled(width, height, WHITE);
    let Some(font) = system_sans() else {
        draw_frame(&mut buffer, 2);
        return buffer;
    };

    let (cx, cy) = (buffer.width() as f32 * 0.5, buffer.height() as f32 * 0.5);
    draw_centered(&mut buffer, font, TEXT_SIZE, PLACEHOLDER_TITLE, cx, cy, TEXT_COLOR);
    draw_centered(&mut buffer, font, TEXT_SIZE, PLACEHOLDER_HINT, cx, cy + LINE_GAP, TEXT_COLOR);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_opaque_and_marked() {
        let buf = error_placeholder(320, 240);
        assert_eq!(buf.dimensions(), (320, 240));
        let raw = buf.as_raw();
        assert!(raw.chunks_exact(4).all(|p| p[3] == 255));
        assert!(raw.chunks_exact(4).any(|p| p[0] < 255));
    }

    #[test]
    fn placeholder_text_is_black() {
        if system_sans().is_none() {
            return;
        }
        let buf = error_placeholder(320, 240);
        let darkest = buf
            .as_raw()
            .chunks_exact(4)
            .map(|p| p[0].max(p[1]).max(p[2]))
            .min()
            .unwrap();
        assert!(darkest < 40, "darkest channel {darkest}");
        // Nothing above the first line's cap height.
        assert!(buf.as_raw()[..320 * 4 * 80].iter().all(|c| *c == 255));
    }

    #[test]
    fn frame_covers_only_the_border() {
        let mut buf = PixelBuffer::new_filled(10, 10, WHITE);
        draw_frame(&mut buf, 2);
        assert_eq!(buf.get_pixel(0, 0), FRAME_COLOR);
        assert_eq!(buf.get_pixel(9, 5), FRAME_COLOR);
        assert_eq!(buf.get_pixel(1, 8), FRAME_COLOR);
        assert_eq!(buf.get_pixel(2, 2), WHITE);
        assert_eq!(buf.get_pixel(7, 7), WHITE);
    }

    #[test]
    fn measured_width_grows_with_text() {
        let Some(font) = system_sans() else {
            return;
        };
        let short = measure(font, 20.0, "Hi");
        let long = measure(font, 20.0, "Hi there");
        assert!(long > short);
        assert_eq!(measure(font, 20.0, ""), 0.0);
    }
}
