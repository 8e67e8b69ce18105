use image::Rgba;
use tracing::debug;

use crate::buffer::PixelBuffer;

/// Per-channel match tolerance on the 0..=255 scale.
pub const DEFAULT_TOLERANCE: u8 = 10;

/// Summary of a completed fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillReport {
    pub filled: usize,
    /// Inclusive bounding box `(min_x, min_y, max_x, max_y)` of changed pixels.
    pub bounds: (u32, u32, u32, u32),
}

/// Every channel (alpha included) within `tolerance` of the seed.
#[inline(always)]
fn matches(p: [u8; 4], seed: [u8; 4], tolerance: u8) -> bool {
    p.iter()
        .zip(seed.iter())
        .all(|(a, b)| a.abs_diff(*b) <= tolerance)
}

/// 4-connected flood fill from (`seed_x`, `seed_y`).
///
/// Returns `None` without touching the buffer when the seed is out of range
/// or the seed already matches `fill` within `tolerance`.
pub fn flood_fill(
    buffer: &mut PixelBuffer,
    seed_x: i32,
    seed_y: i32,
    fill: Rgba<u8>,
    tolerance: u8,
) -> Option<FillReport> {
    if !buffer.contains(seed_x, seed_y) {
        return None;
    }
    let seed = buffer.get_pixel(seed_x, seed_y).0;
    if matches(fill.0, seed, tolerance) {
        debug!(seed_x, seed_y, "fill skipped: seed already matches fill colour");
        return None;
    }

    let (w, h) = buffer.dimensions();
    let mask = region_mask(buffer.as_raw(), w, h, seed_x as u32, seed_y as u32, seed, tolerance);

    let wu = w as usize;
    let mut filled = 0usize;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0u32, 0u32);
    for (idx, _) in mask.iter().enumerate().filter(|(_, m)| **m) {
        let x = (idx % wu) as u32;
        let y = (idx / wu) as u32;
        buffer.set_pixel(x as i32, y as i32, fill);
        filled += 1;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    debug!(seed_x, seed_y, filled, "flood fill applied");
    Some(FillReport {
        filled,
        bounds: (min_x, min_y, max_x, max_y),
    })
}

/// Iterative region search over a flat RGBA slice. The mask doubles as the
/// visited set; the explicit stack keeps recursion depth constant.
fn region_mask(
    flat: &[u8],
    width: u32,
    height: u32,
    start_x: u32,
    start_y: u32,
    seed: [u8; 4],
    tolerance: u8,
) -> Vec<bool> {
    let wu = width as usize;
    let hu = height as usize;
    let mut mask = vec![false; wu * hu];

    #[inline(always)]
    fn pix(flat: &[u8], idx: usize) -> [u8; 4] {
        let o = idx * 4;
        [flat[o], flat[o + 1], flat[o + 2], flat[o + 3]]
    }

    // Stack holds packed flat indices (y * width + x).
    let mut stack: Vec<usize> = Vec::with_capacity(4096);
    let seed_idx = start_y as usize * wu + start_x as usize;
    mask[seed_idx] = true;
    stack.push(seed_idx);

    while let Some(idx) = stack.pop() {
        let x = idx % wu;
        let y = idx / wu;

        let mut visit = |ni: usize, stack: &mut Vec<usize>| {
            if !mask[ni] && matches(pix(flat, ni), seed, tolerance) {
                mask[ni] = true;
                stack.push(ni);
            }
        };
        if x > 0 {
            visit(idx - 1, &mut stack);
        }
        if x + 1 < wu {
            visit(idx + 1, &mut stack);
        }
        if y > 0 {
            visit(idx - wu, &mut stack);
        }
        if y + 1 < hu {
            visit(idx + wu, &mut stack);
        }
    }

    mask
}
