use tracing::info;

use crate::buffer::PixelBuffer;

/// Every Nth pixel is sampled. Changing this changes reported percentages.
pub const DEFAULT_SAMPLE_STRIDE: usize = 10;
/// Channels at or above this value count as white.
pub const DEFAULT_WHITE_CUTOFF: u8 = 250;
pub const DEFAULT_THRESHOLD: f32 = 80.0;

/// Percentage of sampled, alpha-bearing pixels that are not white.
///
/// Samples pixel indices `0, stride, 2*stride, ...` in row-major order.
/// Returns 0 when no sampled pixel has alpha.
pub fn estimate(buffer: &PixelBuffer, stride: usize, white_cutoff: u8) -> f32 {
    let mut painted = 0u32;
    let mut colored = 0u32;
    for px in buffer.as_raw().chunks_exact(4).step_by(stride.max(1)) {
        if px[3] == 0 {
            continue;
        }
        painted += 1;
        if px[..3].iter().any(|c| *c < white_cutoff) {
            colored += 1;
        }
    }
    if painted == 0 {
        0.0
    } else {
        colored as f32 / painted as f32 * 100.0
    }
}

/// Result of a recompute.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompletionUpdate {
    pub percentage: f32,
    /// True exactly once per latch cycle: the first time the threshold is met.
    pub crossed: bool,
}

/// Completion estimate plus the one-shot "page complete" latch.
#[derive(Clone, Debug)]
pub struct CompletionTracker {
    stride: usize,
    white_cutoff: u8,
    threshold: f32,
    latched: bool,
    percentage: f32,
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_STRIDE, DEFAULT_WHITE_CUTOFF, DEFAULT_THRESHOLD)
    }
}

impl CompletionTracker {
    pub fn new(stride: usize, white_cutoff: u8, threshold: f32) -> Self {
        Self {
            stride: stride.max(1),
            white_cutoff,
            threshold,
            latched: false,
            percentage: 0.0,
        }
    }

    pub fn percentage(&self) -> f32 {
        self.percentage
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn update(&mut self, buffer: &PixelBuffer) -> CompletionUpdate {
        self.percentage = estimate(buffer, self.stride, self.white_cutoff);
        let crossed = !self.latched && self.percentage >= self.threshold;
        if crossed {
            self.latched = true;
            info!(percentage = self.percentage, "completion threshold crossed");
        }
        CompletionUpdate {
            percentage: self.percentage,
            crossed,
        }
    }

    /// Recompute without firing: an already-complete page restored from
    /// storage latches silently.
    pub fn prime(&mut self, buffer: &PixelBuffer) -> f32 {
        self.percentage = estimate(buffer, self.stride, self.white_cutoff);
        self.latched = self.percentage >= self.threshold;
        self.percentage
    }

    /// Explicit clear: percentage back to 0 and the latch re-armed.
    pub fn reset(&mut self) {
        self.latched = false;
        self.percentage = 0.0;
    }
}
