use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::palette::Palette;

pub const SPARKLES_PER_CELEBRATION: usize = 30;

/// One decorative sparkle. Positions are percentages of the viewport.
#[derive(Clone, Debug, PartialEq)]
pub struct Sparkle {
    pub x_pct: f32,
    pub y_pct: f32,
    pub color: [u8; 3],
    pub delay_s: f32,
    pub duration_s: f32,
}

/// Deterministic sparkle layout: the same seed and palette always produce
/// the same field.
pub fn sparkle_field(seed: u64, count: usize, palette: &Palette) -> Vec<Sparkle> {
    let mut rng = StdRng::seed_from_u64(seed);
    let colors = palette.colors();
    (0..count)
        .map(|_| Sparkle {
            x_pct: rng.gen_range(0.0..100.0),
            y_pct: rng.gen_range(0.0..100.0),
            color: colors[rng.gen_range(0..colors.len())].rgb,
            delay_s: rng.gen_range(0.0..0.5),
            duration_s: rng.gen_range(1.0..2.0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_field() {
        let palette = Palette::default();
        let a = sparkle_field(7, SPARKLES_PER_CELEBRATION, &palette);
        let b = sparkle_field(7, SPARKLES_PER_CELEBRATION, &palette);
        assert_eq!(a, b);
        assert_eq!(a.len(), 30);
        assert_ne!(a, sparkle_field(8, SPARKLES_PER_CELEBRATION, &palette));
    }

    #[test]
    fn sparkles_stay_in_range_and_use_palette_colours() {
        let palette = Palette::default();
        for s in sparkle_field(99, 200, &palette) {
            assert!((0.0..100.0).contains(&s.x_pct));
            assert!((0.0..100.0).contains(&s.y_pct));
            assert!((0.0..0.5).contains(&s.delay_s));
            assert!((1.0..2.0).contains(&s.duration_s));
            assert!(palette.colors().iter().any(|c| c.rgb == s.color));
        }
    }
}
