use image::Rgba;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One palette swatch as delivered by the page catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaletteEntry {
    pub display_name: String,
    pub rgb_hex: String,
    #[serde(default)]
    pub glitter: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaletteError {
    #[error("invalid colour '{0}' (expected #RRGGBB)")]
    InvalidHex(String),
    #[error("palette is empty")]
    Empty,
}

/// A parsed, selectable brush colour.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrushColor {
    pub name: String,
    pub rgb: [u8; 3],
    pub glitter: bool,
}

impl BrushColor {
    pub fn rgba(&self) -> Rgba<u8> {
        Rgba([self.rgb[0], self.rgb[1], self.rgb[2], 255])
    }

    pub fn hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.rgb[0], self.rgb[1], self.rgb[2])
    }
}

/// Parse `#RRGGBB` (leading `#` optional, case-insensitive).
pub fn parse_hex(hex: &str) -> Result<[u8; 3], PaletteError> {
    let digits = hex.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.is_ascii() {
        return Err(PaletteError::InvalidHex(hex.to_string()));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16)
            .map_err(|_| PaletteError::InvalidHex(hex.to_string()))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// Ordered set of colours the brush may use. Selection is restricted to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<BrushColor>,
}

impl Palette {
    pub fn from_entries(entries: &[PaletteEntry]) -> Result<Self, PaletteError> {
        if entries.is_empty() {
            return Err(PaletteError::Empty);
        }
        let colors = entries
            .iter()
            .map(|e| {
                Ok(BrushColor {
                    name: e.display_name.clone(),
                    rgb: parse_hex(&e.rgb_hex)?,
                    glitter: e.glitter,
                })
            })
            .collect::<Result<Vec<_>, PaletteError>>()?;
        Ok(Self { colors })
    }

    pub fn colors(&self) -> &[BrushColor] {
        &self.colors
    }

    pub fn first(&self) -> &BrushColor {
        // Construction guarantees at least one colour.
        &self.colors[0]
    }

    pub fn find(&self, name: &str) -> Option<&BrushColor> {
        self.colors.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

impl Default for Palette {
    fn default() -> Self {
        let swatch = |name: &str, rgb: [u8; 3], glitter: bool| BrushColor {
            name: name.to_string(),
            rgb,
            glitter,
        };
        Self {
            colors: vec![
                swatch("Magenta", [0xFF, 0x14, 0x93], true),
                swatch("Lime", [0x00, 0xFF, 0x00], false),
                swatch("Violet", [0x94, 0x00, 0xD3], false),
                swatch("Silver", [0xC0, 0xC0, 0xC0], true),
                swatch("Gold", [0xFF, 0xD7, 0x00], true),
                swatch("Red", [0xFF, 0x00, 0x00], false),
                swatch("Peach", [0xFF, 0xDA, 0xB9], false),
                swatch("White", [0xFF, 0xFF, 0xFF], false),
            ],
        }
    }
}

// ============================================================================
// BRUSH STATE
// ============================================================================

/// Closed set of brush behaviours. Only one is active at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BrushKind {
    /// Solid round stroke.
    #[default]
    Crayon,
    /// Solid stroke plus jittered sparkle dots.
    Glitter,
    /// Narrow solid stroke.
    Laser,
    /// Tap to flood-fill a region.
    Fill,
    /// Destination-out stroke.
    Eraser,
}

impl BrushKind {
    pub fn name(&self) -> &'static str {
        match self {
            BrushKind::Crayon => "crayon",
            BrushKind::Glitter => "glitter",
            BrushKind::Laser => "laser",
            BrushKind::Fill => "fill",
            BrushKind::Eraser => "eraser",
        }
    }
}

/// Current colour, brush kind and stroke width. Not persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct BrushState {
    pub color: BrushColor,
    pub kind: BrushKind,
    pub width: f32,
}

impl BrushState {
    pub fn new(palette: &Palette, width: f32) -> Self {
        Self {
            color: palette.first().clone(),
            kind: BrushKind::default(),
            width,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_with_and_without_hash() {
        assert_eq!(parse_hex("#FF1493"), Ok([0xFF, 0x14, 0x93]));
        assert_eq!(parse_hex("00ff00"), Ok([0, 255, 0]));
        assert!(parse_hex("#FFF").is_err());
        assert!(parse_hex("#GG0000").is_err());
    }

    #[test]
    fn palette_from_json_entries() {
        let json = r##"[
            {"displayName": "Gold", "rgbHex": "#FFD700", "glitter": true},
            {"displayName": "Red", "rgbHex": "#FF0000"}
        ]"##;
        let entries: Vec<PaletteEntry> = serde_json::from_str(json).unwrap();
        let palette = Palette::from_entries(&entries).unwrap();
        assert_eq!(palette.colors().len(), 2);
        assert!(palette.first().glitter);
        assert_eq!(palette.find("red").unwrap().rgba(), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn empty_or_invalid_palette_is_rejected() {
        assert_eq!(Palette::from_entries(&[]), Err(PaletteError::Empty));
        let bad = PaletteEntry {
            display_name: "Oops".into(),
            rgb_hex: "blue".into(),
            glitter: false,
        };
        assert!(Palette::from_entries(&[bad]).is_err());
    }

    #[test]
    fn default_palette_starts_with_magenta() {
        let palette = Palette::default();
        assert_eq!(palette.colors().len(), 8);
        assert_eq!(palette.first().hex(), "#FF1493");
        assert!(palette.find("Peach").is_some());
        assert!(palette.find("Teal").is_none());
    }
}
