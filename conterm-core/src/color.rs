//! Attribute resolution: cell attributes to concrete RGB colors
//!
//! Palette indices go through a fixed 18-entry table: the 16 ANSI colors
//! followed by the default foreground and default background. The table is
//! picked once at startup from a small set of named palettes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 24-bit color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Color carried by a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Color {
    /// Default foreground or background, depending on the slot
    #[default]
    Default,
    /// Palette index
    Indexed(u8),
    /// Explicit 24-bit color
    Rgb(Rgb),
}

/// Rendering attributes of one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CellAttributes {
    pub fg: Color,
    pub bg: Color,
    pub bold: bool,
    pub underline: bool,
    pub inverse: bool,
    pub protect: bool,
    pub blink: bool,
}

/// Number of entries in a palette table
pub const PALETTE_SIZE: usize = 18;

/// Index of the default foreground entry
pub const FOREGROUND: u8 = 16;

/// Index of the default background entry
pub const BACKGROUND: u8 = 17;

/// Offset from a normal ANSI color to its bright variant
const BRIGHT_OFFSET: u8 = 8;

/// Named palette tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaletteName {
    /// xterm colors, light grey on black
    Xterm,
    /// Solarized dark
    Solarized,
    /// Solarized with a pure black background
    SolarizedBlack,
    /// Solarized light
    #[default]
    SolarizedWhite,
}

impl PaletteName {
    pub const ALL: [PaletteName; 4] = [
        PaletteName::Xterm,
        PaletteName::Solarized,
        PaletteName::SolarizedBlack,
        PaletteName::SolarizedWhite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaletteName::Xterm => "xterm",
            PaletteName::Solarized => "solarized",
            PaletteName::SolarizedBlack => "solarized-black",
            PaletteName::SolarizedWhite => "solarized-white",
        }
    }
}

impl fmt::Display for PaletteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaletteName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaletteName::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                format!(
                    "unknown palette '{}', expected one of: xterm, solarized, solarized-black, solarized-white",
                    s
                )
            })
    }
}

const fn rgb(r: u8, g: u8, b: u8) -> Rgb {
    Rgb::new(r, g, b)
}

const XTERM: [Rgb; PALETTE_SIZE] = [
    rgb(0, 0, 0),
    rgb(205, 0, 0),
    rgb(0, 205, 0),
    rgb(205, 205, 0),
    rgb(0, 0, 238),
    rgb(205, 0, 205),
    rgb(0, 205, 205),
    rgb(229, 229, 229),
    rgb(127, 127, 127),
    rgb(255, 0, 0),
    rgb(0, 255, 0),
    rgb(255, 255, 0),
    rgb(92, 92, 255),
    rgb(255, 0, 255),
    rgb(0, 255, 255),
    rgb(255, 255, 255),
    rgb(229, 229, 229),
    rgb(0, 0, 0),
];

/// The 16 solarized accents shared by every solarized variant
const SOLARIZED_ANSI: [Rgb; 16] = [
    rgb(7, 54, 66),
    rgb(220, 50, 47),
    rgb(133, 153, 0),
    rgb(181, 137, 0),
    rgb(38, 139, 210),
    rgb(211, 54, 130),
    rgb(42, 161, 152),
    rgb(238, 232, 213),
    rgb(0, 43, 54),
    rgb(203, 75, 22),
    rgb(88, 110, 117),
    rgb(101, 123, 131),
    rgb(131, 148, 150),
    rgb(108, 113, 196),
    rgb(147, 161, 161),
    rgb(253, 246, 227),
];

const fn solarized(black: Rgb, foreground: Rgb, background: Rgb) -> [Rgb; PALETTE_SIZE] {
    let mut table = [rgb(0, 0, 0); PALETTE_SIZE];
    let mut i = 0;
    while i < SOLARIZED_ANSI.len() {
        table[i] = SOLARIZED_ANSI[i];
        i += 1;
    }
    table[0] = black;
    table[FOREGROUND as usize] = foreground;
    table[BACKGROUND as usize] = background;
    table
}

const SOLARIZED: [Rgb; PALETTE_SIZE] =
    solarized(rgb(7, 54, 66), rgb(238, 232, 213), rgb(7, 54, 66));
const SOLARIZED_BLACK: [Rgb; PALETTE_SIZE] =
    solarized(rgb(0, 0, 0), rgb(238, 232, 213), rgb(0, 0, 0));
const SOLARIZED_WHITE: [Rgb; PALETTE_SIZE] =
    solarized(rgb(7, 54, 66), rgb(7, 54, 66), rgb(238, 232, 213));

/// An 18-entry palette table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    entries: [Rgb; PALETTE_SIZE],
}

impl Palette {
    pub fn named(name: PaletteName) -> Self {
        let entries = match name {
            PaletteName::Xterm => XTERM,
            PaletteName::Solarized => SOLARIZED,
            PaletteName::SolarizedBlack => SOLARIZED_BLACK,
            PaletteName::SolarizedWhite => SOLARIZED_WHITE,
        };
        Self { entries }
    }

    /// Entry at `index`, or `None` past the end of the table
    pub fn get(&self, index: u8) -> Option<Rgb> {
        self.entries.get(index as usize).copied()
    }

    pub fn foreground(&self) -> Rgb {
        self.entries[FOREGROUND as usize]
    }

    pub fn background(&self) -> Rgb {
        self.entries[BACKGROUND as usize]
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::named(PaletteName::default())
    }
}

/// Maps cell attributes to the colors a renderer should paint.
///
/// Pure: the only state is the palette chosen at construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeResolver {
    palette: Palette,
}

impl AttributeResolver {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }

    pub fn named(name: PaletteName) -> Self {
        Self::new(Palette::named(name))
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Color to clear the surface with
    pub fn default_background(&self) -> Rgb {
        self.palette.background()
    }

    /// `(foreground, background)` for `attrs`, after bold promotion and the
    /// inverse swap
    pub fn resolve(&self, attrs: &CellAttributes) -> (Rgb, Rgb) {
        let fg = self.resolve_foreground(attrs.fg, attrs.bold);
        let bg = self.resolve_background(attrs.bg);
        if attrs.inverse {
            (bg, fg)
        } else {
            (fg, bg)
        }
    }

    fn resolve_foreground(&self, color: Color, bold: bool) -> Rgb {
        match color {
            Color::Rgb(rgb) => rgb,
            Color::Default => self.palette.foreground(),
            Color::Indexed(index) => {
                // Bold picks the bright variant of the low eight colors
                let index = if bold && index < BRIGHT_OFFSET {
                    index + BRIGHT_OFFSET
                } else {
                    index
                };
                self.palette
                    .get(index)
                    .unwrap_or_else(|| self.palette.foreground())
            }
        }
    }

    fn resolve_background(&self, color: Color) -> Rgb {
        match color {
            Color::Rgb(rgb) => rgb,
            Color::Default => self.palette.background(),
            Color::Indexed(index) => self
                .palette
                .get(index)
                .unwrap_or_else(|| self.palette.background()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(fg: Color, bg: Color) -> CellAttributes {
        CellAttributes {
            fg,
            bg,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_palette_is_solarized_white() {
        let resolver = AttributeResolver::default();
        assert_eq!(resolver.default_background(), Rgb::new(238, 232, 213));
        assert_eq!(
            resolver.resolve(&CellAttributes::default()),
            (Rgb::new(7, 54, 66), Rgb::new(238, 232, 213))
        );
    }

    #[test]
    fn test_explicit_rgb_wins() {
        let resolver = AttributeResolver::named(PaletteName::Xterm);
        let red = Rgb::new(250, 10, 10);
        let (fg, bg) = resolver.resolve(&attrs(Color::Rgb(red), Color::Indexed(4)));
        assert_eq!(fg, red);
        assert_eq!(bg, Rgb::new(0, 0, 238));
    }

    #[test]
    fn test_bold_promotes_low_colors() {
        let resolver = AttributeResolver::named(PaletteName::Xterm);
        let mut cell = attrs(Color::Indexed(1), Color::Default);
        cell.bold = true;
        assert_eq!(resolver.resolve(&cell).0, Rgb::new(255, 0, 0));

        // Already bright: unchanged
        cell.fg = Color::Indexed(9);
        assert_eq!(resolver.resolve(&cell).0, Rgb::new(255, 0, 0));
    }

    #[test]
    fn test_bold_does_not_touch_background() {
        let resolver = AttributeResolver::named(PaletteName::Xterm);
        let mut cell = attrs(Color::Default, Color::Indexed(1));
        cell.bold = true;
        assert_eq!(resolver.resolve(&cell).1, Rgb::new(205, 0, 0));
    }

    #[test]
    fn test_out_of_range_falls_back_to_defaults() {
        let resolver = AttributeResolver::named(PaletteName::Xterm);
        let (fg, bg) = resolver.resolve(&attrs(Color::Indexed(200), Color::Indexed(18)));
        assert_eq!(fg, Rgb::new(229, 229, 229));
        assert_eq!(bg, Rgb::new(0, 0, 0));
    }

    #[test]
    fn test_inverse_swaps() {
        let resolver = AttributeResolver::named(PaletteName::Solarized);
        let mut cell = attrs(Color::Indexed(2), Color::Indexed(4));
        let (fg, bg) = resolver.resolve(&cell);
        cell.inverse = true;
        assert_eq!(resolver.resolve(&cell), (bg, fg));
    }

    #[test]
    fn test_palette_names_round_trip() {
        for name in PaletteName::ALL {
            assert_eq!(name.as_str().parse::<PaletteName>().unwrap(), name);
        }
        assert!("mauve".parse::<PaletteName>().is_err());
        assert_eq!(
            "Solarized-Black".parse::<PaletteName>().unwrap(),
            PaletteName::SolarizedBlack
        );
    }

    #[test]
    fn test_solarized_variants_differ_only_in_black_and_defaults() {
        let dark = Palette::named(PaletteName::Solarized);
        let black = Palette::named(PaletteName::SolarizedBlack);
        let white = Palette::named(PaletteName::SolarizedWhite);
        for i in 1..16 {
            assert_eq!(dark.get(i), black.get(i));
            assert_eq!(dark.get(i), white.get(i));
        }
        assert_eq!(black.get(0), Some(Rgb::new(0, 0, 0)));
        assert_eq!(white.foreground(), Rgb::new(7, 54, 66));
        assert_eq!(dark.background(), Rgb::new(7, 54, 66));
    }
}
