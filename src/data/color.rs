//! RGB color type for the lamp.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// An opaque 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Color {
    /// All channels off.
    pub const BLACK: Color = Color::new(0, 0, 0);
    /// All channels full.
    pub const WHITE: Color = Color::new(255, 255, 255);
    /// Pure red.
    pub const RED: Color = Color::new(255, 0, 0);
    /// Pure green.
    pub const GREEN: Color = Color::new(0, 255, 0);
    /// Pure blue.
    pub const BLUE: Color = Color::new(0, 0, 255);
    /// Red and green.
    pub const YELLOW: Color = Color::new(255, 255, 0);
    /// Green and blue.
    pub const CYAN: Color = Color::new(0, 255, 255);
    /// Red and blue.
    pub const MAGENTA: Color = Color::new(255, 0, 255);

    /// Create a color from its channels.
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Pack into `0xRRGGBB`.
    pub fn to_u32(&self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }

    /// Unpack from `0xRRGGBB`. The top byte is ignored.
    pub fn from_u32(value: u32) -> Self {
        Self::new((value >> 16) as u8, (value >> 8) as u8, value as u8)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = Error;

    /// Parse `#RRGGBB` or `RRGGBB`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        let invalid = || Error::InvalidParameter {
            name: "color".to_string(),
            value: s.to_string(),
        };

        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        u32::from_str_radix(hex, 16)
            .map(Self::from_u32)
            .map_err(|_| invalid())
    }
}
