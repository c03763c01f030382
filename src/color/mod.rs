mod analyze;
pub use analyze::{analyze, analyze_pixels};

use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// An 8-bit RGB color. (De)serializes as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Used whenever an album has no usable artwork.
    pub const NEUTRAL: Color = Color::new(0, 0, 0);

    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// `true` if every pairwise channel difference is below 40.
    #[must_use]
    pub fn is_grayscale(self) -> bool {
        const THRESHOLD: u8 = 40;

        self.r.abs_diff(self.g) < THRESHOLD
            && self.g.abs_diff(self.b) < THRESHOLD
            && self.b.abs_diff(self.r) < THRESHOLD
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(hex) = s.strip_prefix('#') else {
            bail!("color `{s}` does not start with `#`");
        };

        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            bail!("color `{s}` is not 6 hex digits");
        }

        let channel = |at: usize| {
            u8::from_str_radix(&hex[at..at + 2], 16).map_err(|err| anyhow!("color `{s}`: {err}"))
        };

        Ok(Color::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        hex.parse().map_err(de::Error::custom)
    }
}

/// The colors computed for one album. This is what gets cached, keyed by album id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumColors {
    pub average_color: Color,
    pub common_color: Color,
}

impl AlbumColors {
    pub const NEUTRAL: AlbumColors = AlbumColors {
        average_color: Color::NEUTRAL,
        common_color: Color::NEUTRAL,
    };
}
