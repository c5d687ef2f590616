//! Color-identity allocator.
//!
//! A fixed 12-entry palette provides the only join key between a region
//! on the frozen frame and a dish on the menu. Detections get a color
//! that is a pure function of their index; manual rectangles take the
//! first palette entry nobody else holds.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Number of distinct region colors.
pub const PALETTE_SIZE: usize = 12;

/// Palette entries in allocation order.
const PALETTE_HEX: [&str; PALETTE_SIZE] = [
    "#E6194B", "#3CB44B", "#FFE119", "#4363D8", "#F58231", "#911EB4",
    "#42D4F4", "#F032E6", "#BFEF45", "#FABED4", "#469990", "#9A6324",
];

/// One palette slot. Ordering follows palette order.
///
/// Serialized as its `#RRGGBB` hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(u8);

impl Color {
    /// Palette slot for `index`, or `None` past the end of the palette.
    pub fn from_slot(index: usize) -> Option<Self> {
        (index < PALETTE_SIZE).then_some(Self(index as u8))
    }

    /// Look up a palette color by hex string (case-insensitive).
    pub fn from_hex(hex: &str) -> Option<Self> {
        PALETTE_HEX
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(hex.trim()))
            .map(|slot| Self(slot as u8))
    }

    pub fn slot(self) -> usize {
        usize::from(self.0)
    }

    pub fn hex(self) -> &'static str {
        PALETTE_HEX[self.slot()]
    }

    /// Every palette color in allocation order.
    pub fn all() -> impl Iterator<Item = Color> {
        (0..PALETTE_SIZE).map(|slot| Self(slot as u8))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hex())
    }
}

impl TryFrom<String> for Color {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value).ok_or_else(|| {
            CoreError::Validation(format!("'{value}' is not a palette color"))
        })
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.hex().to_string()
    }
}

/// Color for the detection at `index`: `palette[index mod 12]`.
///
/// Independent of allocation order, so reprocessing the same detection
/// list always yields the same colors.
pub fn color_for_detection_index(index: usize) -> Color {
    Color((index % PALETTE_SIZE) as u8)
}

/// First palette color not in `used`, scanning in palette order.
///
/// `None` means all twelve are taken and drawing must be refused.
pub fn next_available_color(used: &BTreeSet<Color>) -> Option<Color> {
    Color::all().find(|color| !used.contains(color))
}

/// Union of detection and manual colors, detections first, without
/// duplicates. Feeds the operator's color picker during mapping.
pub fn all_used_colors(
    detections: impl IntoIterator<Item = Color>,
    manual: impl IntoIterator<Item = Color>,
) -> Vec<Color> {
    let mut seen = BTreeSet::new();
    detections
        .into_iter()
        .chain(manual)
        .filter(|color| seen.insert(*color))
        .collect()
}
