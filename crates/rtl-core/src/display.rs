//! Text direction and font sizing for the editor surface.

use serde::{Deserialize, Serialize};

/// Writing direction of the editor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Rtl,
    Ltr,
}

impl Direction {
    pub fn toggle(self) -> Self {
        match self {
            Self::Rtl => Self::Ltr,
            Self::Ltr => Self::Rtl,
        }
    }

    /// CSS `direction` value.
    pub fn as_css(self) -> &'static str {
        match self {
            Self::Rtl => "rtl",
            Self::Ltr => "ltr",
        }
    }

    /// CSS `text-align` value that goes with the direction.
    pub fn text_align(self) -> &'static str {
        match self {
            Self::Rtl => "right",
            Self::Ltr => "left",
        }
    }
}

/// Hebrew, Arabic and Arabic presentation-form blocks.
pub fn is_rtl_char(c: char) -> bool {
    matches!(
        c,
        '\u{0590}'..='\u{05FF}'
            | '\u{0600}'..='\u{06FF}'
            | '\u{0750}'..='\u{077F}'
            | '\u{08A0}'..='\u{08FF}'
            | '\u{FB50}'..='\u{FDFF}'
            | '\u{FE70}'..='\u{FEFF}'
    )
}

/// Pick a direction by majority of RTL characters versus ASCII letters.
///
/// Returns `None` on a tie (including text with neither), meaning the
/// current direction should be kept.
pub fn detect_direction(text: &str) -> Option<Direction> {
    let (rtl, ltr) = text.chars().fold((0usize, 0usize), |(rtl, ltr), c| {
        if is_rtl_char(c) {
            (rtl + 1, ltr)
        } else if c.is_ascii_alphabetic() {
            (rtl, ltr + 1)
        } else {
            (rtl, ltr)
        }
    });

    match rtl.cmp(&ltr) {
        std::cmp::Ordering::Greater => Some(Direction::Rtl),
        std::cmp::Ordering::Less => Some(Direction::Ltr),
        std::cmp::Ordering::Equal => None,
    }
}

/// Editor font size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontSize(u8);

impl FontSize {
    pub const MIN: u8 = 10;
    pub const MAX: u8 = 24;
    pub const DEFAULT: u8 = 14;

    pub fn px(self) -> u8 {
        self.0
    }

    /// Grow or shrink, clamped to the allowed range.
    pub fn adjust(self, delta: i8) -> Self {
        let next = (self.0 as i16 + delta as i16).clamp(Self::MIN as i16, Self::MAX as i16);
        Self(next as u8)
    }

    pub fn reset(self) -> Self {
        Self::default()
    }
}

impl Default for FontSize {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}
