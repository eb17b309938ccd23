use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CodecError;

/// Compression level on the uniform 1–9 scale.
///
/// Each codec maps this onto its own native range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Level(u32);

impl Level {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 9;

    /// Validates `level` against `MIN..=MAX`.
    pub fn new(level: u32) -> Result<Self, CodecError> {
        if (Self::MIN..=Self::MAX).contains(&level) {
            Ok(Self(level))
        } else {
            Err(CodecError::InvalidLevel {
                level,
                min: Self::MIN,
                max: Self::MAX,
            })
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for Level {
    fn default() -> Self {
        Self(5)
    }
}

impl TryFrom<u32> for Level {
    type Error = CodecError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Level> for u32 {
    fn from(level: Level) -> Self {
        level.0
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
