//! The requested scale factor: one of a small enumerated set.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Scale {
    X2,
    #[default]
    X4,
}

/// All supported scales, smallest first.
pub const SUPPORTED_SCALES: [Scale; 2] = [Scale::X2, Scale::X4];

impl Scale {
    pub fn factor(self) -> u8 {
        match self {
            Self::X2 => 2,
            Self::X4 => 4,
        }
    }
}

impl TryFrom<u8> for Scale {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::X2),
            4 => Ok(Self::X4),
            other => Err(CoreError::UnsupportedScale(other)),
        }
    }
}

impl From<Scale> for u8 {
    fn from(scale: Scale) -> Self {
        scale.factor()
    }
}

/// Accepts `"4"` or `"4x"`.
impl FromStr for Scale {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_suffix('x')
            .or_else(|| trimmed.strip_suffix('X'))
            .unwrap_or(trimmed);
        let value: u8 = digits
            .parse()
            .map_err(|_| CoreError::Validation(format!("invalid scale: {s:?}")))?;
        Self::try_from(value)
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.factor())
    }
}
