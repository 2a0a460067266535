//! Session PINs.

use std::fmt;

use serde::{Deserialize, Serialize};
use sketchrelay_core::error::SessionError;
use sketchrelay_core::rng::DeterministicRng;

/// Smallest supported PIN width.
pub const MIN_PIN_DIGITS: u8 = 4;
/// Largest supported PIN width; `10^9 - 1` still fits a `u32`.
pub const MAX_PIN_DIGITS: u8 = 9;

/// A fixed-width numeric session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pin(String);

impl Pin {
    /// Draws a PIN with `digits` digits and no leading zero.
    ///
    /// `digits` is clamped into the supported range.
    #[must_use]
    pub fn generate(rng: &mut dyn DeterministicRng, digits: u8) -> Self {
        let digits = u32::from(digits.clamp(MIN_PIN_DIGITS, MAX_PIN_DIGITS));
        let low = 10_u32.pow(digits - 1);
        let high = 10_u32.pow(digits) - 1;
        Self(rng.next_u32_range(low, high).to_string())
    }

    /// Parses a PIN entered by a player.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidPin` unless `raw` (ignoring surrounding
    /// whitespace) is exactly `digits` ASCII digits.
    pub fn parse(raw: &str, digits: u8) -> Result<Self, SessionError> {
        let trimmed = raw.trim();
        if trimmed.len() != usize::from(digits) || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SessionError::InvalidPin(format!(
                "{raw:?} is not a {digits}-digit number"
            )));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// The PIN as a store key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Pin {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
