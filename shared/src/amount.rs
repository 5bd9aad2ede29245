use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::{ChainError, Result};

/// Fixed-point monetary value with 8 fractional decimal digits.
///
/// All arithmetic is integer arithmetic over the smallest unit (10⁻⁸ of a
/// coin); display rounds to 8 places. Serialized as an 8-decimal string so
/// the canonical transaction form never depends on float formatting, but
/// JSON numbers are accepted on input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

/// Smallest units per whole coin.
pub const UNITS_PER_COIN: u64 = 100_000_000;

impl Amount {
    pub const ZERO: Self = Self(0);

    /// Creates an amount from smallest units.
    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Creates an amount from whole coins.
    #[must_use]
    pub const fn from_coins(coins: u64) -> Self {
        Self(coins * UNITS_PER_COIN)
    }

    /// Returns the value in smallest units.
    #[must_use]
    pub const fn units(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(units) => Some(Self(units)),
            None => None,
        }
    }

    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(units) => Some(Self(units)),
            None => None,
        }
    }

    /// Halves the value `times` times, flooring; zero once the shift
    /// exhausts the unit precision.
    #[must_use]
    pub const fn halved(self, times: u64) -> Self {
        if times >= u64::BITS as u64 {
            Self::ZERO
        } else {
            Self(self.0 >> times)
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:08}",
            self.0 / UNITS_PER_COIN,
            self.0 % UNITS_PER_COIN
        )
    }
}

impl FromStr for Amount {
    type Err = ChainError;

    /// Parses a non-negative decimal with at most 8 fractional digits.
    fn from_str(s: &str) -> Result<Self> {
        let bad = |reason: &str| ChainError::InvalidAmount(format!("{s:?}: {reason}"));

        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad("integer part must be decimal digits"));
        }
        if frac_part.len() > 8 || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad("at most 8 fractional decimal digits"));
        }

        let coins: u64 = int_part.parse().map_err(|_| bad("integer part too large"))?;
        let mut frac: u64 = 0;
        if !frac_part.is_empty() {
            frac = frac_part.parse().map_err(|_| bad("bad fractional part"))?;
            frac *= 10u64.pow(8 - frac_part.len() as u32);
        }

        coins
            .checked_mul(UNITS_PER_COIN)
            .and_then(|units| units.checked_add(frac))
            .map(Self)
            .ok_or_else(|| bad("value overflows the fixed-point range"))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal amount as a string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Amount, E> {
                v.parse().map_err(de::Error::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Amount, E> {
                v.checked_mul(UNITS_PER_COIN)
                    .map(Amount)
                    .ok_or_else(|| de::Error::custom("amount overflows the fixed-point range"))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Amount, E> {
                if !v.is_finite() || v < 0.0 {
                    return Err(de::Error::custom("amount must be a finite non-negative number"));
                }
                let units = (v * UNITS_PER_COIN as f64).round();
                if units > u64::MAX as f64 {
                    return Err(de::Error::custom("amount overflows the fixed-point range"));
                }
                Ok(Amount(units as u64))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}
