use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

/// Number of fractional digits carried by [`Amount`].
pub const DECIMALS: u32 = 18;

const UNIT: u128 = 10u128.pow(DECIMALS);

/// Fixed-point token quantity stored in base units (10^-18 of a token).
///
/// Parsing and formatting go through decimal strings, so amounts never pass
/// through floating point once loaded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount `{input}` contains an invalid character")]
    InvalidDigit { input: String },
    #[error("amount `{input}` has more than {max} fractional digits")]
    TooPrecise { input: String, max: u32 },
    #[error("amount `{input}` does not fit the supported range")]
    Overflow { input: String },
}

impl Amount {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    #[must_use]
    pub const fn base_units(self) -> u128 {
        self.0
    }

    #[must_use]
    pub const fn from_whole(tokens: u64) -> Self {
        Self(tokens as u128 * UNIT)
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    #[must_use]
    pub fn checked_mul(self, factor: u64) -> Option<Self> {
        self.0.checked_mul(u128::from(factor)).map(Self)
    }

    #[must_use]
    pub const fn abs_diff(self, other: Self) -> Self {
        Self(self.0.abs_diff(other.0))
    }

    /// True when `self` lies within `tolerance` of `expected` in either
    /// direction.
    #[must_use]
    pub const fn within(self, expected: Self, tolerance: Self) -> bool {
        self.abs_diff(expected).0 <= tolerance.0
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(AmountError::Empty);
        }

        let (whole, fraction) = input.split_once('.').unwrap_or((input, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(AmountError::InvalidDigit {
                input: input.to_owned(),
            });
        }
        if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(AmountError::InvalidDigit {
                input: input.to_owned(),
            });
        }
        if fraction.len() > DECIMALS as usize {
            return Err(AmountError::TooPrecise {
                input: input.to_owned(),
                max: DECIMALS,
            });
        }

        let overflow = || AmountError::Overflow {
            input: input.to_owned(),
        };

        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u128>().map_err(|_| overflow())?
        };
        let fraction_units = if fraction.is_empty() {
            0
        } else {
            let padded = format!("{fraction:0<width$}", width = DECIMALS as usize);
            padded.parse::<u128>().map_err(|_| overflow())?
        };

        whole_units
            .checked_mul(UNIT)
            .and_then(|units| units.checked_add(fraction_units))
            .map(Self)
            .ok_or_else(overflow)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / UNIT;
        let fraction = self.0 % UNIT;
        if fraction == 0 {
            return write!(f, "{whole}");
        }
        let digits = format!("{fraction:0width$}", width = DECIMALS as usize);
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Whole(u64),
            Decimal(f64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
            Raw::Whole(tokens) => Ok(Self::from_whole(tokens)),
            Raw::Decimal(value) if value.is_finite() && value >= 0.0 => {
                value.to_string().parse().map_err(de::Error::custom)
            }
            Raw::Decimal(value) => Err(de::Error::custom(format!(
                "amount `{value}` must be a finite, non-negative number"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amount(s: &str) -> Amount {
        s.parse().expect("valid amount")
    }

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(amount("1"), Amount::from_whole(1));
        assert_eq!(amount("0.5").base_units(), UNIT / 2);
        assert_eq!(amount(".25").base_units(), UNIT / 4);
        assert_eq!(amount("0.000000000000000001").base_units(), 1);
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert_eq!("".parse::<Amount>(), Err(AmountError::Empty));
        assert!(matches!(
            "-1".parse::<Amount>(),
            Err(AmountError::InvalidDigit { .. })
        ));
        assert!(matches!(
            "1.0000000000000000001".parse::<Amount>(),
            Err(AmountError::TooPrecise { .. })
        ));
        assert!(matches!(
            ".".parse::<Amount>(),
            Err(AmountError::InvalidDigit { .. })
        ));
    }

    #[test]
    fn display_trims_trailing_zeros() {
        assert_eq!(amount("10").to_string(), "10");
        assert_eq!(amount("1.500").to_string(), "1.5");
        assert_eq!(amount("0.0000001").to_string(), "0.0000001");
    }

    #[test]
    fn deserializes_from_numbers_and_strings() {
        let from_int: Amount = serde_yaml::from_str("1000").expect("int");
        let from_float: Amount = serde_yaml::from_str("0.1").expect("float");
        let from_text: Amount = serde_yaml::from_str("'2.25'").expect("text");
        assert_eq!(from_int, Amount::from_whole(1000));
        assert_eq!(from_float, amount("0.1"));
        assert_eq!(from_text, amount("2.25"));
    }

    #[test]
    fn tolerance_applies_in_both_directions() {
        let expected = amount("10");
        let tolerance = amount("0.01");
        assert!(amount("10.005").within(expected, tolerance));
        assert!(amount("9.995").within(expected, tolerance));
        assert!(!amount("9.9").within(expected, tolerance));
    }
}
