//! Fixed-point OVER token amounts.
//!
//! OVER is an 18-decimal native currency, so amounts are stored as wei-scaled
//! `i128` integers. Floating point never touches ledger arithmetic; floats are
//! only accepted at the JSON boundary and converted once.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Fixed-point decimal with 18 decimal places, stored as a scaled integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount(i128);

/// Error parsing a decimal string into an [`Amount`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseAmountError {
    #[error("empty amount")]
    Empty,
    #[error("invalid decimal literal: {0}")]
    Invalid(String),
    #[error("more than 18 fractional digits: {0}")]
    TooPrecise(String),
    #[error("amount out of range: {0}")]
    OutOfRange(String),
}

impl Amount {
    pub const DECIMALS: u32 = 18;
    const SCALE: i128 = 1_000_000_000_000_000_000;

    pub const ZERO: Amount = Amount(0);

    /// Build from an already-scaled (wei) integer value.
    pub const fn from_scaled(value: i128) -> Self {
        Amount(value)
    }

    /// Build from a whole number of tokens.
    pub const fn from_whole(value: i64) -> Self {
        Amount(value as i128 * Self::SCALE)
    }

    /// Lossy conversion from a JSON float. Only used at the API boundary.
    pub fn from_float(value: f64) -> Self {
        Amount((value * Self::SCALE as f64).round() as i128)
    }

    /// Convert an on-chain wei quantity. `None` if it exceeds the i128 range.
    pub fn from_wei(wei: u128) -> Option<Self> {
        i128::try_from(wei).ok().map(Amount)
    }

    pub const fn to_scaled(self) -> i128 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Multiply by an integer unit count (used for score rewards).
    pub fn checked_mul_units(self, units: i64) -> Option<Amount> {
        self.0.checked_mul(units as i128).map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / Self::SCALE as u128;
        let frac = abs % Self::SCALE as u128;
        if frac == 0 {
            write!(f, "{sign}{whole}")
        } else {
            let frac = format!("{frac:018}");
            write!(f, "{sign}{whole}.{}", frac.trim_end_matches('0'))
        }
    }
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseAmountError::Empty);
        }

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (whole_str, frac_str) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole_str.is_empty() && frac_str.is_empty() {
            return Err(ParseAmountError::Invalid(s.to_string()));
        }
        if frac_str.len() > Self::DECIMALS as usize {
            return Err(ParseAmountError::TooPrecise(s.to_string()));
        }
        if !whole_str.chars().all(|c| c.is_ascii_digit())
            || !frac_str.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ParseAmountError::Invalid(s.to_string()));
        }

        let whole: i128 = if whole_str.is_empty() {
            0
        } else {
            whole_str
                .parse()
                .map_err(|_| ParseAmountError::OutOfRange(s.to_string()))?
        };

        let mut frac: i128 = 0;
        if !frac_str.is_empty() {
            frac = frac_str
                .parse()
                .map_err(|_| ParseAmountError::Invalid(s.to_string()))?;
            frac *= 10_i128.pow(Self::DECIMALS - frac_str.len() as u32);
        }

        let scaled = whole
            .checked_mul(Self::SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(|| ParseAmountError::OutOfRange(s.to_string()))?;

        Ok(Amount(if negative { -scaled } else { scaled }))
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Neg for Amount {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Amount(-self.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

// Serialized as a decimal string: 18-decimal values overflow JSON numbers.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a decimal string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                v.parse().map_err(de::Error::custom)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
                if !v.is_finite() {
                    return Err(de::Error::custom("amount must be finite"));
                }
                Ok(Amount::from_float(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                i64::try_from(v)
                    .map(Amount::from_whole)
                    .map_err(|_| de::Error::custom("amount out of range"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                Ok(Amount::from_whole(v))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_whole_scales() {
        assert_eq!(Amount::from_whole(5), Amount::from_scaled(5 * Amount::SCALE));
        assert_eq!(Amount::from_whole(0), Amount::ZERO);
    }

    #[test]
    fn from_float_converts() {
        assert_eq!(Amount::from_float(0.001), "0.001".parse().unwrap());
        assert_eq!(Amount::from_float(1.5), "1.5".parse().unwrap());
    }

    #[test]
    fn parse_whole_and_fraction() {
        assert_eq!(
            "1.5".parse::<Amount>().unwrap(),
            Amount::from_scaled(1_500_000_000_000_000_000)
        );
        assert_eq!(
            "0.000000000000000001".parse::<Amount>().unwrap(),
            Amount::from_scaled(1)
        );
        assert_eq!("42".parse::<Amount>().unwrap(), Amount::from_whole(42));
        assert_eq!(".5".parse::<Amount>().unwrap(), Amount::from_scaled(Amount::SCALE / 2));
    }

    #[test]
    fn parse_negative() {
        assert_eq!(
            "-2.5".parse::<Amount>().unwrap(),
            Amount::from_scaled(-2_500_000_000_000_000_000)
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!("".parse::<Amount>(), Err(ParseAmountError::Empty));
        assert!(matches!(
            "abc".parse::<Amount>(),
            Err(ParseAmountError::Invalid(_))
        ));
        assert!(matches!(
            "1.0000000000000000001".parse::<Amount>(),
            Err(ParseAmountError::TooPrecise(_))
        ));
        assert!(matches!(
            ".".parse::<Amount>(),
            Err(ParseAmountError::Invalid(_))
        ));
    }

    #[test]
    fn display_trims_trailing_zeros() {
        assert_eq!(Amount::from_whole(5).to_string(), "5");
        assert_eq!("0.005".parse::<Amount>().unwrap().to_string(), "0.005");
        assert_eq!("1.50".parse::<Amount>().unwrap().to_string(), "1.5");
        assert_eq!(Amount::ZERO.to_string(), "0");
        assert_eq!("-0.25".parse::<Amount>().unwrap().to_string(), "-0.25");
    }

    #[test]
    fn display_round_trips() {
        for s in ["0.000000000000000001", "123.456", "7", "0.1"] {
            let amount: Amount = s.parse().unwrap();
            assert_eq!(amount.to_string(), s);
        }
    }

    #[test]
    fn from_wei_round_trips() {
        let amount = Amount::from_wei(1_500_000_000_000_000_000).unwrap();
        assert_eq!(amount.to_string(), "1.5");
        assert!(Amount::from_wei(u128::MAX).is_none());
    }

    #[test]
    fn checked_arithmetic() {
        let a = Amount::from_whole(2);
        let b = Amount::from_whole(3);
        assert_eq!(a.checked_add(b), Some(Amount::from_whole(5)));
        assert_eq!(b.checked_sub(a), Some(Amount::from_whole(1)));
        assert_eq!(
            Amount::from_float(0.001).checked_mul_units(5),
            Some(Amount::from_float(0.005))
        );
        assert!(Amount::from_scaled(i128::MAX).checked_add(Amount::from_scaled(1)).is_none());
    }

    #[test]
    fn serde_round_trip() {
        let amount: Amount = "12.75".parse().unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"12.75\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn serde_accepts_numbers() {
        let from_float: Amount = serde_json::from_str("0.005").unwrap();
        assert_eq!(from_float, "0.005".parse().unwrap());
        let from_int: Amount = serde_json::from_str("3").unwrap();
        assert_eq!(from_int, Amount::from_whole(3));
    }

    #[test]
    fn ordering() {
        assert!(Amount::ZERO < Amount::from_whole(1));
        assert!(Amount::from_scaled(-1) < Amount::ZERO);
    }
}
