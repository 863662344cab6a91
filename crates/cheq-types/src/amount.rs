use std::fmt;
use std::ops::{Add, Neg};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use primitive_types::U256;

use crate::error::TypeError;

/// Parse an unsigned 256-bit integer from a decimal or `0x` hex string.
pub fn parse_u256(s: &str) -> Result<U256, TypeError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(TypeError::InvalidNumber("empty string".into()));
    }
    if let Some(digits) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        if digits.is_empty() {
            return Ok(U256::zero());
        }
        return U256::from_str_radix(digits, 16)
            .map_err(|e| TypeError::InvalidNumber(format!("{s}: {e:?}")));
    }
    U256::from_dec_str(trimmed).map_err(|e| TypeError::InvalidNumber(format!("{s}: {e:?}")))
}

/// How instrument ids are rendered into entity keys.
///
/// A deployment picks one format and every handler uses it, so the same
/// on-chain id always maps to the same instrument record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyFormat {
    /// `0x`-prefixed lower-case hex without leading zeros (`0x7`).
    #[default]
    Hex,
    /// Plain decimal (`7`).
    Decimal,
}

impl FromStr for KeyFormat {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hex" => Ok(Self::Hex),
            "decimal" | "dec" => Ok(Self::Decimal),
            other => Err(TypeError::UnknownKeyFormat(other.to_string())),
        }
    }
}

impl fmt::Display for KeyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hex => write!(f, "hex"),
            Self::Decimal => write!(f, "decimal"),
        }
    }
}

/// On-chain instrument (token) id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId(U256);

impl InstrumentId {
    pub fn new(value: U256) -> Self {
        Self(value)
    }

    pub fn value(&self) -> U256 {
        self.0
    }

    /// Render the entity key for this id.
    pub fn to_key(&self, format: KeyFormat) -> String {
        match format {
            KeyFormat::Hex => format!("0x{:x}", self.0),
            KeyFormat::Decimal => self.0.to_string(),
        }
    }
}

impl From<u64> for InstrumentId {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl FromStr for InstrumentId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_u256(s).map(Self)
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Debug for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstrumentId({})", self.0)
    }
}

/// A signed journal delta: funding is positive, cashing is negative.
///
/// Zero is always non-negative, so `+0` and `-0` compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SignedAmount {
    negative: bool,
    magnitude: U256,
}

impl SignedAmount {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn credit(amount: U256) -> Self {
        Self {
            negative: false,
            magnitude: amount,
        }
    }

    pub fn debit(amount: U256) -> Self {
        Self {
            negative: !amount.is_zero(),
            magnitude: amount,
        }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude.is_zero()
    }

    pub fn magnitude(&self) -> U256 {
        self.magnitude
    }

    /// The value as an unsigned amount, or `None` when negative.
    pub fn to_unsigned(&self) -> Option<U256> {
        if self.negative {
            None
        } else {
            Some(self.magnitude)
        }
    }
}

impl Neg for SignedAmount {
    type Output = SignedAmount;

    fn neg(self) -> Self::Output {
        if self.negative {
            Self::credit(self.magnitude)
        } else {
            Self::debit(self.magnitude)
        }
    }
}

impl Add for SignedAmount {
    type Output = SignedAmount;

    /// Saturates at `U256::MAX` in magnitude.
    fn add(self, rhs: Self) -> Self::Output {
        if self.negative == rhs.negative {
            let magnitude = self.magnitude.saturating_add(rhs.magnitude);
            return if self.negative {
                Self::debit(magnitude)
            } else {
                Self::credit(magnitude)
            };
        }
        let (pos, neg) = if self.negative {
            (rhs.magnitude, self.magnitude)
        } else {
            (self.magnitude, rhs.magnitude)
        };
        if pos >= neg {
            Self::credit(pos - neg)
        } else {
            Self::debit(neg - pos)
        }
    }
}

impl std::iter::Sum for SignedAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), Add::add)
    }
}

impl fmt::Display for SignedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            write!(f, "-{}", self.magnitude)
        } else {
            write!(f, "{}", self.magnitude)
        }
    }
}

impl fmt::Debug for SignedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignedAmount({self})")
    }
}

impl FromStr for SignedAmount {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.strip_prefix('-') {
            Some(rest) => parse_u256(rest).map(Self::debit),
            None => parse_u256(trimmed).map(Self::credit),
        }
    }
}

impl Serialize for SignedAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SignedAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
