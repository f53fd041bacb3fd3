use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;
use thiserror::Error;

/// An exact-decimal monetary amount, parsed from the ledger API's string
/// representation. Never round-trips through binary floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

#[derive(Error, Debug)]
#[error("Invalid decimal amount: {0:?}")]
pub struct AmountParseError(pub String);

impl Amount {
    pub fn from_decimal(decimal: Decimal) -> Self {
        Amount(decimal)
    }

    pub fn zero() -> Self {
        Amount(Decimal::ZERO)
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn abs_diff(self, other: Amount) -> Amount {
        Amount((self.0 - other.0).abs())
    }

    /// True when the absolute difference is within `epsilon`.
    pub fn within(self, other: Amount, epsilon: Decimal) -> bool {
        (self.0 - other.0).abs() <= epsilon
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim())
            .map(Amount)
            .map_err(|_| AmountParseError(s.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Amount(self.0 - rhs.0)
    }
}
