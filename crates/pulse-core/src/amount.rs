//! Fixed-point token amounts
//!
//! Tokens are fractional ("0.5 tokens for a like") but must add up exactly
//! across thousands of credits, so they are stored as an integer count of
//! 1/10_000 token units.

use std::fmt::{self, Display};
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Number of raw units per whole token
pub const TOKEN_SCALE: u64 = 10_000;

/// Decimal places carried by [`TokenAmount`]
pub const TOKEN_DECIMALS: usize = 4;

/// A non-negative token quantity with four decimal places
///
/// Serialized as the raw unit count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenAmount(u64);

impl TokenAmount {
    /// Zero tokens
    pub const ZERO: Self = Self(0);

    /// Create from raw 1/10_000 units
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Create from a whole number of tokens
    pub const fn from_whole(tokens: u64) -> Self {
        Self(tokens * TOKEN_SCALE)
    }

    /// Create from hundredths of a token (`from_hundredths(50)` is 0.5)
    pub const fn from_hundredths(hundredths: u64) -> Self {
        Self(hundredths * (TOKEN_SCALE / 100))
    }

    /// Raw unit count
    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Multiply by a non-negative factor, rounding to the nearest raw unit
    ///
    /// Negative or non-finite factors yield zero.
    pub fn scale(self, factor: f64) -> Self {
        if !factor.is_finite() || factor <= 0.0 {
            return Self::ZERO;
        }
        let scaled = (self.0 as f64 * factor).round();
        if scaled >= u64::MAX as f64 {
            Self(u64::MAX)
        } else {
            Self(scaled as u64)
        }
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Approximate value as a float, for display and rate math only
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / TOKEN_SCALE as f64
    }
}

impl Add for TokenAmount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl AddAssign for TokenAmount {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl Sum for TokenAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl Display for TokenAmount {
    /// Renders at least two decimal places, trimming trailing zeros beyond that
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / TOKEN_SCALE;
        let frac = format!("{:0width$}", self.0 % TOKEN_SCALE, width = TOKEN_DECIMALS);
        let mut frac = frac.as_str();
        while frac.len() > 2 && frac.ends_with('0') {
            frac = &frac[..frac.len() - 1];
        }
        write!(f, "{}.{}", whole, frac)
    }
}

impl FromStr for TokenAmount {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidAmount(s.to_string());
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > TOKEN_DECIMALS || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_raw: u64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = TOKEN_DECIMALS);
            padded.parse().map_err(|_| invalid())?
        };
        whole
            .checked_mul(TOKEN_SCALE)
            .and_then(|w| w.checked_add(frac_raw))
            .map(Self)
            .ok_or_else(invalid)
    }
}
