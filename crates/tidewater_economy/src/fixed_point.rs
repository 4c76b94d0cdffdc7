//! # Fixed-Point Arithmetic
//!
//! **CRITICAL: NO FLOATING POINT IN FINANCIAL CALCULATIONS**
//!
//! Payout multipliers and outcome weights are signed fixed-point numbers with
//! four implied decimals. Content files may write `mul = 1.5`; the conversion
//! to fixed point happens exactly once, when the catalogue is loaded.
//!
//! ## Why Fixed-Point?
//!
//! - Deterministic: Same calculation = same result on all hardware
//! - No rounding errors: 0.1 + 0.2 == 0.3 (unlike IEEE 754 floats)
//! - Auditable: Financial transactions must be reproducible

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Number of decimal places.
const DECIMAL_PLACES: u32 = 4;

/// The raw value of 1.0.
const SCALE: i64 = 10i64.pow(DECIMAL_PLACES);

/// Signed fixed-point decimal number with 4 decimal places.
///
/// Internally stores value * 10^4 as an i64.
///
/// # Example
///
/// ```rust
/// use tidewater_economy::FixedPoint;
///
/// let mul = FixedPoint::from_parts(1, 5000); // 1.5
/// assert_eq!(mul.mul_floor(1000), 1500);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
#[repr(transparent)]
pub struct FixedPoint(i64);

impl FixedPoint {
    /// Zero value.
    pub const ZERO: Self = Self(0);

    /// One unit (1.0000).
    pub const ONE: Self = Self(SCALE);

    /// Creates a fixed-point number from a whole number.
    #[inline]
    #[must_use]
    pub const fn from_whole(whole: i64) -> Self {
        Self(whole * SCALE)
    }

    /// Creates a fixed-point number from parts.
    ///
    /// # Arguments
    ///
    /// * `whole` - The whole number part
    /// * `decimal` - The decimal part (0-9999), same sign as `whole`
    #[inline]
    #[must_use]
    pub const fn from_parts(whole: i64, decimal: u32) -> Self {
        let frac = (decimal as i64) % SCALE;
        if whole < 0 {
            Self(whole * SCALE - frac)
        } else {
            Self(whole * SCALE + frac)
        }
    }

    /// Creates a fixed-point number from basis points (10000 = 1.0).
    #[inline]
    #[must_use]
    pub const fn from_bp(bp: i64) -> Self {
        Self(bp)
    }

    /// Returns the raw internal value (value * 10^4).
    #[inline]
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Returns true if this value is strictly positive.
    #[inline]
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Returns true if this value is negative.
    #[inline]
    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Multiplies an integer amount and rounds toward negative infinity.
    ///
    /// The result saturates at the `i64` range.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tidewater_economy::FixedPoint;
    ///
    /// let mul = FixedPoint::from_parts(0, 3333);
    /// assert_eq!(mul.mul_floor(10), 3);
    /// assert_eq!(FixedPoint::from_parts(-1, 5000).mul_floor(3), -5);
    /// ```
    #[inline]
    #[must_use]
    pub fn mul_floor(self, amount: u64) -> i64 {
        let product = i128::from(amount) * i128::from(self.0);
        let floored = product.div_euclid(i128::from(SCALE));
        i64::try_from(floored).unwrap_or(if floored < 0 { i64::MIN } else { i64::MAX })
    }

    /// Checked addition. Returns `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl TryFrom<f64> for FixedPoint {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() {
            return Err(format!("fixed-point value must be finite, got {value}"));
        }
        let scaled = (value * SCALE as f64).round();
        if scaled.abs() >= 9.0e15 {
            return Err(format!("fixed-point value out of range: {value}"));
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self(scaled as i64))
    }
}

impl From<FixedPoint> for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: FixedPoint) -> Self {
        value.0 as f64 / SCALE as f64
    }
}

impl Add for FixedPoint {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for FixedPoint {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Debug for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedPoint({self})")
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = SCALE.unsigned_abs();
        write!(f, "{sign}{}.{:04}", abs / scale, abs % scale)
    }
}
