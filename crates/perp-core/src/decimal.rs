//! Precision-safe decimal types for quoting.
//!
//! Uses `rust_decimal` for exact decimal arithmetic so that tick and lot
//! rounding never drifts the way binary floating point would.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Price with exact decimal precision.
///
/// Wraps `Decimal` so prices cannot be mixed up with sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const ONE: Self = Self(Decimal::ONE);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round down to the tick grid. Used for bids.
    #[inline]
    pub fn floor_to_tick(&self, tick_size: Decimal) -> Self {
        if tick_size <= Decimal::ZERO {
            return *self;
        }
        Self((self.0 / tick_size).floor() * tick_size)
    }

    /// Round up to the tick grid. Used for asks.
    #[inline]
    pub fn ceil_to_tick(&self, tick_size: Decimal) -> Self {
        if tick_size <= Decimal::ZERO {
            return *self;
        }
        Self((self.0 / tick_size).ceil() * tick_size)
    }

    /// Round to the nearest tick (half away from zero).
    #[inline]
    pub fn round_to_tick(&self, tick_size: Decimal) -> Self {
        if tick_size <= Decimal::ZERO {
            return *self;
        }
        let steps = (self.0 / tick_size)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        Self(steps * tick_size)
    }

    /// Relative distance from `reference` as a fraction (0.01 = 1%).
    #[inline]
    pub fn deviation_from(&self, reference: Decimal) -> Option<Decimal> {
        if reference.is_zero() {
            return None;
        }
        Some(((self.0 - reference) / reference).abs())
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Order quantity with exact decimal precision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const ONE: Self = Self(Decimal::ONE);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round down to lot size.
    #[inline]
    pub fn round_to_lot(&self, lot_size: Decimal) -> Self {
        if lot_size <= Decimal::ZERO {
            return *self;
        }
        Self((self.0 / lot_size).floor() * lot_size)
    }

    /// Round to the nearest lot step, never going below one lot.
    #[inline]
    pub fn round_to_lot_nearest(&self, lot_size: Decimal) -> Self {
        if lot_size <= Decimal::ZERO {
            return *self;
        }
        let steps = (self.0 / lot_size)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        Self((steps * lot_size).max(lot_size))
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Size {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Size {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Size {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

impl std::iter::Sum for Size {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Size::ZERO, |acc, s| acc + s)
    }
}
