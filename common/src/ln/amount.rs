//! A Lightning amount newtype with millisatoshi precision.
//!
//! Note that we don't impl `From<u64>` or [`FromStr`] because we want calling
//! code to be explicit about what the input unit is: a bare `u64` is a
//! millisatoshi value in some places (channel base fees) and a satoshi value
//! in others (channel capacities, payment amounts).
//!
//! [`FromStr`]: std::str::FromStr

use std::{
    fmt::{self, Display},
    iter::Sum,
    ops::{Add, Sub},
};

use serde::{Deserialize, Serialize};

/// Errors that can occur when attempting to construct an [`Amount`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Amount is too large")]
    TooLarge,
}

/// A Lightning amount, internally represented as a [`u64`] number of
/// millisatoshis, which provides the following properties:
///
/// - The contained value is no greater than [`Amount::MAX`].
/// - Conversions to and from `u64` millisatoshis are infallible and lossless,
///   desirable because `u64` msat is the most common on-the-wire
///   representation.
///
/// Satoshi-denominated getters floor towards zero; sub-satoshi routing fees
/// only disappear at the final reporting boundary, never while accumulating.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd,
)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub struct Amount(u64);

impl Amount {
    /// The maximum [`Amount`] that this type can represent:
    /// [`u64::MAX`] millisatoshis.
    pub const MAX: Self = Self(u64::MAX);

    /// An [`Amount`] of zero.
    pub const ZERO: Self = Self(0);

    // --- Constructors --- //

    /// Construct an [`Amount`] from a millisatoshi [`u64`] value.
    #[inline]
    pub const fn from_msat(msat: u64) -> Self {
        Self(msat)
    }

    /// Construct an [`Amount`] from a satoshi [`u32`] value.
    #[inline]
    pub const fn from_sats_u32(sats: u32) -> Self {
        Self((sats as u64) * 1000)
    }

    /// Construct an [`Amount`] from a satoshi [`u64`] value.
    #[inline]
    pub fn try_from_sats_u64(sats: u64) -> Result<Self, Error> {
        sats.checked_mul(1000).map(Self).ok_or(Error::TooLarge)
    }

    // --- Getters --- //

    /// Returns the [`Amount`] as a [`u64`] millisatoshi value.
    #[inline]
    pub const fn msat(self) -> u64 {
        self.0
    }

    /// Returns the [`Amount`] as a [`u64`] satoshi value, flooring any
    /// sub-satoshi remainder.
    #[inline]
    pub const fn sats_floor(self) -> u64 {
        self.0 / 1000
    }

    // --- Checked arithmetic --- //

    #[inline]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    #[inline]
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        self.checked_add(rhs).expect("Amount overflow")
    }
}

impl Sub for Amount {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self.checked_sub(rhs).expect("Amount underflow")
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

/// Displays the contained value as satoshis with millisatoshi precision,
/// e.g. `5.000` for 5000 msat. Does not include a unit suffix.
impl Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}
