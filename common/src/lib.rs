//! The `common` crate contains fundamental types and utilities shared between
//! the simulation engine and the experiment driver.

/// Lightning newtypes: millisatoshi-precision amounts.
pub mod ln;
/// Random number generation.
pub mod rng;
/// Test utilities: proptest strategies and roundtrip helpers.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
