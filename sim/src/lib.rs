//! The `sim` crate is the experiment driver: it loads a channel graph and
//! a payment set, simulates every payment with one delivery method, and
//! writes one NDJSON result record per payment.

/// CLI args and the experiment loop.
pub mod cli;
