//! Engine-level constants.

/// Maximum number of plan→probe→learn rounds a single payment may run.
pub const ROUND_CAP: u32 = 10;

/// A payment gives up once the last attempt of a round has a success
/// probability below this floor.
pub const MIN_ATTEMPT_PROBABILITY: f64 = 0.1;

/// Number of linear pieces used to approximate a channel's convex
/// uncertainty cost.
pub const LINEARIZATION_PIECES: usize = 5;

/// Scale factor turning real-valued per-unit costs into the integer costs
/// consumed by the min-cost-flow solver.
pub const FLOW_COST_SCALE: u64 = 1_000_000_000;

/// When pruning is enabled, linearization pieces whose success probability
/// falls below this floor are left out of the flow instance.
pub const PRUNE_PROBABILITY_FLOOR: f64 = 1e-6;

/// Default `mu` for the fee-weighted delivery method.
pub const DEFAULT_MU_FEES: u64 = 1000;

/// Default `mu` for the pure success-probability delivery method.
pub const DEFAULT_MU_PROBABILITY: u64 = 0;

/// Default `mu` for the mixed delivery method.
pub const DEFAULT_MU_MIXED: u64 = 500;

/// Default base-fee threshold: channels advertising a base fee above this
/// many millisatoshis are not routed through.
pub const DEFAULT_BASE_FEE_THRESHOLD_MSAT: u64 = 0;
