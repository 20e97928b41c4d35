//! The `pickhardt-ln` crate contains the payment-simulation engine: the
//! channel-graph model, the ground-truth oracle network, the liquidity
//! uncertainty network, the min-cost-flow payment planner, and the payment
//! session loop tying them together.

/// Channel records and id newtypes.
pub mod channel;
/// Spec-fixed engine defaults.
pub mod constants;
/// Single-path shortest-path baseline.
pub mod dijkstra;
/// Min-cost-flow planning: instance construction, solver, decomposition.
pub mod flow;
/// The directed channel multigraph and its JSON loader.
pub mod graph;
/// Ground-truth liquidity and onion probing.
pub mod oracle;
/// Attempts and payments.
pub mod payments;
/// The top-level payment session loop.
pub mod session;
/// Liquidity beliefs and their piecewise-linear costs.
pub mod uncertainty;
