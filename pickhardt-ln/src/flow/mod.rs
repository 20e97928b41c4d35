//! Min-cost-flow planning.
//!
//! The planner turns the current liquidity beliefs into an integer-cost
//! min-cost-flow instance (one parallel arc per linearization piece per
//! channel), solves it for the full payment amount, and decomposes the
//! optimal flow into concrete per-path [`Attempt`]s.

/// The pluggable min-cost-flow solver.
pub mod solver;

use tracing::{debug, warn};

use crate::channel::{ChannelId, NodeId};
use crate::constants::{
    FLOW_COST_SCALE, LINEARIZATION_PIECES, PRUNE_PROBABILITY_FLOOR,
};
use crate::payments::Attempt;
use crate::uncertainty::UncertaintyNetwork;

pub use solver::FlowError;
use solver::MinCostFlow;

/// Per-unit arc costs are clamped here so that pathological `mu` or ppm
/// values cannot overflow the solver's cost arithmetic.
const MAX_UNIT_COST: i64 = 1 << 50;

/// Plan a set of attempts that together deliver `amount_sat` from `sender`
/// to `receiver` over the current beliefs.
///
/// Each returned attempt is a simple path with positive effective capacity
/// and carries its planning-time success probability and routing fee; the
/// attempt amounts sum to `amount_sat`. Fails with
/// [`FlowError::Infeasible`] when the beliefs admit no such flow.
pub fn plan_attempts(
    uncertainty: &UncertaintyNetwork,
    sender: NodeId,
    receiver: NodeId,
    amount_sat: u64,
    mu: u64,
    base_fee_threshold_msat: u64,
) -> Result<Vec<Attempt>, FlowError> {
    let graph = uncertainty.graph().clone();
    let num_nodes = graph.num_nodes();
    let super_source = num_nodes;
    let prune = uncertainty.prune();

    // The super-source's only arc caps the flow at the payment amount.
    let mut mcf = MinCostFlow::new(num_nodes + 1);
    mcf.add_arc(super_source, sender.to_usize(), amount_sat, 0);

    let mut piece_arcs = Vec::new();
    for (cid, channel) in graph.channels() {
        if channel.base_fee_msat > base_fee_threshold_msat {
            continue;
        }
        let belief = uncertainty.channel(cid);
        let fee_cost = unit_fee_cost(mu, channel.ppm);
        for piece in belief.linearize(LINEARIZATION_PIECES) {
            // Success probabilities only fall with later pieces, so
            // pruning drops a suffix of the linearization.
            if prune && piece.success_probability < PRUNE_PROBABILITY_FLOOR
            {
                break;
            }
            let uncertainty_cost = (piece.cost_per_unit
                * FLOW_COST_SCALE as f64)
                .round() as i64;
            let cost =
                uncertainty_cost.saturating_add(fee_cost).min(MAX_UNIT_COST);
            let arc = mcf.add_arc(
                channel.src.to_usize(),
                channel.dest.to_usize(),
                piece.width,
                cost,
            );
            piece_arcs.push((arc, cid));
        }
    }

    mcf.solve(super_source, receiver.to_usize(), amount_sat)?;

    // Collapse the parallel piece arcs back into per-channel flow.
    let mut channel_flow = vec![0u64; graph.num_channels()];
    for (arc, cid) in piece_arcs {
        channel_flow[cid.to_usize()] += mcf.flow(arc);
    }

    let attempts =
        decompose(uncertainty, &mut channel_flow, sender, receiver);
    debug!(
        "Planned {} attempts totalling {} sat",
        attempts.len(),
        attempts.iter().map(Attempt::amount_sat).sum::<u64>(),
    );
    Ok(attempts)
}

/// The scaled per-unit fee cost `mu * ppm * 10^-6`, in solver cost units.
fn unit_fee_cost(mu: u64, ppm: u64) -> i64 {
    let scaled = u128::from(mu) * u128::from(ppm) * 1000;
    i64::try_from(scaled).unwrap_or(MAX_UNIT_COST).min(MAX_UNIT_COST)
}

/// Repeatedly extract the scid-lexicographically least simple
/// sender→receiver path from the flow's support; the path amount is its
/// bottleneck flow. Cycles in the support (possible at zero marginal cost)
/// are cancelled rather than emitted.
fn decompose(
    uncertainty: &UncertaintyNetwork,
    channel_flow: &mut [u64],
    sender: NodeId,
    receiver: NodeId,
) -> Vec<Attempt> {
    let graph = uncertainty.graph();
    let mut attempts = Vec::new();
    // visited[node] = number of path arcs consumed when `node` was reached
    let mut visited: Vec<Option<usize>> = vec![None; graph.num_nodes()];

    'extract: loop {
        visited.fill(None);
        visited[sender.to_usize()] = Some(0);
        let mut path: Vec<ChannelId> = Vec::new();
        let mut node = sender;

        while node != receiver {
            let next_hop = graph
                .outgoing(node)
                .iter()
                .copied()
                .find(|&cid| channel_flow[cid.to_usize()] > 0);
            let Some(cid) = next_hop else {
                if path.is_empty() {
                    // no flow out of the sender is left
                    return attempts;
                }
                // Flow conservation rules this out for a solver-produced
                // flow; bail out with what has been decomposed so far.
                warn!(
                    "Flow support dead-ends at {}; stopping decomposition",
                    graph.node_name(node),
                );
                return attempts;
            };
            let next = graph.channel(cid).dest;
            if let Some(cycle_start) = visited[next.to_usize()] {
                // walked into a cycle: cancel its flow and start over
                let delta = path[cycle_start..]
                    .iter()
                    .chain([&cid])
                    .map(|&c| channel_flow[c.to_usize()])
                    .min()
                    .expect("cycle has at least one arc");
                for &c in path[cycle_start..].iter().chain([&cid]) {
                    channel_flow[c.to_usize()] -= delta;
                }
                continue 'extract;
            }
            path.push(cid);
            visited[next.to_usize()] = Some(path.len());
            node = next;
        }

        if path.is_empty() {
            return attempts;
        }
        let amount_sat = path
            .iter()
            .map(|&c| channel_flow[c.to_usize()])
            .min()
            .expect("non-empty path");
        for &c in &path {
            channel_flow[c.to_usize()] -= amount_sat;
        }
        let probability = uncertainty.path_probability(&path, amount_sat);
        let fee = uncertainty.path_fee(&path, amount_sat);
        attempts.push(Attempt::new(path, amount_sat, probability, fee));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{ChannelGraph, ChannelRecord};
    use crate::payments::AttemptStatus;

    fn record(
        source: &str,
        destination: &str,
        scid: &str,
        satoshis: u64,
        ppm: u64,
    ) -> ChannelRecord {
        ChannelRecord {
            source: source.to_owned(),
            destination: destination.to_owned(),
            short_channel_id: scid.to_owned(),
            satoshis,
            base_fee_millisatoshi: 0,
            fee_per_millionth: ppm,
        }
    }

    fn bidirectional(
        a: &str,
        b: &str,
        scid: &str,
        satoshis: u64,
        ppm: u64,
    ) -> [ChannelRecord; 2] {
        [
            record(a, b, scid, satoshis, ppm),
            record(b, a, scid, satoshis, ppm),
        ]
    }

    fn plan(
        uncertainty: &UncertaintyNetwork,
        sender: &str,
        receiver: &str,
        amount_sat: u64,
        mu: u64,
    ) -> Result<Vec<Attempt>, FlowError> {
        let graph = uncertainty.graph();
        plan_attempts(
            uncertainty,
            graph.node_id(sender).unwrap(),
            graph.node_id(receiver).unwrap(),
            amount_sat,
            mu,
            0,
        )
    }

    #[test]
    fn single_channel_single_attempt() {
        let graph = ChannelGraph::from_records(
            bidirectional("a", "b", "1x1x1", 1_000_000, 100).to_vec(),
            None,
        )
        .unwrap();
        let uncertainty = UncertaintyNetwork::new(graph);

        let attempts = plan(&uncertainty, "a", "b", 50_000, 1000).unwrap();
        assert_eq!(attempts.len(), 1);
        let attempt = &attempts[0];
        assert_eq!(attempt.amount_sat(), 50_000);
        assert_eq!(attempt.path_length(), 1);
        assert_eq!(attempt.status(), AttemptStatus::Planned);
        // 50_000 sat * 100 ppm = 5 sat
        assert_eq!(attempt.routing_fee().sats_floor(), 5);
        // (1_000_000 - 50_000 + 1) / (1_000_000 + 1)
        assert!((attempt.probability() - 0.95).abs() < 1e-3);
    }

    #[test]
    fn splits_across_parallel_paths_when_one_is_too_small() {
        let mut records = Vec::new();
        records.extend(bidirectional("a", "b", "1x1x1", 30_000, 10));
        records.extend(bidirectional("a", "c", "2x2x2", 30_000, 10));
        records.extend(bidirectional("c", "b", "3x3x3", 30_000, 10));
        let graph = ChannelGraph::from_records(records, None).unwrap();
        let uncertainty = UncertaintyNetwork::new(graph);

        let attempts = plan(&uncertainty, "a", "b", 50_000, 0).unwrap();
        assert_eq!(attempts.len(), 2);
        let total: u64 = attempts.iter().map(Attempt::amount_sat).sum();
        assert_eq!(total, 50_000);
        for attempt in &attempts {
            assert!(attempt.amount_sat() <= 30_000);
        }
        // attempts come out in scid-lexicographic order of the first hop
        assert_eq!(attempts[0].path_length(), 1);
        assert_eq!(attempts[1].path_length(), 2);
    }

    #[test]
    fn amount_spanning_multiple_pieces_stays_one_attempt() {
        let graph = ChannelGraph::from_records(
            bidirectional("a", "b", "1x1x1", 100_000, 0).to_vec(),
            None,
        )
        .unwrap();
        let uncertainty = UncertaintyNetwork::new(graph);

        // 70_000 sat spans four of the five 20_000-sat-wide pieces, but
        // the decomposition aggregates per channel.
        let attempts = plan(&uncertainty, "a", "b", 70_000, 0).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].amount_sat(), 70_000);
    }

    #[test]
    fn infeasible_when_beliefs_rule_out_the_amount() {
        let graph = ChannelGraph::from_records(
            bidirectional("a", "b", "1x1x1", 1_000_000, 0).to_vec(),
            None,
        )
        .unwrap();
        let mut uncertainty = UncertaintyNetwork::new(graph.clone());

        let a = graph.node_id("a").unwrap();
        let b = graph.node_id("b").unwrap();
        let ab = graph.find_channel(a, b, &"1x1x1".into()).unwrap();
        uncertainty.channel_mut(ab).learn_from_failure_at(30_000);

        let err = plan(&uncertainty, "a", "b", 30_000, 0).unwrap_err();
        assert!(matches!(err, FlowError::Infeasible { .. }));
    }

    #[test]
    fn pruning_drops_hopeless_liquidity_ranges() {
        let graph = ChannelGraph::from_records(
            bidirectional("a", "b", "1x1x1", 10_000_000, 0).to_vec(),
            None,
        )
        .unwrap();

        // The top linearization piece of a fully-uncertain 10M-sat channel
        // has a success probability below the pruning floor.
        let mut uncertainty = UncertaintyNetwork::new(graph);
        uncertainty.set_prune(true);
        let err = plan(&uncertainty, "a", "b", 9_000_000, 0).unwrap_err();
        assert!(matches!(err, FlowError::Infeasible { .. }));

        uncertainty.set_prune(false);
        let attempts = plan(&uncertainty, "a", "b", 9_000_000, 0).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].amount_sat(), 9_000_000);
    }

    #[test]
    fn base_fee_threshold_excludes_channels_from_planning() {
        let mut records = Vec::new();
        for mut r in bidirectional("a", "b", "1x1x1", 1_000_000, 0) {
            r.base_fee_millisatoshi = 500;
            records.push(r);
        }
        let graph = ChannelGraph::from_records(records, None).unwrap();
        let uncertainty = UncertaintyNetwork::new(graph.clone());

        let a = graph.node_id("a").unwrap();
        let b = graph.node_id("b").unwrap();
        let err =
            plan_attempts(&uncertainty, a, b, 10_000, 0, 0).unwrap_err();
        assert!(matches!(err, FlowError::Infeasible { .. }));

        let attempts =
            plan_attempts(&uncertainty, a, b, 10_000, 0, 500).unwrap();
        assert_eq!(attempts.len(), 1);
    }

    #[test]
    fn respects_in_flight_reservations() {
        let graph = ChannelGraph::from_records(
            bidirectional("a", "b", "1x1x1", 100_000, 0).to_vec(),
            None,
        )
        .unwrap();
        let mut uncertainty = UncertaintyNetwork::new(graph.clone());

        let a = graph.node_id("a").unwrap();
        let b = graph.node_id("b").unwrap();
        let ab = graph.find_channel(a, b, &"1x1x1".into()).unwrap();
        uncertainty.channel_mut(ab).allocate(80_000).unwrap();

        // only 20_000 of effective capacity is left
        let err = plan(&uncertainty, "a", "b", 30_000, 0).unwrap_err();
        assert!(matches!(err, FlowError::Infeasible { .. }));
        let attempts = plan(&uncertainty, "a", "b", 20_000, 0).unwrap();
        assert_eq!(attempts.len(), 1);
    }

    #[test]
    fn mu_steers_the_split_towards_cheap_channels() {
        // Two parallel routes: an expensive direct channel and a free
        // two-hop detour with the same capacities.
        let mut records = Vec::new();
        records.extend(bidirectional("a", "b", "1x1x1", 200_000, 5_000));
        records.extend(bidirectional("a", "c", "2x2x2", 200_000, 0));
        records.extend(bidirectional("c", "b", "3x3x3", 200_000, 0));
        let graph = ChannelGraph::from_records(records, None).unwrap();
        let uncertainty = UncertaintyNetwork::new(graph);

        // With mu = 0 only uncertainty matters: the single-hop route is
        // strictly less uncertain, so it carries flow.
        let attempts = plan(&uncertainty, "a", "b", 50_000, 0).unwrap();
        assert!(attempts.iter().any(|a| a.path_length() == 1));

        // With a large mu the 5000 ppm direct channel is avoided.
        let attempts = plan(&uncertainty, "a", "b", 50_000, 1000).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].path_length(), 2);
        assert_eq!(attempts[0].routing_fee().sats_floor(), 0);
    }
}
