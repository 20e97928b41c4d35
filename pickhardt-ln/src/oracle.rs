//! Ground-truth liquidity and onion probing.
//!
//! The oracle network knows every channel's true spendable balance. The
//! engine never reads those balances directly while planning; it only
//! learns about them through [`OracleNetwork::send_onion`] outcomes.

use std::sync::Arc;

use common::rng::{sample_inclusive, WeakRng};
use tracing::debug;

use crate::channel::ChannelId;
use crate::graph::ChannelGraph;
use crate::uncertainty::LiquidityError;

/// The ground truth for one channel direction.
#[derive(Clone, Debug)]
pub struct OracleChannel {
    capacity_sat: u64,
    actual_liquidity_sat: u64,
    in_flight_sat: u64,
}

impl OracleChannel {
    pub fn capacity_sat(&self) -> u64 {
        self.capacity_sat
    }

    pub fn actual_liquidity_sat(&self) -> u64 {
        self.actual_liquidity_sat
    }

    pub fn in_flight_sat(&self) -> u64 {
        self.in_flight_sat
    }

    /// What the channel can still accept on top of current reservations.
    fn spendable_sat(&self) -> u64 {
        self.actual_liquidity_sat - self.in_flight_sat
    }
}

/// The outcome of probing a path against the oracle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SendOnionResult {
    /// Every hop had enough spendable liquidity; the amount is now
    /// reserved on every hop until the attempt settles or is abandoned.
    Accepted,
    /// The hop at this path index could not carry the amount. No
    /// reservations remain from this call.
    RejectedAt(usize),
}

/// The directed multigraph of ground-truth balances, one [`OracleChannel`]
/// per advertised channel direction.
#[derive(Debug)]
pub struct OracleNetwork {
    graph: Arc<ChannelGraph>,
    channels: Vec<OracleChannel>,
}

impl OracleNetwork {
    /// Sample ground truth: for each channel pair, the send-direction
    /// balance is uniform over `[0, capacity]` and the return direction
    /// holds the complement.
    pub fn sample(graph: Arc<ChannelGraph>, rng: &mut impl WeakRng) -> Self {
        Self::build(graph, |capacity| sample_inclusive(rng, capacity))
    }

    /// Ground truth with every channel fully balanced: each direction
    /// holds half the capacity (the canonical direction gets the rounding
    /// remainder).
    pub fn balanced(graph: Arc<ChannelGraph>) -> Self {
        Self::build(graph, |capacity| capacity - capacity / 2)
    }

    /// Build the network, assigning each channel pair's send-direction
    /// balance by calling `assign` on the lower-indexed direction.
    fn build(
        graph: Arc<ChannelGraph>,
        mut assign: impl FnMut(u64) -> u64,
    ) -> Self {
        let mut channels: Vec<OracleChannel> = graph
            .channels()
            .map(|(_, channel)| OracleChannel {
                capacity_sat: channel.capacity_sat,
                actual_liquidity_sat: 0,
                in_flight_sat: 0,
            })
            .collect();

        // Visit each pair once, through its lower-indexed direction.
        for (cid, _) in graph.channels() {
            let reverse = graph.counterpart(cid);
            if reverse < cid {
                continue;
            }
            let capacity = channels[cid.to_usize()].capacity_sat;
            let liquidity = assign(capacity);
            debug_assert!(liquidity <= capacity);
            channels[cid.to_usize()].actual_liquidity_sat = liquidity;
            channels[reverse.to_usize()].actual_liquidity_sat =
                capacity - liquidity;
        }

        Self { graph, channels }
    }

    pub fn graph(&self) -> &Arc<ChannelGraph> {
        &self.graph
    }

    pub fn channel(&self, cid: ChannelId) -> &OracleChannel {
        &self.channels[cid.to_usize()]
    }

    /// Pin the true spendable balance of `cid` to `liquidity_sat`; the
    /// return channel receives the complement. Panics while reservations
    /// are outstanding on either direction.
    pub fn set_liquidity(&mut self, cid: ChannelId, liquidity_sat: u64) {
        let reverse = self.graph.counterpart(cid);
        let capacity = self.channels[cid.to_usize()].capacity_sat;
        assert!(liquidity_sat <= capacity);
        assert_eq!(self.channels[cid.to_usize()].in_flight_sat, 0);
        assert_eq!(self.channels[reverse.to_usize()].in_flight_sat, 0);
        self.channels[cid.to_usize()].actual_liquidity_sat = liquidity_sat;
        self.channels[reverse.to_usize()].actual_liquidity_sat =
            capacity - liquidity_sat;
    }

    /// Probe a path with `amount_sat`. Reserves hop by hop; a rejection
    /// unwinds every reservation made by this call, so a rejected onion
    /// leaves the oracle exactly as it found it.
    pub fn send_onion(
        &mut self,
        path: &[ChannelId],
        amount_sat: u64,
    ) -> SendOnionResult {
        for (i, &cid) in path.iter().enumerate() {
            let spendable = self.channels[cid.to_usize()].spendable_sat();
            if amount_sat > spendable {
                debug!(
                    "Onion rejected at hop {i} ({}): {amount_sat} sat > \
                     {spendable} sat spendable",
                    self.graph.channel(cid).scid,
                );
                for &done in &path[..i] {
                    self.channels[done.to_usize()].in_flight_sat -=
                        amount_sat;
                }
                return SendOnionResult::RejectedAt(i);
            }
            self.channels[cid.to_usize()].in_flight_sat += amount_sat;
        }
        SendOnionResult::Accepted
    }

    /// Settle an accepted attempt: on every hop, release the reservation
    /// and move `amount_sat` across to the return direction.
    pub fn settle_attempt(
        &mut self,
        path: &[ChannelId],
        amount_sat: u64,
    ) -> Result<(), LiquidityError> {
        for &cid in path {
            let channel = &mut self.channels[cid.to_usize()];
            if amount_sat > channel.in_flight_sat {
                return Err(LiquidityError::OverRelease {
                    amount_sat,
                    in_flight_sat: channel.in_flight_sat,
                });
            }
            channel.in_flight_sat -= amount_sat;
            channel.actual_liquidity_sat -= amount_sat;
            let reverse = self.graph.counterpart(cid);
            self.channels[reverse.to_usize()].actual_liquidity_sat +=
                amount_sat;
        }
        Ok(())
    }

    /// Unwind the reservations of an accepted attempt that will never
    /// settle.
    pub fn release_attempt(
        &mut self,
        path: &[ChannelId],
        amount_sat: u64,
    ) -> Result<(), LiquidityError> {
        for &cid in path {
            let channel = &mut self.channels[cid.to_usize()];
            if amount_sat > channel.in_flight_sat {
                return Err(LiquidityError::OverRelease {
                    amount_sat,
                    in_flight_sat: channel.in_flight_sat,
                });
            }
            channel.in_flight_sat -= amount_sat;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use proptest::{prop_assert_eq, proptest};

    use super::*;
    use crate::graph::ChannelRecord;

    fn record(
        source: &str,
        destination: &str,
        scid: &str,
        satoshis: u64,
    ) -> ChannelRecord {
        ChannelRecord {
            source: source.to_owned(),
            destination: destination.to_owned(),
            short_channel_id: scid.to_owned(),
            satoshis,
            base_fee_millisatoshi: 0,
            fee_per_millionth: 10,
        }
    }

    fn two_hop_graph() -> Arc<ChannelGraph> {
        ChannelGraph::from_records(
            vec![
                record("a", "b", "1x1x1", 100_000),
                record("b", "a", "1x1x1", 100_000),
                record("b", "c", "2x2x2", 50_000),
                record("c", "b", "2x2x2", 50_000),
            ],
            None,
        )
        .unwrap()
    }

    fn channel(
        graph: &ChannelGraph,
        src: &str,
        dest: &str,
        scid: &str,
    ) -> ChannelId {
        let src = graph.node_id(src).unwrap();
        let dest = graph.node_id(dest).unwrap();
        graph.find_channel(src, dest, &scid.into()).unwrap()
    }

    #[test]
    fn sampling_preserves_conservation() {
        proptest!(|(rng: common::rng::SmallRng)| {
            let mut rng = rng;
            let graph = two_hop_graph();
            let oracle = OracleNetwork::sample(graph.clone(), &mut rng);
            for (cid, _) in graph.channels() {
                let reverse = graph.counterpart(cid);
                prop_assert_eq!(
                    oracle.channel(cid).actual_liquidity_sat()
                        + oracle.channel(reverse).actual_liquidity_sat(),
                    oracle.channel(cid).capacity_sat(),
                );
            }
        })
    }

    #[test]
    fn onion_rejected_at_first_underfunded_hop() {
        let graph = two_hop_graph();
        let mut oracle = OracleNetwork::balanced(graph.clone());
        let ab = channel(&graph, "a", "b", "1x1x1");
        let bc = channel(&graph, "b", "c", "2x2x2");
        oracle.set_liquidity(ab, 100_000);
        oracle.set_liquidity(bc, 10_000);

        let path = vec![ab, bc];
        assert_eq!(
            oracle.send_onion(&path, 20_000),
            SendOnionResult::RejectedAt(1),
        );
        // the rejection unwound the reservation made on the first hop
        assert_eq!(oracle.channel(ab).in_flight_sat(), 0);
        assert_eq!(oracle.channel(bc).in_flight_sat(), 0);

        assert_eq!(
            oracle.send_onion(&path, 10_000),
            SendOnionResult::Accepted,
        );
        assert_eq!(oracle.channel(ab).in_flight_sat(), 10_000);
        assert_eq!(oracle.channel(bc).in_flight_sat(), 10_000);
    }

    #[test]
    fn reservations_count_against_spendable() {
        let graph = two_hop_graph();
        let mut oracle = OracleNetwork::balanced(graph.clone());
        let ab = channel(&graph, "a", "b", "1x1x1");
        oracle.set_liquidity(ab, 60_000);

        let path = vec![ab];
        assert_eq!(
            oracle.send_onion(&path, 40_000),
            SendOnionResult::Accepted,
        );
        // 20_000 spendable left
        assert_eq!(
            oracle.send_onion(&path, 30_000),
            SendOnionResult::RejectedAt(0),
        );
        assert_eq!(
            oracle.send_onion(&path, 20_000),
            SendOnionResult::Accepted,
        );
    }

    #[test]
    fn settlement_moves_balance_and_preserves_conservation() {
        let graph = two_hop_graph();
        let mut oracle = OracleNetwork::balanced(graph.clone());
        let ab = channel(&graph, "a", "b", "1x1x1");
        let ba = graph.counterpart(ab);
        oracle.set_liquidity(ab, 80_000);

        let path = vec![ab];
        assert_eq!(
            oracle.send_onion(&path, 30_000),
            SendOnionResult::Accepted,
        );
        oracle.settle_attempt(&path, 30_000).unwrap();

        assert_eq!(oracle.channel(ab).actual_liquidity_sat(), 50_000);
        assert_eq!(oracle.channel(ba).actual_liquidity_sat(), 50_000);
        assert_eq!(oracle.channel(ab).in_flight_sat(), 0);
        assert_eq!(
            oracle.channel(ab).actual_liquidity_sat()
                + oracle.channel(ba).actual_liquidity_sat(),
            100_000,
        );
    }

    #[test]
    fn release_unwinds_without_moving_balance() {
        let graph = two_hop_graph();
        let mut oracle = OracleNetwork::balanced(graph.clone());
        let ab = channel(&graph, "a", "b", "1x1x1");
        oracle.set_liquidity(ab, 80_000);

        let path = vec![ab];
        assert_eq!(
            oracle.send_onion(&path, 30_000),
            SendOnionResult::Accepted,
        );
        oracle.release_attempt(&path, 30_000).unwrap();
        assert_eq!(oracle.channel(ab).actual_liquidity_sat(), 80_000);
        assert_eq!(oracle.channel(ab).in_flight_sat(), 0);

        // over-release is a bug, not an observation
        assert!(oracle.release_attempt(&path, 1).is_err());
    }
}
