//! Single-path shortest-path baseline.
//!
//! The classic alternative to flow-based splitting: pick one path under a
//! per-edge weight and push the whole amount down it.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::channel::{Channel, ChannelId, NodeId};
use crate::graph::ChannelGraph;

/// The edge weight minimized by [`shortest_path`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[derive(strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RouteCriterion {
    /// Total routing fee: `ppm * amount + base_fee`.
    Fee,
    /// Failure surprisal under full uncertainty:
    /// `-ln(1 - amount / capacity)`.
    Probability,
    /// The sum of both weights.
    Mixed,
}

impl RouteCriterion {
    fn weight(self, channel: &Channel, amount_sat: u64) -> f64 {
        match self {
            Self::Fee => Self::fee_weight(channel, amount_sat),
            Self::Probability =>
                Self::probability_weight(channel, amount_sat),
            Self::Mixed =>
                Self::fee_weight(channel, amount_sat)
                    + Self::probability_weight(channel, amount_sat),
        }
    }

    fn fee_weight(channel: &Channel, amount_sat: u64) -> f64 {
        channel.fee_for(amount_sat).msat() as f64
    }

    fn probability_weight(channel: &Channel, amount_sat: u64) -> f64 {
        // capacity > amount is checked before weighing
        -(1.0 - amount_sat as f64 / channel.capacity_sat as f64).ln()
    }
}

/// An `f64` weight with a total order, for the Dijkstra heap.
#[derive(Copy, Clone, Debug, PartialEq)]
struct Weight(f64);

impl Eq for Weight {}

impl PartialOrd for Weight {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Weight {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Find the minimum-weight `sender`→`receiver` path able to carry
/// `amount_sat`. Channels with `capacity <= amount` are excluded. Returns
/// `None` when no such path exists.
pub fn shortest_path(
    graph: &ChannelGraph,
    sender: NodeId,
    receiver: NodeId,
    amount_sat: u64,
    criterion: RouteCriterion,
) -> Option<Vec<ChannelId>> {
    let num_nodes = graph.num_nodes();
    let mut distance = vec![f64::INFINITY; num_nodes];
    let mut incoming: Vec<Option<ChannelId>> = vec![None; num_nodes];
    distance[sender.to_usize()] = 0.0;

    let mut heap = BinaryHeap::new();
    heap.push(Reverse((Weight(0.0), sender)));
    while let Some(Reverse((Weight(dist), node))) = heap.pop() {
        if dist > distance[node.to_usize()] {
            continue;
        }
        if node == receiver {
            break;
        }
        for &cid in graph.outgoing(node) {
            let channel = graph.channel(cid);
            if channel.capacity_sat <= amount_sat {
                continue;
            }
            let next_dist = dist + criterion.weight(channel, amount_sat);
            if next_dist < distance[channel.dest.to_usize()] {
                distance[channel.dest.to_usize()] = next_dist;
                incoming[channel.dest.to_usize()] = Some(cid);
                heap.push(Reverse((Weight(next_dist), channel.dest)));
            }
        }
    }

    if distance[receiver.to_usize()].is_infinite() {
        return None;
    }

    let mut path = Vec::new();
    let mut node = receiver;
    while node != sender {
        let cid = incoming[node.to_usize()]?;
        path.push(cid);
        node = graph.channel(cid).src;
    }
    path.reverse();
    Some(path)
}
