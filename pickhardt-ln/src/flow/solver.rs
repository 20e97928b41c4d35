//! An integer min-cost-flow solver.
//!
//! Successive shortest paths with node potentials: every augmentation runs
//! a Dijkstra over reduced costs (non-negative by the potential invariant)
//! and pushes the path's bottleneck. The planner only needs per-arc flows
//! for a fixed required flow value, so that is all the interface exposes;
//! any solver producing optimal integral flows could be swapped in.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Errors from solving a flow instance.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FlowError {
    #[error(
        "no feasible flow of {required_sat} sat \
         (at most {delivered_sat} sat can be routed)"
    )]
    Infeasible {
        required_sat: u64,
        delivered_sat: u64,
    },
}

/// Handle to an arc added to a [`MinCostFlow`] instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ArcId(usize);

struct FlowArc {
    to: u32,
    /// Remaining residual capacity.
    cap: u64,
    cost: i64,
}

/// One min-cost-flow instance. Build with [`add_arc`], run [`solve`] once,
/// then read per-arc flows with [`flow`].
///
/// [`add_arc`]: Self::add_arc
/// [`solve`]: Self::solve
/// [`flow`]: Self::flow
pub struct MinCostFlow {
    /// Forward and backward arcs interleaved: arc `2i` is the i-th added
    /// arc, arc `2i ^ 1` its residual reverse.
    arcs: Vec<FlowArc>,
    adjacency: Vec<Vec<u32>>,
}

impl MinCostFlow {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            arcs: Vec::new(),
            adjacency: vec![Vec::new(); num_nodes],
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.adjacency.len()
    }

    /// Add a directed arc with the given capacity and non-negative
    /// per-unit cost.
    pub fn add_arc(
        &mut self,
        from: usize,
        to: usize,
        cap: u64,
        cost: i64,
    ) -> ArcId {
        debug_assert!(from < self.num_nodes());
        debug_assert!(to < self.num_nodes());
        debug_assert!(cost >= 0);
        let id = self.arcs.len();
        self.adjacency[from].push(id as u32);
        self.arcs.push(FlowArc {
            to: to as u32,
            cap,
            cost,
        });
        self.adjacency[to].push((id + 1) as u32);
        self.arcs.push(FlowArc {
            to: from as u32,
            cap: 0,
            cost: -cost,
        });
        ArcId(id)
    }

    /// The flow pushed through a forward arc by [`solve`].
    ///
    /// [`solve`]: Self::solve
    pub fn flow(&self, arc: ArcId) -> u64 {
        // flow accumulates as residual capacity on the reverse arc
        self.arcs[arc.0 ^ 1].cap
    }

    /// Route exactly `required` units from `source` to `sink` at minimum
    /// total cost.
    pub fn solve(
        &mut self,
        source: usize,
        sink: usize,
        required: u64,
    ) -> Result<(), FlowError> {
        let num_nodes = self.num_nodes();
        let mut potential = vec![0i64; num_nodes];
        let mut distance = vec![i64::MAX; num_nodes];
        let mut incoming_arc = vec![u32::MAX; num_nodes];
        let mut sent = 0u64;

        while sent < required {
            // Dijkstra over reduced costs.
            distance.fill(i64::MAX);
            incoming_arc.fill(u32::MAX);
            distance[source] = 0;
            let mut heap = BinaryHeap::new();
            heap.push(Reverse((0i64, source as u32)));
            while let Some(Reverse((dist, node))) = heap.pop() {
                let node_us = node as usize;
                if dist > distance[node_us] {
                    continue;
                }
                for &arc_id in &self.adjacency[node_us] {
                    let arc = &self.arcs[arc_id as usize];
                    if arc.cap == 0 {
                        continue;
                    }
                    let to = arc.to as usize;
                    let next_dist = dist + arc.cost + potential[node_us]
                        - potential[to];
                    debug_assert!(next_dist >= dist);
                    if next_dist < distance[to] {
                        distance[to] = next_dist;
                        incoming_arc[to] = arc_id;
                        heap.push(Reverse((next_dist, arc.to)));
                    }
                }
            }

            if distance[sink] == i64::MAX {
                return Err(FlowError::Infeasible {
                    required_sat: required,
                    delivered_sat: sent,
                });
            }

            // Clamping unreachable nodes to the sink distance keeps
            // reduced costs non-negative on the next iteration.
            let sink_distance = distance[sink];
            for node in 0..num_nodes {
                potential[node] += distance[node].min(sink_distance);
            }

            // Find the bottleneck along the shortest path, then push it.
            let mut bottleneck = required - sent;
            let mut node = sink;
            while node != source {
                let arc_id = incoming_arc[node] as usize;
                bottleneck = bottleneck.min(self.arcs[arc_id].cap);
                node = self.arcs[arc_id ^ 1].to as usize;
            }
            let mut node = sink;
            while node != source {
                let arc_id = incoming_arc[node] as usize;
                self.arcs[arc_id].cap -= bottleneck;
                self.arcs[arc_id ^ 1].cap += bottleneck;
                node = self.arcs[arc_id ^ 1].to as usize;
            }
            sent += bottleneck;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_arc() {
        let mut mcf = MinCostFlow::new(2);
        let arc = mcf.add_arc(0, 1, 100, 5);
        mcf.solve(0, 1, 60).unwrap();
        assert_eq!(mcf.flow(arc), 60);
    }

    #[test]
    fn prefers_cheaper_parallel_arc() {
        let mut mcf = MinCostFlow::new(2);
        let expensive = mcf.add_arc(0, 1, 100, 10);
        let cheap = mcf.add_arc(0, 1, 100, 1);
        mcf.solve(0, 1, 150).unwrap();
        assert_eq!(mcf.flow(cheap), 100);
        assert_eq!(mcf.flow(expensive), 50);
    }

    #[test]
    fn routes_around_saturated_path() {
        // 0 -> 1 -> 3 is cheap but thin; 0 -> 2 -> 3 picks up the rest.
        let mut mcf = MinCostFlow::new(4);
        let a = mcf.add_arc(0, 1, 10, 1);
        let b = mcf.add_arc(1, 3, 10, 1);
        let c = mcf.add_arc(0, 2, 100, 3);
        let d = mcf.add_arc(2, 3, 100, 3);
        mcf.solve(0, 3, 50).unwrap();
        assert_eq!(mcf.flow(a), 10);
        assert_eq!(mcf.flow(b), 10);
        assert_eq!(mcf.flow(c), 40);
        assert_eq!(mcf.flow(d), 40);
    }

    #[test]
    fn reroutes_through_residual_arcs() {
        // The first augmentation takes s->a->b->t; the second must cancel
        // the a->b flow through its residual reverse arc to reach the
        // optimum of s->a->t plus s->b->t.
        let mut mcf = MinCostFlow::new(4);
        let s_a = mcf.add_arc(0, 1, 1, 1);
        let s_b = mcf.add_arc(0, 2, 1, 10);
        let a_b = mcf.add_arc(1, 2, 1, 1);
        let a_t = mcf.add_arc(1, 3, 1, 10);
        let b_t = mcf.add_arc(2, 3, 1, 1);
        mcf.solve(0, 3, 2).unwrap();
        assert_eq!(mcf.flow(s_a), 1);
        assert_eq!(mcf.flow(s_b), 1);
        assert_eq!(mcf.flow(a_b), 0);
        assert_eq!(mcf.flow(a_t), 1);
        assert_eq!(mcf.flow(b_t), 1);
    }

    #[test]
    fn infeasible_reports_deliverable_amount() {
        let mut mcf = MinCostFlow::new(3);
        mcf.add_arc(0, 1, 30, 1);
        mcf.add_arc(1, 2, 20, 1);
        let err = mcf.solve(0, 2, 50).unwrap_err();
        assert_eq!(
            err,
            FlowError::Infeasible {
                required_sat: 50,
                delivered_sat: 20,
            },
        );
    }

    #[test]
    fn disconnected_sink_is_infeasible() {
        let mut mcf = MinCostFlow::new(3);
        mcf.add_arc(0, 1, 10, 1);
        let err = mcf.solve(0, 2, 1).unwrap_err();
        assert_eq!(
            err,
            FlowError::Infeasible {
                required_sat: 1,
                delivered_sat: 0,
            },
        );
    }

    #[test]
    fn zero_required_flow_is_trivially_feasible() {
        let mut mcf = MinCostFlow::new(2);
        let arc = mcf.add_arc(0, 1, 10, 1);
        mcf.solve(0, 1, 0).unwrap();
        assert_eq!(mcf.flow(arc), 0);
    }

    #[test]
    fn convex_parallel_arcs_fill_in_cost_order() {
        // Piecewise-linearized channels become parallel arcs with
        // non-decreasing costs; the solver must fill them cheapest-first.
        let mut mcf = MinCostFlow::new(2);
        let p0 = mcf.add_arc(0, 1, 50, 1);
        let p1 = mcf.add_arc(0, 1, 50, 4);
        let p2 = mcf.add_arc(0, 1, 50, 9);
        mcf.solve(0, 1, 120).unwrap();
        assert_eq!(mcf.flow(p0), 50);
        assert_eq!(mcf.flow(p1), 50);
        assert_eq!(mcf.flow(p2), 20);
    }
}
