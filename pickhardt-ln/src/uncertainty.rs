//! Liquidity beliefs and their piecewise-linear costs.
//!
//! For every directed channel the engine maintains an inclusive posterior
//! `[min_liquidity, max_liquidity]` over the channel's true spendable
//! balance, plus the amount currently reserved by in-flight attempts.
//! Probes against the oracle narrow the interval: an accepted hop raises
//! the lower bound, a rejected hop lowers the upper bound.

use std::sync::Arc;

use common::ln::Amount;
use tracing::trace;

use crate::channel::ChannelId;
use crate::graph::ChannelGraph;

/// Misuse of the in-flight bookkeeping. This is a programming bug in the
/// caller, not an observation; it aborts the payment.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum LiquidityError {
    #[error(
        "allocating {amount_sat} sat exceeds the spendable range of \
         {available_sat} sat"
    )]
    OverAllocate { amount_sat: u64, available_sat: u64 },
    #[error(
        "releasing {amount_sat} sat exceeds the in-flight total of \
         {in_flight_sat} sat"
    )]
    OverRelease { amount_sat: u64, in_flight_sat: u64 },
}

/// One linear piece of a channel's convexified uncertainty cost.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearPiece {
    /// Flow capacity of this piece in satoshis.
    pub width: u64,
    /// Uncertainty cost per satoshi of flow (natural log units). Monotone
    /// non-decreasing across a channel's pieces.
    pub cost_per_unit: f64,
    /// Success probability at the right endpoint of this piece.
    pub success_probability: f64,
}

/// The per-direction liquidity belief for a single channel.
#[derive(Clone, Debug)]
pub struct UncertaintyChannel {
    capacity_sat: u64,
    min_liquidity: u64,
    max_liquidity: u64,
    in_flight: u64,
}

impl UncertaintyChannel {
    fn new(capacity_sat: u64) -> Self {
        Self {
            capacity_sat,
            min_liquidity: 0,
            max_liquidity: capacity_sat,
            in_flight: 0,
        }
    }

    pub fn capacity_sat(&self) -> u64 {
        self.capacity_sat
    }

    pub fn min_liquidity(&self) -> u64 {
        self.min_liquidity
    }

    pub fn max_liquidity(&self) -> u64 {
        self.max_liquidity
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight
    }

    /// The most this channel could still carry on top of its current
    /// in-flight reservations, if the optimistic bound is right.
    pub fn effective_capacity(&self) -> u64 {
        self.max_liquidity.saturating_sub(self.in_flight)
    }

    /// The probability that this channel can carry `amount_sat` more
    /// satoshis, assuming its true spendable balance is uniformly
    /// distributed over `[min_liquidity, max_liquidity]`.
    ///
    /// Monotone non-increasing in `amount_sat`.
    pub fn probability(&self, amount_sat: u64) -> f64 {
        let needed = amount_sat.saturating_add(self.in_flight);
        if needed <= self.min_liquidity {
            1.0
        } else if needed > self.max_liquidity {
            0.0
        } else {
            // (max - in_flight - amount + 1) / (max - min + 1), computed
            // without the +1 overflowing.
            let favorable = (self.max_liquidity - needed) as f64 + 1.0;
            let range =
                (self.max_liquidity - self.min_liquidity) as f64 + 1.0;
            favorable / range
        }
    }

    /// An accepted hop proves the channel held the attempt amount on top
    /// of everything already in flight.
    pub fn learn_from_success_on(&mut self, amount_sat: u64) {
        let observed = amount_sat.saturating_add(self.in_flight);
        let new_min = self.min_liquidity.max(observed);
        debug_assert!(new_min <= self.max_liquidity);
        self.min_liquidity = new_min.min(self.max_liquidity);
    }

    /// A rejected hop proves the channel could not carry the attempt
    /// amount on top of everything already in flight.
    pub fn learn_from_failure_at(&mut self, amount_sat: u64) {
        let observed =
            amount_sat.saturating_add(self.in_flight).saturating_sub(1);
        let new_max = self.max_liquidity.min(observed);
        debug_assert!(new_max >= self.min_liquidity);
        self.max_liquidity = new_max.max(self.min_liquidity);
    }

    /// Reserve `amount_sat` for an attempt about to be probed.
    pub fn allocate(&mut self, amount_sat: u64) -> Result<(), LiquidityError> {
        let available = self.effective_capacity();
        if amount_sat > available {
            return Err(LiquidityError::OverAllocate {
                amount_sat,
                available_sat: available,
            });
        }
        self.in_flight += amount_sat;
        Ok(())
    }

    /// Return `amount_sat` of a reservation that failed or was abandoned.
    pub fn release(&mut self, amount_sat: u64) -> Result<(), LiquidityError> {
        if amount_sat > self.in_flight {
            return Err(LiquidityError::OverRelease {
                amount_sat,
                in_flight_sat: self.in_flight,
            });
        }
        self.in_flight -= amount_sat;
        Ok(())
    }

    /// Shift the belief after this channel forwarded `amount_sat` for a
    /// settled attempt: the spendable balance dropped by that amount.
    fn settle_outbound(&mut self, amount_sat: u64) {
        debug_assert!(self.max_liquidity >= amount_sat);
        self.max_liquidity = self.max_liquidity.saturating_sub(amount_sat);
        self.min_liquidity =
            self.min_liquidity.max(amount_sat) - amount_sat;
    }

    /// Shift the belief after the return channel received `amount_sat`
    /// from a settled attempt on this channel's counterpart.
    fn settle_inbound(&mut self, amount_sat: u64) {
        self.min_liquidity =
            (self.min_liquidity + amount_sat).min(self.capacity_sat);
        self.max_liquidity =
            (self.max_liquidity + amount_sat).min(self.capacity_sat);
    }

    fn reset(&mut self) {
        self.min_liquidity = 0;
        self.max_liquidity = self.capacity_sat;
        self.in_flight = 0;
    }

    /// Approximate the convex uncertainty cost `-ln P(x)` over
    /// `x ∈ [0, effective_capacity]` with up to `n_pieces` equal-width
    /// linear pieces (the last one truncated). Slopes are the secants of
    /// `-ln P` between piece endpoints, so they are monotone non-decreasing
    /// by convexity.
    pub fn linearize(&self, n_pieces: usize) -> Vec<LinearPiece> {
        let ecap = self.effective_capacity();
        if ecap == 0 || n_pieces == 0 {
            return Vec::new();
        }
        let width = ecap.div_ceil(n_pieces as u64);

        let mut pieces = Vec::with_capacity(n_pieces);
        let mut start = 0u64;
        let mut cost_at_start = -self.probability(0).ln();
        while start < ecap {
            let end = (start + width).min(ecap);
            let success_probability = self.probability(end);
            // end <= ecap guarantees P(end) > 0
            let cost_at_end = -success_probability.ln();
            pieces.push(LinearPiece {
                width: end - start,
                cost_per_unit: (cost_at_end - cost_at_start)
                    / (end - start) as f64,
                success_probability,
            });
            cost_at_start = cost_at_end;
            start = end;
        }
        pieces
    }
}

/// The directed multigraph of liquidity beliefs, one
/// [`UncertaintyChannel`] per advertised channel direction.
#[derive(Debug)]
pub struct UncertaintyNetwork {
    graph: Arc<ChannelGraph>,
    channels: Vec<UncertaintyChannel>,
    prune: bool,
}

impl UncertaintyNetwork {
    /// A fresh network with fully-widened beliefs on every channel.
    pub fn new(graph: Arc<ChannelGraph>) -> Self {
        let channels = graph
            .channels()
            .map(|(_, channel)| UncertaintyChannel::new(channel.capacity_sat))
            .collect();
        Self {
            graph,
            channels,
            prune: true,
        }
    }

    pub fn graph(&self) -> &Arc<ChannelGraph> {
        &self.graph
    }

    /// Whether the planner may leave hopeless liquidity ranges out of the
    /// flow instance.
    pub fn prune(&self) -> bool {
        self.prune
    }

    pub fn set_prune(&mut self, prune: bool) {
        self.prune = prune;
    }

    pub fn channel(&self, cid: ChannelId) -> &UncertaintyChannel {
        &self.channels[cid.to_usize()]
    }

    pub fn channel_mut(&mut self, cid: ChannelId) -> &mut UncertaintyChannel {
        &mut self.channels[cid.to_usize()]
    }

    /// Forget everything: every belief returns to `[0, capacity]` with
    /// nothing in flight. Idempotent.
    pub fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }
    }

    /// The probability that every channel of `path` can carry
    /// `amount_sat`, treating channels as independent.
    pub fn path_probability(&self, path: &[ChannelId], amount_sat: u64) -> f64 {
        path.iter()
            .map(|&cid| self.channel(cid).probability(amount_sat))
            .product()
    }

    /// The total routing fee `path` charges for `amount_sat`.
    pub fn path_fee(&self, path: &[ChannelId], amount_sat: u64) -> Amount {
        path.iter()
            .map(|&cid| self.graph.channel(cid).fee_for(amount_sat))
            .sum()
    }

    /// Reserve `amount_sat` along the whole path, unwinding on error.
    pub fn allocate_path(
        &mut self,
        path: &[ChannelId],
        amount_sat: u64,
    ) -> Result<(), LiquidityError> {
        for (i, &cid) in path.iter().enumerate() {
            if let Err(err) = self.channel_mut(cid).allocate(amount_sat) {
                for &done in &path[..i] {
                    let _ = self.channel_mut(done).release(amount_sat);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Release `amount_sat` along the whole path.
    pub fn release_path(
        &mut self,
        path: &[ChannelId],
        amount_sat: u64,
    ) -> Result<(), LiquidityError> {
        for &cid in path {
            self.channel_mut(cid).release(amount_sat)?;
        }
        Ok(())
    }

    /// Fold a rejection at hop `failed_index` into the beliefs: every hop
    /// before it forwarded the amount, the failing hop could not.
    ///
    /// The path's reservations must already have been released.
    pub fn learn_from_rejection(
        &mut self,
        path: &[ChannelId],
        failed_index: usize,
        amount_sat: u64,
    ) {
        for &cid in &path[..failed_index] {
            self.channel_mut(cid).learn_from_success_on(amount_sat);
        }
        let failed = path[failed_index];
        self.channel_mut(failed).learn_from_failure_at(amount_sat);
        trace!(
            "Narrowed channel {} to [{}, {}]",
            self.graph.channel(failed).scid,
            self.channel(failed).min_liquidity(),
            self.channel(failed).max_liquidity(),
        );
    }

    /// Settle `amount_sat` along the path of an accepted attempt: release
    /// the reservations and shift both directions' beliefs to the
    /// post-transfer balances.
    pub fn settle_attempt(
        &mut self,
        path: &[ChannelId],
        amount_sat: u64,
    ) -> Result<(), LiquidityError> {
        for &cid in path {
            self.channel_mut(cid).release(amount_sat)?;
            self.channel_mut(cid).settle_outbound(amount_sat);
            let reverse = self.graph.counterpart(cid);
            self.channel_mut(reverse).settle_inbound(amount_sat);
        }
        Ok(())
    }
}
