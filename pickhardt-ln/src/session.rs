//! The top-level payment session loop.
//!
//! A session owns the oracle and uncertainty networks for the duration of
//! a payment and runs the plan→probe→learn cycle: ask the flow planner for
//! attempts, probe each against the oracle, fold the outcomes back into
//! the beliefs, and replan for the residual until the amount is delivered,
//! planning becomes infeasible, or a safety cap is reached.

use std::sync::Arc;

use anyhow::ensure;
use common::ln::Amount;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::{MIN_ATTEMPT_PROBABILITY, ROUND_CAP};
use crate::dijkstra::{self, RouteCriterion};
use crate::flow::{self, FlowError};
use crate::oracle::{OracleNetwork, SendOnionResult};
use crate::payments::{Attempt, AttemptStatus, Payment};
use crate::uncertainty::UncertaintyNetwork;

/// How a payment ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// The full amount was delivered and settled.
    Success,
    /// Not a single attempt could be planned.
    NoPathFound,
    /// Attempts were made but the full amount never arrived.
    DeliveryFailure,
}

/// The result of one payment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub status: DeliveryStatus,
    /// Routing fees over settled attempts; zero unless the payment
    /// succeeded.
    pub fees: Amount,
    /// The undelivered remainder when the loop ended.
    pub residual_sat: u64,
    /// Planning rounds run.
    pub rounds: u32,
}

impl PaymentOutcome {
    fn no_path(amount_sat: u64) -> Self {
        Self {
            status: DeliveryStatus::NoPathFound,
            fees: Amount::ZERO,
            residual_sat: amount_sat,
            rounds: 0,
        }
    }
}

/// Runs payments against a ground-truth oracle while maintaining
/// liquidity beliefs between attempts (and between payments, until
/// [`forget_information`] is called).
///
/// [`forget_information`]: Self::forget_information
pub struct PaymentSession<'a> {
    oracle: &'a mut OracleNetwork,
    uncertainty: &'a mut UncertaintyNetwork,
}

impl<'a> PaymentSession<'a> {
    /// Both networks must be built over the same channel graph.
    pub fn new(
        oracle: &'a mut OracleNetwork,
        uncertainty: &'a mut UncertaintyNetwork,
    ) -> Self {
        assert!(
            Arc::ptr_eq(oracle.graph(), uncertainty.graph()),
            "oracle and uncertainty networks built over different graphs",
        );
        Self {
            oracle,
            uncertainty,
        }
    }

    /// Reset every liquidity belief to its widest state. The oracle is
    /// never touched.
    pub fn forget_information(&mut self) {
        self.uncertainty.reset();
    }

    /// Narrow every channel's uncertainty interval with up to `n`
    /// bisection probes against the oracle. Beliefs only; no liquidity
    /// moves.
    pub fn reduce_uncertainty(&mut self, n: u32) {
        let graph = self.uncertainty.graph().clone();
        for (cid, _) in graph.channels() {
            for _ in 0..n {
                let belief = self.uncertainty.channel(cid);
                let (min, max) = (belief.min_liquidity(), belief.max_liquidity());
                if min == max {
                    break;
                }
                let probe_sat = min + (max - min + 1) / 2;
                let belief = self.uncertainty.channel_mut(cid);
                if self.oracle.channel(cid).actual_liquidity_sat()
                    >= probe_sat
                {
                    belief.learn_from_success_on(probe_sat);
                } else {
                    belief.learn_from_failure_at(probe_sat);
                }
            }
        }
    }

    /// Deliver `amount_sat` from `sender` to `receiver` by repeatedly
    /// splitting the residual into minimum-cost attempts and probing them.
    ///
    /// `mu` balances fee cost against uncertainty cost in the planner;
    /// channels advertising a base fee above `base_fee_threshold_msat`
    /// are not used.
    pub fn pickhardt_pay(
        &mut self,
        sender: &str,
        receiver: &str,
        amount_sat: u64,
        mu: u64,
        base_fee_threshold_msat: u64,
    ) -> anyhow::Result<PaymentOutcome> {
        ensure!(amount_sat > 0, "amount must be positive");
        ensure!(sender != receiver, "sender and receiver must differ");
        let graph = self.uncertainty.graph().clone();
        let (Some(sender), Some(receiver)) =
            (graph.node_id(sender), graph.node_id(receiver))
        else {
            warn!("Unknown sender or receiver; nothing to probe");
            return Ok(PaymentOutcome::no_path(amount_sat));
        };

        let mut payment =
            Payment::new(sender, receiver, amount_sat, mu, base_fee_threshold_msat);
        let mut probability_too_low = false;

        while payment.residual_amount_sat() > 0
            && payment.rounds() < ROUND_CAP
            && !probability_too_low
        {
            payment.increment_rounds();
            let residual = payment.residual_amount_sat();
            debug!(
                "Round {}: planning {residual} sat of {amount_sat} sat",
                payment.rounds(),
            );

            let mut sub = Payment::new(
                sender,
                receiver,
                residual,
                mu,
                base_fee_threshold_msat,
            );
            let attempts = match flow::plan_attempts(
                self.uncertainty,
                sender,
                receiver,
                residual,
                mu,
                base_fee_threshold_msat,
            ) {
                Ok(attempts) => attempts,
                Err(err @ FlowError::Infeasible { .. }) => {
                    warn!("{err}");
                    warn!("Payment failed.");
                    break;
                }
            };
            for attempt in attempts {
                sub.push_attempt(attempt);
            }

            self.probe_attempts(&mut sub)?;

            if let Some(last) = sub.attempts().last() {
                if last.probability() < MIN_ATTEMPT_PROBABILITY {
                    probability_too_low = true;
                    warn!("Probability in last attempt too low");
                }
            }

            payment.register_sub_payment(sub);
        }

        if payment.residual_amount_sat() == 0 {
            payment.execute(self.oracle, self.uncertainty)?;
            let summary = payment.summary();
            info!("Payment delivered: {summary}");
            return Ok(PaymentOutcome {
                status: DeliveryStatus::Success,
                fees: payment.fees_paid(),
                residual_sat: 0,
                rounds: payment.rounds(),
            });
        }

        // The loop gave up. Report the shortfall as it stood, then release
        // every reservation still held by inflight attempts so that both
        // networks end in a consistent, posterior-only state.
        let residual = payment.residual_amount_sat();
        info!("Payment failed! Residual amount: {residual} sat");
        self.abandon_inflight(&mut payment)?;

        let status = if payment.attempts().is_empty() {
            DeliveryStatus::NoPathFound
        } else {
            DeliveryStatus::DeliveryFailure
        };
        Ok(PaymentOutcome {
            status,
            fees: Amount::ZERO,
            residual_sat: residual,
            rounds: payment.rounds(),
        })
    }

    /// Deliver `amount_sat` over a single shortest path under `criterion`.
    pub fn dijkstra_pay(
        &mut self,
        sender: &str,
        receiver: &str,
        amount_sat: u64,
        criterion: RouteCriterion,
    ) -> anyhow::Result<PaymentOutcome> {
        ensure!(amount_sat > 0, "amount must be positive");
        ensure!(sender != receiver, "sender and receiver must differ");
        let graph = self.uncertainty.graph().clone();
        let (Some(sender), Some(receiver)) =
            (graph.node_id(sender), graph.node_id(receiver))
        else {
            warn!("Unknown sender or receiver; nothing to probe");
            return Ok(PaymentOutcome::no_path(amount_sat));
        };

        let Some(path) = dijkstra::shortest_path(
            &graph, sender, receiver, amount_sat, criterion,
        ) else {
            info!("No single path can carry {amount_sat} sat");
            return Ok(PaymentOutcome::no_path(amount_sat));
        };

        for &cid in &path {
            let channel = graph.channel(cid);
            debug!(
                "- channel {} ({} -> {}) with capacity {} sat and \
                 {} ppm",
                channel.scid,
                graph.node_name(channel.src),
                graph.node_name(channel.dest),
                channel.capacity_sat,
                channel.ppm,
            );
        }

        let mut payment = Payment::new(sender, receiver, amount_sat, 1, 0);
        let probability =
            self.uncertainty.path_probability(&path, amount_sat);
        let fee = self.uncertainty.path_fee(&path, amount_sat);
        payment.push_attempt(Attempt::new(path, amount_sat, probability, fee));
        payment.increment_rounds();

        self.probe_attempts(&mut payment)?;

        if payment.residual_amount_sat() == 0 {
            payment.execute(self.oracle, self.uncertainty)?;
            return Ok(PaymentOutcome {
                status: DeliveryStatus::Success,
                fees: payment.fees_paid(),
                residual_sat: 0,
                rounds: 1,
            });
        }
        Ok(PaymentOutcome {
            status: DeliveryStatus::DeliveryFailure,
            fees: Amount::ZERO,
            residual_sat: amount_sat,
            rounds: 1,
        })
    }

    /// Probe every planned attempt: send the onion and either keep the
    /// attempt inflight or fold the rejection back into the beliefs.
    ///
    /// All reservations are made up front, before the first probe: the
    /// planner sized the attempts against the current beliefs, and a
    /// rejection learned from an early attempt may narrow a channel that
    /// a later attempt also crosses.
    fn probe_attempts(&mut self, sub: &mut Payment) -> anyhow::Result<()> {
        for attempt in sub.attempts() {
            self.uncertainty
                .allocate_path(attempt.path(), attempt.amount_sat())?;
        }
        for attempt in sub.attempts_mut() {
            let amount_sat = attempt.amount_sat();
            match self.oracle.send_onion(attempt.path(), amount_sat) {
                SendOnionResult::Accepted => {
                    debug!(
                        "Attempt of {amount_sat} sat accepted \
                         (p = {:.3})",
                        attempt.probability(),
                    );
                    attempt.mark_inflight();
                }
                SendOnionResult::RejectedAt(index) => {
                    debug!(
                        "Attempt of {amount_sat} sat rejected at hop \
                         {index}",
                    );
                    attempt.mark_failed();
                    self.uncertainty
                        .release_path(attempt.path(), amount_sat)?;
                    self.uncertainty.learn_from_rejection(
                        attempt.path(),
                        index,
                        amount_sat,
                    );
                }
            }
        }
        Ok(())
    }

    /// Give up on every inflight attempt: unwind its reservations on both
    /// networks and mark it failed.
    fn abandon_inflight(
        &mut self,
        payment: &mut Payment,
    ) -> anyhow::Result<()> {
        for attempt in payment.attempts_mut() {
            if attempt.status() != AttemptStatus::Inflight {
                continue;
            }
            let amount_sat = attempt.amount_sat();
            self.oracle.release_attempt(attempt.path(), amount_sat)?;
            self.uncertainty.release_path(attempt.path(), amount_sat)?;
            attempt.mark_failed();
        }
        Ok(())
    }
}
