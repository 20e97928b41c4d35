//! Attempts and payments.
//!
//! An [`Attempt`] is one candidate path with an amount; a [`Payment`]
//! aggregates every attempt made on behalf of one sender→receiver request
//! across all planning rounds.

use std::fmt::{self, Display};

use anyhow::ensure;
use common::ln::Amount;
use serde::{Deserialize, Serialize};

use crate::channel::{ChannelId, NodeId};
use crate::oracle::OracleNetwork;
use crate::uncertainty::UncertaintyNetwork;

/// Lifecycle of a single path attempt.
///
/// `Planned` → `Inflight` → `Settled` for the happy path;
/// `Planned`/`Inflight` → `Failed` on rejection or abandonment.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum AttemptStatus {
    Planned,
    Inflight,
    Failed,
    Settled,
}

/// One candidate path and the amount it should carry.
#[derive(Clone, Debug)]
pub struct Attempt {
    path: Vec<ChannelId>,
    amount_sat: u64,
    status: AttemptStatus,
    /// Success probability at planning time, over the whole path.
    probability: f64,
    /// The routing fee the path charges if this attempt settles.
    fee: Amount,
}

impl Attempt {
    pub(crate) fn new(
        path: Vec<ChannelId>,
        amount_sat: u64,
        probability: f64,
        fee: Amount,
    ) -> Self {
        debug_assert!(!path.is_empty());
        debug_assert!(amount_sat > 0);
        Self {
            path,
            amount_sat,
            status: AttemptStatus::Planned,
            probability,
            fee,
        }
    }

    pub fn path(&self) -> &[ChannelId] {
        &self.path
    }

    pub fn path_length(&self) -> usize {
        self.path.len()
    }

    pub fn amount_sat(&self) -> u64 {
        self.amount_sat
    }

    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn routing_fee(&self) -> Amount {
        self.fee
    }

    pub(crate) fn mark_inflight(&mut self) {
        debug_assert_eq!(self.status, AttemptStatus::Planned);
        self.status = AttemptStatus::Inflight;
    }

    pub(crate) fn mark_failed(&mut self) {
        debug_assert_ne!(self.status, AttemptStatus::Settled);
        self.status = AttemptStatus::Failed;
    }

    pub(crate) fn mark_settled(&mut self) {
        debug_assert_eq!(self.status, AttemptStatus::Inflight);
        self.status = AttemptStatus::Settled;
    }
}

/// All state accumulated for one sender→receiver→amount request.
#[derive(Debug)]
pub struct Payment {
    sender: NodeId,
    receiver: NodeId,
    amount_sat: u64,
    mu: u64,
    base_fee_threshold_msat: u64,
    attempts: Vec<Attempt>,
    rounds: u32,
}

impl Payment {
    pub fn new(
        sender: NodeId,
        receiver: NodeId,
        amount_sat: u64,
        mu: u64,
        base_fee_threshold_msat: u64,
    ) -> Self {
        Self {
            sender,
            receiver,
            amount_sat,
            mu,
            base_fee_threshold_msat,
            attempts: Vec::new(),
            rounds: 0,
        }
    }

    pub fn sender(&self) -> NodeId {
        self.sender
    }

    pub fn receiver(&self) -> NodeId {
        self.receiver
    }

    pub fn amount_sat(&self) -> u64 {
        self.amount_sat
    }

    pub fn mu(&self) -> u64 {
        self.mu
    }

    pub fn base_fee_threshold_msat(&self) -> u64 {
        self.base_fee_threshold_msat
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub(crate) fn attempts_mut(&mut self) -> &mut [Attempt] {
        &mut self.attempts
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub(crate) fn increment_rounds(&mut self) {
        self.rounds += 1;
    }

    pub(crate) fn push_attempt(&mut self, attempt: Attempt) {
        self.attempts.push(attempt);
    }

    /// Move a finished planning round's attempts (whatever their status)
    /// into this payment.
    pub fn register_sub_payment(&mut self, sub: Payment) {
        self.attempts.extend(sub.attempts);
    }

    /// What still has to be delivered: the requested amount minus
    /// everything inflight or settled.
    pub fn residual_amount_sat(&self) -> u64 {
        let committed: u64 = self
            .attempts
            .iter()
            .filter(|a| {
                matches!(
                    a.status(),
                    AttemptStatus::Inflight | AttemptStatus::Settled,
                )
            })
            .map(Attempt::amount_sat)
            .sum();
        debug_assert!(committed <= self.amount_sat);
        self.amount_sat.saturating_sub(committed)
    }

    /// Routing fees accrued over settled attempts only.
    pub fn fees_paid(&self) -> Amount {
        self.attempts
            .iter()
            .filter(|a| a.status() == AttemptStatus::Settled)
            .map(Attempt::routing_fee)
            .sum()
    }

    /// Settle every inflight attempt on both networks. The whole amount
    /// must have been accepted by the oracle first.
    pub fn execute(
        &mut self,
        oracle: &mut OracleNetwork,
        uncertainty: &mut UncertaintyNetwork,
    ) -> anyhow::Result<()> {
        ensure!(
            self.residual_amount_sat() == 0,
            "Cannot execute with {} sat still undelivered",
            self.residual_amount_sat(),
        );
        for attempt in &mut self.attempts {
            if attempt.status() != AttemptStatus::Inflight {
                continue;
            }
            oracle.settle_attempt(&attempt.path, attempt.amount_sat)?;
            uncertainty.settle_attempt(&attempt.path, attempt.amount_sat)?;
            attempt.mark_settled();
        }
        Ok(())
    }

    pub fn summary(&self) -> PaymentSummary {
        let mut summary = PaymentSummary {
            requested_sat: self.amount_sat,
            residual_sat: self.residual_amount_sat(),
            fees: self.fees_paid(),
            rounds: self.rounds,
            planned: 0,
            inflight: 0,
            failed: 0,
            settled: 0,
        };
        for attempt in &self.attempts {
            match attempt.status() {
                AttemptStatus::Planned => summary.planned += 1,
                AttemptStatus::Inflight => summary.inflight += 1,
                AttemptStatus::Failed => summary.failed += 1,
                AttemptStatus::Settled => summary.settled += 1,
            }
        }
        summary
    }
}

/// Headline numbers for one payment, for logging.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PaymentSummary {
    pub requested_sat: u64,
    pub residual_sat: u64,
    pub fees: Amount,
    pub rounds: u32,
    pub planned: usize,
    pub inflight: usize,
    pub failed: usize,
    pub settled: usize,
}

impl Display for PaymentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requested {} sat, residual {} sat, fees {} sat, \
             {} rounds, attempts: {} settled / {} inflight / {} failed / \
             {} planned",
            self.requested_sat,
            self.residual_sat,
            self.fees,
            self.rounds,
            self.settled,
            self.inflight,
            self.failed,
            self.planned,
        )
    }
}
