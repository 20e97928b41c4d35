//! CLI args and the experiment loop.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::PathBuf,
};

use anyhow::Context;
use argh::FromArgs;
use common::rng::SmallRng;
use pickhardt_ln::{
    constants::{DEFAULT_MU_FEES, DEFAULT_MU_MIXED, DEFAULT_MU_PROBABILITY},
    dijkstra::RouteCriterion,
    graph::ChannelGraph,
    oracle::OracleNetwork,
    session::{DeliveryStatus, PaymentSession},
    uncertainty::UncertaintyNetwork,
};
use serde::{Deserialize, Serialize};
use tracing::info;

/// The simulated delivery method, named as in the result records.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[derive(strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryMethod {
    DijkstraFees,
    DijkstraProbabilities,
    DijkstraMixed,
    PickhardtPayFees,
    PickhardtPayProbability,
    PickhardtPayMixed,
    /// Like `pickhardt_pay_probability`, but the liquidity beliefs
    /// accumulated over earlier payments are kept instead of forgotten.
    PickhardtPayProbabilityRetained,
}

impl DeliveryMethod {
    fn retains_information(self) -> bool {
        matches!(self, Self::PickhardtPayProbabilityRetained)
    }
}

/// One payment to simulate: a line of the NDJSON payment set.
#[derive(Clone, Debug, Deserialize)]
pub struct PaymentRequest {
    pub sender: String,
    pub receiver: String,
    /// Amount to deliver, in satoshis.
    pub amount: u64,
}

/// One NDJSON result record: the request echoed plus the outcome.
#[derive(Debug, Serialize)]
struct ResultRecord<'a> {
    sender: &'a str,
    receiver: &'a str,
    amount: u64,
    delivery_method: &'a str,
    /// Routing fees paid, in satoshis; 0 unless the payment succeeded.
    fees: u64,
    residual_amount: u64,
    success: DeliveryStatus,
}

/// Simulate a payment set over a channel graph
#[derive(Debug, FromArgs)]
pub struct Args {
    /// path to the channel graph JSON dump
    #[argh(option)]
    pub graph: PathBuf,

    /// path to the newline-delimited JSON payment set
    #[argh(option)]
    pub payments: PathBuf,

    /// path the newline-delimited JSON results are written to
    #[argh(option)]
    pub output: PathBuf,

    /// delivery method to simulate, e.g. pickhardt_pay_fees
    #[argh(option)]
    pub method: DeliveryMethod,

    /// seed for sampling the ground-truth channel liquidity
    #[argh(option, default = "864931")]
    pub seed: u64,

    /// disable planner pruning of hopeless liquidity ranges
    #[argh(switch)]
    pub no_prune: bool,

    /// drop channels advertising a base fee above this many msat from the
    /// graph at load time; by default every channel is kept
    #[argh(option)]
    pub graph_base_fee_threshold_msat: Option<u64>,

    /// per-payment planner filter: don't route through channels
    /// advertising a base fee above this many msat
    #[argh(option, default = "0")]
    pub base_fee_threshold_msat: u64,

    /// tracing filter, e.g. "info" or "pickhardt_ln=debug"
    #[argh(option)]
    pub log_level: Option<String>,
}

impl Args {
    pub fn run(&self) -> anyhow::Result<()> {
        match &self.log_level {
            Some(filter) => logger::try_init_with_filter(filter)?,
            // Ignore an already-initialized logger.
            None => {
                let _ = logger::try_init();
            }
        }

        let graph_json = fs::read_to_string(&self.graph).with_context(
            || format!("Failed to read {}", self.graph.display()),
        )?;
        let graph = ChannelGraph::from_json_str(
            &graph_json,
            self.graph_base_fee_threshold_msat,
        )?;
        info!(
            "Loaded channel graph: {} nodes, {} channel directions",
            graph.num_nodes(),
            graph.num_channels(),
        );

        let payments = self.read_payments()?;
        info!(
            "Simulating {} payments with {}",
            payments.len(),
            self.method,
        );

        let mut rng = SmallRng::from_u64(self.seed);
        let mut oracle = OracleNetwork::sample(graph.clone(), &mut rng);
        let mut uncertainty = UncertaintyNetwork::new(graph);
        uncertainty.set_prune(!self.no_prune);

        let output = File::create(&self.output).with_context(|| {
            format!("Failed to create {}", self.output.display())
        })?;
        let mut output = BufWriter::new(output);

        let mut session = PaymentSession::new(&mut oracle, &mut uncertainty);
        let method_name = self.method.to_string();
        let mut delivered = 0usize;
        for request in &payments {
            if !self.method.retains_information() {
                session.forget_information();
            }
            let outcome = match self.method {
                DeliveryMethod::DijkstraFees => session.dijkstra_pay(
                    &request.sender,
                    &request.receiver,
                    request.amount,
                    RouteCriterion::Fee,
                )?,
                DeliveryMethod::DijkstraProbabilities => session
                    .dijkstra_pay(
                        &request.sender,
                        &request.receiver,
                        request.amount,
                        RouteCriterion::Probability,
                    )?,
                DeliveryMethod::DijkstraMixed => session.dijkstra_pay(
                    &request.sender,
                    &request.receiver,
                    request.amount,
                    RouteCriterion::Mixed,
                )?,
                DeliveryMethod::PickhardtPayFees => session.pickhardt_pay(
                    &request.sender,
                    &request.receiver,
                    request.amount,
                    DEFAULT_MU_FEES,
                    self.base_fee_threshold_msat,
                )?,
                DeliveryMethod::PickhardtPayProbability
                | DeliveryMethod::PickhardtPayProbabilityRetained =>
                    session.pickhardt_pay(
                        &request.sender,
                        &request.receiver,
                        request.amount,
                        DEFAULT_MU_PROBABILITY,
                        self.base_fee_threshold_msat,
                    )?,
                DeliveryMethod::PickhardtPayMixed => session.pickhardt_pay(
                    &request.sender,
                    &request.receiver,
                    request.amount,
                    DEFAULT_MU_MIXED,
                    self.base_fee_threshold_msat,
                )?,
            };

            if outcome.status == DeliveryStatus::Success {
                delivered += 1;
            }
            let record = ResultRecord {
                sender: &request.sender,
                receiver: &request.receiver,
                amount: request.amount,
                delivery_method: &method_name,
                fees: outcome.fees.sats_floor(),
                residual_amount: outcome.residual_sat,
                success: outcome.status,
            };
            serde_json::to_writer(&mut output, &record)?;
            output.write_all(b"\n")?;
        }
        output.flush()?;

        info!(
            "Done: {delivered} of {} payments delivered; results in {}",
            payments.len(),
            self.output.display(),
        );
        Ok(())
    }

    fn read_payments(&self) -> anyhow::Result<Vec<PaymentRequest>> {
        let ndjson = fs::read_to_string(&self.payments).with_context(
            || format!("Failed to read {}", self.payments.display()),
        )?;
        ndjson
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("Bad payment on line {}", number + 1)
                })
            })
            .collect()
    }
}
