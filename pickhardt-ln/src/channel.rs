//! Channel records and the id newtypes used to address them.
//!
//! Nodes and directed channels are addressed by dense indices into the
//! owning [`ChannelGraph`]'s arenas. A channel never holds a reference to
//! its return channel; the pairing is resolved through the graph.
//!
//! [`ChannelGraph`]: crate::graph::ChannelGraph

use std::fmt::{self, Display};

use common::ln::Amount;
use serde::{Deserialize, Serialize};

/// Dense index of a node in a [`ChannelGraph`].
///
/// [`ChannelGraph`]: crate::graph::ChannelGraph
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub fn to_usize(self) -> usize {
        self.0 as usize
    }
}

/// Dense index of a directed channel in a [`ChannelGraph`].
///
/// [`ChannelGraph`]: crate::graph::ChannelGraph
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ChannelId(pub(crate) u32);

impl ChannelId {
    #[inline]
    pub fn to_usize(self) -> usize {
        self.0 as usize
    }
}

/// A short channel id as it appears in channel-graph dumps, e.g.
/// `"673226x1964x0"`.
///
/// The derived lexicographic [`Ord`] is what every determinism tie-break in
/// the engine is keyed on: adjacency lists are sorted by scid and flow
/// decomposition always extends a path along the least scid with remaining
/// flow.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortChannelId(String);

impl ShortChannelId {
    pub fn new(scid: impl Into<String>) -> Self {
        Self(scid.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShortChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ShortChannelId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An immutable advertised channel: one direction of a payment pipe between
/// two nodes. The reverse direction is a separate [`Channel`] sharing the
/// same scid and capacity.
#[derive(Clone, Debug)]
pub struct Channel {
    pub src: NodeId,
    pub dest: NodeId,
    pub scid: ShortChannelId,
    /// Total capacity of the channel in satoshis. Always positive.
    pub capacity_sat: u64,
    /// Proportional routing fee in parts per million.
    pub ppm: u64,
    /// Flat routing fee in millisatoshis.
    pub base_fee_msat: u64,
}

impl Channel {
    /// The routing fee this channel charges for forwarding `amount_sat`.
    pub fn fee_for(&self, amount_sat: u64) -> Amount {
        // ppm is charged per millionth of the amount; in msat units the
        // proportional part works out to amount_sat * ppm / 1000.
        let proportional_msat =
            (u128::from(amount_sat) * u128::from(self.ppm) / 1000) as u64;
        Amount::from_msat(self.base_fee_msat + proportional_msat)
    }
}
