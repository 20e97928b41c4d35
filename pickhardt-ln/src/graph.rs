//! The directed channel multigraph and its JSON loader.
//!
//! The graph is loaded once from a `listchannels`-style JSON dump and is
//! immutable afterwards. Nodes and channels live in dense arenas; per-node
//! adjacency lists are sorted by scid so that every iteration order in the
//! engine is deterministic.

use std::{collections::HashMap, sync::Arc};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelId, NodeId, ShortChannelId};

/// One advertised channel direction as it appears in the JSON dump. Unknown
/// fields (`public`, `amount_msat`, ...) are ignored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub source: String,
    pub destination: String,
    pub short_channel_id: String,
    /// Channel capacity in satoshis.
    pub satoshis: u64,
    pub base_fee_millisatoshi: u64,
    pub fee_per_millionth: u64,
}

#[derive(Deserialize)]
struct ChannelGraphDoc {
    channels: Vec<ChannelRecord>,
}

/// A directed multigraph of advertised channels, keyed by
/// `(src, dest, scid)`.
#[derive(Debug)]
pub struct ChannelGraph {
    /// Dense node index -> node id string.
    node_names: Vec<String>,
    node_index: HashMap<String, NodeId>,
    channels: Vec<Channel>,
    /// Per-node outgoing channels, sorted by `(scid, dest)`.
    outgoing: Vec<Vec<ChannelId>>,
    /// For each directed channel, the channel in the opposite direction
    /// with the same scid and capacity.
    counterpart: Vec<ChannelId>,
}

impl ChannelGraph {
    /// Parse a `{"channels": [...]}` JSON document and build the graph.
    /// Channels with a base fee above `base_fee_threshold_msat` (if given)
    /// are dropped up front; channels without a matching return channel are
    /// dropped with a warning.
    pub fn from_json_str(
        json: &str,
        base_fee_threshold_msat: Option<u64>,
    ) -> anyhow::Result<Arc<Self>> {
        let doc: ChannelGraphDoc = serde_json::from_str(json)
            .context("Failed to parse channel graph JSON")?;
        Self::from_records(doc.channels, base_fee_threshold_msat)
    }

    /// Build the graph from already-parsed records.
    pub fn from_records(
        mut records: Vec<ChannelRecord>,
        base_fee_threshold_msat: Option<u64>,
    ) -> anyhow::Result<Arc<Self>> {
        let total = records.len();

        if let Some(threshold) = base_fee_threshold_msat {
            records.retain(|r| r.base_fee_millisatoshi <= threshold);
            let dropped = total - records.len();
            if dropped > 0 {
                debug!("Dropped {dropped} channels above base fee \
                        threshold of {threshold} msat");
            }
        }

        // Zero-capacity channels can't route anything and would break the
        // capacity > 0 invariant; self-loops can't appear on any path.
        records.retain(|r| {
            if r.satoshis == 0 {
                warn!(
                    "Dropping zero-capacity channel {} ({} -> {})",
                    r.short_channel_id, r.source, r.destination,
                );
                false
            } else if r.source == r.destination {
                warn!(
                    "Dropping self-loop channel {} on {}",
                    r.short_channel_id, r.source,
                );
                false
            } else {
                true
            }
        });

        // Index records by (src, dest, scid), dropping duplicates.
        let mut by_key =
            HashMap::<(&str, &str, &str), &ChannelRecord>::new();
        for record in &records {
            let key = (
                record.source.as_str(),
                record.destination.as_str(),
                record.short_channel_id.as_str(),
            );
            if by_key.insert(key, record).is_some() {
                warn!(
                    "Duplicate channel {} ({} -> {}); keeping the last",
                    record.short_channel_id, record.source,
                    record.destination,
                );
            }
        }

        // Every kept channel must have a return channel with the same scid
        // and capacity; unannounced halves are dropped.
        let mut kept = Vec::with_capacity(records.len());
        for record in &records {
            let key = (
                record.source.as_str(),
                record.destination.as_str(),
                record.short_channel_id.as_str(),
            );
            // Skip the earlier copies of a duplicated record.
            if !by_key
                .get(&key)
                .is_some_and(|stored| std::ptr::eq(*stored, record))
            {
                continue;
            }
            let reverse_key = (
                record.destination.as_str(),
                record.source.as_str(),
                record.short_channel_id.as_str(),
            );
            match by_key.get(&reverse_key) {
                Some(reverse) if reverse.satoshis == record.satoshis =>
                    kept.push(record.clone()),
                Some(_) => warn!(
                    "Dropping channel {} ({} -> {}): return channel \
                     capacity mismatch",
                    record.short_channel_id, record.source,
                    record.destination,
                ),
                None => warn!(
                    "Dropping channel {} ({} -> {}): no return channel",
                    record.short_channel_id, record.source,
                    record.destination,
                ),
            }
        }
        if kept.len() < records.len() {
            debug!(
                "Kept {} of {} channel directions after return-channel \
                 matching",
                kept.len(),
                records.len(),
            );
        }

        // Intern nodes in first-appearance order.
        let mut node_names = Vec::new();
        let mut node_index = HashMap::<String, NodeId>::new();
        let intern = |name: &str,
                      node_names: &mut Vec<String>,
                      node_index: &mut HashMap<String, NodeId>|
         -> NodeId {
            if let Some(&id) = node_index.get(name) {
                return id;
            }
            let id = NodeId(u32::try_from(node_names.len())
                .expect("more than u32::MAX nodes"));
            node_names.push(name.to_owned());
            node_index.insert(name.to_owned(), id);
            id
        };

        let mut channels = Vec::with_capacity(kept.len());
        for record in &kept {
            let src = intern(&record.source, &mut node_names, &mut node_index);
            let dest =
                intern(&record.destination, &mut node_names, &mut node_index);
            channels.push(Channel {
                src,
                dest,
                scid: ShortChannelId::new(record.short_channel_id.clone()),
                capacity_sat: record.satoshis,
                ppm: record.fee_per_millionth,
                base_fee_msat: record.base_fee_millisatoshi,
            });
        }

        // Sorted adjacency: deterministic iteration and tie-breaking.
        let mut outgoing = vec![Vec::new(); node_names.len()];
        let mut order: Vec<u32> = (0..channels.len() as u32).collect();
        order.sort_by(|&a, &b| {
            let (ca, cb) = (&channels[a as usize], &channels[b as usize]);
            (&ca.scid, ca.dest).cmp(&(&cb.scid, cb.dest))
        });
        for cid in order {
            let channel = &channels[cid as usize];
            outgoing[channel.src.to_usize()].push(ChannelId(cid));
        }

        // Pair up return channels through the owning graph rather than
        // storing cyclic references in the channels themselves.
        let mut channel_ids = HashMap::<(NodeId, NodeId, &str), ChannelId>::new();
        for (cid, channel) in channels.iter().enumerate() {
            channel_ids.insert(
                (channel.src, channel.dest, channel.scid.as_str()),
                ChannelId(cid as u32),
            );
        }
        let counterpart = channels
            .iter()
            .map(|channel| {
                channel_ids
                    .get(&(channel.dest, channel.src, channel.scid.as_str()))
                    .copied()
                    .expect("return channel kept by construction")
            })
            .collect();

        Ok(Arc::new(Self {
            node_names,
            node_index,
            channels,
            outgoing,
            counterpart,
        }))
    }

    pub fn num_nodes(&self) -> usize {
        self.node_names.len()
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Look up a node's dense id by its name in the graph dump.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.node_index.get(name).copied()
    }

    pub fn node_name(&self, node: NodeId) -> &str {
        &self.node_names[node.to_usize()]
    }

    pub fn channel(&self, cid: ChannelId) -> &Channel {
        &self.channels[cid.to_usize()]
    }

    /// All directed channels in arena order.
    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &Channel)> {
        self.channels
            .iter()
            .enumerate()
            .map(|(cid, channel)| (ChannelId(cid as u32), channel))
    }

    /// Outgoing channels of `node`, sorted by `(scid, dest)`.
    pub fn outgoing(&self, node: NodeId) -> &[ChannelId] {
        &self.outgoing[node.to_usize()]
    }

    /// The return channel: opposite direction, same scid and capacity.
    pub fn counterpart(&self, cid: ChannelId) -> ChannelId {
        self.counterpart[cid.to_usize()]
    }

    /// Look up a directed channel by `(src, dest, scid)`.
    pub fn find_channel(
        &self,
        src: NodeId,
        dest: NodeId,
        scid: &ShortChannelId,
    ) -> Option<ChannelId> {
        self.outgoing(src)
            .iter()
            .copied()
            .find(|&cid| {
                let channel = self.channel(cid);
                channel.dest == dest && &channel.scid == scid
            })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(
        source: &str,
        destination: &str,
        scid: &str,
        satoshis: u64,
        ppm: u64,
        base_fee_msat: u64,
    ) -> ChannelRecord {
        ChannelRecord {
            source: source.to_owned(),
            destination: destination.to_owned(),
            short_channel_id: scid.to_owned(),
            satoshis,
            base_fee_millisatoshi: base_fee_msat,
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
            record(a, b, scid, satoshis, ppm, 0),
            record(b, a, scid, satoshis, ppm, 0),
        ]
    }

    #[test]
    fn loads_well_formed_graph() {
        let mut records = Vec::new();
        records.extend(bidirectional("a", "b", "1x1x1", 100_000, 10));
        records.extend(bidirectional("b", "c", "2x2x2", 50_000, 20));
        let graph = ChannelGraph::from_records(records, None).unwrap();

        assert_eq!(graph.num_nodes(), 3);
        assert_eq!(graph.num_channels(), 4);

        let a = graph.node_id("a").unwrap();
        let b = graph.node_id("b").unwrap();
        let ab = graph
            .find_channel(a, b, &ShortChannelId::new("1x1x1"))
            .unwrap();
        let ba = graph.counterpart(ab);
        assert_eq!(graph.channel(ba).src, b);
        assert_eq!(graph.channel(ba).dest, a);
        assert_eq!(graph.channel(ba).capacity_sat, 100_000);
        // counterpart is an involution
        assert_eq!(graph.counterpart(ba), ab);
    }

    #[test]
    fn drops_channels_without_return_channel() {
        let mut records = Vec::new();
        records.extend(bidirectional("a", "b", "1x1x1", 100_000, 10));
        // one-way channel: no return half
        records.push(record("a", "c", "3x3x3", 10_000, 5, 0));
        let graph = ChannelGraph::from_records(records, None).unwrap();

        assert_eq!(graph.num_channels(), 2);
        assert!(graph.node_id("c").is_none());
    }

    #[test]
    fn drops_channels_with_capacity_mismatch() {
        let records = vec![
            record("a", "b", "1x1x1", 100_000, 10, 0),
            record("b", "a", "1x1x1", 99_000, 10, 0),
        ];
        let graph = ChannelGraph::from_records(records, None).unwrap();
        assert_eq!(graph.num_channels(), 0);
    }

    #[test]
    fn base_fee_threshold_filters_both_directions() {
        let mut records = Vec::new();
        records.extend(bidirectional("a", "b", "1x1x1", 100_000, 10));
        records.push(record("a", "c", "2x2x2", 10_000, 5, 1000));
        records.push(record("c", "a", "2x2x2", 10_000, 5, 0));
        let graph =
            ChannelGraph::from_records(records, Some(0)).unwrap();

        // The a->c direction is dropped by the threshold, which orphans
        // c->a, which is then dropped for lacking a return channel.
        assert_eq!(graph.num_channels(), 2);
    }

    #[test]
    fn outgoing_sorted_by_scid() {
        let mut records = Vec::new();
        records.extend(bidirectional("a", "b", "9x9x9", 100_000, 10));
        records.extend(bidirectional("a", "b", "1x1x1", 100_000, 10));
        records.extend(bidirectional("a", "c", "5x5x5", 100_000, 10));
        let graph = ChannelGraph::from_records(records, None).unwrap();

        let a = graph.node_id("a").unwrap();
        let scids: Vec<&str> = graph
            .outgoing(a)
            .iter()
            .map(|&cid| graph.channel(cid).scid.as_str())
            .collect();
        assert_eq!(scids, vec!["1x1x1", "5x5x5", "9x9x9"]);
    }

    #[test]
    fn random_graphs_satisfy_structural_invariants() {
        use common::test_utils::arbitrary::{any_node_id, any_scid_string};
        use proptest::{collection::vec, prop_assert, prop_assert_eq, proptest};

        proptest!(|(edges in vec(
            (any_node_id(), any_node_id(), any_scid_string(), 1u64..=1_000_000),
            1..16,
        ))| {
            let mut records = Vec::new();
            for (a, b, scid, satoshis) in edges {
                if a == b {
                    continue;
                }
                records.push(record(&a, &b, &scid, satoshis, 10, 0));
                records.push(record(&b, &a, &scid, satoshis, 10, 0));
            }
            let graph = ChannelGraph::from_records(records, None).unwrap();

            for (cid, channel) in graph.channels() {
                prop_assert!(channel.capacity_sat > 0);
                // the return channel pairing is an involution preserving
                // scid and capacity
                let reverse_id = graph.counterpart(cid);
                let reverse = graph.channel(reverse_id);
                prop_assert_eq!(graph.counterpart(reverse_id), cid);
                prop_assert_eq!(&reverse.scid, &channel.scid);
                prop_assert_eq!(reverse.capacity_sat, channel.capacity_sat);
                prop_assert_eq!(reverse.src, channel.dest);
                prop_assert_eq!(reverse.dest, channel.src);
                // every channel is findable under its key
                prop_assert_eq!(
                    graph.find_channel(channel.src, channel.dest, &channel.scid),
                    Some(cid),
                );
            }

            // adjacency lists are sorted by (scid, dest)
            for node in 0..graph.num_nodes() {
                let outgoing = graph.outgoing(NodeId(node as u32));
                for pair in outgoing.windows(2) {
                    let first = graph.channel(pair[0]);
                    let second = graph.channel(pair[1]);
                    prop_assert!(
                        (&first.scid, first.dest)
                            <= (&second.scid, second.dest),
                    );
                }
            }
        })
    }

    #[test]
    fn parses_json_document_ignoring_unknown_fields() {
        let json = r#"{
            "channels": [
                {
                    "source": "a",
                    "destination": "b",
                    "short_channel_id": "1x1x1",
                    "public": true,
                    "satoshis": 42000,
                    "amount_msat": "42000000msat",
                    "base_fee_millisatoshi": 0,
                    "fee_per_millionth": 100
                },
                {
                    "source": "b",
                    "destination": "a",
                    "short_channel_id": "1x1x1",
                    "public": true,
                    "satoshis": 42000,
                    "amount_msat": "42000000msat",
                    "base_fee_millisatoshi": 0,
                    "fee_per_millionth": 100
                }
            ]
        }"#;
        let graph = ChannelGraph::from_json_str(json, None).unwrap();
        assert_eq!(graph.num_nodes(), 2);
        assert_eq!(graph.num_channels(), 2);
        assert_eq!(graph.channels().next().unwrap().1.ppm, 100);
    }
}
