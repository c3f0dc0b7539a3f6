//! Cluster-wide introspection built from per-node `PUBSUB` replies.
//!
//! Each node only reports its own subscribers, so classic queries fan out to
//! every node and merge: channel lists are unioned, subscriber and pattern
//! counts are summed. Shard channel counts go straight to the owning node.
//!
//! A node that cannot be queried is left out of the merge and reported in
//! [`Aggregated::unreachable`] instead of being counted as zero.

use crate::config::PubSubConfig;
use crate::error::{Error, PubSubResult};
use crate::runner::NodeCommandRunner;

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;
use keyspace_topology::{NodeId, Topology, TopologyError};
use keyspace_transport::{Command, ConnectionPool, PubSubQuery, Reply, TransportError};
use tracing::{debug, warn};

/// A merged result plus the nodes that did not contribute to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Aggregated<T> {
    /// The merged value
    pub value: T,
    /// Nodes excluded because they could not be queried
    pub unreachable: Vec<NodeId>,
}

impl<T> Aggregated<T> {
    /// Whether every targeted node contributed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unreachable.is_empty()
    }

    /// Drop the unreachable-node report
    pub fn into_value(self) -> T {
        self.value
    }

    /// Transform the merged value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Aggregated<U> {
        Aggregated {
            value: f(self.value),
            unreachable: self.unreachable,
        }
    }
}

/// Result shape of any `PUBSUB` subcommand.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AggregatedReply {
    /// `CHANNELS` and `SHARDCHANNELS`: distinct names, sorted
    Channels(Vec<String>),
    /// `NUMSUB` and `SHARDNUMSUB`: counts in request order
    Counts(IndexMap<String, i64>),
    /// `NUMPAT`
    Count(i64),
}

/// Runs `PUBSUB` introspection across the cluster.
pub struct Aggregator<T, P>
where
    T: Topology,
    P: ConnectionPool,
{
    topology: Arc<T>,
    runner: NodeCommandRunner<P>,
}

impl<T, P> Clone for Aggregator<T, P>
where
    T: Topology,
    P: ConnectionPool,
{
    fn clone(&self) -> Self {
        Self {
            topology: self.topology.clone(),
            runner: self.runner.clone(),
        }
    }
}

impl<T, P> Aggregator<T, P>
where
    T: Topology,
    P: ConnectionPool,
{
    /// Create an aggregator
    pub const fn new(topology: Arc<T>, runner: NodeCommandRunner<P>) -> Self {
        Self { topology, runner }
    }

    /// Create an aggregator with its own runner over `pool`
    pub const fn with_pool(topology: Arc<T>, pool: Arc<P>, config: PubSubConfig) -> Self {
        Self::new(topology, NodeCommandRunner::new(pool, config))
    }

    /// Run any `PUBSUB` subcommand with cluster-wide semantics
    ///
    /// # Errors
    /// Returns `Error::TopologyUnavailable` if no slot map is loaded.
    pub async fn execute(&self, query: PubSubQuery) -> PubSubResult<Aggregated<AggregatedReply>> {
        Ok(match query {
            PubSubQuery::Channels(pattern) => self
                .channels(pattern.as_deref())
                .await?
                .map(AggregatedReply::Channels),
            PubSubQuery::NumSub(channels) => {
                self.numsub(&channels).await?.map(AggregatedReply::Counts)
            }
            PubSubQuery::NumPat => self.numpat().await?.map(AggregatedReply::Count),
            PubSubQuery::ShardChannels(pattern) => self
                .shardchannels(pattern.as_deref())
                .await?
                .map(AggregatedReply::Channels),
            PubSubQuery::ShardNumSub(channels) => self
                .shardnumsub(&channels)
                .await?
                .map(AggregatedReply::Counts),
        })
    }

    /// Active classic channels across all nodes, optionally glob-filtered
    ///
    /// # Errors
    /// Returns `Error::TopologyUnavailable` if no slot map is loaded.
    pub async fn channels(&self, pattern: Option<&str>) -> PubSubResult<Aggregated<Vec<String>>> {
        let query = PubSubQuery::Channels(pattern.map(str::to_string));
        Ok(self.fan_out(query, Reply::into_strings).await?.map(union))
    }

    /// Subscriber count per classic channel, summed over all nodes.
    ///
    /// Counts come back in request order with duplicates collapsed. No
    /// channels means an empty result without querying any node.
    ///
    /// # Errors
    /// Returns `Error::TopologyUnavailable` if no slot map is loaded.
    pub async fn numsub<S>(
        &self,
        channels: &[S],
    ) -> PubSubResult<Aggregated<IndexMap<String, i64>>>
    where
        S: AsRef<str>,
    {
        let mut counts = zeroed(channels);
        if counts.is_empty() {
            return Ok(empty(counts));
        }

        let query = PubSubQuery::NumSub(counts.keys().cloned().collect());
        let per_node = self.fan_out(query, Reply::into_counts).await?;

        for (channel, count) in per_node.value.into_iter().flatten() {
            if let Some(total) = counts.get_mut(&channel) {
                *total += count;
            }
        }

        Ok(Aggregated {
            value: counts,
            unreachable: per_node.unreachable,
        })
    }

    /// Pattern subscriptions summed over all nodes
    ///
    /// # Errors
    /// Returns `Error::TopologyUnavailable` if no slot map is loaded.
    pub async fn numpat(&self) -> PubSubResult<Aggregated<i64>> {
        Ok(self
            .fan_out(PubSubQuery::NumPat, Reply::into_integer)
            .await?
            .map(|counts| counts.into_iter().sum()))
    }

    /// Active shard channels across all nodes, optionally glob-filtered
    ///
    /// # Errors
    /// Returns `Error::TopologyUnavailable` if no slot map is loaded.
    pub async fn shardchannels(
        &self,
        pattern: Option<&str>,
    ) -> PubSubResult<Aggregated<Vec<String>>> {
        let query = PubSubQuery::ShardChannels(pattern.map(str::to_string));
        Ok(self.fan_out(query, Reply::into_strings).await?.map(union))
    }

    /// Subscriber count per shard channel, asked of each channel's owner only.
    ///
    /// A channel whose slot has no owner, or whose owner cannot be queried,
    /// counts 0; an unreachable owner is also listed in `unreachable`.
    ///
    /// # Errors
    /// Returns `Error::TopologyUnavailable` if no slot map is loaded.
    pub async fn shardnumsub<S>(
        &self,
        channels: &[S],
    ) -> PubSubResult<Aggregated<IndexMap<String, i64>>>
    where
        S: AsRef<str>,
    {
        let mut counts = zeroed(channels);
        if counts.is_empty() {
            return Ok(empty(counts));
        }

        let mut by_owner: IndexMap<NodeId, Vec<String>> = IndexMap::new();
        for channel in counts.keys() {
            match self.topology.node_for_name(channel) {
                Ok(owner) => by_owner.entry(owner).or_default().push(channel.clone()),
                Err(TopologyError::SlotUnassigned(slot)) => {
                    warn!("Shard channel {} maps to unowned slot {}", channel, slot);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let requests = by_owner.into_iter().map(|(owner, channels)| async move {
            let result = self
                .runner
                .run(&owner, Command::PubSub(PubSubQuery::ShardNumSub(channels)))
                .await
                .and_then(|reply| reply.into_counts().map_err(unexpected));
            (owner, result)
        });

        let mut unreachable = Vec::new();
        for (owner, result) in join_all(requests).await {
            match result {
                Ok(pairs) => {
                    for (channel, count) in pairs {
                        if let Some(total) = counts.get_mut(&channel) {
                            *total = count;
                        }
                    }
                }
                Err(e) => {
                    warn!("Excluding {} from PUBSUB SHARDNUMSUB: {}", owner, e);
                    unreachable.push(owner);
                }
            }
        }

        Ok(Aggregated {
            value: counts,
            unreachable,
        })
    }

    /// Send `query` to every node, parsing each reply with `parse`
    async fn fan_out<R>(
        &self,
        query: PubSubQuery,
        parse: fn(Reply) -> Result<R, TransportError>,
    ) -> PubSubResult<Aggregated<Vec<R>>> {
        let nodes = self.topology.all_nodes()?;
        debug!("Fanning out PUBSUB {} to {} nodes", query.subcommand(), nodes.len());

        let requests = nodes.into_iter().map(|node| {
            let command = Command::PubSub(query.clone());
            async move {
                let result = self
                    .runner
                    .run(&node, command)
                    .await
                    .and_then(|reply| parse(reply).map_err(unexpected));
                (node, result)
            }
        });

        let mut value = Vec::new();
        let mut unreachable = Vec::new();
        for (node, result) in join_all(requests).await {
            match result {
                Ok(parsed) => value.push(parsed),
                Err(e) => {
                    warn!(
                        "Excluding {} from PUBSUB {}: {}",
                        node,
                        query.subcommand(),
                        e
                    );
                    unreachable.push(node);
                }
            }
        }

        Ok(Aggregated { value, unreachable })
    }
}

fn unexpected(error: TransportError) -> Error {
    Error::UnexpectedReply(error.to_string())
}

fn zeroed<S: AsRef<str>>(channels: &[S]) -> IndexMap<String, i64> {
    channels
        .iter()
        .map(|c| (c.as_ref().to_string(), 0))
        .collect()
}

const fn empty<T>(value: T) -> Aggregated<T> {
    Aggregated {
        value,
        unreachable: Vec::new(),
    }
}

fn union(per_node: Vec<Vec<String>>) -> Vec<String> {
    per_node
        .into_iter()
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
