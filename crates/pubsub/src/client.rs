//! Entry point tying topology, pool and sessions together

use crate::aggregator::{Aggregated, AggregatedReply, Aggregator};
use crate::config::PubSubConfig;
use crate::dispatcher::Callbacks;
use crate::error::PubSubResult;
use crate::publisher::Publisher;
use crate::runner::NodeCommandRunner;
use crate::session::{Session, SessionOutcome};
use crate::subscription_set::Mode;

use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use keyspace_topology::Topology;
use keyspace_transport::{ConnectionPool, PubSubQuery};

struct Inner<T, P>
where
    T: Topology,
    P: ConnectionPool,
{
    topology: Arc<T>,
    pool: Arc<P>,
    config: PubSubConfig,
    aggregator: Aggregator<T, P>,
    publisher: Publisher<T, P>,
}

/// Cluster-aware pub/sub client.
///
/// Cheap to clone; clones share the topology and pool.
pub struct ClusterPubSub<T, P>
where
    T: Topology,
    P: ConnectionPool,
{
    inner: Arc<Inner<T, P>>,
}

impl<T, P> Clone for ClusterPubSub<T, P>
where
    T: Topology,
    P: ConnectionPool,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, P> ClusterPubSub<T, P>
where
    T: Topology,
    P: ConnectionPool,
{
    /// Create a client with default timeouts
    pub fn new(topology: Arc<T>, pool: Arc<P>) -> Self {
        Self::with_config(topology, pool, PubSubConfig::default())
    }

    /// Create a client with explicit timeouts
    pub fn with_config(topology: Arc<T>, pool: Arc<P>, config: PubSubConfig) -> Self {
        let runner = NodeCommandRunner::new(pool.clone(), config.clone());

        Self {
            inner: Arc::new(Inner {
                aggregator: Aggregator::new(topology.clone(), runner.clone()),
                publisher: Publisher::new(topology.clone(), runner),
                topology,
                pool,
                config,
            }),
        }
    }

    /// The configuration in use
    pub fn config(&self) -> &PubSubConfig {
        &self.inner.config
    }

    /// The topology routing requests
    pub fn topology(&self) -> &Arc<T> {
        &self.inner.topology
    }

    /// Introspection over the whole cluster
    pub fn aggregator(&self) -> &Aggregator<T, P> {
        &self.inner.aggregator
    }

    /// Publishing with cluster routing
    pub fn publisher(&self) -> &Publisher<T, P> {
        &self.inner.publisher
    }

    /// Open a session without subscribing to anything yet
    pub fn open_session(&self, callbacks: Callbacks) -> Session<P> {
        let topology: Arc<dyn Topology> = self.inner.topology.clone();
        Session::new(
            topology,
            self.inner.pool.clone(),
            callbacks,
            self.inner.config.clone(),
        )
    }

    /// Subscribe to classic channels and block until the session ends
    ///
    /// # Errors
    /// Returns routing errors before anything is sent, or
    /// `Error::Timeout` if the idle timeout closed the session.
    pub async fn subscribe<I, S>(
        &self,
        channels: I,
        callbacks: Callbacks,
    ) -> PubSubResult<SessionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_session(Mode::Classic, collect(channels), callbacks)
            .await
    }

    /// Subscribe to glob patterns and block until the session ends
    ///
    /// # Errors
    /// Same as [`ClusterPubSub::subscribe`].
    pub async fn psubscribe<I, S>(
        &self,
        patterns: I,
        callbacks: Callbacks,
    ) -> PubSubResult<SessionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_session(Mode::Pattern, collect(patterns), callbacks)
            .await
    }

    /// Subscribe to shard channels on their owners and block until the
    /// session ends
    ///
    /// # Errors
    /// Same as [`ClusterPubSub::subscribe`]; a channel whose slot has no owner
    /// fails before anything is sent.
    pub async fn ssubscribe<I, S>(
        &self,
        channels: I,
        callbacks: Callbacks,
    ) -> PubSubResult<SessionOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_session(Mode::Sharded, collect(channels), callbacks)
            .await
    }

    /// See [`Aggregator::channels`]
    ///
    /// # Errors
    /// Returns `Error::TopologyUnavailable` if no slot map is loaded.
    pub async fn channels(&self, pattern: Option<&str>) -> PubSubResult<Aggregated<Vec<String>>> {
        self.inner.aggregator.channels(pattern).await
    }

    /// See [`Aggregator::numsub`]
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
        self.inner.aggregator.numsub(channels).await
    }

    /// See [`Aggregator::numpat`]
    ///
    /// # Errors
    /// Returns `Error::TopologyUnavailable` if no slot map is loaded.
    pub async fn numpat(&self) -> PubSubResult<Aggregated<i64>> {
        self.inner.aggregator.numpat().await
    }

    /// See [`Aggregator::shardchannels`]
    ///
    /// # Errors
    /// Returns `Error::TopologyUnavailable` if no slot map is loaded.
    pub async fn shardchannels(
        &self,
        pattern: Option<&str>,
    ) -> PubSubResult<Aggregated<Vec<String>>> {
        self.inner.aggregator.shardchannels(pattern).await
    }

    /// See [`Aggregator::shardnumsub`]
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
        self.inner.aggregator.shardnumsub(channels).await
    }

    /// See [`Aggregator::execute`]
    ///
    /// # Errors
    /// Returns `Error::TopologyUnavailable` if no slot map is loaded.
    pub async fn pubsub(&self, query: PubSubQuery) -> PubSubResult<Aggregated<AggregatedReply>> {
        self.inner.aggregator.execute(query).await
    }

    /// See [`Publisher::publish`]
    ///
    /// # Errors
    /// Returns the publisher's error.
    pub async fn publish(&self, channel: &str, message: impl Into<Bytes>) -> PubSubResult<i64> {
        self.inner.publisher.publish(channel, message).await
    }

    /// See [`Publisher::spublish`]
    ///
    /// # Errors
    /// Returns the publisher's error.
    pub async fn spublish(&self, channel: &str, message: impl Into<Bytes>) -> PubSubResult<i64> {
        self.inner.publisher.spublish(channel, message).await
    }

    async fn run_session(
        &self,
        mode: Mode,
        names: Vec<String>,
        callbacks: Callbacks,
    ) -> PubSubResult<SessionOutcome> {
        let session = self.open_session(callbacks);
        session.handle().add(mode, names)?;
        session.join().await
    }
}

fn collect<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}
