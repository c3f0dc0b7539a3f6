//! Long-lived subscription sessions.
//!
//! A session holds at most one connection per node. Each connection gets a
//! link task that reads push frames and a writer task that drains a queue of
//! subscription commands. Handles only ever push onto that queue, so a
//! callback running inside a read loop can subscribe or unsubscribe on the
//! same session without waiting for the loop.
//!
//! [`Session::join`] runs until every link has drained (all acknowledged
//! counts back to zero with nothing in flight) or the session is closed.

use crate::config::PubSubConfig;
use crate::dispatcher::{Callbacks, EventDispatcher};
use crate::error::{Error, PubSubResult};
use crate::subscription_set::{Mode, SubscriptionSet};

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use keyspace_topology::{NodeId, Slot, Topology, key_slot};
use keyspace_transport::{Command, Connection, ConnectionPool, PushFrame, Reply, TransportError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Nothing subscribed and no connections held
    Idle,
    /// Subscribe commands sent, acknowledgements outstanding
    Subscribing,
    /// At least one subscription acknowledged
    Active,
    /// Unsubscribe commands sent
    Unsubscribing,
    /// Closed by the caller, by the idle timeout, or after losing a connection
    Closed,
}

/// How a session ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionOutcome {
    /// Final state, `Idle` or `Closed`
    pub state: SessionState,
    /// Nodes whose connection was lost while the session ran
    pub lost_nodes: Vec<NodeId>,
}

enum Control {
    Connect {
        node: NodeId,
        link_id: Uuid,
        commands: mpsc::UnboundedReceiver<Command>,
    },
}

/// Node plus, for shard channels, the slot a command is confined to
type Route = (NodeId, Option<Slot>);

/// Book-keeping for one node connection
struct Link {
    id: Uuid,
    writer: mpsc::UnboundedSender<Command>,
    /// Channels plus patterns, as last acknowledged
    classic_count: usize,
    /// Shard channels, as last acknowledged
    shard_count: usize,
    /// Subscribe acknowledgements still expected
    awaiting: usize,
}

impl Link {
    const fn new(id: Uuid, writer: mpsc::UnboundedSender<Command>) -> Self {
        Self {
            id,
            writer,
            classic_count: 0,
            shard_count: 0,
            awaiting: 0,
        }
    }

    const fn is_drained(&self) -> bool {
        self.classic_count == 0 && self.shard_count == 0 && self.awaiting == 0
    }

    const fn holds(&self, mode: Mode) -> bool {
        self.awaiting > 0
            || if mode.is_sharded() {
                self.shard_count > 0
            } else {
                self.classic_count > 0
            }
    }
}

struct Registry {
    phase: SessionState,
    finished: bool,
    timed_out: bool,
    links: HashMap<NodeId, Link>,
    subscriptions: SubscriptionSet,
    /// Node carrying classic and pattern subscriptions
    global_node: Option<NodeId>,
    lost_nodes: Vec<NodeId>,
}

impl Registry {
    fn new() -> Self {
        Self {
            phase: SessionState::Idle,
            finished: false,
            timed_out: false,
            links: HashMap::new(),
            subscriptions: SubscriptionSet::new(),
            global_node: None,
            lost_nodes: Vec::new(),
        }
    }

    const fn ensure_open(&self) -> PubSubResult<()> {
        if self.finished || matches!(self.phase, SessionState::Closed) {
            return Err(Error::AlreadyClosed);
        }
        Ok(())
    }

    fn settle(&mut self) {
        if self.phase == SessionState::Closed {
            return;
        }

        self.phase = if self.links.values().any(|l| l.awaiting > 0) {
            SessionState::Subscribing
        } else if self.subscriptions.is_empty() {
            SessionState::Unsubscribing
        } else {
            SessionState::Active
        };
    }

    fn drop_link(&mut self, node: &NodeId) {
        self.links.remove(node);
        if self.global_node.as_ref() == Some(node) {
            self.global_node = None;
        }
    }

    /// Forget a failed link and everything it held; returns how many
    /// subscriptions went with it
    fn lose(&mut self, node: &NodeId) -> usize {
        self.drop_link(node);
        let dropped = self.subscriptions.remove_node(node).len();
        self.lost_nodes.push(node.clone());
        self.settle();
        dropped
    }

    /// Forget the link to `node` if its writer has stopped, since its task
    /// is already on the way out
    fn take_dead_link(&mut self, node: &NodeId) -> Option<usize> {
        if self.links.get(node).is_some_and(|l| l.writer.is_closed()) {
            Some(self.lose(node))
        } else {
            None
        }
    }
}

struct SessionShared {
    id: Uuid,
    registry: Mutex<Registry>,
    topology: Arc<dyn Topology>,
    controls: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
}

impl SessionShared {
    fn new(topology: Arc<dyn Topology>, controls: mpsc::UnboundedSender<Control>) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry: Mutex::new(Registry::new()),
            topology,
            controls,
            cancel: CancellationToken::new(),
        }
    }

    /// Record an acknowledgement; returns false if the link is no longer current
    fn apply(&self, node: &NodeId, link_id: Uuid, frame: &PushFrame) -> bool {
        let PushFrame::Ack {
            kind,
            channel,
            count,
        } = frame
        else {
            return true;
        };

        let mut registry = self.registry.lock();
        let Registry {
            links,
            subscriptions,
            ..
        } = &mut *registry;

        let Some(link) = links.get_mut(node).filter(|l| l.id == link_id) else {
            return false;
        };

        if kind.is_sharded() {
            link.shard_count = *count;
        } else {
            link.classic_count = *count;
        }

        let mode = Mode::of(*kind);
        if kind.is_subscribe() {
            link.awaiting = link.awaiting.saturating_sub(1);
            if let Some(channel) = channel {
                subscriptions.insert(mode, channel.clone(), node.clone());
            }
        } else if let Some(channel) = channel {
            if subscriptions.node_of(mode, channel) == Some(node) {
                subscriptions.remove(mode, channel);
            }
        }

        registry.settle();
        true
    }

    /// Drop the link if nothing is subscribed or in flight on it
    fn finish_if_drained(&self, node: &NodeId, link_id: Uuid) -> bool {
        let mut registry = self.registry.lock();

        match registry.links.get(node) {
            Some(link) if link.id == link_id && link.is_drained() => {
                registry.drop_link(node);
                debug!("Session {} released its link to {}", self.id, node);
                true
            }
            _ => false,
        }
    }

    fn lose_link(&self, node: &NodeId, link_id: Uuid, reason: &str) {
        let mut registry = self.registry.lock();

        if !registry.links.get(node).is_some_and(|l| l.id == link_id) {
            return;
        }

        let dropped = registry.lose(node);
        let error = Error::NodeUnreachable {
            node: node.clone(),
            reason: reason.to_string(),
        };
        warn!(
            "Session {} dropped {} subscriptions: {}",
            self.id, dropped, error
        );
    }

    fn time_out(&self) {
        {
            let mut registry = self.registry.lock();
            registry.timed_out = true;
            registry.phase = SessionState::Closed;
        }
        self.cancel.cancel();
    }

    /// Mark the session finished if it holds no links
    fn try_finish(&self) -> bool {
        let mut registry = self.registry.lock();
        if !registry.links.is_empty() {
            return false;
        }

        registry.finished = true;
        if registry.phase != SessionState::Closed {
            registry.phase = if registry.lost_nodes.is_empty() {
                SessionState::Idle
            } else {
                SessionState::Closed
            };
        }
        true
    }

    fn outcome(&self) -> PubSubResult<SessionOutcome> {
        let mut registry = self.registry.lock();
        registry.finished = true;

        if registry.timed_out {
            return Err(Error::Timeout);
        }

        Ok(SessionOutcome {
            state: registry.phase,
            lost_nodes: registry.lost_nodes.clone(),
        })
    }
}

/// Control surface of a session.
///
/// Every method returns without waiting on the network, so handles can be
/// used freely from inside callbacks.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    #[cfg(test)]
    pub(crate) fn detached(topology: Arc<dyn Topology>) -> Self {
        let (controls, _) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(SessionShared::new(topology, controls)),
        }
    }

    /// Unique id of the session
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.registry.lock().phase
    }

    /// Acknowledged subscriptions of `mode`, sorted
    #[must_use]
    pub fn subscriptions(&self, mode: Mode) -> Vec<String> {
        self.shared.registry.lock().subscriptions.names(mode)
    }

    /// Nodes the session currently holds a connection to, sorted
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.shared.registry.lock().links.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Subscribe to classic channels
    ///
    /// # Errors
    /// See [`SessionHandle::add`].
    pub fn subscribe<I, S>(&self, channels: I) -> PubSubResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(Mode::Classic, channels.into_iter().map(Into::into).collect())
    }

    /// Subscribe to glob patterns
    ///
    /// # Errors
    /// See [`SessionHandle::add`].
    pub fn psubscribe<I, S>(&self, patterns: I) -> PubSubResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(Mode::Pattern, patterns.into_iter().map(Into::into).collect())
    }

    /// Subscribe to shard channels on their owning nodes
    ///
    /// # Errors
    /// See [`SessionHandle::add`].
    pub fn ssubscribe<I, S>(&self, channels: I) -> PubSubResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(Mode::Sharded, channels.into_iter().map(Into::into).collect())
    }

    /// Unsubscribe from classic channels; none means all
    ///
    /// # Errors
    /// Returns `Error::AlreadyClosed` once the session is over.
    pub fn unsubscribe<I, S>(&self, channels: I) -> PubSubResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove(Mode::Classic, channels.into_iter().map(Into::into).collect())
    }

    /// Unsubscribe from glob patterns; none means all
    ///
    /// # Errors
    /// Returns `Error::AlreadyClosed` once the session is over.
    pub fn punsubscribe<I, S>(&self, patterns: I) -> PubSubResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove(Mode::Pattern, patterns.into_iter().map(Into::into).collect())
    }

    /// Unsubscribe from shard channels; none means all
    ///
    /// # Errors
    /// Returns `Error::AlreadyClosed` once the session is over.
    pub fn sunsubscribe<I, S>(&self, channels: I) -> PubSubResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remove(Mode::Sharded, channels.into_iter().map(Into::into).collect())
    }

    /// Unsubscribe from every classic channel
    ///
    /// # Errors
    /// Returns `Error::AlreadyClosed` once the session is over.
    pub fn unsubscribe_all(&self) -> PubSubResult<()> {
        self.remove(Mode::Classic, Vec::new())
    }

    /// Unsubscribe from every pattern
    ///
    /// # Errors
    /// Returns `Error::AlreadyClosed` once the session is over.
    pub fn punsubscribe_all(&self) -> PubSubResult<()> {
        self.remove(Mode::Pattern, Vec::new())
    }

    /// Unsubscribe from every shard channel
    ///
    /// # Errors
    /// Returns `Error::AlreadyClosed` once the session is over.
    pub fn sunsubscribe_all(&self) -> PubSubResult<()> {
        self.remove(Mode::Sharded, Vec::new())
    }

    /// Queue subscribe commands for `names`.
    ///
    /// Shard channels are grouped by slot, one command per slot on the
    /// owning node's connection; classic channels and patterns all go to one
    /// node, reusing the one already in use.
    ///
    /// # Errors
    /// - `Error::AlreadyClosed` once the session is over
    /// - `Error::TopologyUnavailable` if a name cannot be routed; nothing is
    ///   sent in that case
    pub fn add(&self, mode: Mode, names: Vec<String>) -> PubSubResult<()> {
        if names.is_empty() {
            return Ok(());
        }

        let mut registry = self.shared.registry.lock();
        registry.ensure_open()?;

        let mut groups: IndexMap<Route, Vec<String>> = IndexMap::new();
        if mode.is_sharded() {
            for name in names {
                let slot = key_slot(&name);
                let node = self.shared.topology.node_for_slot(slot)?;
                groups.entry((node, Some(slot))).or_default().push(name);
            }
        } else {
            let node = self.global_node(&registry)?;
            registry.global_node = Some(node.clone());
            groups.insert((node, None), names);
        }

        for ((node, _), names) in groups {
            debug!(
                "Session {} subscribing to {} {:?} names on {}",
                self.shared.id,
                names.len(),
                mode,
                node
            );
            let link = self.link_for(&mut registry, &node)?;
            link.awaiting += names.len();
            link.writer
                .send(mode.subscribe(names))
                .map_err(|_| Error::AlreadyClosed)?;
        }

        registry.phase = SessionState::Subscribing;
        Ok(())
    }

    /// Queue unsubscribe commands on every connection holding `names`.
    ///
    /// No names sends an unsubscribe-all to every connection with
    /// subscriptions of `mode` or acknowledgements outstanding.
    ///
    /// # Errors
    /// Returns `Error::AlreadyClosed` once the session is over.
    pub fn remove(&self, mode: Mode, names: Vec<String>) -> PubSubResult<()> {
        let mut registry = self.shared.registry.lock();
        registry.ensure_open()?;

        let mut groups: IndexMap<Route, Vec<String>> = IndexMap::new();
        if names.is_empty() {
            for (node, link) in &registry.links {
                if link.holds(mode) {
                    groups.insert((node.clone(), None), Vec::new());
                }
            }
        } else {
            for name in names {
                let node = registry
                    .subscriptions
                    .node_of(mode, &name)
                    .cloned()
                    .or_else(|| self.expected_node(&registry, mode, &name));

                match node {
                    Some(node) if registry.links.contains_key(&node) => {
                        let slot = mode.is_sharded().then(|| key_slot(&name));
                        groups.entry((node, slot)).or_default().push(name);
                    }
                    _ => trace!("Session {} holds no {:?} {}", self.shared.id, mode, name),
                }
            }
        }

        if groups.is_empty() {
            return Ok(());
        }

        for ((node, _), names) in groups {
            if let Some(link) = registry.links.get(&node) {
                debug!(
                    "Session {} unsubscribing {:?} on {}",
                    self.shared.id, mode, node
                );
                // A closed writer means the link is already going away
                let _ = link.writer.send(mode.unsubscribe(names));
            }
        }

        registry.phase = SessionState::Unsubscribing;
        Ok(())
    }

    /// Close every connection and end the session.
    ///
    /// Read loops stop without invoking further callbacks; a callback already
    /// running is allowed to finish.
    pub fn close(&self) {
        {
            let mut registry = self.shared.registry.lock();
            if registry.finished {
                return;
            }
            registry.phase = SessionState::Closed;
        }

        info!("Closing session {}", self.shared.id);
        self.shared.cancel.cancel();
    }

    /// Whether the session has ended
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.registry.lock().ensure_open().is_err()
    }

    fn global_node(&self, registry: &Registry) -> PubSubResult<NodeId> {
        if let Some(node) = &registry.global_node {
            return Ok(node.clone());
        }

        self.shared
            .topology
            .all_nodes()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::TopologyUnavailable("no nodes in topology".to_string()))
    }

    fn expected_node(&self, registry: &Registry, mode: Mode, name: &str) -> Option<NodeId> {
        if mode.is_sharded() {
            self.shared.topology.node_for_name(name).ok()
        } else {
            registry.global_node.clone()
        }
    }

    fn link_for<'a>(
        &self,
        registry: &'a mut Registry,
        node: &NodeId,
    ) -> PubSubResult<&'a mut Link> {
        if let Some(dropped) = registry.take_dead_link(node) {
            warn!(
                "Session {} replacing failed link to {} ({} subscriptions dropped)",
                self.shared.id, node, dropped
            );
        }

        if !registry.links.contains_key(node) {
            let (writer, commands) = mpsc::unbounded_channel();
            let link_id = Uuid::new_v4();

            self.shared
                .controls
                .send(Control::Connect {
                    node: node.clone(),
                    link_id,
                    commands,
                })
                .map_err(|_| Error::AlreadyClosed)?;

            debug!("Session {} opening link to {}", self.shared.id, node);
            registry.links.insert(node.clone(), Link::new(link_id, writer));
        }

        registry.links.get_mut(node).ok_or(Error::AlreadyClosed)
    }
}

/// A subscription session bound to a connection pool.
///
/// Queue initial subscriptions through [`Session::handle`], then call
/// [`Session::join`] to run the session to completion.
pub struct Session<P>
where
    P: ConnectionPool,
{
    handle: SessionHandle,
    pool: Arc<P>,
    dispatcher: Arc<EventDispatcher>,
    controls: mpsc::UnboundedReceiver<Control>,
    config: PubSubConfig,
}

impl<P> Session<P>
where
    P: ConnectionPool,
{
    /// Create a session; nothing is sent until subscriptions are queued
    pub fn new(
        topology: Arc<dyn Topology>,
        pool: Arc<P>,
        callbacks: Callbacks,
        config: PubSubConfig,
    ) -> Self {
        let (controls_tx, controls) = mpsc::unbounded_channel();

        Self {
            handle: SessionHandle {
                shared: Arc::new(SessionShared::new(topology, controls_tx)),
            },
            pool,
            dispatcher: Arc::new(EventDispatcher::new(callbacks)),
            controls,
            config,
        }
    }

    /// A handle controlling this session
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Run until every subscription is gone or the session is closed.
    ///
    /// Returns `Idle` when the session drained cleanly and `Closed` when it
    /// was closed or lost a connection along the way.
    ///
    /// # Errors
    /// Returns `Error::Timeout` if the idle timeout closed the session.
    pub async fn join(mut self) -> PubSubResult<SessionOutcome> {
        let shared = self.handle.shared.clone();
        let mut links = JoinSet::new();

        info!("Session {} running", shared.id);

        loop {
            if links.is_empty() && shared.try_finish() {
                break;
            }

            tokio::select! {
                biased;
                () = shared.cancel.cancelled() => {
                    debug!("Session {} cancelled", shared.id);
                    break;
                }
                Some(Control::Connect { node, link_id, commands }) = self.controls.recv() => {
                    links.spawn(run_link(
                        LinkContext {
                            shared: shared.clone(),
                            pool: self.pool.clone(),
                            dispatcher: self.dispatcher.clone(),
                            node,
                            link_id,
                            connect_timeout: self.config.connect_timeout(),
                            idle_timeout: self.config.idle_timeout(),
                        },
                        commands,
                    ));
                }
                Some(joined) = links.join_next(), if !links.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Session {} link task failed: {}", shared.id, e);
                    }
                }
            }
        }

        while let Some(joined) = links.join_next().await {
            if let Err(e) = joined {
                warn!("Session {} link task failed: {}", shared.id, e);
            }
        }

        let outcome = shared.outcome();
        info!("Session {} finished: {:?}", shared.id, outcome);
        outcome
    }
}

struct LinkContext<P> {
    shared: Arc<SessionShared>,
    pool: Arc<P>,
    dispatcher: Arc<EventDispatcher>,
    node: NodeId,
    link_id: Uuid,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
}

enum LinkEnd {
    /// Nothing left subscribed; the connection is clean
    Drained,
    /// Session closed or link superseded
    Cancelled,
    /// Connection failed or the node sent something unusable
    Lost(String),
}

async fn run_link<P>(ctx: LinkContext<P>, mut commands: mpsc::UnboundedReceiver<Command>)
where
    P: ConnectionPool,
{
    let LinkContext {
        shared,
        pool,
        dispatcher,
        node,
        link_id,
        connect_timeout,
        idle_timeout,
    } = ctx;

    let acquired = tokio::select! {
        biased;
        () = shared.cancel.cancelled() => return,
        result = timeout(connect_timeout, pool.acquire(&node)) => result,
    };

    let conn = match acquired {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => {
            shared.lose_link(&node, link_id, &e.to_string());
            return;
        }
        Err(_) => {
            shared.lose_link(&node, link_id, &TransportError::Timeout.to_string());
            return;
        }
    };

    debug!(
        "Session {} link to {} using connection {}",
        shared.id,
        node,
        conn.id()
    );

    let writer = tokio::spawn({
        let conn = conn.clone();
        async move {
            while let Some(command) = commands.recv().await {
                trace!("Writing {} to {}", command, conn.node());
                conn.send(command).await?;
            }
            Ok::<(), TransportError>(())
        }
    });

    let handle = SessionHandle {
        shared: shared.clone(),
    };
    let end = read_loop(&handle, &dispatcher, &*conn, &node, link_id, idle_timeout).await;

    match &end {
        LinkEnd::Drained => {
            // The registry dropped the link's sender, so the writer stops once
            // anything still queued has been sent
            if let Ok(Err(e)) = writer.await {
                debug!("Writer for {} stopped: {}", node, e);
            }
        }
        LinkEnd::Cancelled | LinkEnd::Lost(_) => {
            writer.abort();
            let _ = conn.close().await;
        }
    }

    if let LinkEnd::Lost(reason) = &end {
        shared.lose_link(&node, link_id, reason);
    }

    pool.release(conn).await;
}

async fn read_loop(
    handle: &SessionHandle,
    dispatcher: &EventDispatcher,
    conn: &dyn Connection,
    node: &NodeId,
    link_id: Uuid,
    idle_timeout: Option<Duration>,
) -> LinkEnd {
    let shared = &handle.shared;

    loop {
        let received = tokio::select! {
            biased;
            () = shared.cancel.cancelled() => return LinkEnd::Cancelled,
            received = next_reply(conn, idle_timeout) => received,
        };

        let reply = match received {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                warn!(
                    "Session {} heard nothing from {} within its idle timeout",
                    shared.id, node
                );
                shared.time_out();
                return LinkEnd::Cancelled;
            }
            Err(e) => return LinkEnd::Lost(e.to_string()),
        };

        let frame = match PushFrame::try_from(reply) {
            Ok(frame) => frame,
            Err(e) => return LinkEnd::Lost(e.to_string()),
        };

        trace!("Session {} received {:?} from {}", shared.id, frame, node);

        if shared.cancel.is_cancelled() {
            return LinkEnd::Cancelled;
        }
        if !shared.apply(node, link_id, &frame) {
            return LinkEnd::Cancelled;
        }

        dispatcher.dispatch(handle, &frame);

        if shared.finish_if_drained(node, link_id) {
            return LinkEnd::Drained;
        }
    }
}

/// Next frame, or `None` if the idle timeout elapsed first
async fn next_reply(
    conn: &dyn Connection,
    idle_timeout: Option<Duration>,
) -> Result<Option<Reply>, TransportError> {
    match idle_timeout {
        Some(limit) => match timeout(limit, conn.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        },
        None => conn.recv().await.map(Some),
    }
}
