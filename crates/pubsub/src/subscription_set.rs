//! Which node holds each acknowledged subscription of a session

use std::collections::{BTreeSet, HashMap};

use keyspace_topology::NodeId;
use keyspace_transport::{Command, PushKind};

/// Subscription family.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Mode {
    /// Cluster-global channels (`SUBSCRIBE`)
    Classic,
    /// Cluster-global glob patterns (`PSUBSCRIBE`)
    Pattern,
    /// Slot-owned shard channels (`SSUBSCRIBE`)
    Sharded,
}

impl Mode {
    /// The family an acknowledgement belongs to
    #[must_use]
    pub const fn of(kind: PushKind) -> Self {
        match kind {
            PushKind::Subscribe | PushKind::Unsubscribe => Self::Classic,
            PushKind::PSubscribe | PushKind::PUnsubscribe => Self::Pattern,
            PushKind::SSubscribe | PushKind::SUnsubscribe => Self::Sharded,
        }
    }

    /// Whether names are routed by hash slot
    #[must_use]
    pub const fn is_sharded(self) -> bool {
        matches!(self, Self::Sharded)
    }

    /// The subscribe command of this family
    #[must_use]
    pub fn subscribe(self, names: Vec<String>) -> Command {
        match self {
            Self::Classic => Command::Subscribe(names),
            Self::Pattern => Command::PSubscribe(names),
            Self::Sharded => Command::SSubscribe(names),
        }
    }

    /// The unsubscribe command of this family; no names means all
    #[must_use]
    pub fn unsubscribe(self, names: Vec<String>) -> Command {
        match self {
            Self::Classic => Command::Unsubscribe(names),
            Self::Pattern => Command::PUnsubscribe(names),
            Self::Sharded => Command::SUnsubscribe(names),
        }
    }
}

type Entry = (Mode, String);

/// Two-way index between nodes and the subscriptions they hold.
///
/// A name of a given mode lives under exactly one node at a time; inserting
/// it under another node moves it.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionSet {
    owners: HashMap<Entry, NodeId>,
    by_node: HashMap<NodeId, BTreeSet<Entry>>,
}

impl SubscriptionSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name` as held by `node`; returns the node that held it before
    pub fn insert(&mut self, mode: Mode, name: String, node: NodeId) -> Option<NodeId> {
        let entry = (mode, name);
        let previous = self.owners.insert(entry.clone(), node.clone());

        if let Some(old) = &previous {
            self.detach(old, &entry);
        }
        self.by_node.entry(node).or_default().insert(entry);

        previous
    }

    /// Forget `name`; returns the node that held it
    pub fn remove(&mut self, mode: Mode, name: &str) -> Option<NodeId> {
        let entry = (mode, name.to_string());
        let node = self.owners.remove(&entry)?;
        self.detach(&node, &entry);
        Some(node)
    }

    /// Forget everything held by `node`, returning what it held
    pub fn remove_node(&mut self, node: &NodeId) -> Vec<(Mode, String)> {
        let entries = self.by_node.remove(node).unwrap_or_default();
        for entry in &entries {
            self.owners.remove(entry);
        }
        entries.into_iter().collect()
    }

    /// The node holding `name`
    #[must_use]
    pub fn node_of(&self, mode: Mode, name: &str) -> Option<&NodeId> {
        self.owners.get(&(mode, name.to_string()))
    }

    /// All names of `mode`, sorted
    #[must_use]
    pub fn names(&self, mode: Mode) -> Vec<String> {
        let mut names: Vec<String> = self
            .owners
            .keys()
            .filter(|(m, _)| *m == mode)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Names of `mode` held by `node`, sorted
    #[must_use]
    pub fn names_on(&self, node: &NodeId, mode: Mode) -> Vec<String> {
        self.by_node
            .get(node)
            .into_iter()
            .flatten()
            .filter(|(m, _)| *m == mode)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Nodes holding at least one subscription
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.by_node.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Number of subscriptions across all modes
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether nothing is subscribed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    fn detach(&mut self, node: &NodeId, entry: &Entry) {
        if let Some(entries) = self.by_node.get_mut(node) {
            entries.remove(entry);
            if entries.is_empty() {
                self.by_node.remove(node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_lives_under_one_node() {
        let node1 = NodeId::from_seed(1);
        let node2 = NodeId::from_seed(2);
        let mut set = SubscriptionSet::new();

        assert_eq!(set.insert(Mode::Sharded, "{a}1".into(), node1.clone()), None);
        assert_eq!(
            set.insert(Mode::Sharded, "{a}1".into(), node2.clone()),
            Some(node1.clone())
        );

        assert_eq!(set.node_of(Mode::Sharded, "{a}1"), Some(&node2));
        assert!(set.names_on(&node1, Mode::Sharded).is_empty());
        assert_eq!(set.nodes(), vec![node2]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_modes_are_independent() {
        let node = NodeId::from_seed(1);
        let mut set = SubscriptionSet::new();

        set.insert(Mode::Classic, "news".into(), node.clone());
        set.insert(Mode::Pattern, "news".into(), node.clone());

        assert_eq!(set.len(), 2);
        assert_eq!(set.remove(Mode::Classic, "news"), Some(node.clone()));
        assert_eq!(set.names(Mode::Pattern), vec!["news"]);
        assert_eq!(set.remove(Mode::Classic, "news"), None);
    }

    #[test]
    fn test_remove_node() {
        let node1 = NodeId::from_seed(1);
        let node2 = NodeId::from_seed(2);
        let mut set = SubscriptionSet::new();

        set.insert(Mode::Sharded, "{a}1".into(), node1.clone());
        set.insert(Mode::Sharded, "{a}2".into(), node1.clone());
        set.insert(Mode::Sharded, "{b}1".into(), node2.clone());

        let removed = set.remove_node(&node1);
        assert_eq!(removed.len(), 2);
        assert_eq!(set.names(Mode::Sharded), vec!["{b}1"]);
        assert!(set.node_of(Mode::Sharded, "{a}1").is_none());

        set.remove(Mode::Sharded, "{b}1");
        assert!(set.is_empty());
        assert!(set.nodes().is_empty());
    }

    #[test]
    fn test_commands_per_mode() {
        assert_eq!(
            Mode::Pattern.subscribe(vec!["h*".into()]),
            Command::PSubscribe(vec!["h*".into()])
        );
        assert_eq!(Mode::Sharded.unsubscribe(vec![]), Command::SUnsubscribe(vec![]));
        assert_eq!(Mode::of(PushKind::PUnsubscribe), Mode::Pattern);
    }
}
