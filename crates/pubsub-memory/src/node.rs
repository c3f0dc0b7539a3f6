//! Pub/sub state held by one simulated node.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use indexmap::IndexSet;
use keyspace_transport::{Command, PushFrame, PushKind, Reply};
use uuid::Uuid;

/// Subscriptions and reply queue of one client connection.
#[derive(Debug)]
pub struct ClientState {
    tx: flume::Sender<Reply>,
    channels: IndexSet<String>,
    patterns: IndexSet<String>,
    shard_channels: IndexSet<String>,
}

impl ClientState {
    fn new(tx: flume::Sender<Reply>) -> Self {
        Self {
            tx,
            channels: IndexSet::new(),
            patterns: IndexSet::new(),
            shard_channels: IndexSet::new(),
        }
    }

    /// Whether the connection is in subscribed mode
    pub fn is_subscribed(&self) -> bool {
        !self.channels.is_empty() || !self.patterns.is_empty() || !self.shard_channels.is_empty()
    }

    pub fn push(&self, reply: Reply) {
        // The receiving side may already be gone
        let _ = self.tx.send(reply);
    }

    /// Add subscriptions, acknowledging each name in request order
    pub fn add(&mut self, kind: PushKind, names: &[String]) {
        for name in names {
            self.set_mut(kind).insert(name.clone());
            self.ack(kind, Some(name.clone()));
        }
    }

    /// Remove subscriptions; no names means every subscription of the family
    pub fn remove(&mut self, kind: PushKind, names: &[String]) {
        let names: Vec<String> = if names.is_empty() {
            self.set_mut(kind).iter().cloned().collect()
        } else {
            names.to_vec()
        };

        if names.is_empty() {
            self.ack(kind, None);
            return;
        }

        for name in names {
            self.set_mut(kind).shift_remove(&name);
            self.ack(kind, Some(name));
        }
    }

    fn ack(&self, kind: PushKind, channel: Option<String>) {
        let count = if kind.is_sharded() {
            self.shard_channels.len()
        } else {
            self.channels.len() + self.patterns.len()
        };
        self.push(
            PushFrame::Ack {
                kind,
                channel,
                count,
            }
            .into(),
        );
    }

    fn set_mut(&mut self, kind: PushKind) -> &mut IndexSet<String> {
        match kind {
            PushKind::Subscribe | PushKind::Unsubscribe => &mut self.channels,
            PushKind::PSubscribe | PushKind::PUnsubscribe => &mut self.patterns,
            PushKind::SSubscribe | PushKind::SUnsubscribe => &mut self.shard_channels,
        }
    }
}

/// Everything one node knows about its clients.
#[derive(Debug, Default)]
pub struct NodeState {
    clients: HashMap<Uuid, ClientState>,
    unreachable: bool,
    command_counts: HashMap<String, usize>,
}

impl NodeState {
    pub fn register(&mut self, id: Uuid, tx: flume::Sender<Reply>) {
        self.clients.insert(id, ClientState::new(tx));
    }

    pub fn deregister(&mut self, id: &Uuid) -> bool {
        self.clients.remove(id).is_some()
    }

    pub fn client(&self, id: &Uuid) -> Option<&ClientState> {
        self.clients.get(id)
    }

    pub fn client_mut(&mut self, id: &Uuid) -> Option<&mut ClientState> {
        self.clients.get_mut(id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub const fn is_unreachable(&self) -> bool {
        self.unreachable
    }

    /// Mark the node unreachable; dropping every client closes its connection
    pub fn set_unreachable(&mut self, unreachable: bool) {
        self.unreachable = unreachable;
        if unreachable {
            self.clients.clear();
        }
    }

    pub fn record(&mut self, command: &Command) {
        *self.command_counts.entry(command_key(command)).or_default() += 1;
    }

    pub fn command_count(&self, key: &str) -> usize {
        self.command_counts.get(key).copied().unwrap_or_default()
    }

    pub fn reset_command_counts(&mut self) {
        self.command_counts.clear();
    }

    /// Active channels, optionally filtered by a glob pattern
    pub fn channels(&self, pattern: Option<&str>) -> Vec<String> {
        active(self.clients.values().map(|c| &c.channels), pattern)
    }

    pub fn shard_channels(&self, pattern: Option<&str>) -> Vec<String> {
        active(self.clients.values().map(|c| &c.shard_channels), pattern)
    }

    pub fn numsub(&self, names: &[String]) -> Reply {
        counts(names, |name| {
            self.clients
                .values()
                .filter(|c| c.channels.contains(name))
                .count()
        })
    }

    pub fn shard_numsub(&self, names: &[String]) -> Reply {
        counts(names, |name| {
            self.clients
                .values()
                .filter(|c| c.shard_channels.contains(name))
                .count()
        })
    }

    /// Number of distinct patterns subscribed on this node
    pub fn numpat(&self) -> usize {
        self.clients
            .values()
            .flat_map(|c| c.patterns.iter())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Deliver to channel and pattern subscribers; returns how many received it
    pub fn deliver(&self, channel: &str, payload: &Bytes) -> usize {
        let mut receivers = 0;

        for client in self.clients.values() {
            if client.channels.contains(channel) {
                client.push(
                    PushFrame::Message {
                        channel: channel.to_string(),
                        payload: payload.clone(),
                    }
                    .into(),
                );
                receivers += 1;
            }

            for pattern in client.patterns.iter().filter(|p| glob_matches(p, channel)) {
                client.push(
                    PushFrame::PMessage {
                        pattern: pattern.clone(),
                        channel: channel.to_string(),
                        payload: payload.clone(),
                    }
                    .into(),
                );
                receivers += 1;
            }
        }

        receivers
    }

    pub fn deliver_sharded(&self, channel: &str, payload: &Bytes) -> usize {
        let mut receivers = 0;

        for client in self.clients.values() {
            if client.shard_channels.contains(channel) {
                client.push(
                    PushFrame::SMessage {
                        channel: channel.to_string(),
                        payload: payload.clone(),
                    }
                    .into(),
                );
                receivers += 1;
            }
        }

        receivers
    }

    /// Drop shard subscriptions the node no longer owns, telling each client
    pub fn evict_shard_channels(&mut self, still_owned: impl Fn(&str) -> bool) {
        for client in self.clients.values_mut() {
            let moved: Vec<String> = client
                .shard_channels
                .iter()
                .filter(|c| !still_owned(c))
                .cloned()
                .collect();
            if !moved.is_empty() {
                client.remove(PushKind::SUnsubscribe, &moved);
            }
        }
    }
}

/// Key under which a command is counted, e.g. `SUBSCRIBE` or `PUBSUB NUMSUB`
pub fn command_key(command: &Command) -> String {
    match command {
        Command::PubSub(query) => format!("PUBSUB {}", query.subcommand()),
        other => other.name().to_string(),
    }
}

pub fn integer(n: usize) -> Reply {
    Reply::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

fn glob_matches(pattern: &str, name: &str) -> bool {
    glob::Pattern::new(pattern).is_ok_and(|p| p.matches(name))
}

fn active<'a>(
    sets: impl Iterator<Item = &'a IndexSet<String>>,
    pattern: Option<&str>,
) -> Vec<String> {
    sets.flat_map(IndexSet::iter)
        .filter(|name| pattern.is_none_or(|p| glob_matches(p, name)))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn counts(names: &[String], count: impl Fn(&String) -> usize) -> Reply {
    Reply::Array(
        names
            .iter()
            .flat_map(|name| [Reply::bulk(name.clone()), integer(count(name))])
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (ClientState, flume::Receiver<Reply>) {
        let (tx, rx) = flume::unbounded();
        (ClientState::new(tx), rx)
    }

    fn acks(rx: &flume::Receiver<Reply>) -> Vec<(PushKind, Option<String>, usize)> {
        rx.drain()
            .map(|reply| match PushFrame::try_from(reply).unwrap() {
                PushFrame::Ack {
                    kind,
                    channel,
                    count,
                } => (kind, channel, count),
                other => panic!("unexpected frame {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_counts_are_per_family() {
        let (mut client, rx) = client();

        client.add(PushKind::Subscribe, &["a".into(), "b".into()]);
        client.add(PushKind::PSubscribe, &["h*".into()]);
        client.add(PushKind::SSubscribe, &["{x}1".into()]);

        assert_eq!(
            acks(&rx),
            vec![
                (PushKind::Subscribe, Some("a".into()), 1),
                (PushKind::Subscribe, Some("b".into()), 2),
                (PushKind::PSubscribe, Some("h*".into()), 3),
                (PushKind::SSubscribe, Some("{x}1".into()), 1),
            ]
        );
    }

    #[test]
    fn test_unsubscribe_all() {
        let (mut client, rx) = client();

        client.remove(PushKind::Unsubscribe, &[]);
        assert_eq!(acks(&rx), vec![(PushKind::Unsubscribe, None, 0)]);

        client.add(PushKind::Subscribe, &["a".into(), "b".into()]);
        rx.drain();
        client.remove(PushKind::Unsubscribe, &[]);
        assert_eq!(
            acks(&rx),
            vec![
                (PushKind::Unsubscribe, Some("a".into()), 1),
                (PushKind::Unsubscribe, Some("b".into()), 0),
            ]
        );
        assert!(!client.is_subscribed());
    }

    #[test]
    fn test_introspection_and_delivery() {
        let mut node = NodeState::default();
        let (tx1, rx1) = flume::unbounded();
        let (tx2, rx2) = flume::unbounded();
        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();
        node.register(id1, tx1);
        node.register(id2, tx2);

        node.client_mut(&id1)
            .unwrap()
            .add(PushKind::Subscribe, &["news".into(), "sport".into()]);
        node.client_mut(&id2)
            .unwrap()
            .add(PushKind::Subscribe, &["news".into()]);
        node.client_mut(&id2)
            .unwrap()
            .add(PushKind::PSubscribe, &["n*".into()]);
        rx1.drain();
        rx2.drain();

        assert_eq!(node.channels(None), vec!["news", "sport"]);
        assert_eq!(node.channels(Some("s*")), vec!["sport"]);
        assert_eq!(node.numpat(), 1);
        assert_eq!(
            node.numsub(&["news".into(), "none".into()]),
            Reply::Array(vec![
                Reply::bulk("news"),
                Reply::Integer(2),
                Reply::bulk("none"),
                Reply::Integer(0),
            ])
        );

        assert_eq!(node.deliver("news", &Bytes::from("hi")), 3);
        assert_eq!(rx1.drain().count(), 1);
        assert_eq!(rx2.drain().count(), 2);
    }

    #[test]
    fn test_unreachable_drops_clients() {
        let mut node = NodeState::default();
        let (tx, rx) = flume::unbounded();
        node.register(Uuid::new_v4(), tx);

        node.set_unreachable(true);
        assert_eq!(node.client_count(), 0);
        assert!(rx.is_disconnected());
    }
}
