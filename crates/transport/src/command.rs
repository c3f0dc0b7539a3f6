//! Requests issued to cluster nodes.

use std::fmt;

use bytes::Bytes;

/// Introspection subcommands of `PUBSUB`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PubSubQuery {
    /// `PUBSUB CHANNELS [pattern]`
    Channels(Option<String>),
    /// `PUBSUB NUMSUB [channel ...]`
    NumSub(Vec<String>),
    /// `PUBSUB NUMPAT`
    NumPat,
    /// `PUBSUB SHARDCHANNELS [pattern]`
    ShardChannels(Option<String>),
    /// `PUBSUB SHARDNUMSUB [channel ...]`
    ShardNumSub(Vec<String>),
}

impl PubSubQuery {
    /// The subcommand token as sent on the wire
    #[must_use]
    pub const fn subcommand(&self) -> &'static str {
        match self {
            Self::Channels(_) => "CHANNELS",
            Self::NumSub(_) => "NUMSUB",
            Self::NumPat => "NUMPAT",
            Self::ShardChannels(_) => "SHARDCHANNELS",
            Self::ShardNumSub(_) => "SHARDNUMSUB",
        }
    }
}

/// A pub/sub request in its logical form.
///
/// Encoding to bytes is the protocol layer's concern; `to_args` gives the
/// argument vector in wire order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// `SUBSCRIBE channel ...`
    Subscribe(Vec<String>),
    /// `UNSUBSCRIBE [channel ...]`
    Unsubscribe(Vec<String>),
    /// `PSUBSCRIBE pattern ...`
    PSubscribe(Vec<String>),
    /// `PUNSUBSCRIBE [pattern ...]`
    PUnsubscribe(Vec<String>),
    /// `SSUBSCRIBE channel ...`
    SSubscribe(Vec<String>),
    /// `SUNSUBSCRIBE [channel ...]`
    SUnsubscribe(Vec<String>),
    /// `PUBLISH channel message`
    Publish {
        /// Target channel
        channel: String,
        /// Message body
        message: Bytes,
    },
    /// `SPUBLISH channel message`
    SPublish {
        /// Target shard channel
        channel: String,
        /// Message body
        message: Bytes,
    },
    /// `PUBSUB <subcommand> ...`
    PubSub(PubSubQuery),
}

impl Command {
    /// The command token as sent on the wire
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "SUBSCRIBE",
            Self::Unsubscribe(_) => "UNSUBSCRIBE",
            Self::PSubscribe(_) => "PSUBSCRIBE",
            Self::PUnsubscribe(_) => "PUNSUBSCRIBE",
            Self::SSubscribe(_) => "SSUBSCRIBE",
            Self::SUnsubscribe(_) => "SUNSUBSCRIBE",
            Self::Publish { .. } => "PUBLISH",
            Self::SPublish { .. } => "SPUBLISH",
            Self::PubSub(_) => "PUBSUB",
        }
    }

    /// Whether the reply to this command arrives as push frames rather than a
    /// single reply
    #[must_use]
    pub const fn is_subscription_control(&self) -> bool {
        matches!(
            self,
            Self::Subscribe(_)
                | Self::Unsubscribe(_)
                | Self::PSubscribe(_)
                | Self::PUnsubscribe(_)
                | Self::SSubscribe(_)
                | Self::SUnsubscribe(_)
        )
    }

    /// Full argument vector, command token first
    #[must_use]
    pub fn to_args(&self) -> Vec<Bytes> {
        let mut args = vec![Bytes::from_static(self.name().as_bytes())];

        match self {
            Self::Subscribe(names)
            | Self::Unsubscribe(names)
            | Self::PSubscribe(names)
            | Self::PUnsubscribe(names)
            | Self::SSubscribe(names)
            | Self::SUnsubscribe(names) => {
                args.extend(names.iter().map(|n| Bytes::from(n.clone())));
            }
            Self::Publish { channel, message } | Self::SPublish { channel, message } => {
                args.push(Bytes::from(channel.clone()));
                args.push(message.clone());
            }
            Self::PubSub(query) => {
                args.push(Bytes::from_static(query.subcommand().as_bytes()));
                match query {
                    PubSubQuery::Channels(pattern) | PubSubQuery::ShardChannels(pattern) => {
                        args.extend(pattern.iter().map(|p| Bytes::from(p.clone())));
                    }
                    PubSubQuery::NumSub(channels) | PubSubQuery::ShardNumSub(channels) => {
                        args.extend(channels.iter().map(|c| Bytes::from(c.clone())));
                    }
                    PubSubQuery::NumPat => {}
                }
            }
        }

        args
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self.to_args();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<Bytes>) -> Vec<String> {
        args.iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect()
    }

    #[test]
    fn test_argument_order() {
        let cmd = Command::Subscribe(vec!["channel1".into(), "channel2".into()]);
        assert_eq!(strings(cmd.to_args()), ["SUBSCRIBE", "channel1", "channel2"]);

        let cmd = Command::SPublish {
            channel: "{channel}1".into(),
            message: Bytes::from("one"),
        };
        assert_eq!(strings(cmd.to_args()), ["SPUBLISH", "{channel}1", "one"]);

        let cmd = Command::PubSub(PubSubQuery::NumSub(vec!["a".into(), "b".into()]));
        assert_eq!(strings(cmd.to_args()), ["PUBSUB", "NUMSUB", "a", "b"]);
        assert_eq!(cmd.to_string(), "PUBSUB NUMSUB a b");
    }

    #[test]
    fn test_optional_arguments() {
        assert_eq!(
            strings(Command::Unsubscribe(vec![]).to_args()),
            ["UNSUBSCRIBE"]
        );
        assert_eq!(
            strings(Command::PubSub(PubSubQuery::Channels(None)).to_args()),
            ["PUBSUB", "CHANNELS"]
        );
        assert_eq!(
            strings(Command::PubSub(PubSubQuery::ShardChannels(Some("ch*".into()))).to_args()),
            ["PUBSUB", "SHARDCHANNELS", "ch*"]
        );
        assert_eq!(
            strings(Command::PubSub(PubSubQuery::NumPat).to_args()),
            ["PUBSUB", "NUMPAT"]
        );
    }

    #[test]
    fn test_subscription_control() {
        assert!(Command::PSubscribe(vec!["h*".into()]).is_subscription_control());
        assert!(Command::SUnsubscribe(vec![]).is_subscription_control());
        assert!(!Command::PubSub(PubSubQuery::NumPat).is_subscription_control());
        assert!(
            !Command::Publish {
                channel: "c".into(),
                message: Bytes::new()
            }
            .is_subscription_control()
        );
    }
}
