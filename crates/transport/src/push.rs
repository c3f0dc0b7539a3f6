//! Out-of-band frames delivered on a subscribed connection.

use crate::error::TransportError;
use crate::reply::Reply;

use bytes::Bytes;

/// Kind of a subscription acknowledgement.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PushKind {
    /// `subscribe`
    Subscribe,
    /// `unsubscribe`
    Unsubscribe,
    /// `psubscribe`
    PSubscribe,
    /// `punsubscribe`
    PUnsubscribe,
    /// `ssubscribe`
    SSubscribe,
    /// `sunsubscribe`
    SUnsubscribe,
}

impl PushKind {
    /// Parse the lower-case kind token of an acknowledgement frame
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            "psubscribe" => Some(Self::PSubscribe),
            "punsubscribe" => Some(Self::PUnsubscribe),
            "ssubscribe" => Some(Self::SSubscribe),
            "sunsubscribe" => Some(Self::SUnsubscribe),
            _ => None,
        }
    }

    /// The kind token as sent on the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::PSubscribe => "psubscribe",
            Self::PUnsubscribe => "punsubscribe",
            Self::SSubscribe => "ssubscribe",
            Self::SUnsubscribe => "sunsubscribe",
        }
    }

    /// Whether this acknowledges a subscription being added
    #[must_use]
    pub const fn is_subscribe(self) -> bool {
        matches!(self, Self::Subscribe | Self::PSubscribe | Self::SSubscribe)
    }

    /// Whether this belongs to the sharded family
    #[must_use]
    pub const fn is_sharded(self) -> bool {
        matches!(self, Self::SSubscribe | Self::SUnsubscribe)
    }
}

/// A decoded push frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PushFrame {
    /// Subscription acknowledgement.
    ///
    /// `count` is the number of subscriptions of the acknowledged family still
    /// held by the connection after this change. `channel` is `None` when an
    /// unsubscribe-all arrives while nothing was subscribed.
    Ack {
        /// Acknowledged operation
        kind: PushKind,
        /// Channel or pattern the acknowledgement refers to
        channel: Option<String>,
        /// Remaining subscription count
        count: usize,
    },
    /// Message published to a subscribed channel
    Message {
        /// Channel the message was published on
        channel: String,
        /// Message body
        payload: Bytes,
    },
    /// Message matched by a subscribed pattern
    PMessage {
        /// Pattern that matched
        pattern: String,
        /// Channel the message was published on
        channel: String,
        /// Message body
        payload: Bytes,
    },
    /// Message published to a subscribed shard channel
    SMessage {
        /// Shard channel the message was published on
        channel: String,
        /// Message body
        payload: Bytes,
    },
}

impl TryFrom<Reply> for PushFrame {
    type Error = TransportError;

    fn try_from(reply: Reply) -> Result<Self, Self::Error> {
        if let Reply::Error(message) = reply {
            return Err(TransportError::Protocol(format!(
                "error reply on subscribed connection: {message}"
            )));
        }

        let items = reply.into_array()?;
        let mut items = items.into_iter();
        let kind = items
            .next()
            .ok_or_else(|| TransportError::Protocol("empty push frame".to_string()))?
            .into_string()?;

        let rest: Vec<Reply> = items.collect();
        let malformed = || {
            TransportError::Protocol(format!("malformed {kind} frame with {} fields", rest.len()))
        };

        match kind.as_str() {
            "message" | "smessage" => {
                let [channel, payload]: [Reply; 2] =
                    rest.clone().try_into().map_err(|_| malformed())?;
                let channel = channel.into_string()?;
                let payload = into_payload(payload)?;
                Ok(if kind == "message" {
                    Self::Message { channel, payload }
                } else {
                    Self::SMessage { channel, payload }
                })
            }
            "pmessage" => {
                let [pattern, channel, payload]: [Reply; 3] =
                    rest.clone().try_into().map_err(|_| malformed())?;
                Ok(Self::PMessage {
                    pattern: pattern.into_string()?,
                    channel: channel.into_string()?,
                    payload: into_payload(payload)?,
                })
            }
            name => {
                let push_kind = PushKind::from_name(name).ok_or_else(|| {
                    TransportError::Protocol(format!("unknown push kind {name}"))
                })?;
                let [channel, count]: [Reply; 2] =
                    rest.clone().try_into().map_err(|_| malformed())?;
                let channel = match channel {
                    Reply::Nil => None,
                    other => Some(other.into_string()?),
                };
                let count = usize::try_from(count.into_integer()?).map_err(|_| {
                    TransportError::Protocol("negative subscription count".to_string())
                })?;
                Ok(Self::Ack {
                    kind: push_kind,
                    channel,
                    count,
                })
            }
        }
    }
}

fn into_payload(reply: Reply) -> Result<Bytes, TransportError> {
    match reply {
        Reply::Bulk(bytes) => Ok(bytes),
        Reply::Status(s) => Ok(Bytes::from(s)),
        other => Err(TransportError::Protocol(format!(
            "expected message payload, got {other:?}"
        ))),
    }
}

impl From<PushFrame> for Reply {
    fn from(frame: PushFrame) -> Self {
        match frame {
            PushFrame::Ack {
                kind,
                channel,
                count,
            } => Self::Array(vec![
                Self::bulk(kind.as_str()),
                channel.map_or(Self::Nil, Self::bulk),
                Self::Integer(i64::try_from(count).unwrap_or(i64::MAX)),
            ]),
            PushFrame::Message { channel, payload } => Self::Array(vec![
                Self::bulk("message"),
                Self::bulk(channel),
                Self::Bulk(payload),
            ]),
            PushFrame::PMessage {
                pattern,
                channel,
                payload,
            } => Self::Array(vec![
                Self::bulk("pmessage"),
                Self::bulk(pattern),
                Self::bulk(channel),
                Self::Bulk(payload),
            ]),
            PushFrame::SMessage { channel, payload } => Self::Array(vec![
                Self::bulk("smessage"),
                Self::bulk(channel),
                Self::Bulk(payload),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ack() {
        let reply = Reply::Array(vec![
            Reply::bulk("ssubscribe"),
            Reply::bulk("{channel}1"),
            Reply::Integer(1),
        ]);
        assert_eq!(
            PushFrame::try_from(reply).unwrap(),
            PushFrame::Ack {
                kind: PushKind::SSubscribe,
                channel: Some("{channel}1".into()),
                count: 1,
            }
        );
    }

    #[test]
    fn test_parse_nil_channel_ack() {
        let reply = Reply::Array(vec![
            Reply::bulk("unsubscribe"),
            Reply::Nil,
            Reply::Integer(0),
        ]);
        let frame = PushFrame::try_from(reply).unwrap();
        assert!(matches!(
            frame,
            PushFrame::Ack {
                kind: PushKind::Unsubscribe,
                channel: None,
                count: 0
            }
        ));
    }

    #[test]
    fn test_parse_pmessage() {
        let reply = Reply::Array(vec![
            Reply::bulk("pmessage"),
            Reply::bulk("h?llo"),
            Reply::bulk("hello"),
            Reply::bulk("world"),
        ]);
        assert_eq!(
            PushFrame::try_from(reply).unwrap(),
            PushFrame::PMessage {
                pattern: "h?llo".into(),
                channel: "hello".into(),
                payload: Bytes::from("world"),
            }
        );
    }

    #[test]
    fn test_rejects_malformed_frames() {
        let too_short = Reply::Array(vec![Reply::bulk("message"), Reply::bulk("c")]);
        assert!(PushFrame::try_from(too_short).is_err());

        let unknown = Reply::Array(vec![Reply::bulk("pong"), Reply::bulk("")]);
        assert!(PushFrame::try_from(unknown).is_err());

        let negative = Reply::Array(vec![
            Reply::bulk("subscribe"),
            Reply::bulk("c"),
            Reply::Integer(-1),
        ]);
        assert!(PushFrame::try_from(negative).is_err());

        let error = Reply::Error("MOVED 12182 node-3".into());
        assert!(PushFrame::try_from(error).is_err());
    }

    #[test]
    fn test_kind_families() {
        assert!(PushKind::PSubscribe.is_subscribe());
        assert!(!PushKind::PUnsubscribe.is_subscribe());
        assert!(PushKind::SUnsubscribe.is_sharded());
        assert!(!PushKind::Subscribe.is_sharded());
        assert_eq!(PushKind::from_name("punsubscribe"), Some(PushKind::PUnsubscribe));
    }
}
