//! Routing push frames to user callbacks

use crate::session::SessionHandle;

use std::fmt::{self, Debug};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use bytes::Bytes;
use keyspace_transport::{PushFrame, PushKind};
use tracing::error;

/// Called with `(session, channel, count)` for subscription acknowledgements
pub type AckCallback = Arc<dyn Fn(&SessionHandle, &str, usize) + Send + Sync>;

/// Called with `(session, channel, payload)` for channel messages
pub type MessageCallback = Arc<dyn Fn(&SessionHandle, &str, &Bytes) + Send + Sync>;

/// Called with `(session, pattern, channel, payload)` for pattern messages
pub type PatternMessageCallback = Arc<dyn Fn(&SessionHandle, &str, &str, &Bytes) + Send + Sync>;

/// Callbacks registered when a session is opened.
///
/// Every slot is optional; events without a callback are dropped.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_subscribe: Option<AckCallback>,
    on_unsubscribe: Option<AckCallback>,
    on_psubscribe: Option<AckCallback>,
    on_punsubscribe: Option<AckCallback>,
    on_ssubscribe: Option<AckCallback>,
    on_sunsubscribe: Option<AckCallback>,
    on_message: Option<MessageCallback>,
    on_pmessage: Option<PatternMessageCallback>,
    on_smessage: Option<MessageCallback>,
}

macro_rules! ack_setter {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[must_use]
        pub fn $name<F>(mut self, f: F) -> Self
        where
            F: Fn(&SessionHandle, &str, usize) + Send + Sync + 'static,
        {
            self.$name = Some(Arc::new(f));
            self
        }
    };
}

impl Callbacks {
    /// No callbacks registered
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    ack_setter!(on_subscribe, "Called when a channel subscription is acknowledged");
    ack_setter!(on_unsubscribe, "Called when a channel unsubscription is acknowledged");
    ack_setter!(on_psubscribe, "Called when a pattern subscription is acknowledged");
    ack_setter!(on_punsubscribe, "Called when a pattern unsubscription is acknowledged");
    ack_setter!(on_ssubscribe, "Called when a shard channel subscription is acknowledged");
    ack_setter!(on_sunsubscribe, "Called when a shard channel unsubscription is acknowledged");

    /// Called for each message on a subscribed channel
    #[must_use]
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionHandle, &str, &Bytes) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Called for each message matched by a subscribed pattern
    #[must_use]
    pub fn on_pmessage<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionHandle, &str, &str, &Bytes) + Send + Sync + 'static,
    {
        self.on_pmessage = Some(Arc::new(f));
        self
    }

    /// Called for each message on a subscribed shard channel
    #[must_use]
    pub fn on_smessage<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionHandle, &str, &Bytes) + Send + Sync + 'static,
    {
        self.on_smessage = Some(Arc::new(f));
        self
    }

    const fn ack(&self, kind: PushKind) -> Option<&AckCallback> {
        match kind {
            PushKind::Subscribe => self.on_subscribe.as_ref(),
            PushKind::Unsubscribe => self.on_unsubscribe.as_ref(),
            PushKind::PSubscribe => self.on_psubscribe.as_ref(),
            PushKind::PUnsubscribe => self.on_punsubscribe.as_ref(),
            PushKind::SSubscribe => self.on_ssubscribe.as_ref(),
            PushKind::SUnsubscribe => self.on_sunsubscribe.as_ref(),
        }
    }
}

impl Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_subscribe", &self.on_subscribe.is_some())
            .field("on_unsubscribe", &self.on_unsubscribe.is_some())
            .field("on_psubscribe", &self.on_psubscribe.is_some())
            .field("on_punsubscribe", &self.on_punsubscribe.is_some())
            .field("on_ssubscribe", &self.on_ssubscribe.is_some())
            .field("on_sunsubscribe", &self.on_sunsubscribe.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_pmessage", &self.on_pmessage.is_some())
            .field("on_smessage", &self.on_smessage.is_some())
            .finish()
    }
}

/// Invokes the callback matching each frame.
#[derive(Clone, Debug, Default)]
pub struct EventDispatcher {
    callbacks: Callbacks,
}

impl EventDispatcher {
    /// Create a dispatcher over `callbacks`
    #[must_use]
    pub const fn new(callbacks: Callbacks) -> Self {
        Self { callbacks }
    }

    /// Run the callback for `frame`, if one is registered.
    ///
    /// Returns whether a callback ran. Acknowledgements without a channel
    /// (an unsubscribe-all with nothing subscribed) have nothing to report and
    /// are skipped. A panicking callback is logged and does not stop delivery.
    pub fn dispatch(&self, session: &SessionHandle, frame: &PushFrame) -> bool {
        match frame {
            PushFrame::Ack {
                kind,
                channel: Some(channel),
                count,
            } => self
                .callbacks
                .ack(*kind)
                .is_some_and(|cb| guarded(kind.as_str(), || cb(session, channel.as_str(), *count))),
            PushFrame::Ack { channel: None, .. } => false,
            PushFrame::Message { channel, payload } => {
                self.callbacks.on_message.as_ref().is_some_and(|cb| {
                    guarded("message", || cb(session, channel.as_str(), payload))
                })
            }
            PushFrame::PMessage {
                pattern,
                channel,
                payload,
            } => self.callbacks.on_pmessage.as_ref().is_some_and(|cb| {
                guarded("pmessage", || {
                    cb(session, pattern.as_str(), channel.as_str(), payload);
                })
            }),
            PushFrame::SMessage { channel, payload } => {
                self.callbacks.on_smessage.as_ref().is_some_and(|cb| {
                    guarded("smessage", || cb(session, channel.as_str(), payload))
                })
            }
        }
    }
}

fn guarded(event: &str, f: impl FnOnce()) -> bool {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("The {} callback panicked", event);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use keyspace_topology::{NodeId, SlotMap};

    fn handle() -> SessionHandle {
        let nodes = [NodeId::from_seed(1)];
        SessionHandle::detached(Arc::new(SlotMap::split_evenly(&nodes)))
    }

    #[test]
    fn test_routes_by_kind() {
        let acks = Arc::new(AtomicUsize::new(0));
        let messages = Arc::new(AtomicUsize::new(0));

        let dispatcher = EventDispatcher::new(
            Callbacks::new()
                .on_sunsubscribe({
                    let acks = acks.clone();
                    move |_, channel, count| {
                        assert_eq!(channel, "{a}1");
                        assert_eq!(count, 0);
                        acks.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .on_pmessage({
                    let messages = messages.clone();
                    move |_, pattern, channel, payload| {
                        assert_eq!((pattern, channel), ("h*", "hello"));
                        assert_eq!(payload, &Bytes::from("world"));
                        messages.fetch_add(1, Ordering::SeqCst);
                    }
                }),
        );
        let session = handle();

        assert!(dispatcher.dispatch(
            &session,
            &PushFrame::Ack {
                kind: PushKind::SUnsubscribe,
                channel: Some("{a}1".into()),
                count: 0,
            }
        ));
        assert!(dispatcher.dispatch(
            &session,
            &PushFrame::PMessage {
                pattern: "h*".into(),
                channel: "hello".into(),
                payload: Bytes::from("world"),
            }
        ));

        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert_eq!(messages.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_callbacks_are_ignored() {
        let dispatcher = EventDispatcher::default();
        let session = handle();

        assert!(!dispatcher.dispatch(
            &session,
            &PushFrame::Message {
                channel: "news".into(),
                payload: Bytes::new(),
            }
        ));
        assert!(!dispatcher.dispatch(
            &session,
            &PushFrame::Ack {
                kind: PushKind::Subscribe,
                channel: Some("news".into()),
                count: 1,
            }
        ));
    }

    #[test]
    fn test_nil_channel_ack_is_skipped() {
        let called = Arc::new(AtomicUsize::new(0));
        let dispatcher = EventDispatcher::new(Callbacks::new().on_unsubscribe({
            let called = called.clone();
            move |_, _, _| {
                called.fetch_add(1, Ordering::SeqCst);
            }
        }));

        assert!(!dispatcher.dispatch(
            &handle(),
            &PushFrame::Ack {
                kind: PushKind::Unsubscribe,
                channel: None,
                count: 0,
            }
        ));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let dispatcher = EventDispatcher::new(
            Callbacks::new().on_message(|_, _, _| panic!("callback failure")),
        );

        assert!(dispatcher.dispatch(
            &handle(),
            &PushFrame::Message {
                channel: "news".into(),
                payload: Bytes::new(),
            }
        ));
    }
}
