//! Cluster-aware publish/subscribe for the keyspace client.
//!
//! This crate provides:
//! - Subscription sessions spanning several nodes (`Session`, `SessionHandle`)
//! - Callback routing for acknowledgements and messages (`Callbacks`)
//! - Cluster-wide `PUBSUB` introspection (`Aggregator`)
//! - Slot-aware publishing (`Publisher`)
//! - A single entry point over all of the above (`ClusterPubSub`)
//!
//! Routing comes from any `Topology` and connections from any
//! `ConnectionPool`; the crate never refreshes topology itself.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod aggregator;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod publisher;
pub mod runner;
pub mod session;
pub mod subscription_set;

pub use aggregator::{Aggregated, AggregatedReply, Aggregator};
pub use client::ClusterPubSub;
pub use config::PubSubConfig;
pub use dispatcher::{Callbacks, EventDispatcher};
pub use error::{Error, PubSubResult};
pub use publisher::Publisher;
pub use runner::NodeCommandRunner;
pub use session::{Session, SessionHandle, SessionOutcome, SessionState};
pub use subscription_set::{Mode, SubscriptionSet};
