//! Chat rooms over a three-node in-memory cluster.
//!
//! Run with `RUST_LOG=keyspace_pubsub=debug` to watch routing decisions.

use std::sync::Arc;
use std::time::Duration;

use keyspace_pubsub::{Callbacks, ClusterPubSub, PubSubResult};
use keyspace_pubsub_memory::{MemoryCluster, MemoryConnectionPool};
use keyspace_topology::TopologyManager;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> PubSubResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cluster = MemoryCluster::with_node_count(3);
    let topology = Arc::new(TopologyManager::new(Arc::new(cluster.adaptor())));
    topology.start().await?;

    let pool = Arc::new(MemoryConnectionPool::new(cluster.clone()));
    let client = ClusterPubSub::new(topology.clone(), pool);

    // A lobby listener that leaves after hearing "bye"
    let lobby = client.open_session(
        Callbacks::new()
            .on_subscribe(|_, channel, count| info!("joined {} ({} active)", channel, count))
            .on_message(|session, channel, payload| {
                let text = String::from_utf8_lossy(payload);
                info!("[{}] {}", channel, text);
                if text == "bye" {
                    let _ = session.unsubscribe([channel]);
                }
            })
            .on_unsubscribe(|_, channel, count| info!("left {} ({} active)", channel, count)),
    );
    lobby.handle().subscribe(["lobby"])?;
    let lobby_handle = lobby.handle();
    let lobby = tokio::spawn(lobby.join());

    // Rooms tagged with the same hash tag share a slot and so a node
    let rooms = client.open_session(
        Callbacks::new().on_smessage(|session, channel, payload| {
            info!("[{}] {}", channel, String::from_utf8_lossy(payload));
            if channel == "{rooms}.random" {
                let _ = session.sunsubscribe_all();
            }
        }),
    );
    rooms.handle().ssubscribe(["{rooms}.general", "{rooms}.random"])?;
    let rooms_handle = rooms.handle();
    let rooms = tokio::spawn(rooms.join());

    while lobby_handle.subscriptions(keyspace_pubsub::Mode::Classic).is_empty()
        || rooms_handle.subscriptions(keyspace_pubsub::Mode::Sharded).len() < 2
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    info!("channels: {:?}", client.channels(None).await?.value);
    info!("shard channels: {:?}", client.shardchannels(None).await?.value);
    info!(
        "room subscribers: {:?}",
        client
            .shardnumsub(&["{rooms}.general", "{rooms}.random", "{rooms}.empty"])
            .await?
            .value
    );

    client.publish("lobby", "hello everyone").await?;
    client.spublish("{rooms}.general", "anyone here?").await?;
    client.spublish("{rooms}.random", "closing up").await?;
    client.publish("lobby", "bye").await?;

    for (name, session) in [("lobby", lobby), ("rooms", rooms)] {
        match session.await {
            Ok(outcome) => info!("{} session ended: {:?}", name, outcome?),
            Err(e) => info!("{} session task failed: {}", name, e),
        }
    }

    info!("channels after leaving: {:?}", client.channels(None).await?.value);
    topology.shutdown().await;
    Ok(())
}
