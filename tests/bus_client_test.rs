// tests/bus_client_test.rs

//! `BusClient` behavior that doesn't require a live broker: publishing
//! queues messages in memory and reports them through `stats()` regardless
//! of whether the background reconnect loop has found a broker yet.

use consultease::config::BrokerConfig;
use consultease::core::bus::BusClient;
use consultease::core::events::EventBus;
use tokio::sync::broadcast;

#[tokio::test]
async fn publish_enqueues_even_while_disconnected() {
    let config = BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let bus = BusClient::connect(config, EventBus::new(), shutdown_rx);

    bus.publish("consultease/faculty/1/requests", b"{}".to_vec()).await;
    bus.publish("consultease/faculty/1/requests", b"{}".to_vec()).await;

    let stats = bus.stats().await;
    assert_eq!(stats.queue_depth, 2);
    assert!(!stats.connected);
}

#[tokio::test]
async fn subscribe_returns_a_receiver_per_pattern() {
    let config = BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let bus = BusClient::connect(config, EventBus::new(), shutdown_rx);

    let mut first = bus.subscribe("consultease/faculty/+/presence");
    let mut second = bus.subscribe("consultease/faculty/+/presence");

    // Subscribing to the same pattern twice shares one broadcast channel;
    // neither receiver has anything queued since nothing has been published.
    assert!(first.try_recv().is_err());
    assert!(second.try_recv().is_err());
}
