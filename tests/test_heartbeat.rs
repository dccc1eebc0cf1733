//! Session liveness and reconnection behavior of the bridge
//!
//! Time is passed explicitly to `tick`, so these tests step through
//! heartbeat intervals without sleeping.

use soilbridge::connection::ConnectionEvent;
use soilbridge::node::BridgeNode;
use soilbridge::protocol::Frame;
use soilbridge::testing::{test_config, MockNetwork, MockTransport};
use soilbridge::transport::SerialLink;
use std::time::{Duration, Instant};
use tokio::io::DuplexStream;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn bridge(network: &MockNetwork, transport: &MockTransport) -> (BridgeNode, DuplexStream) {
    let (bridge_end, sensor_end) = tokio::io::duplex(1024);
    let node = BridgeNode::new(
        &test_config(),
        Box::new(network.clone()),
        Box::new(transport.clone()),
        SerialLink::new(bridge_end),
    )
    .unwrap();
    (node, sensor_end)
}

fn ping_count(transport: &MockTransport) -> usize {
    let ping = Frame::ping().encode();
    transport.sent().iter().filter(|b| **b == ping).count()
}

#[tokio::test]
async fn test_pings_sent_on_interval() {
    let network = MockNetwork::single("9G");
    let transport = MockTransport::new();
    let (mut node, _serial) = bridge(&network, &transport);
    let t0 = Instant::now();

    node.tick(t0).await.unwrap();
    assert_eq!(ping_count(&transport), 0);

    node.tick(t0 + ms(20)).await.unwrap();
    assert_eq!(ping_count(&transport), 0);

    node.tick(t0 + ms(50)).await.unwrap();
    assert_eq!(ping_count(&transport), 1);

    node.tick(t0 + ms(100)).await.unwrap();
    assert_eq!(ping_count(&transport), 2);
}

#[tokio::test]
async fn test_silent_server_times_out_and_session_reopens() {
    let network = MockNetwork::single("9G");
    let transport = MockTransport::new();
    let (mut node, _serial) = bridge(&network, &transport);
    let t0 = Instant::now();

    node.tick(t0).await.unwrap();
    node.tick(t0 + ms(50)).await.unwrap();
    node.tick(t0 + ms(100)).await.unwrap();

    // A pong resets the silence window
    transport.push_bytes(&[102]);
    node.tick(t0 + ms(120)).await.unwrap();
    node.tick(t0 + ms(260)).await.unwrap();
    assert!(node.connection().session_state().is_connected());
    assert_eq!(transport.close_count(), 0);

    node.tick(t0 + ms(280)).await.unwrap();
    assert!(!node.connection().session_state().is_connected());
    assert_eq!(transport.close_count(), 1);

    node.tick(t0 + ms(281)).await.unwrap();
    assert_eq!(transport.connect_count(), 2);
    assert!(node.connection().session_state().is_connected());
    // Attachment survived the session loss
    assert_eq!(network.join_count(), 1);
}

#[tokio::test]
async fn test_reply_queued_at_deadline_keeps_session() {
    let network = MockNetwork::single("9G");
    let transport = MockTransport::new();
    let (mut node, _serial) = bridge(&network, &transport);
    let t0 = Instant::now();

    node.tick(t0).await.unwrap();
    node.tick(t0 + ms(50)).await.unwrap();
    node.tick(t0 + ms(100)).await.unwrap();

    // The pong is waiting when the loop reaches the timeout instant
    transport.push_bytes(&[102]);
    node.tick(t0 + ms(150)).await.unwrap();
    assert!(node.connection().session_state().is_connected());
    assert_eq!(transport.close_count(), 0);
}

#[tokio::test]
async fn test_duplicate_disconnects_close_once() {
    let network = MockNetwork::single("9G");
    let transport = MockTransport::new();
    let (mut node, _serial) = bridge(&network, &transport);
    let t0 = Instant::now();

    node.tick(t0).await.unwrap();
    for _ in 0..3 {
        transport.push_event(ConnectionEvent::Disconnected);
    }
    node.tick(t0 + ms(1)).await.unwrap();
    assert_eq!(transport.close_count(), 1);
}

#[tokio::test]
async fn test_link_loss_drops_session_and_rejoins() {
    let network = MockNetwork::single("9G");
    let transport = MockTransport::new();
    let (mut node, _serial) = bridge(&network, &transport);
    let t0 = Instant::now();

    node.tick(t0).await.unwrap();
    assert!(node.connection().session_state().is_connected());

    network.set_attached(false);
    node.tick(t0 + ms(1)).await.unwrap();
    assert!(!node.connection().attachment_state().is_connected());
    assert!(!node.connection().session_state().is_connected());
    assert_eq!(transport.close_count(), 1);

    node.tick(t0 + ms(2)).await.unwrap();
    assert_eq!(network.join_count(), 2);
    assert_eq!(transport.connect_count(), 2);
    assert!(node.connection().session_state().is_connected());
}

#[tokio::test]
async fn test_failed_join_is_retried_later() {
    let network = MockNetwork::single("9G").failing_join();
    let transport = MockTransport::new();
    let (mut node, _serial) = bridge(&network, &transport);
    let t0 = Instant::now();

    node.tick(t0).await.unwrap();
    node.tick(t0 + ms(10)).await.unwrap();
    assert_eq!(network.join_count(), 1);
    assert_eq!(transport.connect_count(), 0);

    node.tick(t0 + Duration::from_secs(2)).await.unwrap();
    assert_eq!(network.join_count(), 2);
}
