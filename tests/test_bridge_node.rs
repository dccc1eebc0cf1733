//! Bridge run loop against mock network and transport
//!
//! The serial side is a `tokio::io::duplex` pipe; the test either decodes the
//! raw bytes the bridge writes or puts a real sensor node on the other end.

use soilbridge::node::{BridgeNode, NodeExit, SensorNode};
use soilbridge::protocol::{Frame, Opcode, PacketCodec, SensorConfig};
use soilbridge::testing::{test_config, MockNetwork, MockPump, MockSensor, MockTransport};
use soilbridge::transport::SerialLink;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;

fn mirroring_bridge(transport: &MockTransport) -> (BridgeNode, DuplexStream) {
    let mut config = test_config();
    config.serial.mirror_logs = true;
    let (bridge_end, sensor_end) = tokio::io::duplex(4096);
    let node = BridgeNode::new(
        &config,
        Box::new(MockNetwork::single("9G")),
        Box::new(transport.clone()),
        SerialLink::new(bridge_end),
    )
    .unwrap();
    (node, sensor_end)
}

async fn serial_frames(stream: &mut DuplexStream) -> Vec<Frame> {
    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let mut codec = PacketCodec::new();
    codec.feed_all(&buf[..n]).into_iter().flatten().collect()
}

#[tokio::test]
async fn test_bridge_diagnostics_mirrored_to_serial() {
    let transport = MockTransport::new();
    let (mut bridge, mut serial) = mirroring_bridge(&transport);

    bridge.tick(Instant::now()).await.unwrap();

    let logs: Vec<String> = serial_frames(&mut serial)
        .await
        .into_iter()
        .filter(|f| f.opcode() == Opcode::LogMessage)
        .map(|f| f.log_text())
        .collect();
    assert!(logs.iter().any(|l| l.contains("Joined 9G")), "{logs:?}");
    assert!(logs.iter().any(|l| l.contains("Server session opened")), "{logs:?}");
}

#[tokio::test]
async fn test_remote_logs_not_relayed_upstream() {
    let transport = MockTransport::new();
    let (mut bridge, mut serial) = mirroring_bridge(&transport);
    let now = Instant::now();
    bridge.tick(now).await.unwrap();
    transport.clear_sent();

    serial.write_all(&Frame::log("sensor booted").encode()).await.unwrap();
    for i in 1..10 {
        bridge.tick(now + Duration::from_millis(i)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(!transport.sent_bytes().contains(&120));
}

#[tokio::test]
async fn test_confirmed_bridge_answers_config_request_locally() {
    let transport = MockTransport::new();
    let (mut bridge, mut serial) = mirroring_bridge(&transport);
    let now = Instant::now();
    bridge.tick(now).await.unwrap();
    serial_frames(&mut serial).await;

    let config = SensorConfig {
        offset: 200,
        low: 40,
        high: 60,
        interval_ms: 500,
    };
    let set = Frame::config(Opcode::ServerSetClientConfig, &config).unwrap();
    transport.push_bytes(&set.encode());
    bridge.tick(now).await.unwrap();
    assert!(serial_frames(&mut serial).await.contains(&set));

    transport.clear_sent();
    serial.write_all(&[114]).await.unwrap();
    for i in 1..10 {
        bridge.tick(now + Duration::from_millis(i)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(serial_frames(&mut serial).await.contains(&set));
    // Nothing went upstream for it
    assert!(!transport.sent_bytes().contains(&114));
}

#[tokio::test]
async fn test_full_loop_with_sensor_node() {
    let transport = MockTransport::new();
    let config = test_config();
    let (bridge_end, sensor_end) = tokio::io::duplex(4096);
    let mut bridge = BridgeNode::new(
        &config,
        Box::new(MockNetwork::single("9G")),
        Box::new(transport.clone()),
        SerialLink::new(bridge_end),
    )
    .unwrap();
    let mut sensor = SensorNode::new(
        &config,
        MockSensor::new(vec![250]),
        MockPump::new(),
        SerialLink::new(sensor_end),
    );

    let t0 = Instant::now();
    bridge.tick(t0).await.unwrap();
    transport.push_bytes(
        &Frame::config(Opcode::ServerSetClientConfig, &SensorConfig::default())
            .unwrap()
            .encode(),
    );

    let telemetry = Frame::telemetry(100).encode();
    let mut relayed = false;
    for i in 0..100 {
        let now = t0 + Duration::from_millis(i);
        bridge.tick(now).await.unwrap();
        sensor.tick(now).await.unwrap();
        if transport.sent().contains(&telemetry) {
            relayed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(relayed, "saturated soil should report 100%");
    assert!(sensor.store().is_confirmed());
}

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() {
    let transport = MockTransport::new();
    let (mut bridge, _serial) = mirroring_bridge(&transport);
    let (tx, rx) = watch::channel(false);

    let stopper = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
    };
    let (exit, ()) = tokio::join!(bridge.run(rx), stopper);
    assert_eq!(exit.unwrap(), NodeExit::Shutdown);
    assert!(!transport.is_open());
}

#[tokio::test]
async fn test_run_ends_with_soft_restart_on_debug_restart() {
    let transport = MockTransport::new();
    let (mut bridge, _serial) = mirroring_bridge(&transport);
    let (_tx, rx) = watch::channel(false);

    let injector = {
        let transport = transport.clone();
        async move {
            while !transport.is_open() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            transport.push_bytes(&[122]);
        }
    };
    let (exit, ()) = tokio::join!(bridge.run(rx), injector);
    assert_eq!(exit.unwrap(), NodeExit::SoftRestart);
}
