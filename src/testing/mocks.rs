//! Mock implementations for testing
//!
//! Network, transport, sensor and pump stand-ins so node loops can be driven
//! without radios, sockets or hardware. Each mock is cheap to clone and
//! clones share state, so a test can keep a handle after moving one into a
//! node.

use crate::connection::{
    AttachmentInfo, ConnectionEvent, NetworkError, NetworkInterface, ScanResult, WifiCredential,
};
use crate::controller::{MoistureSensor, Pump};
use crate::protocol::SessionMetadata;
use crate::transport::{SessionTransport, TransportError, TransportKind};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock radio with a fixed scan result
#[derive(Debug, Clone)]
pub struct MockNetwork {
    scan: Vec<ScanResult>,
    attached: Arc<AtomicBool>,
    joins: Arc<AtomicUsize>,
    join_delay: Duration,
    fail_join: bool,
}

impl MockNetwork {
    pub fn new(scan: Vec<ScanResult>) -> Self {
        Self {
            scan,
            attached: Arc::new(AtomicBool::new(false)),
            joins: Arc::new(AtomicUsize::new(0)),
            join_delay: Duration::ZERO,
            fail_join: false,
        }
    }

    /// Network named `ssid` at a good signal level
    pub fn single(ssid: &str) -> Self {
        Self::new(vec![ScanResult {
            ssid: ssid.to_string(),
            rssi: -40,
        }])
    }

    pub fn with_join_delay(mut self, delay: Duration) -> Self {
        self.join_delay = delay;
        self
    }

    pub fn failing_join(mut self) -> Self {
        self.fail_join = true;
        self
    }

    /// Simulate the link coming up or dropping
    pub fn set_attached(&self, attached: bool) {
        self.attached.store(attached, Ordering::SeqCst);
    }

    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkInterface for MockNetwork {
    fn device_id(&self) -> String {
        "00:11:22:33:44:55".to_string()
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    async fn scan(&mut self) -> Vec<ScanResult> {
        self.scan.clone()
    }

    async fn join(&mut self, credential: &WifiCredential) -> Result<AttachmentInfo, NetworkError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        if !self.join_delay.is_zero() {
            tokio::time::sleep(self.join_delay).await;
        }
        if self.fail_join {
            return Err(NetworkError::JoinFailed {
                ssid: credential.ssid.clone(),
                reason: "mock join failure".to_string(),
            });
        }
        self.attached.store(true, Ordering::SeqCst);
        Ok(AttachmentInfo {
            ssid: credential.ssid.clone(),
            local_address: "192.168.4.2".to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct TransportLog {
    connects: usize,
    closes: usize,
    open: bool,
    refuse: bool,
    metadata: Option<SessionMetadata>,
    sent: Vec<Bytes>,
    inbound: VecDeque<ConnectionEvent>,
}

/// Mock session transport recording everything sent through it
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose connect attempts fail
    pub fn refusing(self) -> Self {
        self.set_refusing(true);
        self
    }

    pub fn set_refusing(&self, refuse: bool) {
        lock(&self.log).refuse = refuse;
    }

    /// Queue an event as if the reader task had produced it
    pub fn push_event(&self, event: ConnectionEvent) {
        lock(&self.log).inbound.push_back(event);
    }

    /// Queue bytes from the server
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.push_event(ConnectionEvent::DataReceived(Bytes::copy_from_slice(bytes)));
    }

    pub fn connect_count(&self) -> usize {
        lock(&self.log).connects
    }

    pub fn close_count(&self) -> usize {
        lock(&self.log).closes
    }

    pub fn is_open(&self) -> bool {
        lock(&self.log).open
    }

    pub fn last_metadata(&self) -> Option<SessionMetadata> {
        lock(&self.log).metadata.clone()
    }

    /// Every write, in order
    pub fn sent(&self) -> Vec<Bytes> {
        lock(&self.log).sent.clone()
    }

    /// Every write concatenated
    pub fn sent_bytes(&self) -> Vec<u8> {
        lock(&self.log).sent.iter().flat_map(|b| b.iter().copied()).collect()
    }

    pub fn clear_sent(&self) {
        lock(&self.log).sent.clear();
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn connect(&mut self, metadata: &SessionMetadata) -> Result<(), TransportError> {
        let mut log = lock(&self.log);
        log.connects += 1;
        if log.refuse {
            return Err(TransportError::ConnectionFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock refused",
            )));
        }
        log.open = true;
        log.metadata = Some(metadata.clone());
        log.inbound.clear();
        log.inbound.push_back(ConnectionEvent::Connected);
        Ok(())
    }

    async fn send(&mut self, bytes: Bytes) -> Result<(), TransportError> {
        let mut log = lock(&self.log);
        if !log.open {
            return Err(TransportError::NotConnected);
        }
        log.sent.push(bytes);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<ConnectionEvent> {
        lock(&self.log).inbound.pop_front()
    }

    async fn close(&mut self) {
        let mut log = lock(&self.log);
        log.closes += 1;
        log.open = false;
    }
}

/// Mock moisture probe replaying a list of raw readings; the last one repeats
#[derive(Debug, Clone)]
pub struct MockSensor {
    values: Arc<Mutex<Vec<u32>>>,
    reads: Arc<AtomicUsize>,
}

impl MockSensor {
    pub fn new(values: Vec<u32>) -> Self {
        Self {
            values: Arc::new(Mutex::new(values)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared read counter
    pub fn reads(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }

    /// Replace the remaining readings
    pub fn set_values(&self, values: Vec<u32>) {
        *lock(&self.values) = values;
        self.reads.store(0, Ordering::SeqCst);
    }
}

impl MoistureSensor for MockSensor {
    fn read_raw(&mut self) -> u32 {
        let index = self.reads.fetch_add(1, Ordering::SeqCst);
        let values = lock(&self.values);
        values
            .get(index)
            .or_else(|| values.last())
            .copied()
            .unwrap_or(0)
    }
}

/// Mock pump recording every command
#[derive(Debug, Clone, Default)]
pub struct MockPump {
    history: Arc<Mutex<Vec<bool>>>,
}

impl MockPump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Arc<Mutex<Vec<bool>>> {
        self.history.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.history).last().copied().unwrap_or(false)
    }
}

impl Pump for MockPump {
    fn set_running(&mut self, running: bool) {
        lock(&self.history).push(running);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_sensor_repeats_last_value() {
        let mut sensor = MockSensor::new(vec![1, 2]);
        let readings: Vec<u32> = (0..4).map(|_| sensor.read_raw()).collect();
        assert_eq!(readings, vec![1, 2, 2, 2]);
        assert_eq!(sensor.reads().load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_mock_pump_history() {
        let mut pump = MockPump::new();
        let history = pump.history();
        pump.set_running(true);
        pump.set_running(false);
        assert_eq!(history.lock().unwrap().as_slice(), &[true, false]);
        assert!(!pump.is_running());
    }

    #[tokio::test]
    async fn test_mock_transport_shares_state() {
        let handle = MockTransport::new();
        let mut transport = handle.clone();
        assert!(transport.send(Bytes::from_static(&[1])).await.is_err());

        let metadata = SessionMetadata {
            prefix: "CO3006".to_string(),
            device_id: "d".to_string(),
            auth_key: "k".to_string(),
            network: "n".to_string(),
            local_address: "a".to_string(),
        };
        transport.connect(&metadata).await.unwrap();
        transport.send(Bytes::from_static(&[101])).await.unwrap();
        assert_eq!(handle.sent_bytes(), vec![101]);
        assert_eq!(transport.poll_event(), Some(ConnectionEvent::Connected));

        handle.push_bytes(&[102]);
        assert_eq!(
            transport.poll_event(),
            Some(ConnectionEvent::DataReceived(Bytes::from_static(&[102])))
        );
        transport.close().await;
        assert!(!handle.is_open());
    }

    #[tokio::test]
    async fn test_mock_network_join() {
        let mut network = MockNetwork::single("9G");
        assert!(!network.is_attached());
        let credential = WifiCredential {
            ssid: "9G".to_string(),
            password: String::new(),
        };
        network.join(&credential).await.unwrap();
        assert!(network.is_attached());
        assert_eq!(network.join_count(), 1);
    }
}
