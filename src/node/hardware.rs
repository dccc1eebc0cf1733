//! Host-side stand-ins for the radio and the analog hardware
//!
//! `HostNetwork` treats the host's own IP stack as the wireless network: it
//! is always in range and joining it means finding the local address that
//! routes to the server. The soil and pump pair form a small plant model so a
//! sensor node can run without a probe attached.

use crate::connection::{AttachmentInfo, NetworkError, NetworkInterface, ScanResult, WifiCredential};
use crate::controller::{MoistureSensor, Pump};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tracing::debug;

/// Signal level reported for the host network
const HOST_RSSI: i32 = -30;

pub struct HostNetwork {
    device_id: String,
    ssid: String,
    server: String,
    attached: bool,
}

impl HostNetwork {
    pub fn new(device_id: &str, ssid: &str, server: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            ssid: ssid.to_string(),
            server: server.to_string(),
            attached: false,
        }
    }

    async fn local_address(&self) -> std::io::Result<String> {
        // Connecting a UDP socket only selects a route; nothing is sent
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&self.server).await?;
        Ok(socket.local_addr()?.ip().to_string())
    }
}

#[async_trait]
impl NetworkInterface for HostNetwork {
    fn device_id(&self) -> String {
        self.device_id.clone()
    }

    fn is_attached(&self) -> bool {
        self.attached
    }

    async fn scan(&mut self) -> Vec<ScanResult> {
        vec![ScanResult {
            ssid: self.ssid.clone(),
            rssi: HOST_RSSI,
        }]
    }

    async fn join(&mut self, credential: &WifiCredential) -> Result<AttachmentInfo, NetworkError> {
        let local_address = self
            .local_address()
            .await
            .map_err(|e| NetworkError::JoinFailed {
                ssid: credential.ssid.clone(),
                reason: e.to_string(),
            })?;
        self.attached = true;
        Ok(AttachmentInfo {
            ssid: credential.ssid.clone(),
            local_address,
        })
    }
}

/// Raw counts per second the soil dries by
const DRYING_RATE: f64 = 4.0;
/// Raw counts per second the pump wets the soil by
const WATERING_RATE: f64 = 40.0;

/// Soil whose raw reading drifts up while dry and falls while watered
pub struct SimulatedSoil {
    raw: f64,
    wet_limit: f64,
    dry_limit: f64,
    pump: Arc<AtomicBool>,
    last_read: Option<Instant>,
}

impl MoistureSensor for SimulatedSoil {
    fn read_raw(&mut self) -> u32 {
        let now = Instant::now();
        if let Some(last) = self.last_read {
            let elapsed = now.duration_since(last).as_secs_f64();
            let delta = if self.pump.load(Ordering::Relaxed) {
                -WATERING_RATE
            } else {
                DRYING_RATE
            };
            self.raw = (self.raw + delta * elapsed).clamp(self.wet_limit, self.dry_limit);
        }
        self.last_read = Some(now);
        self.raw.round() as u32
    }
}

/// Pump that only flips a shared flag the soil model reads
pub struct SimulatedPump {
    running: Arc<AtomicBool>,
}

impl Pump for SimulatedPump {
    fn set_running(&mut self, running: bool) {
        if self.running.swap(running, Ordering::Relaxed) != running {
            debug!(running, "Simulated pump switched");
        }
    }
}

/// A linked soil and pump pair starting at `initial_raw`, clamped to
/// `[wet_limit, dry_limit]`
pub fn simulated_hardware(
    initial_raw: u32,
    wet_limit: u32,
    dry_limit: u32,
) -> (SimulatedSoil, SimulatedPump) {
    let running = Arc::new(AtomicBool::new(false));
    let soil = SimulatedSoil {
        raw: f64::from(initial_raw),
        wet_limit: f64::from(wet_limit),
        dry_limit: f64::from(dry_limit.max(wet_limit)),
        pump: running.clone(),
        last_read: None,
    };
    (soil, SimulatedPump { running })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_soil_dries_then_wets() {
        let (mut soil, mut pump) = simulated_hardware(600, 250, 1023);
        let start = soil.read_raw();
        assert_eq!(start, 600);

        std::thread::sleep(Duration::from_millis(300));
        let dried = soil.read_raw();
        assert!(dried > start);

        pump.set_running(true);
        std::thread::sleep(Duration::from_millis(300));
        assert!(soil.read_raw() < dried);
    }

    #[test]
    fn test_soil_stays_in_limits() {
        let (mut soil, mut pump) = simulated_hardware(251, 250, 1023);
        pump.set_running(true);
        soil.read_raw();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(soil.read_raw(), 250);
    }

    #[tokio::test]
    async fn test_host_network_joins_loopback() {
        let mut network = HostNetwork::new("dev-1", "host", "127.0.0.1:9453");
        let scan = network.scan().await;
        assert_eq!(scan[0].ssid, "host");
        assert!(!network.is_attached());

        let credential = WifiCredential {
            ssid: "host".to_string(),
            password: String::new(),
        };
        let info = network.join(&credential).await.unwrap();
        assert_eq!(info.local_address, "127.0.0.1");
        assert!(network.is_attached());
        assert_eq!(network.device_id(), "dev-1");
    }
}
