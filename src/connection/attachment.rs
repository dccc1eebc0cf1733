//! Network attachment: scan, pick the strongest known network, join
//!
//! The radio itself is behind [`NetworkInterface`]; only the selection policy
//! and the bounded join live here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A network this node is allowed to join
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredential {
    pub ssid: String,
    pub password: String,
}

impl fmt::Debug for WifiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiCredential")
            .field("ssid", &self.ssid)
            .field("password", &"***")
            .finish()
    }
}

/// One entry of a scan, in the order the radio reported it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub ssid: String,
    /// Signal strength in dBm; higher is stronger
    pub rssi: i32,
}

/// Details of a successful join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInfo {
    pub ssid: String,
    pub local_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("No networks found")]
    NoNetworksFound,
    #[error("No known network in range")]
    NoKnownNetwork,
    #[error("Joining '{ssid}' timed out after {timeout:?}")]
    JoinTimeout { ssid: String, timeout: Duration },
    #[error("Joining '{ssid}' failed: {reason}")]
    JoinFailed { ssid: String, reason: String },
}

/// Radio / host network stack
#[async_trait]
pub trait NetworkInterface: Send {
    /// Hardware address or other stable identity of this device
    fn device_id(&self) -> String;

    /// Whether the link is currently up
    fn is_attached(&self) -> bool;

    async fn scan(&mut self) -> Vec<ScanResult>;

    /// Join one network. The caller bounds this with a timeout.
    async fn join(&mut self, credential: &WifiCredential) -> Result<AttachmentInfo, NetworkError>;
}

/// Strongest scanned network that has a known credential. Ties go to the
/// network scanned first.
pub fn select_best_network<'a>(
    scan: &[ScanResult],
    known: &'a [WifiCredential],
) -> Option<(&'a WifiCredential, i32)> {
    let mut best: Option<(&'a WifiCredential, i32)> = None;
    for entry in scan {
        let Some(credential) = known.iter().find(|c| c.ssid == entry.ssid) else {
            continue;
        };
        match best {
            Some((_, rssi)) if entry.rssi <= rssi => {}
            _ => best = Some((credential, entry.rssi)),
        }
    }
    best
}
