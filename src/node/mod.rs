//! Cooperative node run loops
//!
//! Each node is a single owner of its state. One iteration runs due timers,
//! drains every available inbound byte through the matching codec, then
//! yields for the configured loop delay.

pub mod bridge;
pub mod hardware;
pub mod sensor;

pub use bridge::BridgeNode;
pub use hardware::{simulated_hardware, HostNetwork, SimulatedPump, SimulatedSoil};
pub use sensor::SensorNode;

use crate::error::{NodeError, NodeResult};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Process exit code asking the supervisor for a cold restart
pub const COLD_RESET_EXIT_CODE: i32 = 75;

/// Interval between codec statistics log lines
pub(crate) const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Why a node run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeExit {
    /// Shutdown was requested
    Shutdown,
    /// Rebuild node state and run again in-process
    SoftRestart,
    /// Integrity violation or operator request; restart the process
    ColdReset,
}

/// Map a failed tick to an exit: integrity violations become a cold reset,
/// anything else is passed up
pub(crate) fn exit_for_error(err: NodeError) -> NodeResult<NodeExit> {
    if err.requires_cold_reset() {
        error!(error = %err, "Frame integrity violated, cold reset required");
        return Ok(NodeExit::ColdReset);
    }
    Err(err)
}

/// Sleep for `delay`; true if shutdown was requested meanwhile
pub(crate) async fn pause(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        changed = shutdown.changed() => {
            if changed.is_err() || *shutdown.borrow() {
                info!("Shutdown signal received");
                return true;
            }
            false
        }
        _ = tokio::time::sleep(delay) => false,
    }
}
