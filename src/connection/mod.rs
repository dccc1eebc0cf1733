//! Connection management
//!
//! Two nested layers: network attachment and a transport session on top of
//! it. State transitions are pure ([`state`]); the manager performs the
//! bounded I/O attempts and keeps the session alive with a heartbeat.

pub mod attachment;
pub mod heartbeat;
pub mod manager;
pub mod state;

pub use attachment::{
    select_best_network, AttachmentInfo, NetworkError, NetworkInterface, ScanResult,
    WifiCredential,
};
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor};
pub use manager::{AttachmentOutcome, ConnectionManager, ConnectionSettings};
pub use state::{
    next_state, ConnectionEvent, ConnectionState, DisconnectDampener, Layer,
    DEFAULT_DISCONNECT_DAMPING,
};
