//! Pure connection state transitions
//!
//! Both layers (network attachment and transport session) share the same
//! three-state machine. Transport notifications arrive as a closed set of
//! events and are folded into the state by [`next_state`].

use bytes::Bytes;
use tracing::{debug, info, warn};

/// Per-layer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Neither connected nor with an attempt outstanding
    pub fn is_idle(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }
}

/// The two nested layers managed by the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Attachment,
    Session,
}

/// Notifications delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    DataReceived(Bytes),
}

/// Fold one event into a layer's state
pub fn next_state(current: ConnectionState, event: &ConnectionEvent) -> ConnectionState {
    match event {
        ConnectionEvent::Connected => ConnectionState::Connected,
        ConnectionEvent::Disconnected => ConnectionState::Disconnected,
        ConnectionEvent::DataReceived(_) => current,
    }
}

/// Log a state change at a level matching its severity
pub fn log_transition(layer: Layer, from: ConnectionState, to: ConnectionState) {
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!(?layer, "Connection established");
        }
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            warn!(?layer, "Connection lost");
        }
        (ConnectionState::Connecting, ConnectionState::Disconnected) => {
            warn!(?layer, "Connection attempt failed");
        }
        _ if from != to => {
            debug!(?layer, "Connection state: {:?} -> {:?}", from, to);
        }
        _ => {}
    }
}

/// Default number of duplicate disconnect notifications absorbed per episode
pub const DEFAULT_DISCONNECT_DAMPING: u8 = 10;

/// Suppresses repeated "disconnected" notifications for one physical drop.
///
/// The first notification of an episode is acted upon. Later ones are
/// swallowed until the counter passes its limit, at which point it wraps to
/// zero so a persistent failure is acted on again. A `Connected` transition
/// starts a new episode.
#[derive(Debug, Clone)]
pub struct DisconnectDampener {
    count: u16,
    limit: u8,
}

impl DisconnectDampener {
    pub fn new(limit: u8) -> Self {
        Self { count: 0, limit }
    }

    /// Record a disconnect notification; true if it should be acted upon
    pub fn on_disconnect(&mut self) -> bool {
        let act = self.count == 0;
        self.count += 1;
        if self.count > u16::from(self.limit) {
            self.count = 0;
        }
        act
    }

    /// Record a disconnect the manager initiated itself, so the transport's
    /// echo of it is treated as a duplicate
    pub fn arm(&mut self) {
        if self.count == 0 {
            self.count = 1;
        }
    }

    pub fn on_connected(&mut self) {
        self.count = 0;
    }

    pub fn suppressed(&self) -> u16 {
        self.count.saturating_sub(1)
    }
}

impl Default for DisconnectDampener {
    fn default() -> Self {
        Self::new(DEFAULT_DISCONNECT_DAMPING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_state() {
        assert_eq!(
            next_state(ConnectionState::Connecting, &ConnectionEvent::Connected),
            ConnectionState::Connected
        );
        assert_eq!(
            next_state(ConnectionState::Connected, &ConnectionEvent::Disconnected),
            ConnectionState::Disconnected
        );
        assert_eq!(
            next_state(
                ConnectionState::Connected,
                &ConnectionEvent::DataReceived(Bytes::from_static(&[101]))
            ),
            ConnectionState::Connected
        );
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Disconnected.is_idle());
        assert!(!ConnectionState::Connecting.is_idle());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_dampener_acts_on_first_only() {
        let mut dampener = DisconnectDampener::new(10);
        assert!(dampener.on_disconnect());
        for _ in 0..5 {
            assert!(!dampener.on_disconnect());
        }
        assert_eq!(dampener.suppressed(), 5);
    }

    #[test]
    fn test_dampener_resets_on_connect() {
        let mut dampener = DisconnectDampener::new(10);
        assert!(dampener.on_disconnect());
        assert!(!dampener.on_disconnect());
        dampener.on_connected();
        assert!(dampener.on_disconnect());
    }

    #[test]
    fn test_dampener_wraps_instead_of_growing() {
        let mut dampener = DisconnectDampener::new(3);
        let acted: Vec<bool> = (0..9).map(|_| dampener.on_disconnect()).collect();
        assert_eq!(
            acted,
            vec![true, false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn test_armed_dampener_swallows_echo() {
        let mut dampener = DisconnectDampener::default();
        dampener.arm();
        assert!(!dampener.on_disconnect());
        dampener.on_connected();
        assert!(dampener.on_disconnect());
    }
}
