//! Two-layer connection manager
//!
//! Owns the attachment state (network join) and the session state (transport
//! to the server). Each call to a `maintain_*` method makes at most one
//! bounded attempt, so the node loop never stalls on a dead network.

use super::attachment::{
    select_best_network, AttachmentInfo, NetworkError, NetworkInterface, WifiCredential,
};
use super::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use super::state::{
    log_transition, next_state, ConnectionEvent, ConnectionState, DisconnectDampener, Layer,
    DEFAULT_DISCONNECT_DAMPING,
};
use crate::protocol::SessionMetadata;
use crate::transport::{SessionTransport, TransportError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Timing and policy knobs for [`ConnectionManager`]
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub known_networks: Vec<WifiCredential>,
    pub join_timeout: Duration,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub disconnect_damping: u8,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            known_networks: Vec::new(),
            join_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(10),
            disconnect_damping: DEFAULT_DISCONNECT_DAMPING,
        }
    }
}

/// Result of one attachment maintenance pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentOutcome {
    /// Already attached, nothing done
    Unchanged,
    /// Joined a network during this pass
    Attached(AttachmentInfo),
    /// The link went away; the session must be torn down too
    Lost,
}

pub struct ConnectionManager {
    settings: ConnectionSettings,
    attachment: ConnectionState,
    session: ConnectionState,
    attachment_info: Option<AttachmentInfo>,
    heartbeat: HeartbeatMonitor,
    dampener: DisconnectDampener,
    sessions_opened: u32,
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings) -> Self {
        let heartbeat =
            HeartbeatMonitor::new(settings.heartbeat_interval, settings.heartbeat_timeout);
        let dampener = DisconnectDampener::new(settings.disconnect_damping);
        Self {
            settings,
            attachment: ConnectionState::Disconnected,
            session: ConnectionState::Disconnected,
            attachment_info: None,
            heartbeat,
            dampener,
            sessions_opened: 0,
        }
    }

    pub fn attachment_state(&self) -> ConnectionState {
        self.attachment
    }

    pub fn session_state(&self) -> ConnectionState {
        self.session
    }

    pub fn attachment_info(&self) -> Option<&AttachmentInfo> {
        self.attachment_info.as_ref()
    }

    /// Number of sessions successfully opened since start
    pub fn sessions_opened(&self) -> u32 {
        self.sessions_opened
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.heartbeat.last_received()
    }

    /// A session attempt is allowed only when attached and no session exists
    pub fn can_open_session(&self) -> bool {
        self.attachment.is_connected() && self.session.is_idle()
    }

    /// Keep the network attachment up. Makes at most one join attempt.
    pub async fn maintain_attachment<N>(
        &mut self,
        network: &mut N,
    ) -> Result<AttachmentOutcome, NetworkError>
    where
        N: NetworkInterface + ?Sized,
    {
        if self.attachment.is_connected() {
            if network.is_attached() {
                return Ok(AttachmentOutcome::Unchanged);
            }
            self.set_attachment(ConnectionState::Disconnected);
            self.attachment_info = None;
            self.drop_session();
            return Ok(AttachmentOutcome::Lost);
        }

        self.set_attachment(ConnectionState::Connecting);
        let scan = network.scan().await;
        if scan.is_empty() {
            self.set_attachment(ConnectionState::Disconnected);
            return Err(NetworkError::NoNetworksFound);
        }
        debug!(networks = scan.len(), "Scan complete");

        let Some((credential, rssi)) = select_best_network(&scan, &self.settings.known_networks)
        else {
            self.set_attachment(ConnectionState::Disconnected);
            return Err(NetworkError::NoKnownNetwork);
        };
        let credential = credential.clone();
        info!(ssid = %credential.ssid, rssi, "Joining network");

        let timeout = self.settings.join_timeout;
        let joined = match tokio::time::timeout(timeout, network.join(&credential)).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::JoinTimeout {
                ssid: credential.ssid.clone(),
                timeout,
            }),
        };

        match joined {
            Ok(info) => {
                info!(ssid = %info.ssid, address = %info.local_address, "Network attached");
                self.attachment_info = Some(info.clone());
                self.set_attachment(ConnectionState::Connected);
                Ok(AttachmentOutcome::Attached(info))
            }
            Err(e) => {
                self.set_attachment(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Session metadata for the current attachment
    pub fn session_metadata(
        &self,
        prefix: &str,
        device_id: &str,
        auth_key: &str,
    ) -> SessionMetadata {
        let (network, local_address) = self
            .attachment_info
            .as_ref()
            .map(|info| (info.ssid.clone(), info.local_address.clone()))
            .unwrap_or_default();
        SessionMetadata {
            prefix: prefix.to_string(),
            device_id: device_id.to_string(),
            auth_key: auth_key.to_string(),
            network,
            local_address,
        }
    }

    /// Make one bounded attempt to open the session. Only valid while
    /// attached with no session in progress.
    pub async fn maintain_session<T>(
        &mut self,
        transport: &mut T,
        metadata: &SessionMetadata,
        now: Instant,
    ) -> Result<bool, TransportError>
    where
        T: SessionTransport + ?Sized,
    {
        if self.session.is_connected() {
            return Ok(false);
        }
        if !self.can_open_session() {
            return Err(TransportError::NotAttached {
                attachment: format!("{:?}", self.attachment),
            });
        }

        self.set_session(ConnectionState::Connecting);
        let timeout = self.settings.connect_timeout;
        let result = match tokio::time::timeout(timeout, transport.connect(metadata)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        match result {
            Ok(()) => {
                self.on_session_event(&ConnectionEvent::Connected, now);
                self.sessions_opened += 1;
                Ok(true)
            }
            Err(e) => {
                self.set_session(ConnectionState::Disconnected);
                transport.close().await;
                Err(e)
            }
        }
    }

    /// Fold a transport event into the session state. Returns true when the
    /// event changed the state.
    pub fn on_session_event(&mut self, event: &ConnectionEvent, now: Instant) -> bool {
        match event {
            ConnectionEvent::Connected => {
                self.dampener.on_connected();
                if self.session.is_connected() {
                    return false;
                }
                self.heartbeat.start(now);
                self.set_session(next_state(self.session, event));
                true
            }
            ConnectionEvent::Disconnected => {
                if !self.dampener.on_disconnect() {
                    debug!(suppressed = self.dampener.suppressed(), "Duplicate disconnect ignored");
                    return false;
                }
                if self.session.is_idle() {
                    return false;
                }
                self.heartbeat.stop();
                self.set_session(next_state(self.session, event));
                true
            }
            ConnectionEvent::DataReceived(_) => {
                self.record_activity(now);
                false
            }
        }
    }

    pub fn record_activity(&mut self, now: Instant) {
        self.heartbeat.record_activity(now);
    }

    /// Drive the liveness probe. On timeout the session is marked down; the
    /// caller closes the transport.
    pub fn poll_heartbeat(&mut self, now: Instant) -> HeartbeatAction {
        if !self.session.is_connected() {
            return HeartbeatAction::Idle;
        }
        let action = self.heartbeat.poll(now);
        if let HeartbeatAction::TimedOut { silent_for } = action {
            warn!(?silent_for, "Server silent past heartbeat timeout");
            self.drop_session();
        }
        action
    }

    /// Close the session on request. Attachment is unaffected. Returns true
    /// if a session was up.
    pub fn force_session_disconnect(&mut self) -> bool {
        if self.session.is_idle() {
            return false;
        }
        info!("Session disconnect requested");
        self.drop_session();
        true
    }

    fn drop_session(&mut self) {
        self.heartbeat.stop();
        // The transport will echo this drop as a Disconnected event
        self.dampener.arm();
        self.set_session(ConnectionState::Disconnected);
    }

    fn set_attachment(&mut self, next: ConnectionState) {
        log_transition(Layer::Attachment, self.attachment, next);
        self.attachment = next;
    }

    fn set_session(&mut self, next: ConnectionState) {
        log_transition(Layer::Session, self.session, next);
        self.session = next;
    }
}
