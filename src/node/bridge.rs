//! Bridge node
//!
//! Keeps the network attached and the server session open, and relays frames
//! between the serial link and the session through the router.

use super::{exit_for_error, pause, NodeExit, STATS_INTERVAL};
use crate::config::NodeConfig;
use crate::connection::{
    AttachmentOutcome, ConnectionEvent, ConnectionManager, HeartbeatAction, NetworkInterface,
};
use crate::error::{NodeError, NodeResult};
use crate::observability::DiagnosticSink;
use crate::protocol::{Frame, PacketCodec, ProtocolError};
use crate::router::{NodeCommand, Role, RouteContext, Router, Side};
use crate::store::ConfigStore;
use crate::transport::{SerialLink, SessionTransport};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, Instrument, Level};

/// Wait after a failed join or connect before trying again
const RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub struct BridgeNode {
    router: Router,
    store: ConfigStore,
    connection: ConnectionManager,
    network: Box<dyn NetworkInterface>,
    transport: Box<dyn SessionTransport>,
    serial: SerialLink,
    serial_codec: PacketCodec,
    session_codec: PacketCodec,
    diagnostics: DiagnosticSink,
    header_prefix: String,
    auth_key: String,
    loop_delay: Duration,
    retry_interval: Duration,
    next_attempt: Option<Instant>,
    next_stats: Option<Instant>,
}

impl BridgeNode {
    /// Fails when `server.auth_key_env` names a variable that is not set
    pub fn new(
        config: &NodeConfig,
        network: Box<dyn NetworkInterface>,
        transport: Box<dyn SessionTransport>,
        serial: SerialLink,
    ) -> NodeResult<Self> {
        let auth_key = config.require_auth_key()?;
        Ok(Self {
            router: Router::new(Role::Bridge),
            store: ConfigStore::new(config.sensor_defaults()),
            connection: ConnectionManager::new(config.connection_settings()),
            network,
            transport,
            serial,
            serial_codec: PacketCodec::new(),
            session_codec: PacketCodec::new(),
            diagnostics: DiagnosticSink::new(config.serial.mirror_logs),
            header_prefix: config.server.header_prefix.clone(),
            auth_key,
            loop_delay: config.loop_delay(),
            retry_interval: RETRY_INTERVAL,
            next_attempt: None,
            next_stats: None,
        })
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Run until shutdown or a debug command ends the run
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> NodeResult<NodeExit> {
        let span = crate::node_span!(role = "bridge");
        async {
            loop {
                match self.tick(Instant::now()).await {
                    Ok(Some(exit)) => {
                        self.transport.close().await;
                        return Ok(exit);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.transport.close().await;
                        return exit_for_error(e);
                    }
                }
                if pause(&mut shutdown, self.loop_delay).await {
                    self.transport.close().await;
                    return Ok(NodeExit::Shutdown);
                }
            }
        }
        .instrument(span)
        .await
    }

    /// One scheduling iteration
    pub async fn tick(&mut self, now: Instant) -> NodeResult<Option<NodeExit>> {
        self.maintain_connection(now).await;

        // Bytes already queued count as liveness before the timeout check
        if let Some(exit) = self.drain_session(now).await? {
            return Ok(Some(exit));
        }
        self.run_heartbeat(now).await;

        let link = crate::link_span!(role = "bridge");
        if let Some(exit) = self.drain_serial(now).instrument(link).await? {
            return Ok(Some(exit));
        }

        self.flush_mirror().await;
        self.log_stats(now);
        Ok(None)
    }

    async fn maintain_connection(&mut self, now: Instant) {
        if self.next_attempt.is_some_and(|at| now < at) {
            return;
        }
        self.next_attempt = None;

        match self.connection.maintain_attachment(self.network.as_mut()).await {
            Ok(AttachmentOutcome::Unchanged) => {}
            Ok(AttachmentOutcome::Attached(info)) => {
                self.diagnostics.report(
                    Level::INFO,
                    &format!("Joined {} as {}", info.ssid, info.local_address),
                );
            }
            Ok(AttachmentOutcome::Lost) => {
                self.diagnostics.report(Level::WARN, "Network link lost");
                self.close_session().await;
                return;
            }
            Err(e) => {
                self.diagnostics.report(Level::WARN, &e.to_string());
                self.next_attempt = Some(now + self.retry_interval);
                return;
            }
        }

        if !self.connection.can_open_session() {
            return;
        }

        let metadata = self.connection.session_metadata(
            &self.header_prefix,
            &self.network.device_id(),
            &self.auth_key,
        );
        let span = crate::session_span!(transport = %self.transport.kind());
        let result = self
            .connection
            .maintain_session(self.transport.as_mut(), &metadata, now)
            .instrument(span)
            .await;
        match result {
            Ok(true) => {
                self.session_codec.reset();
                self.diagnostics.report(Level::INFO, "Server session opened");
            }
            Ok(false) => {}
            Err(e) => {
                self.diagnostics
                    .report(Level::WARN, &format!("Server session failed: {e}"));
                self.next_attempt = Some(now + self.retry_interval);
            }
        }
    }

    async fn run_heartbeat(&mut self, now: Instant) {
        match self.connection.poll_heartbeat(now) {
            HeartbeatAction::Idle => {}
            HeartbeatAction::SendPing => {
                self.send_session(Frame::ping()).await;
            }
            HeartbeatAction::TimedOut { silent_for } => {
                self.diagnostics.report(
                    Level::WARN,
                    &format!("Server silent for {}ms, closing session", silent_for.as_millis()),
                );
                self.close_session().await;
            }
        }
    }

    async fn drain_session(&mut self, now: Instant) -> NodeResult<Option<NodeExit>> {
        while let Some(event) = self.transport.poll_event() {
            let changed = self.connection.on_session_event(&event, now);
            match event {
                ConnectionEvent::DataReceived(bytes) => {
                    if !self.connection.session_state().is_connected() {
                        continue;
                    }
                    let frames = self.session_codec.feed_all(&bytes);
                    if let Some(exit) = self.route_all(Side::Session, frames, now).await? {
                        return Ok(Some(exit));
                    }
                }
                ConnectionEvent::Disconnected if changed => {
                    self.diagnostics.report(Level::WARN, "Server session closed");
                    self.close_session().await;
                }
                ConnectionEvent::Connected | ConnectionEvent::Disconnected => {}
            }
        }
        Ok(None)
    }

    async fn drain_serial(&mut self, now: Instant) -> NodeResult<Option<NodeExit>> {
        while let Some(chunk) = self.serial.try_read() {
            let frames = self.serial_codec.feed_all(&chunk);
            if let Some(exit) = self.route_all(Side::Serial, frames, now).await? {
                return Ok(Some(exit));
            }
        }
        if self.serial.is_closed() {
            return Err(NodeError::SerialClosed);
        }
        Ok(None)
    }

    async fn route_all(
        &mut self,
        source: Side,
        frames: Vec<Result<Frame, ProtocolError>>,
        now: Instant,
    ) -> NodeResult<Option<NodeExit>> {
        for result in frames {
            let frame = match result {
                Ok(frame) => frame,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    self.diagnostics
                        .report(Level::WARN, &format!("Discarded frame from {source}: {e}"));
                    continue;
                }
            };

            let outcome = {
                let mut ctx = RouteContext {
                    store: &mut self.store,
                    connection: Some(&mut self.connection),
                    diagnostics: &mut self.diagnostics,
                    now,
                };
                self.router.on_frame(source, frame, &mut ctx)
            };

            for (side, frame) in outcome.outbound {
                match side {
                    Side::Serial => self.send_serial(frame).await,
                    Side::Session => self.send_session(frame).await,
                }
            }

            match outcome.command {
                Some(NodeCommand::ColdReset) => return Ok(Some(NodeExit::ColdReset)),
                Some(NodeCommand::SoftRestart) => return Ok(Some(NodeExit::SoftRestart)),
                Some(NodeCommand::DisconnectSession) => {
                    // Session state already dropped by the router
                    self.close_session().await;
                }
                None => {}
            }
        }
        Ok(None)
    }

    async fn send_session(&mut self, frame: Frame) {
        if !self.connection.session_state().is_connected() {
            debug!(opcode = %frame.opcode(), "Session down, frame dropped");
            return;
        }
        if let Err(e) = self.transport.send(frame.encode()).await {
            self.diagnostics
                .report(Level::WARN, &format!("Session write failed: {e}"));
            self.connection.force_session_disconnect();
            self.close_session().await;
        }
    }

    async fn send_serial(&mut self, frame: Frame) {
        if let Err(e) = self.serial.write_frame(&frame).await {
            self.diagnostics
                .report(Level::WARN, &format!("Serial write failed: {e}"));
        }
    }

    async fn close_session(&mut self) {
        self.connection.force_session_disconnect();
        self.transport.close().await;
        self.session_codec.reset();
    }

    async fn flush_mirror(&mut self) {
        if !self.diagnostics.is_mirroring() {
            return;
        }
        for frame in self.diagnostics.drain_mirror() {
            // Mirroring failures are not reported back into the mirror
            if let Err(e) = self.serial.write_frame(&frame).await {
                debug!(error = %e, "Log mirror write failed");
                break;
            }
        }
    }

    fn log_stats(&mut self, now: Instant) {
        match self.next_stats {
            Some(at) if now < at => {}
            Some(_) => {
                debug!(
                    serial = ?self.serial_codec.stats(),
                    session = ?self.session_codec.stats(),
                    sessions = self.connection.sessions_opened(),
                    "Codec statistics"
                );
                self.next_stats = Some(now + STATS_INTERVAL);
            }
            None => self.next_stats = Some(now + STATS_INTERVAL),
        }
    }
}
