//! Sensor node
//!
//! Owns the moisture controller. Until the configuration store is confirmed
//! it asks the bridge for the server's configuration every retry period;
//! afterwards it submits telemetry on the configured interval.

use super::{exit_for_error, pause, NodeExit, STATS_INTERVAL};
use crate::config::NodeConfig;
use crate::controller::{MoistureController, MoistureSensor, Pump};
use crate::error::{NodeError, NodeResult};
use crate::observability::DiagnosticSink;
use crate::protocol::{Frame, Opcode, PacketCodec};
use crate::router::{NodeCommand, Role, RouteContext, Router, Side};
use crate::store::ConfigStore;
use crate::transport::SerialLink;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn, Instrument, Level};

pub struct SensorNode<S, P> {
    router: Router,
    store: ConfigStore,
    controller: MoistureController<S, P>,
    serial: SerialLink,
    codec: PacketCodec,
    diagnostics: DiagnosticSink,
    loop_delay: Duration,
    sync_retry: Duration,
    next_sync: Option<Instant>,
    next_stats: Option<Instant>,
}

impl<S: MoistureSensor, P: Pump> SensorNode<S, P> {
    pub fn new(config: &NodeConfig, sensor: S, pump: P, serial: SerialLink) -> Self {
        Self {
            router: Router::new(Role::Sensor),
            store: ConfigStore::new(config.sensor_defaults()),
            controller: MoistureController::new(sensor, pump, config.controller_settings()),
            serial,
            codec: PacketCodec::new(),
            // The serial line is the only way out, and it is carrying protocol frames
            diagnostics: DiagnosticSink::new(false),
            loop_delay: config.loop_delay(),
            sync_retry: config.sync_retry(),
            next_sync: None,
            next_stats: None,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn controller(&self) -> &MoistureController<S, P> {
        &self.controller
    }

    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> NodeResult<NodeExit> {
        let span = crate::node_span!(role = "sensor");
        async {
            loop {
                match self.tick(Instant::now()).await {
                    Ok(Some(exit)) => return Ok(exit),
                    Ok(None) => {}
                    Err(e) => return exit_for_error(e),
                }
                if pause(&mut shutdown, self.loop_delay).await {
                    return Ok(NodeExit::Shutdown);
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn tick(&mut self, now: Instant) -> NodeResult<Option<NodeExit>> {
        self.request_config(now).await?;

        let output = self.controller.tick(now, &self.store);
        if let Some(moisture) = output.telemetry {
            self.serial.write_frame(&Frame::telemetry(moisture)).await?;
        }

        let link = crate::link_span!(role = "sensor");
        if let Some(exit) = self.drain_serial(now).instrument(link).await? {
            return Ok(Some(exit));
        }

        self.log_stats(now);
        Ok(None)
    }

    async fn request_config(&mut self, now: Instant) -> NodeResult<()> {
        if self.store.is_confirmed() {
            self.next_sync = None;
            return Ok(());
        }
        if self.next_sync.is_some_and(|at| now < at) {
            return Ok(());
        }
        debug!("Requesting server configuration");
        let request = Frame::header_only(Opcode::ClientGetServerConfig)?;
        self.serial.write_frame(&request).await?;
        self.next_sync = Some(now + self.sync_retry);
        Ok(())
    }

    async fn drain_serial(&mut self, now: Instant) -> NodeResult<Option<NodeExit>> {
        while let Some(chunk) = self.serial.try_read() {
            for result in self.codec.feed_all(&chunk) {
                let frame = match result {
                    Ok(frame) => frame,
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => {
                        warn!(error = %e, "Discarded serial frame");
                        continue;
                    }
                };

                let outcome = {
                    let mut ctx = RouteContext {
                        store: &mut self.store,
                        connection: None,
                        diagnostics: &mut self.diagnostics,
                        now,
                    };
                    self.router.on_frame(Side::Serial, frame, &mut ctx)
                };

                for (side, reply) in outcome.outbound {
                    if side == Side::Serial {
                        self.serial.write_frame(&reply).await?;
                    } else {
                        self.diagnostics
                            .report(Level::DEBUG, "Sensor has no session, frame dropped");
                    }
                }

                match outcome.command {
                    Some(NodeCommand::ColdReset) => return Ok(Some(NodeExit::ColdReset)),
                    Some(NodeCommand::SoftRestart) => return Ok(Some(NodeExit::SoftRestart)),
                    Some(NodeCommand::DisconnectSession) | None => {}
                }
            }
        }
        if self.serial.is_closed() {
            return Err(NodeError::SerialClosed);
        }
        Ok(None)
    }

    fn log_stats(&mut self, now: Instant) {
        match self.next_stats {
            Some(at) if now < at => {}
            Some(_) => {
                debug!(
                    stats = ?self.codec.stats(),
                    state = ?self.controller.state(),
                    "Codec statistics"
                );
                self.next_stats = Some(now + STATS_INTERVAL);
            }
            None => self.next_stats = Some(now + STATS_INTERVAL),
        }
    }
}
