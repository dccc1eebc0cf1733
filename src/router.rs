//! Frame router
//!
//! Every decoded frame passes through [`Router::on_frame`] exactly once. A
//! dispatch table keyed by node role, arrival side and opcode decides whether
//! the frame is answered locally, applied, forwarded to the other side or
//! dropped. Both node roles share this one implementation.

use crate::connection::ConnectionManager;
use crate::observability::DiagnosticSink;
use crate::protocol::{Frame, Opcode};
use crate::store::ConfigStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, Level};

/// Which node this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Owns the server session and relays for the sensor node
    #[default]
    Bridge,
    /// Owns the probe and pump; talks only to the bridge
    Sensor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Bridge => write!(f, "bridge"),
            Role::Sensor => write!(f, "sensor"),
        }
    }
}

/// The hop a frame arrived on or leaves by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Serial,
    Session,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Serial => Side::Session,
            Side::Session => Side::Serial,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Serial => write!(f, "serial"),
            Side::Session => write!(f, "session"),
        }
    }
}

/// Node-level effect of a debug command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCommand {
    /// Stop the process so a supervisor cold-starts it
    ColdReset,
    /// Rebuild all node state in-process
    SoftRestart,
    /// Close the server session; attachment stays up
    DisconnectSession,
}

/// Row of the dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ReplyPong,
    RecordActivity,
    Forward,
    /// Replace the store, then pass the stored value downstream
    ApplyConfig,
    /// Answer with the current config as a config-submit frame
    ReplyConfig,
    /// Answer from the store once confirmed, otherwise ask upstream
    AnswerConfigRequest,
    Execute(NodeCommand),
    RemoteLog,
    Drop,
}

/// The dispatch table
pub fn dispatch(role: Role, side: Side, opcode: Opcode) -> Action {
    use Opcode::*;

    match (role, opcode) {
        (_, Ping) => Action::ReplyPong,
        (_, Pong) => Action::RecordActivity,
        (_, LogMessage) => Action::RemoteLog,
        (_, ServerGetClientConfig) => Action::ReplyConfig,

        (Role::Bridge, SubmitTelemetry | ClientSubmitConfig) => Action::Forward,
        (Role::Bridge, ServerSetClientConfig) if side == Side::Session => Action::ApplyConfig,
        (Role::Bridge, ClientGetServerConfig) if side == Side::Serial => {
            Action::AnswerConfigRequest
        }
        (Role::Bridge, ClientGetServerConfig) => Action::ReplyConfig,
        (Role::Bridge, DebugReset) => Action::Execute(NodeCommand::ColdReset),
        (Role::Bridge, DebugRestart) => Action::Execute(NodeCommand::SoftRestart),
        (Role::Bridge, DebugDisconnectSession) => Action::Execute(NodeCommand::DisconnectSession),

        (Role::Sensor, ServerSetClientConfig) => Action::ApplyConfig,
        (Role::Sensor, ClientGetServerConfig) => Action::ReplyConfig,

        _ => Action::Drop,
    }
}

/// Mutable node state a frame may touch
pub struct RouteContext<'a> {
    pub store: &'a mut ConfigStore,
    /// Present on the bridge only
    pub connection: Option<&'a mut ConnectionManager>,
    pub diagnostics: &'a mut DiagnosticSink,
    pub now: Instant,
}

/// Everything routing one frame produced, in emission order
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    pub outbound: Vec<(Side, Frame)>,
    pub command: Option<NodeCommand>,
}

impl RouteOutcome {
    fn send(&mut self, side: Side, frame: Frame) {
        self.outbound.push((side, frame));
    }

    /// Frames queued for one side
    pub fn frames_for(&self, side: Side) -> Vec<&Frame> {
        self.outbound
            .iter()
            .filter(|(s, _)| *s == side)
            .map(|(_, f)| f)
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Router {
    role: Role,
}

impl Router {
    pub fn new(role: Role) -> Self {
        Self { role }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn on_frame(&self, source: Side, frame: Frame, ctx: &mut RouteContext<'_>) -> RouteOutcome {
        let mut outcome = RouteOutcome::default();
        let opcode = frame.opcode();
        let action = dispatch(self.role, source, opcode);
        debug!(%opcode, %source, ?action, "Routing frame");

        match action {
            Action::ReplyPong => outcome.send(source, Frame::pong()),
            Action::RecordActivity => {
                if source == Side::Session {
                    if let Some(connection) = ctx.connection.as_deref_mut() {
                        connection.record_activity(ctx.now);
                    }
                }
            }
            Action::Forward => outcome.send(source.other(), frame),
            Action::ApplyConfig => self.apply_config(&frame, ctx, &mut outcome),
            Action::ReplyConfig => {
                if let Some(reply) = config_frame(Opcode::ClientSubmitConfig, ctx) {
                    outcome.send(source, reply);
                }
            }
            Action::AnswerConfigRequest => {
                if ctx.store.is_confirmed() {
                    if let Some(reply) = config_frame(Opcode::ServerSetClientConfig, ctx) {
                        outcome.send(source, reply);
                    }
                } else {
                    outcome.send(source.other(), frame);
                }
            }
            Action::Execute(command) => {
                info!(?command, %source, "Debug command received");
                if command == NodeCommand::DisconnectSession {
                    if let Some(connection) = ctx.connection.as_deref_mut() {
                        connection.force_session_disconnect();
                    }
                }
                outcome.command = Some(command);
            }
            Action::RemoteLog => {
                let origin = match self.role {
                    Role::Bridge => Role::Sensor,
                    Role::Sensor => Role::Bridge,
                };
                ctx.diagnostics.remote(&origin.to_string(), &frame.log_text());
            }
            Action::Drop => {
                ctx.diagnostics.report(
                    Level::WARN,
                    &format!("Dropped {opcode} frame arriving on {source}"),
                );
            }
        }

        outcome
    }

    fn apply_config(&self, frame: &Frame, ctx: &mut RouteContext<'_>, outcome: &mut RouteOutcome) {
        let applied = match ctx.store.apply_frame(frame) {
            Ok(applied) => applied,
            Err(e) => {
                ctx.diagnostics
                    .report(Level::WARN, &format!("Config frame rejected: {e}"));
                return;
            }
        };
        info!(?applied, revision = ctx.store.revision(), "Configuration confirmed");

        // Forward is encoded from the store only after it has been updated
        if self.role == Role::Bridge {
            if let Some(forward) = config_frame(Opcode::ServerSetClientConfig, ctx) {
                outcome.send(Side::Serial, forward);
            }
        }
    }
}

fn config_frame(opcode: Opcode, ctx: &mut RouteContext<'_>) -> Option<Frame> {
    match Frame::config(opcode, &ctx.store.get()) {
        Ok(frame) => Some(frame),
        Err(e) => {
            ctx.diagnostics
                .report(Level::ERROR, &format!("Cannot encode config: {e}"));
            None
        }
    }
}
