//! Diagnostic sink
//!
//! Every diagnostic becomes a tracing event. On the bridge it can also be
//! mirrored down the serial line as LOG_MESSAGE frames so the sensor node's
//! console shows what the bridge is doing. Log text received from a peer is
//! re-emitted under [`REMOTE_TARGET`] and never relayed any further.

use crate::protocol::Frame;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn, Level};

/// Target for log lines received from the peer node
pub const REMOTE_TARGET: &str = "soilbridge::remote";

/// Mirrored frames kept while the link is busy; oldest dropped first
const MIRROR_BACKLOG: usize = 32;

static SECRET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(password|auth|token|key|secret)([=:]\s*)\S+").ok());

/// Mask credential-looking `name=value` pairs
pub fn sanitize(message: &str) -> String {
    match SECRET_PATTERN.as_ref() {
        Some(pattern) => pattern.replace_all(message, "${1}${2}***").into_owned(),
        None => message.to_string(),
    }
}

#[derive(Debug)]
pub struct DiagnosticSink {
    mirror: bool,
    backlog: VecDeque<Frame>,
    dropped: u64,
}

impl DiagnosticSink {
    pub fn new(mirror: bool) -> Self {
        Self {
            mirror,
            backlog: VecDeque::with_capacity(MIRROR_BACKLOG),
            dropped: 0,
        }
    }

    pub fn is_mirroring(&self) -> bool {
        self.mirror
    }

    /// Record a local diagnostic
    pub fn report(&mut self, level: Level, message: &str) {
        let message = sanitize(message);
        if level == Level::ERROR {
            error!("{message}");
        } else if level == Level::WARN {
            warn!("{message}");
        } else if level == Level::INFO {
            info!("{message}");
        } else {
            debug!("{message}");
        }

        if self.mirror && level <= Level::INFO {
            if self.backlog.len() == MIRROR_BACKLOG {
                self.backlog.pop_front();
                self.dropped += 1;
            }
            self.backlog.push_back(Frame::log(&message));
        }
    }

    /// Record a log line received from the peer
    pub fn remote(&self, origin: &str, text: &str) {
        let text = text.trim_end_matches(['\r', '\n']);
        info!(target: REMOTE_TARGET, origin, "[{origin}] {text}");
    }

    /// Take every frame waiting to be mirrored
    pub fn drain_mirror(&mut self) -> Vec<Frame> {
        self.backlog.drain(..).collect()
    }

    /// Frames discarded because the backlog was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new(false)
    }
}
