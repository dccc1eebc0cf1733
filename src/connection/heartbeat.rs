//! Session liveness probing
//!
//! While a session is up a probe goes out every `interval`. Any received byte
//! counts as liveness; if nothing arrives for `timeout` the session is
//! declared dead once and the monitor goes quiet until the next session.

use std::time::{Duration, Instant};

/// What the caller should do after polling the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Nothing due
    Idle,
    /// Send a PING frame now
    SendPing,
    /// Peer has been silent for longer than the timeout; close the session
    TimedOut { silent_for: Duration },
}

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    active: bool,
    last_ping: Option<Instant>,
    last_received: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            active: false,
            last_ping: None,
            last_received: None,
        }
    }

    /// Begin monitoring a freshly opened session
    pub fn start(&mut self, now: Instant) {
        self.active = true;
        self.last_ping = Some(now);
        self.last_received = Some(now);
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn record_activity(&mut self, now: Instant) {
        self.last_received = Some(now);
    }

    pub fn last_received(&self) -> Option<Instant> {
        self.last_received
    }

    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if !self.active {
            return HeartbeatAction::Idle;
        }

        let silent_for = self
            .last_received
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
        if silent_for >= self.timeout {
            self.active = false;
            return HeartbeatAction::TimedOut { silent_for };
        }

        let since_ping = self
            .last_ping
            .map_or(self.interval, |at| now.saturating_duration_since(at));
        if since_ping >= self.interval {
            self.last_ping = Some(now);
            return HeartbeatAction::SendPing;
        }

        HeartbeatAction::Idle
    }
}
